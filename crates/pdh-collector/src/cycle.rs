//! One refresh-and-read pass over every resolved counter.

use std::time::Duration;
use std::time::Instant;

use error_stack::Report;
use serde::Serialize;

use crate::error::CollectResult;
use crate::error::CollectorError;
use crate::error::ProviderError;
use crate::filter::InstanceFilter;
use crate::provider::CounterProvider;
use crate::registry::MetricRegistry;
use crate::registry::ValueKind;
use crate::session::CollectionSession;

/// One emitted value of one metric for one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub kind: ValueKind,
    /// Instance identifier, e.g. the disk number.
    pub label: String,
    pub value: f64,
}

/// Refreshes the session once and reads every admitted instance.
///
/// Instances rejected by `filter` are neither read nor emitted. A read that
/// reports a vanished instance drops that handle and schedules re-resolution;
/// any other read failure skips the value for this cycle only. Samples are
/// ordered by metric registration order, then by instance resolution order.
///
/// # Errors
///
/// - [`CollectorError::SessionClosed`] if the refresh finds the session gone
/// - [`CollectorError::TransientSample`] if the refresh fails otherwise, or the
///   whole pass took longer than `timeout`
pub fn run_cycle<P: CounterProvider>(
    provider: &P,
    session: &mut CollectionSession<P>,
    registry: &MetricRegistry,
    filter: &InstanceFilter,
    timeout: Duration,
) -> CollectResult<Vec<Sample>> {
    let started = Instant::now();
    session.refresh(provider)?;

    let mut samples = Vec::with_capacity(session.instance_count());
    let mut stale = Vec::new();

    for (id, definition) in registry.iter() {
        for (idx, instance) in session.instances(id).iter().enumerate() {
            if !filter.admits(&instance.label) {
                continue;
            }
            match provider.read_value(&instance.counter) {
                Ok(value) => samples.push(Sample {
                    name: definition.name.clone(),
                    help: definition.help.clone(),
                    kind: definition.kind,
                    label: instance.label.clone(),
                    value,
                }),
                Err(report) if report.current_context() == &ProviderError::StaleHandle => {
                    tracing::info!(
                        metric = %definition.name,
                        instance = %instance.label,
                        "instance vanished, dropping handle"
                    );
                    stale.push((id, idx));
                }
                Err(report) => {
                    tracing::warn!(
                        metric = %definition.name,
                        instance = %instance.label,
                        "failed to read counter value: {report:?}"
                    );
                }
            }
        }
    }

    // Highest index first so earlier indices stay valid.
    for (id, idx) in stale.into_iter().rev() {
        session.drop_instance(provider, id, idx);
    }

    let elapsed = started.elapsed();
    if elapsed > timeout {
        tracing::warn!(?elapsed, ?timeout, "sampling cycle exceeded its time bound");
        return Err(Report::new(CollectorError::TransientSample)
            .attach_printable(format!("cycle took {elapsed:?}, bound is {timeout:?}")));
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::fake::FakeProvider;
    use crate::fake::RefreshFault;
    use crate::registry::MetricDefinition;

    fn registry() -> MetricRegistry {
        MetricRegistry::new(vec![
            MetricDefinition::gauge(r"disk(*)\avg-latency", "avg_latency", "Average latency"),
            MetricDefinition::gauge(r"disk(*)\queue-depth", "queue_depth", "Queue depth"),
        ])
    }

    fn setup(disks: &[&str]) -> (Arc<FakeProvider>, CollectionSession<Arc<FakeProvider>>) {
        let provider = Arc::new(FakeProvider::new());
        provider.set_instances("disk", disks);
        let session = CollectionSession::build(&provider, &registry()).expect("build");
        (provider, session)
    }

    fn pairs(samples: &[Sample]) -> Vec<(String, String, f64)> {
        samples
            .iter()
            .map(|s| (s.name.clone(), s.label.clone(), s.value))
            .collect()
    }

    #[test]
    fn emits_in_registration_then_resolution_order() {
        let (provider, mut session) = setup(&["0", "1"]);
        provider.set_value("0", 1.5);
        provider.set_value("1", 2.5);

        let samples = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::from_secs(5),
        )
        .expect("cycle");

        assert_eq!(
            pairs(&samples),
            vec![
                ("avg_latency".to_string(), "0".to_string(), 1.5),
                ("avg_latency".to_string(), "1".to_string(), 2.5),
                ("queue_depth".to_string(), "0".to_string(), 1.5),
                ("queue_depth".to_string(), "1".to_string(), 2.5),
            ]
        );
        assert_eq!(samples[0].help, "Average latency");
        assert_eq!(samples[0].kind, ValueKind::Gauge);
    }

    #[test]
    fn filtered_instances_are_not_read() {
        let (provider, mut session) = setup(&["0", "1"]);
        provider.fail_reads("0");
        let filter = InstanceFilter::new(".+", "0").expect("filter");

        let samples = run_cycle(&provider, &mut session, &registry(), &filter, Duration::from_secs(5))
            .expect("cycle");

        assert!(samples.iter().all(|s| s.label == "1"));
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn read_failure_skips_only_that_value() {
        let (provider, mut session) = setup(&["0", "1"]);
        provider.fail_reads("1");

        let samples = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::from_secs(5),
        )
        .expect("cycle");

        assert!(samples.iter().all(|s| s.label == "0"));
        assert!(!session.needs_reresolve());
        assert_eq!(session.instance_count(), 4);
    }

    #[test]
    fn stale_instance_is_dropped_and_reresolve_scheduled() {
        let (provider, mut session) = setup(&["0", "1", "2"]);
        provider.remove_instance("disk", "1");

        let samples = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::from_secs(5),
        )
        .expect("cycle");

        assert_eq!(samples.len(), 4);
        assert!(session.needs_reresolve());
        let remaining: Vec<_> = session
            .instances(crate::registry::MetricId(0))
            .iter()
            .map(|i| i.label().to_string())
            .collect();
        assert_eq!(remaining, vec!["0", "2"]);
        assert_eq!(provider.live_counters(), 4);
    }

    #[test]
    fn refresh_failures_map_to_engine_errors() {
        let (provider, mut session) = setup(&["0"]);

        provider.fail_next_refresh(RefreshFault::Transient);
        let err = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert_eq!(err.current_context(), &CollectorError::TransientSample);

        provider.fail_next_refresh(RefreshFault::SessionClosed);
        let err = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert_eq!(err.current_context(), &CollectorError::SessionClosed);
    }

    #[test]
    fn overrun_cycle_is_transient() {
        let (provider, mut session) = setup(&["0"]);

        let err = run_cycle(
            &provider,
            &mut session,
            &registry(),
            &InstanceFilter::default(),
            Duration::ZERO,
        )
        .unwrap_err();

        assert_eq!(err.current_context(), &CollectorError::TransientSample);
    }
}
