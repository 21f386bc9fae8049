//! Provider session and the table of resolved counter handles.

use std::collections::HashSet;
use std::marker::PhantomData;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::CollectResult;
use crate::error::CollectorError;
use crate::error::ProviderError;
use crate::provider::CounterProvider;
use crate::registry::MetricDefinition;
use crate::registry::MetricId;
use crate::registry::MetricRegistry;
use crate::resolver;

/// One metric bound to one concrete hardware instance.
#[derive(Debug)]
pub struct ResolvedInstance<C> {
    pub(crate) counter: C,
    pub(crate) label: String,
    pub(crate) path: String,
}

impl<C> ResolvedInstance<C> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug)]
pub(crate) struct MetricEntry<C> {
    pub(crate) instances: Vec<ResolvedInstance<C>>,
}

impl<C> Default for MetricEntry<C> {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
        }
    }
}

/// Counts of handle table changes made by one re-resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReresolveSummary {
    pub added: usize,
    pub removed: usize,
}

/// The single provider session plus every handle registered on it.
///
/// Entries are indexed by [`MetricId`]; a handle is released either when its
/// entry is removed or, together with all others, when the session is torn
/// down.
pub struct CollectionSession<P: CounterProvider> {
    pub(crate) session: Option<P::Session>,
    pub(crate) entries: Vec<MetricEntry<P::Counter>>,
    pub(crate) needs_reresolve: bool,
    _provider: PhantomData<fn() -> P>,
}

impl<P: CounterProvider> CollectionSession<P> {
    /// Opens the session, resolves every metric and takes a baseline sample.
    ///
    /// Per-metric and per-instance failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::ProviderUnavailable`] if no session can be opened
    /// - [`CollectorError::SessionClosed`] if the session dies while it is being built
    pub fn build(provider: &P, registry: &MetricRegistry) -> CollectResult<Self> {
        let session = provider
            .open_session()
            .change_context(CollectorError::ProviderUnavailable)?;

        let mut this = Self {
            session: Some(session),
            entries: registry.iter().map(|_| MetricEntry::default()).collect(),
            needs_reresolve: false,
            _provider: PhantomData,
        };

        for (id, definition) in registry.iter() {
            if let Err(report) = this.sync_metric(provider, id, definition) {
                this.teardown(provider);
                return Err(report.attach_printable("session closed during resolution"));
            }
        }

        if let Err(report) = this.refresh(provider) {
            if report.current_context() == &CollectorError::SessionClosed {
                this.teardown(provider);
                return Err(report.attach_printable("session closed during baseline refresh"));
            }
            tracing::warn!("baseline refresh failed, first cycle will resample: {report:?}");
        }

        tracing::info!(
            metrics = registry.len(),
            instances = this.instance_count(),
            "counter session built"
        );
        Ok(this)
    }

    /// Re-runs wildcard resolution for every metric without closing the session.
    ///
    /// Handles for instances that still exist are kept, vanished ones are
    /// released and new ones registered. A metric whose resolution fails keeps
    /// its current handles.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::SessionClosed`] if the session is gone
    pub fn reresolve(
        &mut self,
        provider: &P,
        registry: &MetricRegistry,
    ) -> CollectResult<ReresolveSummary> {
        if self.session.is_none() {
            return Err(Report::new(CollectorError::SessionClosed));
        }

        let mut summary = ReresolveSummary::default();
        for (id, definition) in registry.iter() {
            let changed = self.sync_metric(provider, id, definition)?;
            summary.added += changed.added;
            summary.removed += changed.removed;
        }
        self.needs_reresolve = false;

        if summary.added > 0 {
            // New counters need a first sample before they can be read.
            if let Err(report) = self.refresh(provider) {
                if report.current_context() == &CollectorError::SessionClosed {
                    return Err(report);
                }
                tracing::warn!("refresh after re-resolution failed: {report:?}");
            }
        }

        if summary != ReresolveSummary::default() {
            tracing::info!(
                added = summary.added,
                removed = summary.removed,
                "counter instances changed"
            );
        }
        Ok(summary)
    }

    /// Brings one metric's handle list in line with the instances that exist now.
    ///
    /// Only a lost session is an error; anything else omits the metric or the
    /// instance and is logged.
    fn sync_metric(
        &mut self,
        provider: &P,
        id: MetricId,
        definition: &MetricDefinition,
    ) -> CollectResult<ReresolveSummary> {
        let mut summary = ReresolveSummary::default();
        let Some(session) = self.session.as_ref() else {
            return Err(Report::new(CollectorError::SessionClosed));
        };

        let expanded = match resolver::resolve(provider, session, &definition.pattern) {
            Ok(expanded) => expanded,
            Err(report) if is_session_lost(&report) => {
                return Err(report.change_context(CollectorError::SessionClosed));
            }
            Err(report) => {
                if resolver::is_zero_size_report(&report) {
                    tracing::error!(
                        metric = %definition.name,
                        "provider reported an unexpected zero buffer size, metric omitted: {report:?}"
                    );
                } else {
                    tracing::warn!(metric = %definition.name, "metric omitted: {report:?}");
                }
                return Ok(summary);
            }
        };

        let entry = &mut self.entries[id.index()];
        let current: HashSet<&str> = expanded.iter().map(|e| e.instance.as_str()).collect();

        let mut idx = 0;
        while idx < entry.instances.len() {
            if current.contains(entry.instances[idx].label.as_str()) {
                idx += 1;
                continue;
            }
            let gone = entry.instances.remove(idx);
            tracing::info!(metric = %definition.name, instance = %gone.label, "instance disappeared");
            provider.remove_counter(gone.counter);
            summary.removed += 1;
        }

        for path in expanded {
            if entry.instances.iter().any(|i| i.label == path.instance) {
                continue;
            }
            match provider.add_counter(session, &path.path) {
                Ok(counter) => {
                    entry.instances.push(ResolvedInstance {
                        counter,
                        label: path.instance,
                        path: path.path,
                    });
                    summary.added += 1;
                }
                Err(report) if *report.current_context() == ProviderError::SessionClosed => {
                    return Err(report.change_context(CollectorError::SessionClosed));
                }
                Err(report) => {
                    tracing::warn!(
                        metric = %definition.name,
                        path = %path.path,
                        "failed to add expanded counter, instance skipped: {report:?}"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Takes one synchronized sample of every registered handle.
    pub(crate) fn refresh(&self, provider: &P) -> CollectResult<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(Report::new(CollectorError::SessionClosed));
        };
        provider.refresh(session).map_err(|report| {
            let context = match report.current_context() {
                ProviderError::SessionClosed => CollectorError::SessionClosed,
                _ => CollectorError::TransientSample,
            };
            report.change_context(context)
        })
    }

    /// Drops one instance whose handle went stale and schedules re-resolution.
    pub(crate) fn drop_instance(&mut self, provider: &P, id: MetricId, idx: usize) {
        let entry = &mut self.entries[id.index()];
        if idx >= entry.instances.len() {
            return;
        }
        let stale = entry.instances.remove(idx);
        provider.remove_counter(stale.counter);
        self.needs_reresolve = true;
    }

    /// Closes the provider session. Safe to call more than once.
    pub fn teardown(&mut self, provider: &P) {
        // Closing the session releases every counter registered on it.
        for entry in &mut self.entries {
            entry.instances.clear();
        }
        if let Some(mut session) = self.session.take() {
            provider.close_session(&mut session);
            tracing::info!("counter session closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn needs_reresolve(&self) -> bool {
        self.needs_reresolve
    }

    pub fn instances(&self, id: MetricId) -> &[ResolvedInstance<P::Counter>] {
        self.entries
            .get(id.index())
            .map(|e| e.instances.as_slice())
            .unwrap_or_default()
    }

    pub fn instance_count(&self) -> usize {
        self.entries.iter().map(|e| e.instances.len()).sum()
    }
}

/// Whether a resolution failure was caused by the session going away.
fn is_session_lost(report: &Report<CollectorError>) -> bool {
    report
        .downcast_ref::<ProviderError>()
        .is_some_and(|e| *e == ProviderError::SessionClosed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::fake::ExpansionFault;
    use crate::fake::FakeProvider;
    use crate::fake::RefreshFault;

    fn registry() -> MetricRegistry {
        MetricRegistry::new(vec![
            MetricDefinition::gauge(r"\PhysicalDisk(*)\Avg. Disk sec/Read", "read_latency", "r"),
            MetricDefinition::gauge(r"\PhysicalDisk(*)\Disk Reads/sec", "reads", "n"),
        ])
    }

    fn labels(session: &CollectionSession<Arc<FakeProvider>>, id: usize) -> Vec<String> {
        session
            .instances(MetricId(id))
            .iter()
            .map(|i| i.label().to_string())
            .collect()
    }

    #[test]
    fn build_resolves_every_metric_and_takes_baseline() {
        let provider = Arc::new(FakeProvider::with_disks(&["0 C:", "1 D:", "_Total"]));

        let session = CollectionSession::build(&provider, &registry()).expect("build");

        assert_eq!(labels(&session, 0), vec!["0", "1"]);
        assert_eq!(labels(&session, 1), vec!["0", "1"]);
        assert_eq!(session.instances(MetricId(0))[0].path(), r"\PhysicalDisk(0 C:)\Avg. Disk sec/Read");
        assert_eq!(provider.refresh_count(), 1);
        // wildcard counters used for resolution are released again
        assert_eq!(provider.live_counters(), 4);
    }

    #[test]
    fn unavailable_provider_fails_construction() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        provider.set_unavailable(true);

        let err = CollectionSession::build(&provider, &registry()).err().expect("should fail");
        assert_eq!(err.current_context(), &CollectorError::ProviderUnavailable);
    }

    #[test]
    fn invalid_pattern_omits_only_that_metric() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        provider.reject_counter("Disk Reads/sec");

        let session = CollectionSession::build(&provider, &registry()).expect("build");

        assert_eq!(labels(&session, 0), vec!["0"]);
        assert!(labels(&session, 1).is_empty());
    }

    #[test]
    fn rejected_instance_path_skips_only_that_instance() {
        let provider = Arc::new(FakeProvider::with_disks(&["0", "1", "2"]));
        provider.reject_instance_path(r"\PhysicalDisk(1)\Avg. Disk sec/Read");

        let session = CollectionSession::build(&provider, &registry()).expect("build");

        assert_eq!(labels(&session, 0), vec!["0", "2"]);
        assert_eq!(labels(&session, 1), vec!["0", "1", "2"]);
        assert_eq!(provider.live_counters(), 5);
    }

    #[test]
    fn failed_expansion_omits_metrics_without_failing_build() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        provider.set_expansion_fault(Some(ExpansionFault::ZeroSize));

        let session = CollectionSession::build(&provider, &registry()).expect("build");
        assert_eq!(session.instance_count(), 0);
        assert!(session.is_open());
    }

    #[test]
    fn baseline_session_closed_is_fatal() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        provider.fail_next_refresh(RefreshFault::SessionClosed);

        let err = CollectionSession::build(&provider, &registry()).err().expect("should fail");
        assert_eq!(err.current_context(), &CollectorError::SessionClosed);
        assert_eq!(provider.live_counters(), 0);
    }

    #[test]
    fn reresolve_tracks_hot_add_and_remove() {
        let provider = Arc::new(FakeProvider::with_disks(&["0", "1"]));
        let mut session = CollectionSession::build(&provider, &registry()).expect("build");

        provider.remove_instance("PhysicalDisk", "1");
        provider.add_instance("PhysicalDisk", "2");
        let summary = session.reresolve(&provider, &registry()).expect("reresolve");

        assert_eq!(summary, ReresolveSummary { added: 2, removed: 2 });
        assert_eq!(labels(&session, 0), vec!["0", "2"]);
        assert_eq!(provider.live_counters(), 4);
        assert_eq!(provider.sessions_opened(), 1);
    }

    #[test]
    fn reresolve_without_changes_keeps_handles() {
        let provider = Arc::new(FakeProvider::with_disks(&["0", "1"]));
        let mut session = CollectionSession::build(&provider, &registry()).expect("build");
        let refreshes = provider.refresh_count();

        let summary = session.reresolve(&provider, &registry()).expect("reresolve");

        assert_eq!(summary, ReresolveSummary::default());
        assert_eq!(provider.refresh_count(), refreshes);
    }

    #[test]
    fn reresolve_reports_lost_session() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        let mut session = CollectionSession::build(&provider, &registry()).expect("build");

        provider.lose_sessions();
        let err = session.reresolve(&provider, &registry()).unwrap_err();

        assert_eq!(err.current_context(), &CollectorError::SessionClosed);
    }

    #[test]
    fn teardown_closes_once() {
        let provider = Arc::new(FakeProvider::with_disks(&["0"]));
        let mut session = CollectionSession::build(&provider, &registry()).expect("build");

        session.teardown(&provider);
        session.teardown(&provider);

        assert!(!session.is_open());
        assert_eq!(session.instance_count(), 0);
        assert_eq!(provider.open_sessions(), 0);
        assert_eq!(provider.live_counters(), 0);
    }
}
