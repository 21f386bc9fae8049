use std::collections::BTreeSet;
use std::sync::Arc;

use pdh_collector::fake::FakeProvider;
use pdh_collector::fake::RefreshFault;
use pdh_collector::registry;
use pdh_collector::Collector;
use pdh_collector::CollectorConfig;
use pdh_collector::MetricDefinition;
use pdh_collector::MetricRegistry;
use pdh_collector::Sample;
use pdh_collector::SampleSource;
use similar_asserts::assert_eq;
use test_log::test;

const LATENCY: &str = r"disk(*)\avg-latency";
const QUEUE: &str = r"disk(*)\queue-depth";

fn disk_registry() -> MetricRegistry {
    MetricRegistry::new(vec![
        MetricDefinition::gauge(LATENCY, "disk_avg_latency", "Average latency"),
        MetricDefinition::gauge(QUEUE, "disk_queue_depth", "Queue depth"),
    ])
}

fn provider(instances: &[&str]) -> Arc<FakeProvider> {
    let provider = Arc::new(FakeProvider::new());
    provider.set_instances("disk", instances);
    provider
}

fn build(provider: &Arc<FakeProvider>, config: &CollectorConfig) -> Collector<Arc<FakeProvider>> {
    Collector::new(provider.clone(), disk_registry(), config).expect("collector")
}

fn labels_of(samples: &[Sample], metric: &str) -> Vec<String> {
    samples
        .iter()
        .filter(|s| s.name == metric)
        .map(|s| s.label.clone())
        .collect()
}

#[test]
fn two_instances_yield_two_samples_per_metric() {
    let provider = provider(&["0", "1", "_Total"]);
    provider.set_value("0", 0.004);
    provider.set_value("1", 0.012);
    let collector = build(&provider, &CollectorConfig::default());

    let samples = collector.collect().expect("collect");

    for metric in ["disk_avg_latency", "disk_queue_depth"] {
        assert_eq!(labels_of(&samples, metric), vec!["0", "1"]);
    }
    assert!(samples.iter().all(|s| s.label != "_Total"));
    assert_eq!(samples[1].value, 0.012);
}

#[test]
fn metric_without_instances_yields_nothing_and_no_error() {
    let provider = provider(&["0"]);
    provider.set_instances("cpu", &[]);
    let registry = MetricRegistry::new(vec![
        MetricDefinition::gauge(LATENCY, "disk_avg_latency", "Average latency"),
        MetricDefinition::gauge(r"cpu(*)\busy", "cpu_busy", "Busy"),
    ]);
    let collector =
        Collector::new(provider.clone(), registry, &CollectorConfig::default()).expect("collector");

    let samples = collector.collect().expect("collect");

    assert!(labels_of(&samples, "cpu_busy").is_empty());
    assert_eq!(labels_of(&samples, "disk_avg_latency"), vec!["0"]);
}

#[test]
fn aggregate_instance_never_resolved() {
    let provider = provider(&["_Total", "0"]);
    let collector = build(&provider, &CollectorConfig::default());

    for _ in 0..3 {
        collector.reresolve().expect("reresolve");
        for labels in collector.resolved_labels() {
            assert_eq!(labels, vec!["0"]);
        }
    }
}

#[test]
fn labels_are_stable_across_cycles() {
    let provider = provider(&["0", "1", "2"]);
    let collector = build(&provider, &CollectorConfig::default());

    let first: BTreeSet<_> = collector
        .collect()
        .expect("first")
        .into_iter()
        .map(|s| (s.name, s.label))
        .collect();
    let second: BTreeSet<_> = collector
        .collect()
        .expect("second")
        .into_iter()
        .map(|s| (s.name, s.label))
        .collect();

    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
}

#[test]
fn stale_handle_drops_exactly_one_instance() {
    let provider = provider(&["0", "1"]);
    let registry = MetricRegistry::new(vec![
        MetricDefinition::gauge(LATENCY, "disk_avg_latency", "Average latency"),
        MetricDefinition::gauge(r"volume(*)\free", "volume_free", "Free space"),
    ]);
    provider.set_instances("volume", &["1"]);
    let collector =
        Collector::new(provider.clone(), registry, &CollectorConfig::default()).expect("collector");

    provider.remove_instance("disk", "1");
    let samples = collector.collect().expect("collect");

    assert_eq!(labels_of(&samples, "disk_avg_latency"), vec!["0"]);
    assert_eq!(labels_of(&samples, "volume_free"), vec!["1"]);
    assert_eq!(collector.resolved_labels(), vec![vec!["0".to_string()], vec!["1".to_string()]]);
}

#[test]
fn vanished_instance_comes_back_after_reresolution() {
    let provider = provider(&["0", "1"]);
    let collector = build(&provider, &CollectorConfig::default());

    provider.remove_instance("disk", "1");
    collector.collect().expect("collect with stale instance");
    provider.add_instance("disk", "1");
    provider.add_instance("disk", "3");

    // The stale drop scheduled a re-resolution that runs before this cycle.
    let samples = collector.collect().expect("collect after re-resolution");

    assert_eq!(labels_of(&samples, "disk_avg_latency"), vec!["0", "1", "3"]);
    assert_eq!(provider.sessions_opened(), 1);
}

#[test]
fn transient_refresh_failure_is_recoverable() {
    let provider = provider(&["0", "1"]);
    let collector = build(&provider, &CollectorConfig::default());

    provider.fail_next_refresh(RefreshFault::Transient);
    let err = collector.collect().unwrap_err();
    assert!(err.current_context().is_recoverable());

    let samples = collector.collect().expect("collect after fault clears");
    assert_eq!(samples.len(), 4);
    assert_eq!(provider.sessions_opened(), 1);
}

#[test]
fn allow_and_deny_patterns_are_applied() {
    let provider = provider(&["0", "1", "2"]);
    let config = CollectorConfig {
        allow_pattern: "0|1".to_string(),
        deny_pattern: "1".to_string(),
        ..CollectorConfig::default()
    };
    let collector = build(&provider, &config);

    let samples = collector.collect().expect("collect");

    let labels: BTreeSet<_> = samples.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, BTreeSet::from(["0"]));
}

#[test]
fn allow_pattern_must_match_whole_label() {
    let provider = provider(&["1", "10"]);
    let config = CollectorConfig {
        allow_pattern: "1".to_string(),
        ..CollectorConfig::default()
    };
    let collector = build(&provider, &config);

    let samples = collector.collect().expect("collect");
    assert_eq!(labels_of(&samples, "disk_avg_latency"), vec!["1"]);
}

#[test]
fn session_loss_is_fatal_for_the_scrape_then_rebuilt() {
    let provider = provider(&["0"]);
    let collector: Box<dyn SampleSource> = Box::new(build(&provider, &CollectorConfig::default()));

    provider.fail_next_refresh(RefreshFault::SessionClosed);
    let err = collector.collect().unwrap_err();
    assert!(!err.current_context().is_recoverable());

    assert_eq!(collector.collect().expect("collect after rebuild").len(), 2);

    collector.shutdown();
    assert_eq!(provider.open_sessions(), 0);
}

#[test]
fn physical_disk_registry_resolves_against_physical_disk_object() {
    let provider = Arc::new(FakeProvider::with_disks(&["0 C:", "1 D: E:", "_Total"]));
    let collector = Collector::new(
        provider.clone(),
        registry::physical_disk(),
        &CollectorConfig::default(),
    )
    .expect("collector");

    let samples = collector.collect().expect("collect");

    assert_eq!(samples.len(), registry::physical_disk().len() * 2);
    assert!(samples
        .iter()
        .all(|s| s.name.starts_with(registry::PHYSICAL_DISK_NAMESPACE)));
    let labels: BTreeSet<_> = samples.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, BTreeSet::from(["0", "1"]));
}
