use std::collections::hash_map::Entry;
use std::collections::HashMap;

use error_stack::Report;
use error_stack::ResultExt;
use pdh_collector::Sample;
use pdh_collector::ValueKind;
use prometheus::CounterVec;
use prometheus::Encoder;
use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use super::EncodeError;
use super::MetricsEncoder;

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

/// Prometheus text exposition encoder
///
/// Builds a fresh registry per scrape so instances that vanished between
/// scrapes are not reported with stale values.
pub struct PrometheusEncoder {
    label_name: String,
}

impl PrometheusEncoder {
    pub fn new(label_name: &str) -> Self {
        Self {
            label_name: label_name.to_string(),
        }
    }

    fn family(&self, registry: &Registry, sample: &Sample) -> Result<Family, Report<EncodeError>> {
        let register_failed = || EncodeError::Register {
            name: sample.name.clone(),
        };
        let help = if sample.help.is_empty() {
            sample.name.clone()
        } else {
            sample.help.clone()
        };
        let opts = Opts::new(sample.name.clone(), help);
        let labels = [self.label_name.as_str()];

        let family = match sample.kind {
            ValueKind::Gauge => {
                let vec = GaugeVec::new(opts, &labels).change_context_lazy(register_failed)?;
                registry
                    .register(Box::new(vec.clone()))
                    .change_context_lazy(register_failed)?;
                Family::Gauge(vec)
            }
            ValueKind::Counter => {
                let vec = CounterVec::new(opts, &labels).change_context_lazy(register_failed)?;
                registry
                    .register(Box::new(vec.clone()))
                    .change_context_lazy(register_failed)?;
                Family::Counter(vec)
            }
        };
        Ok(family)
    }
}

impl MetricsEncoder for PrometheusEncoder {
    fn encode(&self, samples: &[Sample], _timestamp: i64) -> Result<String, Report<EncodeError>> {
        let registry = Registry::new();
        let mut families: HashMap<&str, Family> = HashMap::new();

        for sample in samples {
            let family = match families.entry(sample.name.as_str()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.family(&registry, sample)?),
            };
            match family {
                Family::Gauge(vec) => vec.with_label_values(&[sample.label.as_str()]).set(sample.value),
                // Counters only move forward; a fresh series starts at the reported total.
                Family::Counter(vec) => vec
                    .with_label_values(&[sample.label.as_str()])
                    .inc_by(sample.value.max(0.0)),
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .change_context(EncodeError::Render)?;
        String::from_utf8(buffer).change_context(EncodeError::Render)
    }

    fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample(name: &str, kind: ValueKind, label: &str, value: f64) -> Sample {
        Sample {
            name: name.to_string(),
            help: format!("{name} help"),
            kind,
            label: label.to_string(),
            value,
        }
    }

    #[test]
    fn renders_gauge_family_per_metric() {
        let encoder = PrometheusEncoder::new("disk");
        let samples = vec![
            sample("windows_physical_disk_requests_queued", ValueKind::Gauge, "0", 2.0),
            sample("windows_physical_disk_requests_queued", ValueKind::Gauge, "1", 0.5),
        ];

        let text = encoder.encode(&samples, 0).expect("encode");

        assert_eq!(
            text,
            "# HELP windows_physical_disk_requests_queued windows_physical_disk_requests_queued help\n\
             # TYPE windows_physical_disk_requests_queued gauge\n\
             windows_physical_disk_requests_queued{disk=\"0\"} 2\n\
             windows_physical_disk_requests_queued{disk=\"1\"} 0.5\n"
        );
    }

    #[test]
    fn counter_kind_renders_as_counter() {
        let encoder = PrometheusEncoder::new("disk");
        let text = encoder
            .encode(&[sample("disk_ops_total", ValueKind::Counter, "0", 42.0)], 0)
            .expect("encode");

        assert!(text.contains("# TYPE disk_ops_total counter"));
        assert!(text.contains("disk_ops_total{disk=\"0\"} 42"));
    }

    #[test]
    fn invalid_metric_name_fails_registration() {
        let encoder = PrometheusEncoder::new("disk");
        let invalid = vec![sample("not a metric name", ValueKind::Gauge, "0", 1.0)];

        let err = encoder.encode(&invalid, 0).unwrap_err();

        assert!(matches!(err.current_context(), EncodeError::Register { .. }));
    }

    #[test]
    fn empty_scrape_renders_nothing() {
        let encoder = PrometheusEncoder::new("disk");
        assert_eq!(encoder.encode(&[], 0).expect("encode"), "");
    }
}
