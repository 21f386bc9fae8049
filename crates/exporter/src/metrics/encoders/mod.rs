use core::error::Error;

use derive_more::Display;
use error_stack::Report;
use pdh_collector::Sample;

use crate::config::MetricsFormat;

pub mod json;
pub mod prometheus;

#[derive(Debug, Display)]
pub enum EncodeError {
    #[display("Failed to register metric `{name}`")]
    Register { name: String },
    #[display("Failed to render metrics")]
    Render,
}

impl Error for EncodeError {}

/// Trait for encoding collected samples into a wire format
pub trait MetricsEncoder: Send + Sync {
    /// Encode one scrape worth of samples taken at `timestamp` (Unix millis)
    fn encode(&self, samples: &[Sample], timestamp: i64) -> Result<String, Report<EncodeError>>;

    /// HTTP content type of the encoded output
    fn content_type(&self) -> &'static str;
}

/// Creates the encoder for `format`, labelling each sample's instance as `label_name`
pub fn create_encoder(format: MetricsFormat, label_name: &str) -> Box<dyn MetricsEncoder> {
    match format {
        MetricsFormat::Prometheus => Box::new(prometheus::PrometheusEncoder::new(label_name)),
        MetricsFormat::Json => Box::new(json::JsonEncoder::new(label_name)),
    }
}

#[cfg(test)]
mod tests {
    use pdh_collector::ValueKind;

    use super::*;

    #[test]
    fn create_encoder_selects_format() {
        let samples = vec![Sample {
            name: "windows_physical_disk_reads_per_second".to_string(),
            help: "Reads".to_string(),
            kind: ValueKind::Gauge,
            label: "0".to_string(),
            value: 3.0,
        }];

        let text = create_encoder(MetricsFormat::Prometheus, "disk")
            .encode(&samples, 0)
            .expect("encode");
        assert!(text.contains("# TYPE windows_physical_disk_reads_per_second gauge"));

        let json = create_encoder(MetricsFormat::Json, "disk")
            .encode(&samples, 0)
            .expect("encode");
        assert!(json.starts_with('{'));
    }
}
