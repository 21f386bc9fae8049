use std::collections::BTreeMap;

use error_stack::Report;
use pdh_collector::Sample;
use serde_json::json;

use super::EncodeError;
use super::MetricsEncoder;

/// JSON lines encoder, one object per sample
pub struct JsonEncoder {
    label_name: String,
}

impl JsonEncoder {
    pub fn new(label_name: &str) -> Self {
        Self {
            label_name: label_name.to_string(),
        }
    }
}

impl MetricsEncoder for JsonEncoder {
    fn encode(&self, samples: &[Sample], timestamp: i64) -> Result<String, Report<EncodeError>> {
        let mut out = String::new();
        for sample in samples {
            let tags = BTreeMap::from([(self.label_name.as_str(), sample.label.as_str())]);
            // Non-finite values have no JSON representation and become null.
            let line = json!({
                "measure": sample.name,
                "ts": timestamp,
                "kind": sample.kind,
                "tag": tags,
                "field": { "value": sample.value },
            });
            out.push_str(&line.to_string());
            out.push('\n');
        }
        Ok(out)
    }

    fn content_type(&self) -> &'static str {
        "application/x-ndjson"
    }
}
