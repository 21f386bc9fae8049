//! Engine configuration and the allow/deny filter over instance labels.

use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use regex::Regex;

use crate::error::CollectResult;
use crate::error::CollectorError;

/// Allow pattern used when none is configured.
pub const DEFAULT_ALLOW_PATTERN: &str = ".+";

/// Upper bound for one sampling cycle when none is configured.
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine configuration supplied by the embedding program.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Instances must match this expression to be emitted.
    pub allow_pattern: String,
    /// Instances matching this expression are never emitted.
    pub deny_pattern: String,
    /// A cycle that runs longer than this is reported as transient failure.
    pub cycle_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            allow_pattern: DEFAULT_ALLOW_PATTERN.to_string(),
            deny_pattern: String::new(),
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
        }
    }
}

/// Compiled allow/deny rule applied to instance labels.
#[derive(Debug, Clone)]
pub struct InstanceFilter {
    allow: Regex,
    deny: Regex,
}

impl InstanceFilter {
    /// Compiles both expressions, anchored so they must match the whole label.
    ///
    /// # Errors
    ///
    /// - [`CollectorError::InvalidConfig`] if either expression does not compile
    pub fn new(allow_pattern: &str, deny_pattern: &str) -> CollectResult<Self> {
        Ok(Self {
            allow: compile_anchored("allow", allow_pattern)?,
            deny: compile_anchored("deny", deny_pattern)?,
        })
    }

    pub fn from_config(config: &CollectorConfig) -> CollectResult<Self> {
        Self::new(&config.allow_pattern, &config.deny_pattern)
    }

    pub fn admits(&self, label: &str) -> bool {
        self.allow.is_match(label) && !self.deny.is_match(label)
    }
}

impl Default for InstanceFilter {
    fn default() -> Self {
        // Both patterns are constants known to compile.
        Self::new(DEFAULT_ALLOW_PATTERN, "").expect("default filter patterns compile")
    }
}

fn anchored(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

fn compile_anchored(which: &str, pattern: &str) -> CollectResult<Regex> {
    Regex::new(&anchored(pattern))
        .map_err(|e| {
            Report::new(CollectorError::InvalidConfig {
                message: format!("{which} pattern `{pattern}`: {e}"),
            })
        })
        .attach_printable_lazy(|| format!("anchored as {}", anchored(pattern)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_and_deny_combine() {
        let filter = InstanceFilter::new("0|1", "1").expect("valid patterns");
        assert!(filter.admits("0"));
        assert!(!filter.admits("1"));
        assert!(!filter.admits("2"));
    }

    #[test]
    fn patterns_match_whole_label() {
        let filter = InstanceFilter::new("1", "").expect("valid patterns");
        assert!(filter.admits("1"));
        assert!(!filter.admits("10"));
        assert!(!filter.admits("21"));
    }

    #[test]
    fn default_admits_every_non_empty_label() {
        let filter = InstanceFilter::default();
        assert!(filter.admits("0"));
        assert!(filter.admits("HarddiskVolume3"));
        assert!(!filter.admits(""));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = InstanceFilter::new("(", "").unwrap_err();
        assert!(matches!(
            err.current_context(),
            CollectorError::InvalidConfig { .. }
        ));
    }
}
