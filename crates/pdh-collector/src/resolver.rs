//! Wildcard counter-path expansion.
//!
//! A pattern such as `\PhysicalDisk(*)\Disk Reads/sec` is turned into the
//! concrete per-instance paths that currently exist, together with the
//! instance identifier embedded in each path.

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::CollectResult;
use crate::error::CollectorError;
use crate::probe;
use crate::probe::ProbeError;
use crate::provider::CounterProvider;

/// Provider-computed aggregate over all instances; never exposed.
pub const AGGREGATE_INSTANCE: &str = "_Total";

/// One concrete counter path and the instance label parsed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedPath {
    pub path: String,
    pub instance: String,
}

/// Expands `pattern` against `session` into the instances that exist right now.
///
/// Zero matching instances is a valid, empty result.
///
/// # Errors
///
/// - [`CollectorError::InvalidPath`] if the pattern cannot be registered
/// - [`CollectorError::ResolutionFailed`] if either two-phase query fails; a
///   zero size report is attached as [`ProbeError::ZeroSizeReported`]
#[tracing::instrument(skip(provider, session))]
pub fn resolve<P: CounterProvider>(
    provider: &P,
    session: &P::Session,
    pattern: &str,
) -> CollectResult<Vec<ExpandedPath>> {
    let failed = || CollectorError::ResolutionFailed {
        pattern: pattern.to_string(),
    };

    let wildcard = provider
        .add_counter(session, pattern)
        .change_context_lazy(|| CollectorError::InvalidPath {
            pattern: pattern.to_string(),
        })?;

    let record = probe::fetch(|buf: &mut [u8]| provider.counter_info(&wildcard, buf));
    // The wildcard counter is only needed for its metadata.
    provider.remove_counter(wildcard);

    let record = record
        .change_context_lazy(failed)
        .attach_printable("counter info query failed")?;
    let localized = provider
        .info_full_path(&record)
        .change_context_lazy(failed)?;

    let packed = probe::fetch(|buf: &mut [u16]| provider.expand_wildcard(&localized, buf))
        .map_err(|report| {
            let zero_size = report.current_context() == &ProbeError::ZeroSizeReported;
            let report = report.change_context(failed());
            if zero_size {
                report.attach_printable("provider reported a zero-length expansion, not an empty instance set")
            } else {
                report.attach_printable(format!("wildcard expansion of `{localized}` failed"))
            }
        })?;

    let expanded = parse_expanded(&packed);
    tracing::debug!(
        pattern,
        localized = %localized,
        instances = expanded.len(),
        "expanded counter pattern"
    );
    Ok(expanded)
}

/// Unpacks a NUL-separated UTF-16 path list into concrete paths and instances.
///
/// Parsing stops at the first empty element. Aggregate and unparsable entries
/// are dropped.
pub fn parse_expanded(packed: &[u16]) -> Vec<ExpandedPath> {
    let mut expanded = Vec::new();

    for element in packed.split(|&unit| unit == 0) {
        if element.is_empty() {
            break;
        }
        let path = String::from_utf16_lossy(element);

        let Some(instance) = instance_label(&path) else {
            tracing::warn!(path = %path, "unable to parse counter instance from expanded path");
            continue;
        };
        if instance == AGGREGATE_INSTANCE {
            continue;
        }

        let instance = instance.to_string();
        expanded.push(ExpandedPath { path, instance });
    }

    expanded
}

/// Extracts the stable instance identifier from `<object>(<instance>)<counter>`.
///
/// Only the leading whitespace separated qualifier is kept, so `0 C: D:`
/// yields `0`.
pub fn instance_label(path: &str) -> Option<&str> {
    let start = path.find('(')?;
    let end = start + path[start..].rfind(')')?;
    path[start + 1..end].split_whitespace().next()
}

/// Whether a report from [`resolve`] was caused by a zero buffer size report.
pub fn is_zero_size_report(report: &Report<CollectorError>) -> bool {
    report
        .downcast_ref::<ProbeError>()
        .is_some_and(|e| *e == ProbeError::ZeroSizeReported)
}
