//! Probe-then-fetch helper for provider queries with variable sized results.
//!
//! The provider cannot return a variably sized result without first reporting
//! how large it is, so every such query is issued twice: once with an empty
//! buffer to learn the required length, then with a buffer of exactly that
//! length.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

use crate::provider::Probe;

/// Failures of the two-phase protocol.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The measuring call reported that zero elements are required
    #[display("Provider reported a zero buffer size")]
    ZeroSizeReported,

    /// The measuring call failed instead of reporting a size
    #[display("Buffer size probe failed")]
    ProbeFailed,

    /// The filling call did not succeed
    #[display("Fetch with a buffer of {len} elements failed")]
    FetchFailed { len: usize },
}

impl Error for ProbeError {}

/// Runs a two-phase query and returns the filled part of the buffer.
///
/// A measuring call that already succeeds with an empty buffer means there is
/// nothing to fetch and yields an empty vector.
pub fn fetch<T, F>(mut call: F) -> Result<Vec<T>, Report<ProbeError>>
where
    T: Copy + Default,
    F: FnMut(&mut [T]) -> Probe,
{
    let required = match call(&mut []) {
        Probe::MoreData { required: 0 } => return Err(Report::new(ProbeError::ZeroSizeReported)),
        Probe::MoreData { required } => required,
        Probe::Filled(_) => return Ok(Vec::new()),
        Probe::Failed(report) => return Err(report.change_context(ProbeError::ProbeFailed)),
    };

    let mut buffer = vec![T::default(); required];
    match call(&mut buffer) {
        Probe::Filled(len) => {
            buffer.truncate(len.min(required));
            Ok(buffer)
        }
        Probe::MoreData { required: grown } => Err(Report::new(ProbeError::FetchFailed {
            len: required,
        })
        .attach_printable(format!("result grew to {grown} elements between calls"))),
        Probe::Failed(report) => {
            Err(report.change_context(ProbeError::FetchFailed { len: required }))
        }
    }
}
