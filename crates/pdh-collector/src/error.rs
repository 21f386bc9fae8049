//! Error types for the counter provider and the collection engine.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for calls into a [`CounterProvider`](crate::provider::CounterProvider).
pub type ProviderResult<T> = Result<T, Report<ProviderError>>;

/// Result type for engine operations.
pub type CollectResult<T> = Result<T, Report<CollectorError>>;

/// Failures reported by the host counter subsystem.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The counter subsystem could not be initialized
    #[display("Counter provider unavailable: {reason}")]
    Unavailable { reason: String },

    /// A counter path could not be resolved
    #[display("Invalid counter path `{path}` (status {status:#X})")]
    InvalidPath { path: String, status: u32 },

    /// A refresh failed but the next one is expected to succeed
    #[display("Transient sample failure (status {status:#X})")]
    TransientSample { status: u32 },

    /// The sampling session is no longer usable
    #[display("Sampling session is closed")]
    SessionClosed,

    /// The instance behind a counter handle has disappeared
    #[display("Counter handle refers to an instance that no longer exists")]
    StaleHandle,

    /// Any other non-success status
    #[display("Provider call `{call}` failed with status {status:#X}")]
    Call { call: &'static str, status: u32 },
}

impl Error for ProviderError {}

/// Failures surfaced by the collection engine.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// The provider session could not be opened
    #[display("Counter provider unavailable")]
    ProviderUnavailable,

    /// A metric's counter pattern could not be registered
    #[display("Invalid counter path `{pattern}`")]
    InvalidPath { pattern: String },

    /// Wildcard expansion failed for one pattern
    #[display("Failed to resolve counter pattern `{pattern}`")]
    ResolutionFailed { pattern: String },

    /// The cycle could not produce a sample this time
    #[display("Transient sampling failure")]
    TransientSample,

    /// The provider session has been closed underneath the collector
    #[display("Sampling session closed")]
    SessionClosed,

    /// User supplied configuration is unusable
    #[display("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error for CollectorError {}

impl CollectorError {
    /// Whether the process should keep serving after this error.
    ///
    /// Only session-level failures are fatal for a collector instance.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CollectorError::SessionClosed | CollectorError::ProviderUnavailable
        )
    }
}
