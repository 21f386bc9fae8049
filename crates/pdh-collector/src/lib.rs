//! Collection engine for wildcard performance counters.
//!
//! Resolves counter-path patterns such as `\PhysicalDisk(*)\Disk Reads/sec`
//! into per-instance handles on one long-lived provider session, samples them
//! on demand and tracks instances that appear or disappear at runtime.

pub mod collector;
pub mod cycle;
pub mod error;
pub mod fake;
pub mod filter;
#[cfg(windows)]
pub mod pdh;
pub mod probe;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod session;

pub use collector::Collector;
pub use collector::SampleSource;
pub use cycle::Sample;
pub use error::CollectResult;
pub use error::CollectorError;
pub use error::ProviderError;
pub use filter::CollectorConfig;
pub use filter::InstanceFilter;
pub use provider::CounterProvider;
pub use registry::MetricDefinition;
pub use registry::MetricRegistry;
pub use registry::ValueKind;
