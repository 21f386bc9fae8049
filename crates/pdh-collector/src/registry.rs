//! Logical metric definitions tracked by the collector.

use serde::Serialize;

/// How a value is exposed to the monitoring system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Instantaneous or rate value.
    Gauge,
    /// Monotonically increasing total.
    Counter,
}

/// One user-facing metric backed by a counter-path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    /// Counter path in English, usually with a `(*)` instance selector.
    pub pattern: String,
    pub name: String,
    pub help: String,
    pub kind: ValueKind,
}

impl MetricDefinition {
    pub fn gauge(pattern: impl Into<String>, name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            name: name.into(),
            help: help.into(),
            kind: ValueKind::Gauge,
        }
    }
}

/// Stable index of a definition inside a [`MetricRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub(crate) usize);

impl MetricId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered, immutable set of metric definitions.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    pub fn new(definitions: Vec<MetricDefinition>) -> Self {
        Self { definitions }
    }

    pub fn get(&self, id: MetricId) -> Option<&MetricDefinition> {
        self.definitions.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricId, &MetricDefinition)> {
        self.definitions
            .iter()
            .enumerate()
            .map(|(idx, def)| (MetricId(idx), def))
    }
}

/// Prefix shared by every PhysicalDisk metric name.
pub const PHYSICAL_DISK_NAMESPACE: &str = "windows_physical_disk";

/// Label carrying the disk instance identifier.
pub const DISK_LABEL: &str = "disk";

const PHYSICAL_DISK_COUNTERS: &[(&str, &str, &str)] = &[
    (
        "Current Disk Queue Length",
        "requests_queued",
        "The number of requests queued to the disk (PhysicalDisk.CurrentDiskQueueLength)",
    ),
    (
        "Disk Read Bytes/sec",
        "read_bytes_per_second",
        "The rate of bytes transferred from the disk during read operations (PhysicalDisk.DiskReadBytesPerSec)",
    ),
    (
        "Disk Reads/sec",
        "reads_per_second",
        "The rate of read operations on the disk (PhysicalDisk.DiskReadsPerSec)",
    ),
    (
        "Disk Write Bytes/sec",
        "write_bytes_per_second",
        "The rate of bytes transferred to the disk during write operations (PhysicalDisk.DiskWriteBytesPerSec)",
    ),
    (
        "Disk Writes/sec",
        "writes_per_second",
        "The rate of write operations on the disk (PhysicalDisk.DiskWritesPerSec)",
    ),
    (
        "% Disk Read Time",
        "read_time_percent",
        "Percentage of elapsed time the disk was busy servicing read requests (PhysicalDisk.PercentDiskReadTime)",
    ),
    (
        "% Disk Write Time",
        "write_time_percent",
        "Percentage of elapsed time the disk was busy servicing write requests (PhysicalDisk.PercentDiskWriteTime)",
    ),
    (
        "% Idle Time",
        "idle_time_percent",
        "Percentage of elapsed time the disk was idle (PhysicalDisk.PercentIdleTime)",
    ),
    (
        "Split IO/Sec",
        "split_ios_per_second",
        "The rate of I/Os to the disk that were split into multiple I/Os (PhysicalDisk.SplitIOPerSec)",
    ),
    (
        "Avg. Disk sec/Read",
        "read_latency_seconds",
        "The average time, in seconds, of a read operation from the disk (PhysicalDisk.AvgDiskSecPerRead)",
    ),
    (
        "Avg. Disk sec/Write",
        "write_latency_seconds",
        "The average time, in seconds, of a write operation to the disk (PhysicalDisk.AvgDiskSecPerWrite)",
    ),
    (
        "Avg. Disk sec/Transfer",
        "read_write_latency_seconds",
        "The average time, in seconds, of a disk transfer (PhysicalDisk.AvgDiskSecPerTransfer)",
    ),
];

/// Registry of every per-disk `PhysicalDisk` counter.
pub fn physical_disk() -> MetricRegistry {
    MetricRegistry::new(
        PHYSICAL_DISK_COUNTERS
            .iter()
            .map(|(counter, suffix, help)| {
                MetricDefinition::gauge(
                    format!(r"\PhysicalDisk(*)\{counter}"),
                    format!("{PHYSICAL_DISK_NAMESPACE}_{suffix}"),
                    *help,
                )
            })
            .collect(),
    )
}
