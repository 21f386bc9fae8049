use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::ValueEnum;
use pdh_collector::filter::DEFAULT_ALLOW_PATTERN;
use pdh_collector::CollectorConfig;

/// Output encoding for collected samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MetricsFormat {
    /// Prometheus text exposition format
    #[default]
    Prometheus,
    /// One JSON object per sample and line
    Json,
}

/// Options shared by every command that collects.
#[derive(Args, Debug, Clone)]
pub struct CollectorArgs {
    #[arg(
        long,
        env = "PDH_EXPORTER_DISK_ALLOWLIST",
        default_value = DEFAULT_ALLOW_PATTERN,
        help = "Regexp of disks to include; must match the whole disk number"
    )]
    pub disk_allowlist: String,

    #[arg(
        long,
        env = "PDH_EXPORTER_DISK_DENYLIST",
        default_value = "",
        help = "Regexp of disks to exclude; takes precedence over the allowlist"
    )]
    pub disk_denylist: String,

    #[arg(
        long,
        env = "PDH_EXPORTER_CYCLE_TIMEOUT_MS",
        default_value_t = 5000,
        help = "A sampling cycle running longer than this fails its scrape"
    )]
    pub cycle_timeout_ms: u64,

    #[arg(
        long,
        env = "PDH_EXPORTER_SIMULATE_DISKS",
        value_delimiter = ',',
        help = "Serve simulated disks with these instance names instead of reading host counters"
    )]
    pub simulate_disks: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(
        long,
        env = "PDH_EXPORTER_LISTEN_ADDR",
        default_value = "0.0.0.0:9182",
        help = "HTTP listen address"
    )]
    pub listen_addr: String,

    #[arg(
        long,
        env = "PDH_EXPORTER_SCRAPE_TIMEOUT_MS",
        default_value_t = 10000,
        help = "Time a scrape waits for its sampling cycle"
    )]
    pub scrape_timeout_ms: u64,

    #[arg(
        long,
        env = "PDH_EXPORTER_RERESOLVE_INTERVAL_SECS",
        default_value_t = 60,
        help = "Interval between disk re-discovery passes, 0 to disable"
    )]
    pub reresolve_interval_secs: u64,

    #[arg(
        long,
        env = "PDH_EXPORTER_METRICS_FORMAT",
        value_enum,
        default_value_t = MetricsFormat::Prometheus,
        help = "Encoding of the /metrics response"
    )]
    pub metrics_format: MetricsFormat,

    #[arg(
        long,
        env = "PDH_EXPORTER_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub collector: CollectorArgs,
}

impl ServeArgs {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    /// `None` when periodic re-resolution is disabled.
    pub fn reresolve_interval(&self) -> Option<Duration> {
        (self.reresolve_interval_secs > 0).then(|| Duration::from_secs(self.reresolve_interval_secs))
    }
}

#[derive(Args, Debug, Clone)]
pub struct OnceArgs {
    #[arg(long, value_enum, default_value_t = MetricsFormat::Prometheus)]
    pub metrics_format: MetricsFormat,

    #[command(flatten)]
    pub collector: CollectorArgs,
}

impl From<&CollectorArgs> for CollectorConfig {
    fn from(args: &CollectorArgs) -> Self {
        Self {
            allow_pattern: args.disk_allowlist.clone(),
            deny_pattern: args.disk_denylist.clone(),
            cycle_timeout: Duration::from_millis(args.cycle_timeout_ms),
        }
    }
}

impl From<&ServeArgs> for CollectorConfig {
    fn from(args: &ServeArgs) -> Self {
        Self::from(&args.collector)
    }
}
