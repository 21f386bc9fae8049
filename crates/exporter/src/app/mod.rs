pub mod tasks;

use std::sync::Arc;

use anyhow::Result;
use pdh_collector::fake::FakeProvider;
use pdh_collector::registry;
use pdh_collector::Collector;
use pdh_collector::CollectorConfig;
use pdh_collector::SampleSource;

use crate::api::ScrapeState;
use crate::config::CollectorArgs;
use crate::config::ServeArgs;
use crate::metrics::encoders::create_encoder;
use tasks::Tasks;

/// Builds the collector for the PhysicalDisk registry on a blocking thread.
///
/// Opening the session and resolving every counter call into the provider,
/// which may block.
pub async fn build_source(args: &CollectorArgs) -> Result<Arc<dyn SampleSource>> {
    let args = args.clone();
    tokio::task::spawn_blocking(move || open_source(&args)).await?
}

/// Simulated disks take precedence over the host provider.
fn open_source(args: &CollectorArgs) -> Result<Arc<dyn SampleSource>> {
    let config = CollectorConfig::from(args);

    if !args.simulate_disks.is_empty() {
        let disks: Vec<&str> = args.simulate_disks.iter().map(String::as_str).collect();
        tracing::info!(disks = ?disks, "using simulated disk counters");
        let provider = FakeProvider::with_disks(&disks);
        let collector = Collector::new(provider, registry::physical_disk(), &config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize collector: {e:?}"))?;
        return Ok(Arc::new(collector));
    }

    host_source(&config)
}

#[cfg(windows)]
fn host_source(config: &CollectorConfig) -> Result<Arc<dyn SampleSource>> {
    let provider = pdh_collector::pdh::PdhProvider::new();
    let collector = Collector::new(provider, registry::physical_disk(), config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize collector: {e:?}"))?;
    Ok(Arc::new(collector))
}

#[cfg(not(windows))]
fn host_source(_config: &CollectorConfig) -> Result<Arc<dyn SampleSource>> {
    anyhow::bail!("host performance counters are only available on Windows; use --simulate-disks")
}

/// Running exporter: the collector, its HTTP surface and background tasks
pub struct Application {
    args: ServeArgs,
    source: Arc<dyn SampleSource>,
    tasks: Tasks,
}

impl Application {
    pub async fn new(args: ServeArgs) -> Result<Self> {
        let source = build_source(&args.collector).await?;
        Ok(Self {
            args,
            source,
            tasks: Tasks::new(),
        })
    }

    pub fn scrape_state(&self) -> ScrapeState {
        ScrapeState::new(
            self.source.clone(),
            Arc::from(create_encoder(self.args.metrics_format, registry::DISK_LABEL)),
            self.args.scrape_timeout(),
        )
    }

    /// Runs until a shutdown signal arrives or a task ends
    pub async fn run(&mut self) -> Result<()> {
        let state = self.scrape_state();
        self.tasks.spawn_all_tasks(&self.args, state);
        self.tasks.wait_for_completion().await
    }

    /// Releases the counter session
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down, closing counter session");
        let source = self.source;
        tokio::task::spawn_blocking(move || source.shutdown()).await?;
        Ok(())
    }
}
