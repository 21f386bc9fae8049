pub mod errors;
pub mod handlers;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use pdh_collector::SampleSource;
use tokio::sync::Semaphore;

use crate::metrics::encoders::MetricsEncoder;

/// State shared by every scrape request
#[derive(Clone)]
pub struct ScrapeState {
    pub source: Arc<dyn SampleSource>,
    pub encoder: Arc<dyn MetricsEncoder>,
    pub scrape_timeout: Duration,
    /// One permit; held by the blocking cycle until it finishes.
    pub cycle_permit: Arc<Semaphore>,
}

impl ScrapeState {
    pub fn new(
        source: Arc<dyn SampleSource>,
        encoder: Arc<dyn MetricsEncoder>,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            source,
            encoder,
            scrape_timeout,
            cycle_permit: Arc::new(Semaphore::new(1)),
        }
    }
}
