use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pdh_collector::SampleSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::server::ApiServer;
use crate::api::ScrapeState;
use crate::config::ServeArgs;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, args: &ServeArgs, state: ScrapeState) {
        if let Some(interval) = args.reresolve_interval() {
            let reresolve_task = self.spawn_reresolve_task(state.source.clone(), interval);
            self.tasks.push(reresolve_task);
        }

        let api_server_task = self.spawn_api_server_task(args.listen_addr.clone(), state);
        self.tasks.push(api_server_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::signal;
                use tokio::signal::unix::SignalKind;
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
                        Err(e) => tracing::error!("Failed to listen for Ctrl+C: {e}"),
                    }
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_reresolve_task(&self, source: Arc<dyn SampleSource>, interval: Duration) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!(?interval, "Starting instance re-resolution task");
            run_reresolve(source, interval, token).await;
            tracing::info!("Instance re-resolution task completed");
        })
    }

    fn spawn_api_server_task(&self, listen_addr: String, state: ScrapeState) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            let api_server = ApiServer::new(state, listen_addr);
            if let Err(e) = api_server.run(token).await {
                tracing::error!("HTTP server failed: {e:?}");
            } else {
                tracing::info!("HTTP server completed");
            }
        })
    }
}

/// Re-resolves instances every `interval` until cancelled
pub async fn run_reresolve(source: Arc<dyn SampleSource>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately and the session was just resolved.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let source = source.clone();
                match tokio::task::spawn_blocking(move || source.reresolve()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(report)) => tracing::warn!("instance re-resolution failed: {report:?}"),
                    Err(e) => tracing::error!("instance re-resolution panicked: {e}"),
                }
            }
        }
    }
}
