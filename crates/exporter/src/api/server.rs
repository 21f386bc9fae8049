use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::errors::ApiError;
use super::handlers::get_metrics;
use super::handlers::health;
use super::ScrapeState;

/// HTTP server exposing collected counters
pub struct ApiServer {
    state: ScrapeState,
    listen_addr: String,
}

impl ApiServer {
    pub fn new(state: ScrapeState, listen_addr: String) -> Self {
        Self { state, listen_addr }
    }

    fn routes(state: ScrapeState) -> impl Endpoint {
        Route::new()
            .at("/metrics", get(get_metrics))
            .at("/health", get(health))
            .data(state)
            .with(Tracing)
    }

    /// Serves until `cancellation_token` is cancelled
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP server on {}", self.listen_addr);

        let app = Self::routes(self.state);
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("HTTP server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("HTTP server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("Server failed: {e}"),
                        }))
                    }
                }
            }
            _ = cancellation_token.cancelled() => {
                info!("HTTP server shutdown requested");
                Ok(())
            }
        }
    }
}
