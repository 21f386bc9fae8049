use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::Response;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use super::ScrapeState;
use crate::metrics::timestamp_millis;

/// Runs one sampling cycle and returns the encoded samples
///
/// The cycle runs on a blocking thread. If the scrape times out the cycle
/// still finishes there, and scrapes arriving before it does are refused.
#[handler]
pub async fn get_metrics(Data(state): Data<&ScrapeState>) -> poem::Result<Response> {
    let Ok(permit) = state.cycle_permit.clone().try_acquire_owned() else {
        warn!("scrape refused, previous sampling cycle still running");
        return Err(poem::Error::from_string(
            "collection already in progress",
            StatusCode::SERVICE_UNAVAILABLE,
        ));
    };

    let source = state.source.clone();
    let cycle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        source.collect()
    });

    let samples = match timeout(state.scrape_timeout, cycle).await {
        Err(_) => {
            warn!(timeout = ?state.scrape_timeout, "scrape timed out waiting for sampling cycle");
            return Err(poem::Error::from_string(
                "collection timed out",
                StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        Ok(Err(join_error)) => {
            error!("sampling cycle panicked: {join_error}");
            return Err(poem::Error::from_string(
                "collection failed",
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
        Ok(Ok(Err(report))) => {
            let recoverable = report.current_context().is_recoverable();
            if recoverable {
                warn!("scrape failed: {report:?}");
            } else {
                error!("scrape failed, collector session is being rebuilt: {report:?}");
            }
            let status = if recoverable {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return Err(poem::Error::from_string(
                report.current_context().to_string(),
                status,
            ));
        }
        Ok(Ok(Ok(samples))) => samples,
    };

    let body = state
        .encoder
        .encode(&samples, timestamp_millis())
        .map_err(|report| {
            error!("failed to encode samples: {report:?}");
            poem::Error::from_string("encoding failed", StatusCode::INTERNAL_SERVER_ERROR)
        })?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .content_type(state.encoder.content_type())
        .body(body))
}

/// Liveness probe
#[handler]
pub async fn health() -> &'static str {
    "ok"
}
