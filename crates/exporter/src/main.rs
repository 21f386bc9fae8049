mod api;
mod app;
mod config;
mod logging;
mod metrics;

use anyhow::Result;
use clap::Parser;
use pdh_collector::registry;
use utils::version;

use crate::app::Application;
use crate::config::Cli;
use crate::config::Commands;
use crate::config::OnceArgs;
use crate::config::ServeArgs;
use crate::metrics::encoders::create_encoder;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(serve_args) => run_serve(*serve_args).await,
        Commands::Once(once_args) => run_once(once_args).await,
    }
}

async fn run_serve(serve_args: ServeArgs) -> Result<()> {
    let _guard = logging::init(serve_args.log_file.as_ref())?;

    tracing::info!("Starting pdh-exporter {}", &**version::VERSION);

    let mut app = Application::new(serve_args).await?;

    app.run().await?;
    app.shutdown().await?;

    Ok(())
}

async fn run_once(once_args: OnceArgs) -> Result<()> {
    let _guard = logging::init(None::<&str>)?;

    let source = app::build_source(&once_args.collector).await?;
    let collected = {
        let source = source.clone();
        tokio::task::spawn_blocking(move || source.collect()).await?
    };
    let teardown = {
        let source = source.clone();
        tokio::task::spawn_blocking(move || source.shutdown())
    };

    let samples = collected.map_err(|e| anyhow::anyhow!("Collection failed: {e:?}"))?;
    let encoder = create_encoder(once_args.metrics_format, registry::DISK_LABEL);
    let body = encoder
        .encode(&samples, metrics::timestamp_millis())
        .map_err(|e| anyhow::anyhow!("Failed to encode samples: {e:?}"))?;
    print!("{body}");

    teardown.await?;
    Ok(())
}
