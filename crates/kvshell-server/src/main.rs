#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::app::Application;
use server::config::{CliArgs, ServerConfig};
use server::handler::EchoHandler;
use server::telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let app = Application::new(EchoHandler::default(), config)?;
    let result = app.run().await;
    app.stop();
    tracing::debug!("Server is {}", app.server().state());

    if let Err(e) = app.shutdown().await {
        tracing::error!("Error during pool shutdown: {e}");
    }
    providers.shutdown();

    result?;
    tracing::info!("Server shut down successfully");
    Ok(())
}
