//! Marketmind server - headless trading-assistant backend
//!
//! Runs the scheduler, event bus, state store, and provider client as one
//! process. No HTTP surface; observability is structured logs on stdout.
//!
//! # Usage
//! ```sh
//! MARKETMIND_ENV=paper cargo run
//! ```
//!
//! # Environment Variables
//! - `MARKETMIND_ENV` - dry-run | paper | live (default: dry-run)
//! - `DATABASE_URL` - SQLite url (default: sqlite://marketmind.db)
//! - `PROVIDER_API_KEY_1..` - external provider credentials
//! - `RUST_LOG` - tracing filter (default: info)

use anyhow::Result;
use marketmind::application::Application;
use marketmind::config::Config;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Marketmind {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: environment={:?}, database={}, provider keys={}",
        config.environment,
        config.database_url,
        config.api.api_keys.len()
    );

    let app = Application::build(config).await?;
    app.start().await?;

    info!("Server running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    app.shutdown().await;
    Ok(())
}
