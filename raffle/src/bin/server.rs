//! Raffle Inventory Server
//!
//! Runs the background side of the allocation core against `PostgreSQL`:
//! - Applies schema migrations
//! - Exposes Prometheus metrics
//! - Sweeps expired reservations on a fixed interval
//! - Audits (and optionally repairs) every competition against the order ledger
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/raffle cargo run --bin raffle-server
//! ```

use anyhow::Context;
use raffle::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raffle=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    tracing::info!(
        hold_minutes = config.reservation.hold_minutes,
        sweeper_interval_secs = config.sweeper.interval_secs,
        reconciler_enabled = config.reconciler.enabled,
        "Configuration loaded"
    );

    raffle::lifecycle::install_metrics(&config)?;

    let app = Application::build(config).await?;
    tracing::info!("Raffle inventory server is running, press Ctrl+C to shut down");
    app.run().await;
    Ok(())
}
