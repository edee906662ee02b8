//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: connect the pool, apply migrations, install the metrics exporter
//! 2. **Runtime**: run the expiry sweeper and the reconcile schedule
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, signal every task and wait for it to finish
//!    within `SHUTDOWN_TIMEOUT`

use crate::config::Config;
use crate::reconciler::{ReconcileSchedule, Reconciler};
use crate::service::TicketInventoryService;
use crate::sweeper::ExpirySweeper;
use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use raffle_core::environment::{Clock, SystemClock};
use raffle_core::{OrderLedger, TicketStore};
use raffle_postgres::{PostgresOrderLedger, PostgresTicketStore, run_migrations};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Build the connection pool described by `config`.
///
/// # Errors
///
/// Returns an error if the database is unreachable within the connect timeout.
pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")
}

/// Install the Prometheus exporter and register metric descriptions.
///
/// # Errors
///
/// Returns an error if the address is invalid or a recorder is already installed.
pub fn install_metrics(config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port)
        .parse()
        .context("Invalid METRICS_HOST/METRICS_PORT")?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .context("Invalid histogram buckets")?
        .install()
        .context("Failed to install Prometheus exporter")?;

    crate::metrics::register_inventory_metrics();
    info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

/// Running service with its background tasks.
pub struct Application {
    config: Arc<Config>,
    service: TicketInventoryService,
    sweeper: ExpirySweeper,
    schedule: Option<ReconcileSchedule>,
}

impl Application {
    /// Wire the services over explicit backends.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn TicketStore>,
        ledger: Arc<dyn OrderLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hold = config.hold();
        let service = TicketInventoryService::with_hold(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            hold,
        );
        let sweeper = ExpirySweeper::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.sweeper_interval(),
        );
        let schedule = config.reconciler.enabled.then(|| {
            ReconcileSchedule::new(
                Reconciler::with_hold(store, ledger, hold),
                clock,
                config.reconciler_interval(),
                config.reconciler.auto_repair,
            )
        });

        Self {
            config: Arc::new(config),
            service,
            sweeper,
            schedule,
        }
    }

    /// Connect to `PostgreSQL`, apply migrations and wire the services.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or a migration fails.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let pool = connect(&config).await?;
        run_migrations(&pool).await.context("Failed to apply migrations")?;

        let store: Arc<dyn TicketStore> = Arc::new(PostgresTicketStore::from_pool(pool.clone()));
        let ledger: Arc<dyn OrderLedger> = Arc::new(PostgresOrderLedger::from_pool(pool));
        Ok(Self::new(config, store, ledger, Arc::new(SystemClock)))
    }

    /// The inventory service
    #[must_use]
    pub const fn service(&self) -> &TicketInventoryService {
        &self.service
    }

    /// Run background tasks until `shutdown` resolves, then stop them gracefully.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles: Vec<(&'static str, JoinHandle<()>)> =
            vec![("sweeper", self.sweeper.spawn(shutdown_rx.clone()))];
        if let Some(schedule) = self.schedule {
            handles.push(("reconciler", schedule.spawn(shutdown_rx)));
        }
        info!(task_count = handles.len(), "Background tasks started");

        shutdown.await;
        info!("Shutdown requested, stopping background tasks");
        shutdown_tx.send(true).ok();

        let timeout = self.config.shutdown_timeout();
        for (task, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task, error = %e, "Task failed"),
                Err(_) => warn!(task, "Task shutdown timed out"),
            }
        }
        info!("Graceful shutdown complete");
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal source is ignored and the other
/// one still applies.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
