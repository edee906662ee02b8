//! `PostgreSQL` backends for raffle ticket inventory.
//!
//! This crate implements the `TicketStore` and `OrderLedger` traits from
//! `raffle-core` on top of sqlx:
//!
//! - One transaction per multi-row operation
//! - Ticket rows locked with `SELECT ... FOR UPDATE` in ascending ticket-number order,
//!   so concurrent claims on overlapping sets cannot deadlock
//! - Schema constraints mirror the ticket field-presence rules
//!
//! # Example
//!
//! ```no_run
//! use raffle_postgres::{PostgresTicketStore, run_migrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/raffle").await?;
//! run_migrations(&pool).await?;
//! let store = PostgresTicketStore::from_pool(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use raffle_core::StoreError;
use sqlx::PgPool;

mod ledger;
mod rows;
mod store;

pub use ledger::PostgresOrderLedger;
pub use store::PostgresTicketStore;

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
