//! Raffle Admin: operator commands against the configured database.
//!
//! # Usage
//!
//! ```bash
//! raffle-admin init 42 --total 1000
//! raffle-admin statuses 42
//! raffle-admin owner 42 17
//! raffle-admin audit 42
//! raffle-admin reconcile 42
//! raffle-admin sweep
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use raffle::lifecycle::connect;
use raffle::{Config, TicketInventoryService};
use raffle_core::environment::SystemClock;
use raffle_core::types::{CompetitionId, TicketNumber};
use raffle_postgres::{PostgresOrderLedger, PostgresTicketStore, run_migrations};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Raffle Admin: manage ticket inventories
#[derive(Parser, Debug)]
#[command(name = "raffle-admin")]
#[command(about = "Operator commands for raffle ticket inventories")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the ticket set for a competition
    Init {
        /// Competition identifier
        competition: i64,
        /// Number of tickets
        #[arg(long)]
        total: u32,
    },
    /// Recreate the ticket set, all available (destroys holds and purchases)
    Reset {
        /// Competition identifier
        competition: i64,
        /// Required to confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Print available, reserved and purchased numbers
    Statuses {
        /// Competition identifier
        competition: i64,
    },
    /// Print aggregate counts
    Stats {
        /// Competition identifier
        competition: i64,
    },
    /// Show who holds or owns a ticket
    Owner {
        /// Competition identifier
        competition: i64,
        /// Ticket number
        ticket: u32,
    },
    /// Compare the projection with the order ledger
    Audit {
        /// Competition identifier
        competition: i64,
    },
    /// Rebuild the projection from the order ledger
    Reconcile {
        /// Competition identifier
        competition: i64,
    },
    /// Reclaim every expired reservation now
    Sweep,
}

fn join(numbers: &[TicketNumber]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,raffle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    let pool = connect(&config).await?;
    run_migrations(&pool).await.context("Failed to apply migrations")?;

    let service = TicketInventoryService::with_hold(
        Arc::new(PostgresTicketStore::from_pool(pool.clone())),
        Arc::new(PostgresOrderLedger::from_pool(pool)),
        Arc::new(SystemClock),
        config.hold(),
    );

    match args.command {
        Command::Init { competition, total } => {
            service.initialize(CompetitionId::new(competition), total).await?;
            println!("Initialized competition {competition} with {total} tickets");
        }
        Command::Reset { competition, yes } => {
            anyhow::ensure!(yes, "Refusing to reset without --yes");
            service.reset(CompetitionId::new(competition)).await?;
            println!("Reset competition {competition}");
        }
        Command::Statuses { competition } => {
            let snapshot = service
                .get_ticket_statuses(CompetitionId::new(competition))
                .await?;
            println!("available: {}", join(&snapshot.available));
            println!("reserved:  {}", join(&snapshot.reserved));
            println!("purchased: {}", join(&snapshot.purchased));
        }
        Command::Stats { competition } => {
            let stats = service.stats(CompetitionId::new(competition)).await?;
            println!("total:        {}", stats.total_tickets);
            println!("available:    {}", stats.available);
            println!("reserved:     {}", stats.reserved);
            println!("purchased:    {}", stats.purchased);
            println!("tickets_sold: {}", stats.tickets_sold);
        }
        Command::Owner { competition, ticket } => {
            let info = service
                .owner_of(CompetitionId::new(competition), TicketNumber::new(ticket))
                .await?;
            println!("status:  {}", info.status);
            if let Some(user) = info.user_id {
                println!("user:    {user}");
            }
            if let Some(order) = info.order_id {
                println!("order:   {order}");
            }
            if let Some(at) = info.purchased_at {
                println!("bought:  {at}");
            }
            if let Some(expiry) = info.reservation_expiry {
                println!("expires: {expiry}");
            }
        }
        Command::Audit { competition } => {
            let report = service.audit(CompetitionId::new(competition)).await?;
            println!(
                "tickets_sold={} purchased={}",
                report.tickets_sold, report.purchased_count
            );
            println!("purchased without order: {}", join(&report.purchased_without_order));
            println!("completed not purchased: {}", join(&report.completed_not_purchased));
            println!("ownership mismatches:    {}", join(&report.ownership_mismatches));
            println!("duplicate claims:        {}", join(&report.duplicate_claims));
            println!("{}", if report.is_clean() { "clean" } else { "DRIFT" });
        }
        Command::Reconcile { competition } => {
            let report = service.reconcile(CompetitionId::new(competition)).await?;
            println!(
                "purchased={} reserved={} available={} conflicts={} skipped={}",
                report.purchased,
                report.reserved,
                report.available,
                report.conflicts.len(),
                report.skipped.len()
            );
        }
        Command::Sweep => {
            let reclaimed = service.sweep_expired().await?;
            println!("Reclaimed {reclaimed} expired reservations");
        }
    }
    Ok(())
}
