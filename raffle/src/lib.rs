//! # Raffle
//!
//! Ticket inventory allocation for raffle competitions: each competition owns a fixed,
//! numbered set of tickets, and buyers pick specific numbers.
//!
//! ## Components
//!
//! - [`InventoryService`]: initialize, reset and read ticket statuses
//! - [`ReservationManager`]: all-or-nothing holds with a bounded lifetime
//! - [`PurchaseFinalizer`]: promotes live holds to purchases, idempotent per order
//! - [`ExpirySweeper`]: background reclamation of lapsed holds
//! - [`Reconciler`]: rebuilds and audits the projection from the order ledger
//! - [`TicketInventoryService`]: facade over all of the above
//!
//! Storage is pluggable through [`raffle_core::TicketStore`] and
//! [`raffle_core::OrderLedger`]; `raffle-postgres` provides the production backends and
//! `raffle-testing` the in-memory ones.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod metrics;
pub mod purchase;
pub mod reconciler;
pub mod reservation;
pub mod service;
pub mod sweeper;

pub use config::Config;
pub use error::{
    ErrorKind, InventoryError, PurchaseError, ReconcileError, ReleaseError, ReservationError,
};
pub use inventory::InventoryService;
pub use lifecycle::Application;
pub use purchase::PurchaseFinalizer;
pub use reconciler::{DriftReport, ReconcileReport, ReconcileSchedule, Reconciler};
pub use reservation::ReservationManager;
pub use service::TicketInventoryService;
pub use sweeper::ExpirySweeper;
