//! # Raffle Core
//!
//! Core types and storage traits for raffle ticket inventory allocation.
//!
//! A competition sells a fixed block of numbered tickets `1..=total_tickets`. Every
//! number has exactly one [`Ticket`](types::Ticket) record whose status is
//! `available`, `reserved` (a time-bounded hold) or `purchased` (linked to an order).
//!
//! This crate contains no I/O. It provides:
//!
//! - **Domain types**: identifiers, tickets, holds, orders, snapshots ([`types`])
//! - **Inventory storage**: the [`TicketStore`](store::TicketStore) trait and the
//!   decision helpers every backend shares ([`store`])
//! - **Order ledger**: the [`OrderLedger`](ledger::OrderLedger) trait ([`ledger`])
//! - **Environment**: the [`Clock`](environment::Clock) abstraction ([`environment`])
//!
//! ## Implementations
//!
//! - `PostgresTicketStore` / `PostgresOrderLedger` (in `raffle-postgres`): production
//! - `InMemoryTicketStore` / `InMemoryOrderLedger` (in `raffle-testing`): tests
//!
//! ## Expiry
//!
//! A hold is expired once `now >= reservation_expiry`. Reads, reservation, purchase and
//! the sweeper all use [`ReservationExpiry::is_expired`](types::ReservationExpiry::is_expired)
//! (or its SQL equivalent `reservation_expiry <= $now`), so a ticket whose hold lapsed is
//! logically available before the sweeper physically frees it.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod ledger;
pub mod store;
pub mod types;

/// Environment module - Dependency injection traits
///
/// External dependencies of the allocation core are abstracted behind traits so that
/// tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use raffle_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use ledger::OrderLedger;
pub use store::{StoreError, TicketStore};
