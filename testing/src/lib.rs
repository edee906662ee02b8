//! # Raffle Testing
//!
//! Testing utilities and in-memory backends for raffle ticket inventory.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory implementations of the store and ledger traits
//! - Builders for common fixtures
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use raffle_core::store::TicketStore;
//! use raffle_core::types::CompetitionId;
//! use raffle_testing::InMemoryTicketStore;
//!
//! futures::executor::block_on(async {
//!     let store = InMemoryTicketStore::new();
//!     store.initialize(CompetitionId::new(1), 10).await?;
//!     assert_eq!(store.load_tickets(CompetitionId::new(1)).await?.len(), 10);
//!     Ok::<(), raffle_core::StoreError>(())
//! })?;
//! # Ok::<(), raffle_core::StoreError>(())
//! ```

use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;

pub mod memory;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Clones share the same time, so a test can keep one handle while the
    /// services under test hold another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward by `by`
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// The instant every default test clock starts at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Test helpers and utilities
pub mod helpers {
    use chrono::{DateTime, Utc};
    use raffle_core::types::{CompetitionId, Order, OrderId, PaymentStatus, TicketNumber, UserId};

    /// Ticket numbers from raw integers
    #[must_use]
    pub fn numbers(raw: &[u32]) -> Vec<TicketNumber> {
        raw.iter().copied().map(TicketNumber::new).collect()
    }

    /// Builds a ledger order
    #[must_use]
    pub fn order(
        order_id: i64,
        competition_id: CompetitionId,
        user: &str,
        raw_numbers: &[u32],
        payment_status: PaymentStatus,
        created_at: DateTime<Utc>,
    ) -> Order {
        Order {
            order_id: OrderId::new(order_id),
            competition_id,
            user_id: UserId::new(user),
            ticket_numbers: numbers(raw_numbers),
            payment_status,
            created_at,
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use raffle_core::types::{TicketNumber, UserId};

    /// Non-empty requests of up to `max_len` numbers drawn from `1..=total`.
    pub fn ticket_request(total: u32, max_len: usize) -> impl Strategy<Value = Vec<TicketNumber>> {
        prop::collection::vec(1..=total, 1..=max_len)
            .prop_map(|raw| raw.into_iter().map(TicketNumber::new).collect())
    }

    /// One of a small pool of buyers, so requests collide often.
    pub fn buyer() -> impl Strategy<Value = UserId> {
        prop::sample::select(vec!["alice", "bob", "carol", "dave"]).prop_map(UserId::new)
    }
}

// Re-export commonly used items
pub use memory::{InMemoryOrderLedger, InMemoryTicketStore};
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
