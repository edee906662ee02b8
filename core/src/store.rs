//! Ticket inventory store trait and related types.
//!
//! The inventory store is the durable, queryable projection of ticket status and the
//! unit of concurrency control. Every method that mutates more than one ticket is a
//! single atomic unit: other callers observe either all of its effects or none.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `raffle-postgres`): one transaction per operation,
//!   rows locked in ticket-number order
//! - `InMemoryTicketStore` (in `raffle-testing`): one lock per store
//!
//! # Shared decisions
//!
//! Backends differ in how they lock, never in what they decide. Purchase eligibility
//! goes through [`Finalize::evaluate`] and claim eligibility through
//! [`Ticket::is_available_at`], so every backend applies the same expiry comparator.

use crate::types::{
    CompetitionId, CompetitionInventory, OrderId, ReservationExpiry, Ticket, TicketNumber, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store and ledger methods.
///
/// Explicit `Pin<Box<dyn Future>>` returns keep the traits dyn-compatible so services
/// can hold `Arc<dyn TicketStore>`.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store or ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Tickets already exist for this competition.
    #[error("Competition {0} is already initialized")]
    AlreadyInitialized(CompetitionId),

    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// Ticket count must be positive.
    #[error("Invalid ticket total: {0}")]
    InvalidTotal(u32),

    /// No order with this id in the ledger.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this id was already appended.
    #[error("Duplicate order: {0}")]
    DuplicateOrder(OrderId),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data violates a schema invariant.
    #[error("Corrupt inventory data: {0}")]
    Corrupt(String),
}

// ============================================================================
// Operation Inputs and Outcomes
// ============================================================================

/// All-or-nothing claim of ticket numbers for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    /// Competition to claim in
    pub competition_id: CompetitionId,
    /// Numbers to claim, sorted and unique
    pub ticket_numbers: Vec<TicketNumber>,
    /// Claiming user
    pub user_id: UserId,
    /// Expiry stamped on every claimed ticket
    pub expires_at: ReservationExpiry,
    /// Time of the attempt; holds expired at this instant count as free
    pub now: DateTime<Utc>,
}

/// Result of a [`Claim`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Every requested number transitioned to `reserved`.
    Claimed,
    /// Nothing changed; these numbers were not free at attempt time.
    Unavailable {
        /// Requested numbers that could not be claimed
        conflicting: Vec<TicketNumber>,
    },
}

/// Promotion of held tickets to purchased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalize {
    /// Competition to purchase in
    pub competition_id: CompetitionId,
    /// Numbers to purchase, sorted and unique
    pub ticket_numbers: Vec<TicketNumber>,
    /// Buyer; must hold every number
    pub user_id: UserId,
    /// Order that pays for the tickets
    pub order_id: OrderId,
    /// Time of the attempt; holds expired at this instant are rejected
    pub now: DateTime<Utc>,
}

/// Result of a [`Finalize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Tickets were purchased and `tickets_sold` incremented by `count`.
    Purchased {
        /// Number of tickets promoted
        count: u32,
    },
    /// The same order already bought exactly these tickets. Nothing changed.
    AlreadyPurchased,
    /// Nothing changed; these numbers were not held by the buyer at attempt time.
    Rejected {
        /// Requested numbers failing the ownership check
        mismatched: Vec<TicketNumber>,
    },
}

impl Finalize {
    /// Decides the outcome of this purchase against the current ticket rows.
    ///
    /// `tickets` must be the locked rows for the requested numbers; a requested number
    /// without a row counts as mismatched. The returned `Purchased` count is the number
    /// of tickets the caller must flip and add to `tickets_sold`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // request size is bounded by total_tickets (u32)
    pub fn evaluate(&self, tickets: &[Ticket]) -> FinalizeOutcome {
        let find = |number: TicketNumber| tickets.iter().find(|ticket| ticket.number == number);

        let already_ours = self.ticket_numbers.iter().all(|number| {
            find(*number).is_some_and(|ticket| ticket.is_purchased_by(&self.user_id, self.order_id))
        });
        if already_ours && !self.ticket_numbers.is_empty() {
            return FinalizeOutcome::AlreadyPurchased;
        }

        let mismatched: Vec<TicketNumber> = self
            .ticket_numbers
            .iter()
            .copied()
            .filter(|number| {
                !find(*number).is_some_and(|ticket| ticket.is_held_by(&self.user_id, self.now))
            })
            .collect();

        if mismatched.is_empty() {
            FinalizeOutcome::Purchased {
                count: self.ticket_numbers.len() as u32,
            }
        } else {
            FinalizeOutcome::Rejected { mismatched }
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Durable per-(competition, ticket number) inventory.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; they are shared across request tasks and
/// the background sweeper.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so the trait can be used
/// as `Arc<dyn TicketStore>`.
pub trait TicketStore: Send + Sync {
    /// Create `total_tickets` available tickets for a competition.
    ///
    /// # Errors
    ///
    /// - `AlreadyInitialized`: tickets already exist (nothing is duplicated)
    /// - `InvalidTotal`: `total_tickets` is zero
    /// - `Database`: backend failure
    fn initialize(&self, competition_id: CompetitionId, total_tickets: u32) -> StoreFuture<'_, ()>;

    /// Delete and recreate the whole ticket set: all available, `tickets_sold = 0`.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`: the competition was never initialized
    /// - `Database`: backend failure
    fn reset(&self, competition_id: CompetitionId) -> StoreFuture<'_, ()>;

    /// Load the inventory header, or `None` if not initialized.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<CompetitionInventory>>;

    /// List every initialized competition, ascending.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn competitions(&self) -> StoreFuture<'_, Vec<CompetitionInventory>>;

    /// Load every ticket of a competition from one consistent read, ascending by number.
    ///
    /// Returns an empty vector for an unknown competition.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Corrupt` on backend failure.
    fn load_tickets(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Load a single ticket.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Corrupt` on backend failure.
    fn load_ticket(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// Atomically reserve every requested number or none of them.
    ///
    /// A number is claimable if it is `available` or its hold is expired at
    /// `claim.now`. If fewer rows transition than were requested, the rows that did
    /// transition are restored before returning and no partial hold is ever visible.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure (nothing is changed).
    fn claim(&self, claim: Claim) -> StoreFuture<'_, ClaimOutcome>;

    /// Return numbers reserved by `holder` to the available pool.
    ///
    /// Numbers not reserved by `holder` are skipped. Returns the numbers released.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: Vec<TicketNumber>,
        holder: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>>;

    /// Atomically promote held tickets to purchased and bump `tickets_sold`.
    ///
    /// The ownership check, the status flip and the counter increment form one unit.
    /// The decision is made by [`Finalize::evaluate`] on the locked rows.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`: the competition was never initialized
    /// - `Database`: backend failure (nothing is changed)
    fn finalize(&self, finalize: Finalize) -> StoreFuture<'_, FinalizeOutcome>;

    /// Return every hold expired at `now` to the available pool, across all competitions.
    ///
    /// Returns the number of tickets reclaimed.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64>;

    /// Overwrite the ticket projection of a competition.
    ///
    /// Every number not present in `tickets` becomes available, and `tickets_sold` is set
    /// to the number of purchased tickets written, in the same atomic unit.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`: the competition was never initialized
    /// - `Database`: backend failure (nothing is changed)
    fn replace_tickets(
        &self,
        competition_id: CompetitionId,
        tickets: Vec<Ticket>,
    ) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn request(numbers: &[u32], user: &str, order: i64) -> Finalize {
        Finalize {
            competition_id: CompetitionId::new(1),
            ticket_numbers: numbers.iter().copied().map(TicketNumber::new).collect(),
            user_id: UserId::new(user),
            order_id: OrderId::new(order),
            now: now(),
        }
    }

    fn held(number: u32, user: &str, minutes: i64) -> Ticket {
        Ticket::reserved(
            CompetitionId::new(1),
            TicketNumber::new(number),
            UserId::new(user),
            ReservationExpiry::after(now(), Duration::minutes(minutes)),
        )
    }

    #[test]
    fn evaluate_accepts_live_holds_of_the_buyer() {
        let tickets = vec![held(1, "alice", 30), held(2, "alice", 30)];
        assert_eq!(
            request(&[1, 2], "alice", 7).evaluate(&tickets),
            FinalizeOutcome::Purchased { count: 2 }
        );
    }

    #[test]
    fn evaluate_rejects_other_holders_and_lapsed_holds() {
        let tickets = vec![held(1, "alice", 30), held(2, "bob", 30), held(3, "alice", 0)];
        assert_eq!(
            request(&[1, 2, 3], "alice", 7).evaluate(&tickets),
            FinalizeOutcome::Rejected {
                mismatched: vec![TicketNumber::new(2), TicketNumber::new(3)]
            }
        );
    }

    #[test]
    fn evaluate_treats_missing_rows_as_mismatched() {
        let tickets = vec![held(1, "alice", 30)];
        assert_eq!(
            request(&[1, 99], "alice", 7).evaluate(&tickets),
            FinalizeOutcome::Rejected {
                mismatched: vec![TicketNumber::new(99)]
            }
        );
    }

    #[test]
    fn evaluate_is_idempotent_for_the_same_order() {
        let tickets = vec![Ticket::purchased(
            CompetitionId::new(1),
            TicketNumber::new(4),
            UserId::new("alice"),
            OrderId::new(7),
        )];
        assert_eq!(
            request(&[4], "alice", 7).evaluate(&tickets),
            FinalizeOutcome::AlreadyPurchased
        );
        assert!(matches!(
            request(&[4], "alice", 8).evaluate(&tickets),
            FinalizeOutcome::Rejected { .. }
        ));
    }

    #[test]
    fn store_error_display() {
        let error = StoreError::CompetitionNotFound(CompetitionId::new(42));
        assert!(format!("{error}").contains("42"));
    }
}
