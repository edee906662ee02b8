//! Reservation Manager.
//!
//! Claims a set of ticket numbers for one user, all or nothing, for a bounded hold.
//! Validation happens before any mutation; the claim itself is a single atomic unit
//! inside the store, so no partial hold is ever visible to other callers.

use crate::error::{ReleaseError, ReservationError};
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use raffle_core::TicketStore;
use raffle_core::store::{Claim, ClaimOutcome};
use raffle_core::types::{
    CompetitionId, CompetitionInventory, DEFAULT_HOLD_MINUTES, Hold, ReservationExpiry,
    TicketNumber, UserId,
};
use std::sync::Arc;
use std::time::Instant;

/// All-or-nothing reservation of ticket numbers.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn TicketStore>,
    hold: Duration,
}

impl ReservationManager {
    /// Creates a manager with the default 30 minute hold
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self::with_hold(store, Duration::minutes(DEFAULT_HOLD_MINUTES))
    }

    /// Creates a manager with a custom hold duration
    #[must_use]
    pub const fn with_hold(store: Arc<dyn TicketStore>, hold: Duration) -> Self {
        Self { store, hold }
    }

    /// Hold duration applied to new reservations
    #[must_use]
    pub const fn hold(&self) -> Duration {
        self.hold
    }

    /// Reserve every requested number for `user_id` until `now + hold`, or none of them.
    ///
    /// Duplicate numbers in the request are collapsed. Expired holds count as free.
    ///
    /// # Errors
    ///
    /// - `EmptyRequest`: no numbers requested
    /// - `CompetitionNotFound`: unknown competition
    /// - `InvalidTicketNumber`: numbers outside `1..=total_tickets`
    /// - `TicketsUnavailable`: one or more numbers were not free; nothing changed
    /// - `Store`: backend failure; nothing changed
    #[tracing::instrument(
        skip(self, ticket_numbers),
        fields(competition_id = %competition_id, user_id = %user_id, count = ticket_numbers.len())
    )]
    pub async fn reserve(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Hold, ReservationError> {
        let started = Instant::now();
        let result = self
            .try_reserve(competition_id, ticket_numbers, user_id, now)
            .await;
        metrics::record_duration("reserve", started);

        match &result {
            Ok(hold) => {
                metrics::record_reservation("reserved", hold.ticket_numbers.len());
                tracing::debug!(expires_at = %hold.expires_at, "Tickets reserved");
            }
            Err(ReservationError::TicketsUnavailable(conflicting)) => {
                metrics::record_reservation("unavailable", 0);
                tracing::debug!(?conflicting, "Reservation conflicted");
            }
            Err(ReservationError::Store(error)) => {
                metrics::record_reservation("failed", 0);
                tracing::error!(%error, "Reservation failed in store");
            }
            Err(error) => {
                metrics::record_reservation("rejected", 0);
                tracing::debug!(%error, "Reservation rejected");
            }
        }
        result
    }

    async fn try_reserve(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Hold, ReservationError> {
        if ticket_numbers.is_empty() {
            return Err(ReservationError::EmptyRequest);
        }
        let numbers = TicketNumber::normalize(ticket_numbers);

        let inventory = self.header(competition_id).await?;
        let invalid = inventory.out_of_range(&numbers);
        if !invalid.is_empty() {
            return Err(ReservationError::InvalidTicketNumber(invalid));
        }

        let expires_at = ReservationExpiry::after(now, self.hold);
        let claim = Claim {
            competition_id,
            ticket_numbers: numbers.clone(),
            user_id: user_id.clone(),
            expires_at,
            now,
        };

        match self.store.claim(claim).await? {
            ClaimOutcome::Claimed => Ok(Hold {
                competition_id,
                user_id: user_id.clone(),
                ticket_numbers: numbers,
                expires_at,
            }),
            ClaimOutcome::Unavailable { conflicting } => {
                Err(ReservationError::TicketsUnavailable(conflicting))
            }
        }
    }

    /// Return numbers reserved by `user_id` to the available pool.
    ///
    /// Numbers not currently reserved by `user_id` are skipped, so client retries are
    /// harmless. An empty request is a no-op.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`: unknown competition
    /// - `InvalidTicketNumber`: numbers outside `1..=total_tickets`
    /// - `Store`: backend failure
    #[tracing::instrument(
        skip(self, ticket_numbers),
        fields(competition_id = %competition_id, user_id = %user_id, count = ticket_numbers.len())
    )]
    pub async fn release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
    ) -> Result<(), ReleaseError> {
        if ticket_numbers.is_empty() {
            return Ok(());
        }
        let numbers = TicketNumber::normalize(ticket_numbers);

        let inventory = self
            .store
            .competition(competition_id)
            .await?
            .ok_or(ReleaseError::CompetitionNotFound(competition_id))?;
        let invalid = inventory.out_of_range(&numbers);
        if !invalid.is_empty() {
            return Err(ReleaseError::InvalidTicketNumber(invalid));
        }

        let released = self
            .store
            .release(competition_id, numbers, user_id.clone())
            .await?;
        metrics::record_release(released.len());
        tracing::debug!(released = released.len(), "Tickets released");
        Ok(())
    }

    async fn header(
        &self,
        competition_id: CompetitionId,
    ) -> Result<CompetitionInventory, ReservationError> {
        self.store
            .competition(competition_id)
            .await?
            .ok_or(ReservationError::CompetitionNotFound(competition_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use raffle_core::types::TicketStatus;
    use raffle_testing::helpers::numbers;
    use raffle_testing::{InMemoryTicketStore, test_epoch};

    const COMP: CompetitionId = CompetitionId::new(1);

    fn setup(total: u32) -> (InMemoryTicketStore, ReservationManager) {
        let store = InMemoryTicketStore::new();
        block_on(store.initialize(COMP, total)).ok();
        let manager = ReservationManager::new(Arc::new(store.clone()));
        (store, manager)
    }

    #[test]
    fn hold_lasts_thirty_minutes_by_default() {
        let (_store, manager) = setup(5);
        let hold = block_on(manager.reserve(
            COMP,
            &numbers(&[2, 1, 2]),
            &UserId::new("a"),
            test_epoch(),
        ));
        let hold = hold.ok();
        assert_eq!(hold.as_ref().map(|h| h.ticket_numbers.clone()), Some(numbers(&[1, 2])));
        assert_eq!(
            hold.map(|h| h.expires_at),
            Some(ReservationExpiry::after(test_epoch(), Duration::minutes(30)))
        );
    }

    #[test]
    fn validation_happens_before_mutation() {
        let (store, manager) = setup(5);
        let before = store.raw_snapshot(COMP);
        let user = UserId::new("a");

        assert_eq!(
            block_on(manager.reserve(COMP, &[], &user, test_epoch())),
            Err(ReservationError::EmptyRequest)
        );
        assert_eq!(
            block_on(manager.reserve(COMP, &numbers(&[1, 6]), &user, test_epoch())),
            Err(ReservationError::InvalidTicketNumber(numbers(&[6])))
        );
        assert_eq!(
            block_on(manager.reserve(CompetitionId::new(9), &numbers(&[1]), &user, test_epoch())),
            Err(ReservationError::CompetitionNotFound(CompetitionId::new(9)))
        );
        assert_eq!(store.raw_snapshot(COMP), before);
    }

    #[test]
    fn release_skips_numbers_held_by_others() {
        let (store, manager) = setup(5);
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        block_on(manager.reserve(COMP, &numbers(&[1]), &alice, test_epoch())).ok();
        block_on(manager.reserve(COMP, &numbers(&[2]), &bob, test_epoch())).ok();

        assert_eq!(block_on(manager.release(COMP, &numbers(&[1, 2, 3]), &alice)), Ok(()));

        let tickets = block_on(store.load_tickets(COMP)).unwrap_or_default();
        assert_eq!(tickets[0].status, TicketStatus::Available);
        assert_eq!(tickets[1].status, TicketStatus::Reserved);
        assert_eq!(tickets[1].holder, Some(bob));
    }

    #[test]
    fn release_rejects_out_of_range_numbers() {
        let (_store, manager) = setup(5);
        assert_eq!(
            block_on(manager.release(COMP, &numbers(&[0]), &UserId::new("a"))),
            Err(ReleaseError::InvalidTicketNumber(numbers(&[0])))
        );
        assert_eq!(block_on(manager.release(COMP, &[], &UserId::new("a"))), Ok(()));
    }
}
