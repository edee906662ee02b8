//! Inventory setup and logical-status reads.
//!
//! Reads apply the logical-expiry rule: a `reserved` row whose hold has lapsed reports
//! as `available` whether or not the sweeper has reached it yet.

use crate::error::InventoryError;
use chrono::{DateTime, Utc};
use raffle_core::TicketStore;
use raffle_core::types::{
    CompetitionId, CompetitionInventory, InventoryStats, StatusSnapshot, TicketNumber,
};
use std::sync::Arc;

/// Creates, resets and reads a competition's ticket inventory.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn TicketStore>,
}

impl InventoryService {
    /// Creates a service over `store`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Create `total_tickets` available tickets for a competition.
    ///
    /// # Errors
    ///
    /// - `Store(AlreadyInitialized)` if tickets already exist
    /// - `Store(InvalidTotal)` if `total_tickets` is zero
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn initialize(
        &self,
        competition_id: CompetitionId,
        total_tickets: u32,
    ) -> Result<(), InventoryError> {
        self.store.initialize(competition_id, total_tickets).await?;
        Ok(())
    }

    /// Delete and recreate the ticket set, all available, `tickets_sold = 0`.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` if the competition was never initialized.
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn reset(&self, competition_id: CompetitionId) -> Result<(), InventoryError> {
        self.store.reset(competition_id).await?;
        Ok(())
    }

    /// Snapshot of every ticket bucketed by logical status at `now`.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` for an unknown competition.
    pub async fn get_statuses(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> Result<StatusSnapshot, InventoryError> {
        self.header(competition_id).await?;
        let tickets = self.store.load_tickets(competition_id).await?;
        Ok(StatusSnapshot::from_tickets(&tickets, now))
    }

    /// Whether `number` may be reserved at `now`.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` or `InvalidTicketNumber`.
    pub async fn is_available(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        now: DateTime<Utc>,
    ) -> Result<bool, InventoryError> {
        let inventory = self.header(competition_id).await?;
        if !inventory.contains(number) {
            return Err(InventoryError::InvalidTicketNumber {
                competition_id,
                number,
            });
        }

        let ticket = self.store.load_ticket(competition_id, number).await?;
        Ok(ticket.is_some_and(|ticket| ticket.is_available_at(now)))
    }

    /// Aggregate counts for a competition at `now`.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` for an unknown competition.
    pub async fn stats(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> Result<InventoryStats, InventoryError> {
        let inventory = self.header(competition_id).await?;
        let tickets = self.store.load_tickets(competition_id).await?;
        let stats = InventoryStats::new(&inventory, &StatusSnapshot::from_tickets(&tickets, now));

        if !stats.counter_consistent() {
            tracing::warn!(
                competition_id = %competition_id,
                tickets_sold = stats.tickets_sold,
                purchased = stats.purchased,
                "tickets_sold disagrees with purchased rows"
            );
        }
        Ok(stats)
    }

    async fn header(
        &self,
        competition_id: CompetitionId,
    ) -> Result<CompetitionInventory, InventoryError> {
        self.store
            .competition(competition_id)
            .await?
            .ok_or(InventoryError::CompetitionNotFound(competition_id))
    }
}
