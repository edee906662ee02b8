//! Purchase Finalizer.
//!
//! Converts a live hold into a permanent purchase once payment is confirmed. The
//! ownership check, the status flip and the `tickets_sold` increment are one atomic
//! unit in the store; retries with the same `order_id` succeed without double counting.

use crate::error::PurchaseError;
use crate::metrics;
use chrono::{DateTime, Utc};
use raffle_core::TicketStore;
use raffle_core::store::{Finalize, FinalizeOutcome};
use raffle_core::types::{CompetitionId, OrderId, TicketNumber, UserId};
use std::sync::Arc;
use std::time::Instant;

/// Promotes held tickets to purchased.
#[derive(Clone)]
pub struct PurchaseFinalizer {
    store: Arc<dyn TicketStore>,
}

impl PurchaseFinalizer {
    /// Creates a finalizer over `store`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Purchase every requested number for `user_id` under `order_id`.
    ///
    /// Every number must be reserved by `user_id` with a hold still live at `now`.
    /// Replaying a completed purchase with the same `order_id` and numbers succeeds and
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// - `EmptyRequest`: no numbers requested
    /// - `CompetitionNotFound`: unknown competition
    /// - `InvalidTicketNumber`: numbers outside `1..=total_tickets`
    /// - `HoldExpiredOrMismatched`: a number is held by someone else, already sold, or
    ///   its hold lapsed; nothing changed
    /// - `Store`: backend failure; nothing changed
    #[tracing::instrument(
        skip(self, ticket_numbers),
        fields(
            competition_id = %competition_id,
            user_id = %user_id,
            order_id = %order_id,
            count = ticket_numbers.len()
        )
    )]
    pub async fn purchase(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<(), PurchaseError> {
        let started = Instant::now();
        let result = self
            .try_purchase(competition_id, ticket_numbers, user_id, order_id, now)
            .await;
        metrics::record_duration("purchase", started);

        match &result {
            Ok(FinalizeOutcome::Purchased { count }) => {
                metrics::record_purchase("purchased", *count);
                tracing::info!(count, "Tickets purchased");
            }
            Ok(_) => {
                metrics::record_purchase("duplicate", 0);
                tracing::debug!("Purchase already applied for this order");
            }
            Err(PurchaseError::HoldExpiredOrMismatched(mismatched)) => {
                metrics::record_purchase("mismatched", 0);
                tracing::info!(?mismatched, "Purchase rejected: hold expired or mismatched");
            }
            Err(PurchaseError::Store(error)) => {
                metrics::record_purchase("failed", 0);
                tracing::error!(%error, "Purchase failed in store");
            }
            Err(error) => {
                metrics::record_purchase("rejected", 0);
                tracing::debug!(%error, "Purchase rejected");
            }
        }
        result.map(|_| ())
    }

    async fn try_purchase(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, PurchaseError> {
        if ticket_numbers.is_empty() {
            return Err(PurchaseError::EmptyRequest);
        }
        let numbers = TicketNumber::normalize(ticket_numbers);

        let inventory = self
            .store
            .competition(competition_id)
            .await?
            .ok_or(PurchaseError::CompetitionNotFound(competition_id))?;
        let invalid = inventory.out_of_range(&numbers);
        if !invalid.is_empty() {
            return Err(PurchaseError::InvalidTicketNumber(invalid));
        }

        let outcome = self
            .store
            .finalize(Finalize {
                competition_id,
                ticket_numbers: numbers,
                user_id: user_id.clone(),
                order_id,
                now,
            })
            .await?;

        match outcome {
            FinalizeOutcome::Rejected { mismatched } => {
                Err(PurchaseError::HoldExpiredOrMismatched(mismatched))
            }
            accepted => Ok(accepted),
        }
    }
}
