//! Ticket inventory facade.
//!
//! Exposes the allocation core to its collaborators (HTTP adapter, admin tooling) with
//! the clock applied in one place, so every operation observes the same notion of "now".

use crate::error::{InventoryError, PurchaseError, ReconcileError, ReleaseError, ReservationError};
use crate::inventory::InventoryService;
use crate::purchase::PurchaseFinalizer;
use crate::reconciler::{DriftReport, ReconcileReport, Reconciler};
use crate::reservation::ReservationManager;
use crate::sweeper::ExpirySweeper;
use chrono::Duration;
use raffle_core::environment::Clock;
use raffle_core::types::{
    CompetitionId, DEFAULT_HOLD_MINUTES, Hold, InventoryStats, OrderId, OwnershipInfo,
    StatusSnapshot, TicketNumber, UserId,
};
use raffle_core::{OrderLedger, StoreError, TicketStore};
use std::sync::Arc;

/// Entry point to the allocation core.
///
/// # Example
///
/// ```
/// use raffle::TicketInventoryService;
/// use raffle_core::types::{CompetitionId, TicketNumber, UserId};
/// use raffle_testing::{InMemoryOrderLedger, InMemoryTicketStore, test_clock};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().map(|rt| rt.block_on(async {
/// let service = TicketInventoryService::new(
///     Arc::new(InMemoryTicketStore::new()),
///     Arc::new(InMemoryOrderLedger::new()),
///     Arc::new(test_clock()),
/// );
/// let comp = CompetitionId::new(1);
/// service.initialize(comp, 10).await.ok();
///
/// let hold = service
///     .reserve(comp, &[TicketNumber::new(3)], &UserId::new("alice"))
///     .await;
/// assert!(hold.is_ok());
/// # })).ok();
/// ```
#[derive(Clone)]
pub struct TicketInventoryService {
    inventory: InventoryService,
    reservations: ReservationManager,
    purchases: PurchaseFinalizer,
    sweeper: ExpirySweeper,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
}

impl TicketInventoryService {
    /// Creates a service with the default 30 minute hold
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        ledger: Arc<dyn OrderLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_hold(store, ledger, clock, Duration::minutes(DEFAULT_HOLD_MINUTES))
    }

    /// Creates a service with a custom hold duration
    #[must_use]
    pub fn with_hold(
        store: Arc<dyn TicketStore>,
        ledger: Arc<dyn OrderLedger>,
        clock: Arc<dyn Clock>,
        hold: Duration,
    ) -> Self {
        Self {
            inventory: InventoryService::new(Arc::clone(&store)),
            reservations: ReservationManager::with_hold(Arc::clone(&store), hold),
            purchases: PurchaseFinalizer::new(Arc::clone(&store)),
            sweeper: ExpirySweeper::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                std::time::Duration::from_secs(30),
            ),
            reconciler: Reconciler::with_hold(store, ledger, hold),
            clock,
        }
    }

    /// The reconciler, for scheduling
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Create the ticket set for a competition.
    ///
    /// # Errors
    ///
    /// See [`InventoryService::initialize`].
    pub async fn initialize(
        &self,
        competition_id: CompetitionId,
        total_tickets: u32,
    ) -> Result<(), InventoryError> {
        self.inventory.initialize(competition_id, total_tickets).await
    }

    /// Recreate the ticket set, all available.
    ///
    /// # Errors
    ///
    /// See [`InventoryService::reset`].
    pub async fn reset(&self, competition_id: CompetitionId) -> Result<(), InventoryError> {
        self.inventory.reset(competition_id).await
    }

    /// Logical status of every ticket.
    ///
    /// # Errors
    ///
    /// See [`InventoryService::get_statuses`].
    pub async fn get_ticket_statuses(
        &self,
        competition_id: CompetitionId,
    ) -> Result<StatusSnapshot, InventoryError> {
        self.inventory
            .get_statuses(competition_id, self.clock.now())
            .await
    }

    /// Whether a single number may be reserved now.
    ///
    /// # Errors
    ///
    /// See [`InventoryService::is_available`].
    pub async fn is_available(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
    ) -> Result<bool, InventoryError> {
        self.inventory
            .is_available(competition_id, number, self.clock.now())
            .await
    }

    /// Aggregate counts.
    ///
    /// # Errors
    ///
    /// See [`InventoryService::stats`].
    pub async fn stats(
        &self,
        competition_id: CompetitionId,
    ) -> Result<InventoryStats, InventoryError> {
        self.inventory.stats(competition_id, self.clock.now()).await
    }

    /// Reserve numbers for a user, all or nothing.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::reserve`].
    pub async fn reserve(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
    ) -> Result<Hold, ReservationError> {
        self.reservations
            .reserve(competition_id, ticket_numbers, user_id, self.clock.now())
            .await
    }

    /// Release numbers held by a user.
    ///
    /// # Errors
    ///
    /// See [`ReservationManager::release`].
    pub async fn release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
    ) -> Result<(), ReleaseError> {
        self.reservations
            .release(competition_id, ticket_numbers, user_id)
            .await
    }

    /// Purchase held numbers under an order.
    ///
    /// # Errors
    ///
    /// See [`PurchaseFinalizer::purchase`].
    pub async fn purchase(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<(), PurchaseError> {
        self.purchases
            .purchase(competition_id, ticket_numbers, user_id, order_id, self.clock.now())
            .await
    }

    /// Reclaim every expired hold now.
    ///
    /// # Errors
    ///
    /// Returns the store error; scheduled sweeps log instead.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        self.sweeper.sweep_expired(self.clock.now()).await
    }

    /// Ownership details for one number.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::owner_of`].
    pub async fn owner_of(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
    ) -> Result<OwnershipInfo, ReconcileError> {
        self.reconciler
            .owner_of(competition_id, number, self.clock.now())
            .await
    }

    /// Rebuild the projection from the ledger.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn reconcile(
        &self,
        competition_id: CompetitionId,
    ) -> Result<ReconcileReport, ReconcileError> {
        self.reconciler
            .reconcile(competition_id, self.clock.now())
            .await
    }

    /// Compare the projection with the ledger.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::audit`].
    pub async fn audit(
        &self,
        competition_id: CompetitionId,
    ) -> Result<DriftReport, ReconcileError> {
        self.reconciler.audit(competition_id).await
    }
}
