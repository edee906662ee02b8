//! In-memory store and ledger backends.
//!
//! Provides fast, deterministic implementations of [`TicketStore`] and [`OrderLedger`]:
//! - [`InMemoryTicketStore`]: one `RwLock` guards every competition, so each trait
//!   method runs as a single critical section
//! - [`InMemoryOrderLedger`]: `BTreeMap`-backed order storage
//!
//! Both are cheap to clone; clones share state.

use chrono::{DateTime, Utc};
use raffle_core::ledger::OrderLedger;
use raffle_core::store::{
    Claim, ClaimOutcome, Finalize, FinalizeOutcome, StoreError, StoreFuture, TicketStore,
};
use raffle_core::types::{
    CompetitionId, CompetitionInventory, Order, OrderId, PaymentStatus, Ticket, TicketNumber,
    TicketStatus, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug)]
struct CompetitionRecord {
    total_tickets: u32,
    tickets_sold: u32,
    /// Indexed by `number - 1`
    tickets: Vec<Ticket>,
}

impl CompetitionRecord {
    fn new(competition_id: CompetitionId, total_tickets: u32) -> Self {
        Self {
            total_tickets,
            tickets_sold: 0,
            tickets: (1..=total_tickets)
                .map(|number| Ticket::available(competition_id, TicketNumber::new(number)))
                .collect(),
        }
    }

    fn header(&self, competition_id: CompetitionId) -> CompetitionInventory {
        CompetitionInventory {
            competition_id,
            total_tickets: self.total_tickets,
            tickets_sold: self.tickets_sold,
        }
    }

    fn index(number: TicketNumber) -> Option<usize> {
        usize::try_from(number.value()).ok()?.checked_sub(1)
    }

    fn ticket(&self, number: TicketNumber) -> Option<&Ticket> {
        self.tickets.get(Self::index(number)?)
    }

    fn ticket_mut(&mut self, number: TicketNumber) -> Option<&mut Ticket> {
        let index = Self::index(number)?;
        self.tickets.get_mut(index)
    }
}

/// In-memory ticket inventory for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use raffle_core::store::TicketStore;
/// use raffle_core::types::CompetitionId;
/// use raffle_testing::InMemoryTicketStore;
///
/// # futures::executor::block_on(async {
/// let store = InMemoryTicketStore::new();
/// store.initialize(CompetitionId::new(7), 5).await?;
///
/// let header = store.competition(CompetitionId::new(7)).await?;
/// assert_eq!(header.map(|c| c.total_tickets), Some(5));
/// # Ok::<(), raffle_core::StoreError>(())
/// # }).ok();
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    competitions: Arc<RwLock<HashMap<CompetitionId, CompetitionRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryTicketStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Database`] until cleared.
    ///
    /// Used to exercise log-and-continue paths in background tasks.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Overwrite one ticket row without any checks (for drift and corruption fixtures).
    pub fn put_ticket(&self, ticket: Ticket) {
        let mut competitions = self.write();
        if let Some(slot) = competitions
            .get_mut(&ticket.competition_id)
            .and_then(|record| record.ticket_mut(ticket.number))
        {
            *slot = ticket;
        }
    }

    /// Overwrite the denormalized counter without touching tickets (drift fixture).
    pub fn set_tickets_sold(&self, competition_id: CompetitionId, tickets_sold: u32) {
        if let Some(record) = self.write().get_mut(&competition_id) {
            record.tickets_sold = tickets_sold;
        }
    }

    /// Raw header and ticket rows, for exact before/after comparisons.
    #[must_use]
    pub fn raw_snapshot(
        &self,
        competition_id: CompetitionId,
    ) -> Option<(CompetitionInventory, Vec<Ticket>)> {
        self.read()
            .get(&competition_id)
            .map(|record| (record.header(competition_id), record.tickets.clone()))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CompetitionId, CompetitionRecord>> {
        self.competitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CompetitionId, CompetitionRecord>> {
        self.competitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Database("in-memory store set to fail".to_string()))
        } else {
            Ok(())
        }
    }

    fn initialize_now(
        &self,
        competition_id: CompetitionId,
        total_tickets: u32,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        if total_tickets == 0 {
            return Err(StoreError::InvalidTotal(total_tickets));
        }

        let mut competitions = self.write();
        if competitions.contains_key(&competition_id) {
            return Err(StoreError::AlreadyInitialized(competition_id));
        }
        competitions.insert(
            competition_id,
            CompetitionRecord::new(competition_id, total_tickets),
        );
        Ok(())
    }

    fn reset_now(&self, competition_id: CompetitionId) -> Result<(), StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let record = competitions
            .get_mut(&competition_id)
            .ok_or(StoreError::CompetitionNotFound(competition_id))?;
        *record = CompetitionRecord::new(competition_id, record.total_tickets);
        Ok(())
    }

    fn claim_now(&self, claim: &Claim) -> Result<ClaimOutcome, StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let Some(record) = competitions.get_mut(&claim.competition_id) else {
            return Ok(ClaimOutcome::Unavailable {
                conflicting: claim.ticket_numbers.clone(),
            });
        };

        // Transition every eligible row, remembering what it looked like before.
        let mut transitioned: Vec<Ticket> = Vec::with_capacity(claim.ticket_numbers.len());
        let mut conflicting = Vec::new();
        for number in &claim.ticket_numbers {
            match record.ticket_mut(*number) {
                Some(ticket) if ticket.is_available_at(claim.now) => {
                    transitioned.push(ticket.clone());
                    *ticket = Ticket::reserved(
                        claim.competition_id,
                        *number,
                        claim.user_id.clone(),
                        claim.expires_at,
                    );
                }
                _ => conflicting.push(*number),
            }
        }

        if transitioned.len() != claim.ticket_numbers.len() {
            for original in transitioned {
                if let Some(ticket) = record.ticket_mut(original.number) {
                    *ticket = original;
                }
            }
            return Ok(ClaimOutcome::Unavailable { conflicting });
        }

        Ok(ClaimOutcome::Claimed)
    }

    fn release_now(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        holder: &UserId,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let Some(record) = competitions.get_mut(&competition_id) else {
            return Ok(Vec::new());
        };

        let mut released = Vec::new();
        for number in ticket_numbers {
            if let Some(ticket) = record.ticket_mut(*number) {
                if ticket.status == TicketStatus::Reserved && ticket.holder.as_ref() == Some(holder)
                {
                    ticket.make_available();
                    released.push(*number);
                }
            }
        }
        Ok(released)
    }

    fn finalize_now(&self, finalize: &Finalize) -> Result<FinalizeOutcome, StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let record = competitions
            .get_mut(&finalize.competition_id)
            .ok_or(StoreError::CompetitionNotFound(finalize.competition_id))?;

        let current: Vec<Ticket> = finalize
            .ticket_numbers
            .iter()
            .filter_map(|number| record.ticket(*number).cloned())
            .collect();

        let outcome = finalize.evaluate(&current);
        if let FinalizeOutcome::Purchased { count } = outcome {
            for number in &finalize.ticket_numbers {
                if let Some(ticket) = record.ticket_mut(*number) {
                    *ticket = Ticket::purchased(
                        finalize.competition_id,
                        *number,
                        finalize.user_id.clone(),
                        finalize.order_id,
                    );
                }
            }
            record.tickets_sold += count;
        }
        Ok(outcome)
    }

    fn sweep_now(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let mut reclaimed = 0_u64;
        for record in competitions.values_mut() {
            for ticket in &mut record.tickets {
                let expired = ticket.status == TicketStatus::Reserved
                    && ticket
                        .reservation_expiry
                        .is_none_or(|expiry| expiry.is_expired(now));
                if expired {
                    ticket.make_available();
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }

    fn replace_now(
        &self,
        competition_id: CompetitionId,
        tickets: Vec<Ticket>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut competitions = self.write();
        let record = competitions
            .get_mut(&competition_id)
            .ok_or(StoreError::CompetitionNotFound(competition_id))?;

        let mut rebuilt = CompetitionRecord::new(competition_id, record.total_tickets);
        for ticket in tickets {
            if ticket.competition_id != competition_id || !ticket.is_well_formed() {
                return Err(StoreError::Corrupt(format!(
                    "Rejected projection row for ticket {}",
                    ticket.number
                )));
            }
            let number = ticket.number;
            let slot = rebuilt.ticket_mut(number).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "Ticket {number} is outside competition {competition_id}"
                ))
            })?;
            *slot = ticket;
        }

        rebuilt.tickets_sold = rebuilt
            .tickets
            .iter()
            .filter(|ticket| ticket.status == TicketStatus::Purchased)
            .fold(0, |sold, _| sold + 1);
        *record = rebuilt;
        Ok(())
    }
}

impl TicketStore for InMemoryTicketStore {
    fn initialize(&self, competition_id: CompetitionId, total_tickets: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.initialize_now(competition_id, total_tickets) })
    }

    fn reset(&self, competition_id: CompetitionId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.reset_now(competition_id) })
    }

    fn competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<CompetitionInventory>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self
                .read()
                .get(&competition_id)
                .map(|record| record.header(competition_id)))
        })
    }

    fn competitions(&self) -> StoreFuture<'_, Vec<CompetitionInventory>> {
        Box::pin(async move {
            self.check_online()?;
            let mut headers: Vec<CompetitionInventory> = self
                .read()
                .iter()
                .map(|(id, record)| record.header(*id))
                .collect();
            headers.sort_by_key(|header| header.competition_id);
            Ok(headers)
        })
    }

    fn load_tickets(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self
                .read()
                .get(&competition_id)
                .map(|record| record.tickets.clone())
                .unwrap_or_default())
        })
    }

    fn load_ticket(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self
                .read()
                .get(&competition_id)
                .and_then(|record| record.ticket(number).cloned()))
        })
    }

    fn claim(&self, claim: Claim) -> StoreFuture<'_, ClaimOutcome> {
        Box::pin(async move { self.claim_now(&claim) })
    }

    fn release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: Vec<TicketNumber>,
        holder: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        Box::pin(async move { self.release_now(competition_id, &ticket_numbers, &holder) })
    }

    fn finalize(&self, finalize: Finalize) -> StoreFuture<'_, FinalizeOutcome> {
        Box::pin(async move { self.finalize_now(&finalize) })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move { self.sweep_now(now) })
    }

    fn replace_tickets(
        &self,
        competition_id: CompetitionId,
        tickets: Vec<Ticket>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.replace_now(competition_id, tickets) })
    }
}

// ============================================================================
// Order Ledger
// ============================================================================

/// In-memory order ledger.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderLedger {
    orders: Arc<RwLock<BTreeMap<OrderId, Order>>>,
}

impl InMemoryOrderLedger {
    /// Create a new empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders recorded
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderLedger for InMemoryOrderLedger {
    fn append(&self, order: Order) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
            if orders.contains_key(&order.order_id) {
                return Err(StoreError::DuplicateOrder(order.order_id));
            }
            orders.insert(order.order_id, order);
            Ok(())
        })
    }

    fn update_payment_status(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
            let order = orders
                .get_mut(&order_id)
                .ok_or(StoreError::OrderNotFound(order_id))?;
            order.payment_status = status;
            Ok(())
        })
    }

    fn load_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            Ok(self
                .orders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&order_id)
                .cloned())
        })
    }

    fn orders_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let mut orders: Vec<Order> = self
                .orders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .filter(|order| order.competition_id == competition_id)
                .cloned()
                .collect();
            orders.sort_by_key(|order| (order.created_at, order.order_id));
            Ok(orders)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{numbers, order};
    use crate::mocks::test_epoch;
    use chrono::Duration;
    use futures::executor::block_on;
    use raffle_core::types::ReservationExpiry;

    const COMP: CompetitionId = CompetitionId::new(1);

    fn claim(raw: &[u32], user: &str, now: DateTime<Utc>) -> Claim {
        Claim {
            competition_id: COMP,
            ticket_numbers: numbers(raw),
            user_id: UserId::new(user),
            expires_at: ReservationExpiry::after(now, Duration::minutes(30)),
            now,
        }
    }

    #[test]
    fn initialize_rejects_duplicates_and_zero() {
        let store = InMemoryTicketStore::new();
        assert_eq!(block_on(store.initialize(COMP, 0)), Err(StoreError::InvalidTotal(0)));
        assert!(block_on(store.initialize(COMP, 3)).is_ok());
        assert_eq!(
            block_on(store.initialize(COMP, 3)),
            Err(StoreError::AlreadyInitialized(COMP))
        );
        assert_eq!(block_on(store.load_tickets(COMP)).map(|t| t.len()), Ok(3));
    }

    #[test]
    fn failed_claim_restores_transitioned_rows() {
        let store = InMemoryTicketStore::new();
        block_on(store.initialize(COMP, 5)).ok();
        let now = test_epoch();

        assert_eq!(block_on(store.claim(claim(&[2], "bob", now))), Ok(ClaimOutcome::Claimed));
        let before = store.raw_snapshot(COMP);

        let outcome = block_on(store.claim(claim(&[1, 2, 3], "alice", now)));
        assert_eq!(
            outcome,
            Ok(ClaimOutcome::Unavailable {
                conflicting: numbers(&[2])
            })
        );
        assert_eq!(store.raw_snapshot(COMP), before);
    }

    #[test]
    fn claim_takes_over_lapsed_holds() {
        let store = InMemoryTicketStore::new();
        block_on(store.initialize(COMP, 5)).ok();
        let now = test_epoch();

        block_on(store.claim(claim(&[4], "bob", now))).ok();
        let later = now + Duration::minutes(30);
        assert_eq!(
            block_on(store.claim(claim(&[4], "alice", later))),
            Ok(ClaimOutcome::Claimed)
        );
    }

    #[test]
    fn finalize_bumps_counter_once() {
        let store = InMemoryTicketStore::new();
        block_on(store.initialize(COMP, 5)).ok();
        let now = test_epoch();
        block_on(store.claim(claim(&[1, 2], "alice", now))).ok();

        let finalize = Finalize {
            competition_id: COMP,
            ticket_numbers: numbers(&[1, 2]),
            user_id: UserId::new("alice"),
            order_id: OrderId::new(10),
            now,
        };
        assert_eq!(
            block_on(store.finalize(finalize.clone())),
            Ok(FinalizeOutcome::Purchased { count: 2 })
        );
        assert_eq!(
            block_on(store.finalize(finalize)),
            Ok(FinalizeOutcome::AlreadyPurchased)
        );
        let header = block_on(store.competition(COMP)).ok().flatten();
        assert_eq!(header.map(|h| h.tickets_sold), Some(2));
    }

    #[test]
    fn sweep_reclaims_only_lapsed_holds() {
        let store = InMemoryTicketStore::new();
        block_on(store.initialize(COMP, 5)).ok();
        let now = test_epoch();
        block_on(store.claim(claim(&[1], "alice", now))).ok();
        block_on(store.claim(claim(&[2], "bob", now + Duration::minutes(10)))).ok();

        assert_eq!(block_on(store.sweep_expired(now + Duration::minutes(30))), Ok(1));
        let ticket = block_on(store.load_ticket(COMP, TicketNumber::new(2)))
            .ok()
            .flatten();
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Reserved));
    }

    #[test]
    fn failing_store_reports_database_errors() {
        let store = InMemoryTicketStore::new();
        store.set_failing(true);
        assert!(matches!(
            block_on(store.sweep_expired(test_epoch())),
            Err(StoreError::Database(_))
        ));
        store.set_failing(false);
        assert_eq!(block_on(store.sweep_expired(test_epoch())), Ok(0));
    }

    #[test]
    fn ledger_orders_come_back_oldest_first() {
        let ledger = InMemoryOrderLedger::new();
        let t0 = test_epoch();
        let later = order(2, COMP, "bob", &[2], PaymentStatus::Pending, t0 + Duration::minutes(1));
        let earlier = order(1, COMP, "alice", &[1], PaymentStatus::Completed, t0);
        block_on(ledger.append(later)).ok();
        block_on(ledger.append(earlier)).ok();

        let ids: Vec<i64> = block_on(ledger.orders_for_competition(COMP))
            .unwrap_or_default()
            .iter()
            .map(|order| order.order_id.value())
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let duplicate = order(1, COMP, "carol", &[3], PaymentStatus::Pending, t0);
        assert_eq!(
            block_on(ledger.append(duplicate)),
            Err(StoreError::DuplicateOrder(OrderId::new(1)))
        );
    }

    #[test]
    fn payment_status_update_requires_existing_order() {
        let ledger = InMemoryOrderLedger::new();
        assert_eq!(
            block_on(ledger.update_payment_status(OrderId::new(5), PaymentStatus::Completed)),
            Err(StoreError::OrderNotFound(OrderId::new(5)))
        );
    }
}
