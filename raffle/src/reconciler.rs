//! Reconciler.
//!
//! The order ledger is the authoritative record of intent; the ticket inventory is a
//! derived projection of it. The reconciler rebuilds that projection from the ledger,
//! audits it for drift, and answers ownership lookups for support tooling. None of this
//! runs on the reservation or purchase hot path.
//!
//! # Rebuild policy
//!
//! - `completed` orders become `purchased`, `pending` orders become `reserved` with a
//!   fresh hold, `failed` orders contribute nothing
//! - when orders overlap, completed beats pending and then the earliest order wins
//! - numbers outside `1..=total_tickets` are skipped and reported
//! - `tickets_sold` is rewritten to the purchased count in the same atomic unit

use crate::error::ReconcileError;
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use raffle_core::environment::Clock;
use raffle_core::types::{
    CompetitionId, CompetitionInventory, DEFAULT_HOLD_MINUTES, Order, OrderId, OwnershipInfo,
    PaymentStatus, ReservationExpiry, Ticket, TicketNumber, TicketStatus,
};
use raffle_core::{OrderLedger, TicketStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Two orders naming the same ticket number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketConflict {
    /// Contested number
    pub ticket_number: TicketNumber,
    /// Order that keeps the number
    pub kept: OrderId,
    /// Order whose claim was dropped
    pub dropped: OrderId,
}

/// A number an order names that does not exist in the competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNumber {
    /// Order naming the number
    pub order_id: OrderId,
    /// Out-of-range number
    pub ticket_number: TicketNumber,
}

/// Outcome of a rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Competition rebuilt
    pub competition_id: CompetitionId,
    /// Tickets written as purchased (and the new `tickets_sold`)
    pub purchased: u32,
    /// Tickets written as reserved
    pub reserved: u32,
    /// Tickets left available
    pub available: u32,
    /// Overlapping claims resolved by the rebuild policy
    pub conflicts: Vec<TicketConflict>,
    /// Out-of-range numbers ignored
    pub skipped: Vec<SkippedNumber>,
}

/// Differences between the projection and the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Competition audited
    pub competition_id: CompetitionId,
    /// Denormalized counter
    pub tickets_sold: u32,
    /// Purchased rows in the projection
    pub purchased_count: u32,
    /// Purchased in the projection, but no completed order names them
    pub purchased_without_order: Vec<TicketNumber>,
    /// Named by a completed order, but not purchased in the projection
    pub completed_not_purchased: Vec<TicketNumber>,
    /// Purchased, but under a different user or order than the winning completed order
    pub ownership_mismatches: Vec<TicketNumber>,
    /// Named by more than one completed order
    pub duplicate_claims: Vec<TicketNumber>,
}

impl DriftReport {
    /// Whether `tickets_sold` disagrees with the purchased rows
    #[must_use]
    pub const fn counter_drift(&self) -> bool {
        self.tickets_sold != self.purchased_count
    }

    /// Whether the projection matches the ledger exactly
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.needs_rebuild() && self.duplicate_claims.is_empty()
    }

    /// Whether a rebuild from the ledger would clear the reported drift.
    ///
    /// Duplicate claims live in the ledger itself and survive any rebuild.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.counter_drift()
            || !self.purchased_without_order.is_empty()
            || !self.completed_not_purchased.is_empty()
            || !self.ownership_mismatches.is_empty()
    }
}

/// Projection derived from a ledger, ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildPlan {
    /// Non-available tickets, ascending by number
    pub tickets: Vec<Ticket>,
    /// Summary of the rebuild
    pub report: ReconcileReport,
}

impl RebuildPlan {
    /// Derives the ticket projection for `inventory` from its `orders`.
    ///
    /// Pending orders get a hold lasting `hold` from `now`. Pure; touches no store.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded by total_tickets (u32)
    pub fn from_orders(
        inventory: &CompetitionInventory,
        orders: &[Order],
        now: DateTime<Utc>,
        hold: Duration,
    ) -> Self {
        let mut ranked: Vec<&Order> = orders
            .iter()
            .filter(|order| order.payment_status != PaymentStatus::Failed)
            .collect();
        ranked.sort_by_key(|order| {
            (
                order.payment_status != PaymentStatus::Completed,
                order.created_at,
                order.order_id,
            )
        });

        let expires_at = ReservationExpiry::after(now, hold);
        let mut assigned: BTreeMap<TicketNumber, (OrderId, Ticket)> = BTreeMap::new();
        let mut conflicts = Vec::new();
        let mut skipped = Vec::new();

        for order in ranked {
            for number in TicketNumber::normalize(&order.ticket_numbers) {
                if !inventory.contains(number) {
                    skipped.push(SkippedNumber {
                        order_id: order.order_id,
                        ticket_number: number,
                    });
                    continue;
                }
                if let Some((kept, _)) = assigned.get(&number) {
                    conflicts.push(TicketConflict {
                        ticket_number: number,
                        kept: *kept,
                        dropped: order.order_id,
                    });
                    continue;
                }

                let ticket = if order.payment_status == PaymentStatus::Completed {
                    Ticket::purchased(
                        inventory.competition_id,
                        number,
                        order.user_id.clone(),
                        order.order_id,
                    )
                } else {
                    Ticket::reserved(
                        inventory.competition_id,
                        number,
                        order.user_id.clone(),
                        expires_at,
                    )
                };
                assigned.insert(number, (order.order_id, ticket));
            }
        }

        let tickets: Vec<Ticket> = assigned.into_values().map(|(_, ticket)| ticket).collect();
        let purchased = tickets
            .iter()
            .filter(|ticket| ticket.status == TicketStatus::Purchased)
            .count() as u32;
        let reserved = tickets.len() as u32 - purchased;

        Self {
            report: ReconcileReport {
                competition_id: inventory.competition_id,
                purchased,
                reserved,
                available: inventory.total_tickets - purchased - reserved,
                conflicts,
                skipped,
            },
            tickets,
        }
    }
}

/// Rebuilds, audits and explains the ticket projection from the order ledger.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TicketStore>,
    ledger: Arc<dyn OrderLedger>,
    hold: Duration,
}

impl Reconciler {
    /// Creates a reconciler with the default 30 minute hold for pending orders
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, ledger: Arc<dyn OrderLedger>) -> Self {
        Self::with_hold(store, ledger, Duration::minutes(DEFAULT_HOLD_MINUTES))
    }

    /// Creates a reconciler with a custom hold for pending orders
    #[must_use]
    pub const fn with_hold(
        store: Arc<dyn TicketStore>,
        ledger: Arc<dyn OrderLedger>,
        hold: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            hold,
        }
    }

    async fn header(
        &self,
        competition_id: CompetitionId,
    ) -> Result<CompetitionInventory, ReconcileError> {
        self.store
            .competition(competition_id)
            .await?
            .ok_or(ReconcileError::CompetitionNotFound(competition_id))
    }

    /// Overwrite the competition's projection with one derived from its orders.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` for an unknown competition, or `Store` if the
    /// ledger read or the projection write fails (the write is atomic).
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn reconcile(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let inventory = self.header(competition_id).await?;
        let orders = self.ledger.orders_for_competition(competition_id).await?;
        let plan = RebuildPlan::from_orders(&inventory, &orders, now, self.hold);

        self.store
            .replace_tickets(competition_id, plan.tickets)
            .await?;
        metrics::record_reconcile("rebuild", false);

        let report = plan.report;
        tracing::info!(
            purchased = report.purchased,
            reserved = report.reserved,
            conflicts = report.conflicts.len(),
            skipped = report.skipped.len(),
            "Projection rebuilt from ledger"
        );
        Ok(report)
    }

    /// Compare the projection with the ledger without changing anything.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound` for an unknown competition, or `Store` on read failure.
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    #[allow(clippy::cast_possible_truncation)] // bounded by total_tickets (u32)
    pub async fn audit(
        &self,
        competition_id: CompetitionId,
    ) -> Result<DriftReport, ReconcileError> {
        let inventory = self.header(competition_id).await?;
        let orders = self.ledger.orders_for_competition(competition_id).await?;
        let tickets = self.store.load_tickets(competition_id).await?;

        let mut completed: Vec<&Order> = orders
            .iter()
            .filter(|order| order.payment_status == PaymentStatus::Completed)
            .collect();
        completed.sort_by_key(|order| (order.created_at, order.order_id));

        // Winning completed order per number, plus numbers claimed more than once.
        let mut winners: BTreeMap<TicketNumber, &Order> = BTreeMap::new();
        let mut duplicate_claims = Vec::new();
        for order in completed {
            for number in TicketNumber::normalize(&order.ticket_numbers) {
                if !inventory.contains(number) {
                    continue;
                }
                if winners.contains_key(&number) {
                    duplicate_claims.push(number);
                } else {
                    winners.insert(number, order);
                }
            }
        }
        duplicate_claims.sort();
        duplicate_claims.dedup();

        let mut purchased_without_order = Vec::new();
        let mut ownership_mismatches = Vec::new();
        let mut purchased_count = 0_u32;
        for ticket in &tickets {
            if ticket.status != TicketStatus::Purchased {
                continue;
            }
            purchased_count += 1;
            match winners.get(&ticket.number) {
                None => purchased_without_order.push(ticket.number),
                Some(order) if !ticket.is_purchased_by(&order.user_id, order.order_id) => {
                    ownership_mismatches.push(ticket.number);
                }
                Some(_) => {}
            }
        }

        let completed_not_purchased = winners
            .keys()
            .copied()
            .filter(|number| {
                !tickets.iter().any(|ticket| {
                    ticket.number == *number && ticket.status == TicketStatus::Purchased
                })
            })
            .collect();

        let report = DriftReport {
            competition_id,
            tickets_sold: inventory.tickets_sold,
            purchased_count,
            purchased_without_order,
            completed_not_purchased,
            ownership_mismatches,
            duplicate_claims,
        };

        let drift = !report.is_clean();
        metrics::record_reconcile("audit", drift);
        if drift {
            tracing::warn!(
                tickets_sold = report.tickets_sold,
                purchased = report.purchased_count,
                purchased_without_order = report.purchased_without_order.len(),
                completed_not_purchased = report.completed_not_purchased.len(),
                ownership_mismatches = report.ownership_mismatches.len(),
                duplicate_claims = report.duplicate_claims.len(),
                "Ticket projection drifted from order ledger"
            );
        }
        Ok(report)
    }

    /// Who holds or owns `number` at `now`, with purchase details from the ledger.
    ///
    /// # Errors
    ///
    /// Returns `CompetitionNotFound`, `InvalidTicketNumber`, or `Store` on read failure.
    pub async fn owner_of(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        now: DateTime<Utc>,
    ) -> Result<OwnershipInfo, ReconcileError> {
        let inventory = self.header(competition_id).await?;
        if !inventory.contains(number) {
            return Err(ReconcileError::InvalidTicketNumber {
                competition_id,
                number,
            });
        }

        let ticket = self
            .store
            .load_ticket(competition_id, number)
            .await?
            .unwrap_or_else(|| Ticket::available(competition_id, number));
        let status = ticket.effective_status(now);

        let (order_id, purchased_at) = match (status, ticket.order_id) {
            (TicketStatus::Purchased, Some(order_id)) => {
                let order = self.ledger.load_order(order_id).await?;
                (Some(order_id), order.map(|order| order.created_at))
            }
            _ => (None, None),
        };

        Ok(OwnershipInfo {
            competition_id,
            ticket_number: number,
            status,
            user_id: ticket.effective_holder(now).cloned(),
            order_id,
            purchased_at,
            reservation_expiry: if status == TicketStatus::Reserved {
                ticket.reservation_expiry
            } else {
                None
            },
        })
    }
}

/// Periodic audit of every competition, repairing drift when enabled.
#[derive(Clone)]
pub struct ReconcileSchedule {
    reconciler: Reconciler,
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    auto_repair: bool,
}

impl ReconcileSchedule {
    /// Creates a schedule auditing every `interval`
    #[must_use]
    pub fn new(
        reconciler: Reconciler,
        clock: Arc<dyn Clock>,
        interval: std::time::Duration,
        auto_repair: bool,
    ) -> Self {
        let store = Arc::clone(&reconciler.store);
        Self {
            reconciler,
            store,
            clock,
            interval,
            auto_repair,
        }
    }

    /// Audit every initialized competition once. Returns how many drifted.
    ///
    /// Failures on one competition are logged and do not stop the pass.
    pub async fn run_once(&self) -> usize {
        let competitions = match self.store.competitions().await {
            Ok(competitions) => competitions,
            Err(error) => {
                tracing::warn!(%error, "Could not list competitions for audit");
                return 0;
            }
        };

        let mut drifted = 0;
        for inventory in competitions {
            let competition_id = inventory.competition_id;
            match self.reconciler.audit(competition_id).await {
                Ok(report) if report.is_clean() => {}
                Ok(report) => {
                    drifted += 1;
                    if !report.duplicate_claims.is_empty() {
                        tracing::warn!(
                            competition_id = %competition_id,
                            tickets = ?report.duplicate_claims,
                            "Ledger has more than one completed order per ticket"
                        );
                    }
                    if self.auto_repair && report.needs_rebuild() {
                        if let Err(error) = self
                            .reconciler
                            .reconcile(competition_id, self.clock.now())
                            .await
                        {
                            tracing::error!(
                                competition_id = %competition_id,
                                %error,
                                "Automatic repair failed"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(competition_id = %competition_id, %error, "Audit failed");
                }
            }
        }
        drifted
    }

    /// Audit on every interval until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            auto_repair = self.auto_repair,
            "Reconcile schedule started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconcile schedule stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
