//! Drift detection and projection rebuilds from the order ledger.
//!
//! # Panics
//!
//! These tests use `expect()` for setup failures, which is acceptable in test code.

#![allow(clippy::expect_used)]

use chrono::Duration;
use raffle::{ReconcileError, ReconcileSchedule, Reconciler, TicketInventoryService};
use raffle_core::types::{
    CompetitionId, OrderId, PaymentStatus, ReservationExpiry, Ticket, TicketNumber, TicketStatus,
    UserId,
};
use raffle_core::environment::Clock;
use raffle_core::{OrderLedger, TicketStore};
use raffle_testing::helpers::{numbers, order};
use raffle_testing::{InMemoryOrderLedger, InMemoryTicketStore, ManualClock, test_epoch};
use std::sync::Arc;

const COMP: CompetitionId = CompetitionId::new(7);

struct Harness {
    service: TicketInventoryService,
    store: InMemoryTicketStore,
    ledger: InMemoryOrderLedger,
    clock: ManualClock,
}

async fn harness(total: u32) -> Harness {
    let store = InMemoryTicketStore::new();
    let ledger = InMemoryOrderLedger::new();
    let clock = ManualClock::new(test_epoch());
    let service = TicketInventoryService::new(
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
        Arc::new(clock.clone()),
    );
    service
        .initialize(COMP, total)
        .await
        .expect("initialize competition");
    Harness {
        service,
        store,
        ledger,
        clock,
    }
}

/// Reserve, record and purchase an order the way checkout does.
async fn checkout(h: &Harness, order_id: i64, user: &str, raw: &[u32]) {
    let user_id = UserId::new(user);
    h.service
        .reserve(COMP, &numbers(raw), &user_id)
        .await
        .expect("reserve");
    h.ledger
        .append(order(
            order_id,
            COMP,
            user,
            raw,
            PaymentStatus::Completed,
            h.clock.now(),
        ))
        .await
        .expect("append order");
    h.service
        .purchase(COMP, &numbers(raw), &user_id, OrderId::new(order_id))
        .await
        .expect("purchase");
}

#[tokio::test]
async fn consistent_projection_audits_clean() {
    let h = harness(10).await;
    checkout(&h, 1, "alice", &[1, 2]).await;
    checkout(&h, 2, "bob", &[5]).await;

    let report = h.service.audit(COMP).await.expect("audit");
    assert!(report.is_clean(), "unexpected drift: {report:?}");
    assert_eq!(report.tickets_sold, 3);
    assert_eq!(report.purchased_count, 3);
}

#[tokio::test]
async fn audit_reports_each_kind_of_drift() {
    let h = harness(10).await;
    checkout(&h, 1, "alice", &[1, 2]).await;
    checkout(&h, 2, "bob", &[3]).await;

    // Counter skew, a sale with no order behind it, a lost sale, and a wrong owner.
    h.store.set_tickets_sold(COMP, 9);
    h.store.put_ticket(Ticket::purchased(
        COMP,
        TicketNumber::new(8),
        UserId::new("mallory"),
        OrderId::new(99),
    ));
    h.store
        .put_ticket(Ticket::available(COMP, TicketNumber::new(2)));
    h.store.put_ticket(Ticket::purchased(
        COMP,
        TicketNumber::new(3),
        UserId::new("mallory"),
        OrderId::new(2),
    ));
    h.ledger
        .append(order(
            3,
            COMP,
            "carol",
            &[1],
            PaymentStatus::Completed,
            test_epoch() + Duration::minutes(1),
        ))
        .await
        .expect("append duplicate claim");

    let report = h.service.audit(COMP).await.expect("audit");
    assert!(report.counter_drift());
    assert_eq!(report.tickets_sold, 9);
    assert_eq!(report.purchased_count, 3);
    assert_eq!(report.purchased_without_order, numbers(&[8]));
    assert_eq!(report.completed_not_purchased, numbers(&[2]));
    assert_eq!(report.ownership_mismatches, numbers(&[3]));
    assert_eq!(report.duplicate_claims, numbers(&[1]));
}

#[tokio::test]
async fn reconcile_rebuilds_projection_from_ledger() {
    let h = harness(10).await;
    checkout(&h, 1, "alice", &[1, 2]).await;
    h.ledger
        .append(order(
            2,
            COMP,
            "bob",
            &[4],
            PaymentStatus::Pending,
            test_epoch(),
        ))
        .await
        .expect("append pending");
    h.ledger
        .append(order(3, COMP, "carol", &[6], PaymentStatus::Failed, test_epoch()))
        .await
        .expect("append failed");

    h.store.set_tickets_sold(COMP, 0);
    h.store.put_ticket(Ticket::purchased(
        COMP,
        TicketNumber::new(9),
        UserId::new("ghost"),
        OrderId::new(404),
    ));
    h.store.put_ticket(Ticket::reserved(
        COMP,
        TicketNumber::new(6),
        UserId::new("carol"),
        ReservationExpiry::after(test_epoch(), Duration::minutes(5)),
    ));

    h.clock.advance(Duration::hours(1));
    let report = h.service.reconcile(COMP).await.expect("reconcile");
    assert_eq!(report.purchased, 2);
    assert_eq!(report.reserved, 1);
    assert_eq!(report.available, 7);
    assert!(report.conflicts.is_empty());

    let (header, rows) = h.store.raw_snapshot(COMP).expect("competition exists");
    assert_eq!(header.tickets_sold, 2);
    assert_eq!(rows[8].status, TicketStatus::Available);
    assert_eq!(rows[5].status, TicketStatus::Available);
    assert_eq!(rows[3].holder, Some(UserId::new("bob")));
    assert_eq!(
        rows[3].reservation_expiry,
        Some(ReservationExpiry::after(
            test_epoch() + Duration::hours(1),
            Duration::minutes(30)
        ))
    );

    assert!(h.service.audit(COMP).await.expect("audit").is_clean());
}

#[tokio::test]
async fn reconcile_is_repeatable() {
    let h = harness(6).await;
    checkout(&h, 1, "alice", &[3]).await;

    let first = h.service.reconcile(COMP).await.expect("first rebuild");
    let after_first = h.store.raw_snapshot(COMP);
    let second = h.service.reconcile(COMP).await.expect("second rebuild");

    assert_eq!(first, second);
    assert_eq!(h.store.raw_snapshot(COMP), after_first);
}

#[tokio::test]
async fn reconcile_unknown_competition_is_not_found() {
    let h = harness(3).await;
    let missing = CompetitionId::new(404);

    assert_eq!(
        h.service.reconcile(missing).await,
        Err(ReconcileError::CompetitionNotFound(missing))
    );
    assert_eq!(
        h.service.owner_of(COMP, TicketNumber::new(4)).await,
        Err(ReconcileError::InvalidTicketNumber {
            competition_id: COMP,
            number: TicketNumber::new(4),
        })
    );
}

#[tokio::test]
async fn owner_of_hides_lapsed_holds() {
    let h = harness(3).await;
    h.service
        .reserve(COMP, &numbers(&[2]), &UserId::new("alice"))
        .await
        .expect("reserve");

    let live = h
        .service
        .owner_of(COMP, TicketNumber::new(2))
        .await
        .expect("owner lookup");
    assert_eq!(live.status, TicketStatus::Reserved);
    assert!(live.reservation_expiry.is_some());

    h.clock.advance(Duration::minutes(45));
    let lapsed = h
        .service
        .owner_of(COMP, TicketNumber::new(2))
        .await
        .expect("owner lookup");
    assert_eq!(lapsed.status, TicketStatus::Available);
    assert!(lapsed.user_id.is_none());
    assert!(lapsed.reservation_expiry.is_none());
}

#[tokio::test]
async fn schedule_repairs_drift_only_when_enabled() {
    let h = harness(5).await;
    checkout(&h, 1, "alice", &[1]).await;
    h.store.set_tickets_sold(COMP, 4);

    let store: Arc<dyn TicketStore> = Arc::new(h.store.clone());
    let ledger: Arc<dyn OrderLedger> = Arc::new(h.ledger.clone());
    let reconciler = Reconciler::new(store, ledger);

    let audit_only = ReconcileSchedule::new(
        reconciler.clone(),
        Arc::new(h.clock.clone()),
        std::time::Duration::from_secs(60),
        false,
    );
    assert_eq!(audit_only.run_once().await, 1);
    assert_eq!(audit_only.run_once().await, 1);

    let repairing = ReconcileSchedule::new(
        reconciler,
        Arc::new(h.clock.clone()),
        std::time::Duration::from_secs(60),
        true,
    );
    assert_eq!(repairing.run_once().await, 1);
    assert_eq!(repairing.run_once().await, 0);

    let stats = h.service.stats(COMP).await.expect("stats");
    assert_eq!(stats.tickets_sold, 1);
}

#[tokio::test]
async fn schedule_leaves_live_holds_alone_when_only_the_ledger_disagrees() {
    let h = harness(6).await;
    checkout(&h, 1, "alice", &[1]).await;
    h.ledger
        .append(order(
            2,
            COMP,
            "carol",
            &[1],
            PaymentStatus::Completed,
            test_epoch() + Duration::minutes(1),
        ))
        .await
        .expect("append duplicate claim");

    // An abandoned checkout and a buyer who has not reached the ledger yet.
    h.service
        .reserve(COMP, &numbers(&[2]), &UserId::new("bob"))
        .await
        .expect("reserve");
    h.ledger
        .append(order(3, COMP, "bob", &[2], PaymentStatus::Pending, test_epoch()))
        .await
        .expect("append pending");
    h.service
        .reserve(COMP, &numbers(&[5]), &UserId::new("dave"))
        .await
        .expect("reserve");

    let schedule = ReconcileSchedule::new(
        h.service.reconciler().clone(),
        Arc::new(h.clock.clone()),
        std::time::Duration::from_secs(60),
        true,
    );
    let before = h.store.raw_snapshot(COMP);
    assert_eq!(schedule.run_once().await, 1);
    assert_eq!(schedule.run_once().await, 1);
    assert_eq!(h.store.raw_snapshot(COMP), before);

    let report = h.service.audit(COMP).await.expect("audit");
    assert_eq!(report.duplicate_claims, numbers(&[1]));
    assert!(!report.needs_rebuild());

    // The abandoned hold still lapses on schedule.
    h.clock.advance(Duration::minutes(31));
    assert_eq!(schedule.run_once().await, 1);
    let (_, rows) = h.store.raw_snapshot(COMP).expect("competition exists");
    assert_eq!(
        rows[1].reservation_expiry,
        Some(ReservationExpiry::after(test_epoch(), Duration::minutes(30)))
    );
    let abandoned = h
        .service
        .owner_of(COMP, TicketNumber::new(2))
        .await
        .expect("owner lookup");
    assert_eq!(abandoned.status, TicketStatus::Available);
}

#[tokio::test]
async fn schedule_survives_store_failures() {
    let h = harness(5).await;
    let schedule = ReconcileSchedule::new(
        h.service.reconciler().clone(),
        Arc::new(h.clock.clone()),
        std::time::Duration::from_secs(60),
        true,
    );

    h.store.set_failing(true);
    assert_eq!(schedule.run_once().await, 0);
    h.store.set_failing(false);
    assert_eq!(schedule.run_once().await, 0);
}
