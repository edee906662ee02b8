//! Concurrent reservation and purchase stress tests.
//!
//! Many tasks race for the same numbers on a multi-threaded runtime; the store's
//! atomic claim must let exactly one of them win each contested ticket.
//!
//! # Panics
//!
//! These tests use `expect()` and `panic!()` for setup failures, which is acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use raffle::{ReservationError, TicketInventoryService};
use raffle_core::types::{CompetitionId, OrderId, TicketNumber, UserId};
use raffle_testing::helpers::numbers;
use raffle_testing::{InMemoryOrderLedger, InMemoryTicketStore, test_clock};
use std::collections::HashSet;
use std::sync::Arc;

const COMP: CompetitionId = CompetitionId::new(42);

async fn service(total: u32) -> (TicketInventoryService, InMemoryTicketStore) {
    let store = InMemoryTicketStore::new();
    let service = TicketInventoryService::new(
        Arc::new(store.clone()),
        Arc::new(InMemoryOrderLedger::new()),
        Arc::new(test_clock()),
    );
    service
        .initialize(COMP, total)
        .await
        .expect("initialize competition");
    (service, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_buyers_one_ticket_one_winner() {
    let (service, _) = service(10).await;

    let mut handles = Vec::new();
    for buyer in 0..100 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let user = UserId::new(format!("buyer-{buyer}"));
            service.reserve(COMP, &numbers(&[1]), &user).await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task completed") {
            Ok(_) => winners += 1,
            Err(ReservationError::TicketsUnavailable(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 99);

    let snapshot = service.get_ticket_statuses(COMP).await.expect("statuses");
    assert_eq!(snapshot.reserved, numbers(&[1]));
    assert_eq!(snapshot.total(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_requests_never_share_a_ticket() {
    let (service, store) = service(20).await;

    // Each request overlaps its neighbours by two numbers.
    let mut handles = Vec::new();
    for start in 1..=16_u32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let user = UserId::new(format!("buyer-{start}"));
            let request: Vec<TicketNumber> = (start..start + 4).map(TicketNumber::new).collect();
            service.reserve(COMP, &request, &user).await
        }));
    }

    let mut held: Vec<(UserId, Vec<TicketNumber>)> = Vec::new();
    for handle in handles {
        if let Ok(hold) = handle.await.expect("task completed") {
            held.push((hold.user_id, hold.ticket_numbers));
        }
    }
    assert!(!held.is_empty());

    let mut seen = HashSet::new();
    for (_, tickets) in &held {
        for number in tickets {
            assert!(seen.insert(*number), "ticket {number} granted twice");
        }
    }

    // Every granted hold is fully present in the store, under the right holder.
    let (_, rows) = store.raw_snapshot(COMP).expect("competition exists");
    for (user, tickets) in &held {
        for number in tickets {
            let row = &rows[number.value() as usize - 1];
            assert_eq!(row.holder.as_ref(), Some(user));
        }
    }
    let reserved = rows.iter().filter(|row| row.holder.is_some()).count();
    assert_eq!(reserved, seen.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchase_retries_count_once() {
    let (service, _) = service(5).await;
    let alice = UserId::new("alice");
    service
        .reserve(COMP, &numbers(&[2, 3]), &alice)
        .await
        .expect("reserve");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = service.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            service
                .purchase(COMP, &numbers(&[2, 3]), &alice, OrderId::new(500))
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .expect("task completed")
            .expect("every retry of the same order succeeds");
    }

    let stats = service.stats(COMP).await.expect("stats");
    assert_eq!(stats.purchased, 2);
    assert_eq!(stats.tickets_sold, 2);
}
