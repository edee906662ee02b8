//! Property tests: allocation invariants hold across random operation sequences.

#![allow(clippy::expect_used)]

use chrono::Duration;
use futures::executor::block_on;
use proptest::prelude::*;
use raffle::TicketInventoryService;
use raffle_core::types::{CompetitionId, OrderId, Ticket, TicketNumber, TicketStatus, UserId};
use raffle_testing::properties::{buyer, ticket_request};
use raffle_testing::{InMemoryOrderLedger, InMemoryTicketStore, ManualClock, test_epoch};
use std::collections::BTreeMap;
use std::sync::Arc;

const COMP: CompetitionId = CompetitionId::new(1);
const TOTAL: u32 = 12;

#[derive(Clone, Debug)]
enum Op {
    Reserve(UserId, Vec<TicketNumber>),
    Release(UserId, Vec<TicketNumber>),
    Purchase(UserId, Vec<TicketNumber>, OrderId),
    Advance(i64),
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (buyer(), ticket_request(TOTAL, 4)).prop_map(|(u, n)| Op::Reserve(u, n)),
        1 => (buyer(), ticket_request(TOTAL, 4)).prop_map(|(u, n)| Op::Release(u, n)),
        3 => (buyer(), ticket_request(TOTAL, 4), 1..6_i64)
            .prop_map(|(u, n, o)| Op::Purchase(u, n, OrderId::new(o))),
        1 => (1..40_i64).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
    ]
}

fn apply(service: &TicketInventoryService, clock: &ManualClock, op: &Op) {
    block_on(async {
        match op {
            Op::Reserve(user, numbers) => {
                let _ = service.reserve(COMP, numbers, user).await;
            }
            Op::Release(user, numbers) => {
                let _ = service.release(COMP, numbers, user).await;
            }
            Op::Purchase(user, numbers, order_id) => {
                let _ = service.purchase(COMP, numbers, user, *order_id).await;
            }
            Op::Advance(minutes) => clock.advance(Duration::minutes(*minutes)),
            Op::Sweep => {
                let _ = service.sweep_expired().await;
            }
        }
    });
}

fn purchased(rows: &[Ticket]) -> BTreeMap<TicketNumber, (Option<UserId>, Option<OrderId>)> {
    rows.iter()
        .filter(|row| row.status == TicketStatus::Purchased)
        .map(|row| (row.number, (row.holder.clone(), row.order_id)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn inventory_invariants_hold(ops in prop::collection::vec(op(), 1..40)) {
        let store = InMemoryTicketStore::new();
        let clock = ManualClock::new(test_epoch());
        let service = TicketInventoryService::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryOrderLedger::new()),
            Arc::new(clock.clone()),
        );
        block_on(service.initialize(COMP, TOTAL)).expect("initialize competition");

        let mut sold_before = BTreeMap::new();
        for op in &ops {
            apply(&service, &clock, op);

            let (header, rows) = store.raw_snapshot(COMP).expect("competition exists");
            let snapshot = block_on(service.get_ticket_statuses(COMP)).expect("statuses");

            // Every number is in exactly one bucket.
            prop_assert_eq!(snapshot.total(), TOTAL as usize);
            prop_assert_eq!(rows.len(), TOTAL as usize);

            // Holder, expiry and order presence always match the status.
            prop_assert!(rows.iter().all(Ticket::is_well_formed));

            // The counter never drifts from the purchased rows.
            let sold = purchased(&rows);
            prop_assert_eq!(header.tickets_sold as usize, sold.len());

            // Purchases are permanent and never change hands.
            for (number, owner) in &sold_before {
                prop_assert_eq!(sold.get(number), Some(owner));
            }
            sold_before = sold;
        }
    }

    #[test]
    fn failed_reservation_leaves_store_unchanged(
        first in ticket_request(TOTAL, 6),
        second in ticket_request(TOTAL, 6),
    ) {
        let store = InMemoryTicketStore::new();
        let service = TicketInventoryService::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryOrderLedger::new()),
            Arc::new(ManualClock::new(test_epoch())),
        );
        block_on(service.initialize(COMP, TOTAL)).expect("initialize competition");
        block_on(service.reserve(COMP, &first, &UserId::new("alice"))).expect("first hold");

        let before = store.raw_snapshot(COMP);
        let result = block_on(service.reserve(COMP, &second, &UserId::new("bob")));

        let overlaps = second.iter().any(|number| first.contains(number));
        prop_assert_eq!(result.is_err(), overlaps);
        if overlaps {
            prop_assert_eq!(store.raw_snapshot(COMP), before);
        }
    }
}
