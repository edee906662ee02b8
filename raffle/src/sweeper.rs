//! Expiry Sweeper.
//!
//! Periodically returns lapsed holds to the available pool. Reads already treat a lapsed
//! hold as available, so the sweeper only tidies physical rows; it uses the same expiry
//! comparator as reservations and purchases, so a purchase that saw a live hold and a
//! sweep that saw it lapsed can never both win.

use crate::metrics;
use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;
use raffle_core::{StoreError, TicketStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background task reclaiming expired reservations.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper that runs every `interval`
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Return every hold expired at `now` to the available pool.
    ///
    /// Returns the number of tickets reclaimed.
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged; the scheduled loop logs it and continues.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let started = Instant::now();
        let result = self.store.sweep_expired(now).await;
        metrics::record_duration("sweep", started);

        match &result {
            Ok(reclaimed) => {
                metrics::record_sweep(*reclaimed);
                if *reclaimed > 0 {
                    tracing::info!(reclaimed, "Expired reservations reclaimed");
                }
            }
            Err(_) => metrics::record_sweep_failure(),
        }
        result
    }

    /// One scheduled pass at the clock's current time. Failures are logged, not returned.
    pub async fn tick(&self) -> Option<u64> {
        match self.sweep_expired(self.clock.now()).await {
            Ok(reclaimed) => Some(reclaimed),
            Err(error) => {
                tracing::warn!(%error, "Expiry sweep failed, will retry next interval");
                None
            }
        }
    }

    /// Sweep on every interval until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use raffle_core::store::Claim;
    use raffle_core::types::{CompetitionId, ReservationExpiry, TicketNumber, UserId};
    use raffle_testing::{InMemoryTicketStore, ManualClock, test_epoch};

    const COMP: CompetitionId = CompetitionId::new(1);

    async fn store_with_hold() -> InMemoryTicketStore {
        let store = InMemoryTicketStore::new();
        store.initialize(COMP, 5).await.ok();
        store
            .claim(Claim {
                competition_id: COMP,
                ticket_numbers: vec![TicketNumber::new(5)],
                user_id: UserId::new("alice"),
                expires_at: ReservationExpiry::after(test_epoch(), ChronoDuration::minutes(30)),
                now: test_epoch(),
            })
            .await
            .ok();
        store
    }

    #[tokio::test]
    async fn tick_uses_the_clock() {
        let store = store_with_hold().await;
        let clock = ManualClock::new(test_epoch());
        let sweeper = ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(30),
        );

        assert_eq!(sweeper.tick().await, Some(0));
        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(sweeper.tick().await, Some(1));
    }

    #[tokio::test]
    async fn failures_are_logged_and_swallowed() {
        let store = store_with_hold().await;
        store.set_failing(true);
        let sweeper = ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(test_epoch())),
            Duration::from_secs(30),
        );

        assert_eq!(sweeper.tick().await, None);
        store.set_failing(false);
        assert_eq!(sweeper.tick().await, Some(0));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = store_with_hold().await;
        let clock = ManualClock::new(test_epoch() + ChronoDuration::hours(1));
        let sweeper = ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::new(clock),
            Duration::from_millis(10),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = sweeper.spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).ok();

        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));

        let ticket = store.load_ticket(COMP, TicketNumber::new(5)).await.ok().flatten();
        assert!(ticket.is_some_and(|t| t.holder.is_none()));
    }
}
