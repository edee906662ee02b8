//! Inventory metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_reservations_total{outcome}` - Reserve calls by outcome
//! - `raffle_tickets_reserved_total` - Tickets placed on hold
//! - `raffle_tickets_released_total` - Tickets released by their holder
//! - `raffle_purchases_total{outcome}` - Purchase calls by outcome
//! - `raffle_tickets_sold_total` - Tickets purchased
//! - `raffle_sweeps_total{outcome}` - Sweeper runs by outcome
//! - `raffle_tickets_reclaimed_total` - Expired holds returned to the pool
//! - `raffle_reconcile_runs_total{mode}` - Audits and rebuilds
//! - `raffle_drift_detected_total` - Audits that found projection drift
//! - `raffle_store_rollbacks_total{operation}` - Conditional updates rolled back by the store
//!
//! ## Histograms
//! - `raffle_operation_duration_seconds{operation}` - Service call latency

use metrics::{describe_counter, describe_histogram};
use std::time::Instant;

/// Initialize and register all metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_inventory_metrics() {
    describe_counter!(
        "raffle_reservations_total",
        "Reserve calls by outcome (reserved, unavailable, rejected, failed)"
    );
    describe_counter!("raffle_tickets_reserved_total", "Tickets placed on hold");
    describe_counter!(
        "raffle_tickets_released_total",
        "Tickets released by their holder"
    );
    describe_counter!(
        "raffle_purchases_total",
        "Purchase calls by outcome (purchased, duplicate, mismatched, rejected, failed)"
    );
    describe_counter!("raffle_tickets_sold_total", "Tickets purchased");
    describe_counter!("raffle_sweeps_total", "Sweeper runs by outcome (ok, failed)");
    describe_counter!(
        "raffle_tickets_reclaimed_total",
        "Expired holds returned to the available pool"
    );
    describe_counter!(
        "raffle_reconcile_runs_total",
        "Reconciler runs by mode (audit, rebuild)"
    );
    describe_counter!(
        "raffle_drift_detected_total",
        "Audits that found the projection out of step with the ledger"
    );
    describe_counter!(
        "raffle_store_rollbacks_total",
        "Conditional updates rolled back inside the store"
    );
    describe_histogram!(
        "raffle_operation_duration_seconds",
        "Latency of inventory service operations"
    );

    tracing::info!("Inventory metrics registered");
}

/// Record the outcome of a reserve call.
pub fn record_reservation(outcome: &'static str, tickets: usize) {
    metrics::counter!("raffle_reservations_total", "outcome" => outcome).increment(1);
    if outcome == "reserved" {
        metrics::counter!("raffle_tickets_reserved_total").increment(tickets as u64);
    }
}

/// Record tickets released by their holder.
pub fn record_release(released: usize) {
    metrics::counter!("raffle_tickets_released_total").increment(released as u64);
}

/// Record the outcome of a purchase call.
///
/// # Arguments
///
/// * `outcome` - Outcome label
/// * `sold` - Tickets newly purchased (zero for replays and failures)
pub fn record_purchase(outcome: &'static str, sold: u32) {
    metrics::counter!("raffle_purchases_total", "outcome" => outcome).increment(1);
    metrics::counter!("raffle_tickets_sold_total").increment(u64::from(sold));
}

/// Record a completed sweep.
pub fn record_sweep(reclaimed: u64) {
    metrics::counter!("raffle_sweeps_total", "outcome" => "ok").increment(1);
    metrics::counter!("raffle_tickets_reclaimed_total").increment(reclaimed);
}

/// Record a sweep that failed against the store.
pub fn record_sweep_failure() {
    metrics::counter!("raffle_sweeps_total", "outcome" => "failed").increment(1);
}

/// Record a reconciler run and whether it found drift.
pub fn record_reconcile(mode: &'static str, drift: bool) {
    metrics::counter!("raffle_reconcile_runs_total", "mode" => mode).increment(1);
    if drift {
        metrics::counter!("raffle_drift_detected_total").increment(1);
    }
}

/// Record the latency of a service operation started at `started`.
pub fn record_duration(operation: &'static str, started: Instant) {
    metrics::histogram!("raffle_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
