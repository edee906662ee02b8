//! Order ledger trait.
//!
//! The ledger is the authoritative record of purchase intent; the ticket inventory is a
//! derived projection of it. Checkout appends orders and updates their payment status;
//! the reconciler reads them back to rebuild or audit the projection. Orders are never
//! deleted.

use crate::store::StoreFuture;
use crate::types::{CompetitionId, Order, OrderId, PaymentStatus};

/// Append-mostly store of [`Order`] records.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the trait can be used as `Arc<dyn OrderLedger>`.
pub trait OrderLedger: Send + Sync {
    /// Append a new order.
    ///
    /// # Errors
    ///
    /// - `DuplicateOrder`: an order with the same id exists
    /// - `Database`: backend failure
    fn append(&self, order: Order) -> StoreFuture<'_, ()>;

    /// Change the payment status of an order. The only permitted mutation.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no order with this id
    /// - `Database`: backend failure
    fn update_payment_status(&self, order_id: OrderId, status: PaymentStatus)
    -> StoreFuture<'_, ()>;

    /// Load an order by id.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Corrupt` on backend failure.
    fn load_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Load every order of a competition, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Corrupt` on backend failure.
    fn orders_for_competition(&self, competition_id: CompetitionId)
    -> StoreFuture<'_, Vec<Order>>;
}
