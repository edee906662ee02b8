//! `PostgreSQL` implementation of [`OrderLedger`].

use crate::rows::{ORDER_COLUMNS, db_error, numbers_to_db, order_from_row};
use raffle_core::StoreError;
use raffle_core::ledger::OrderLedger;
use raffle_core::store::StoreFuture;
use raffle_core::types::{CompetitionId, Order, OrderId, PaymentStatus};
use sqlx::PgPool;

/// Order ledger stored in the `orders` table.
#[derive(Clone, Debug)]
pub struct PostgresOrderLedger {
    pool: PgPool,
}

impl PostgresOrderLedger {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OrderLedger for PostgresOrderLedger {
    fn append(&self, order: Order) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO orders (
                    order_id, competition_id, user_id, ticket_numbers, payment_status, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (order_id) DO NOTHING
                ",
            )
            .bind(order.order_id.value())
            .bind(order.competition_id.value())
            .bind(order.user_id.as_str())
            .bind(numbers_to_db(&order.ticket_numbers)?)
            .bind(order.payment_status.as_str())
            .bind(order.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::DuplicateOrder(order.order_id));
            }
            Ok(())
        })
    }

    fn update_payment_status(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE orders SET payment_status = $2 WHERE order_id = $1")
                .bind(order_id.value())
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::OrderNotFound(order_id));
            }
            tracing::debug!(
                order_id = order_id.value(),
                status = %status,
                "Payment status updated"
            );
            Ok(())
        })
    }

    fn load_order(&self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
            ))
            .bind(order_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(order_from_row).transpose()
        })
    }

    fn orders_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE competition_id = $1 \
                 ORDER BY created_at, order_id"
            ))
            .bind(competition_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter().map(order_from_row).collect()
        })
    }
}
