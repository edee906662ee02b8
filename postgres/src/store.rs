//! `PostgreSQL` implementation of [`TicketStore`].

use crate::rows::{
    TICKET_COLUMNS, db_error, from_db, inventory_from_row, numbers_from_db, numbers_to_db,
    ticket_from_row, to_db,
};
use chrono::{DateTime, Utc};
use raffle_core::StoreError;
use raffle_core::store::{
    Claim, ClaimOutcome, Finalize, FinalizeOutcome, StoreFuture, TicketStore,
};
use raffle_core::types::{
    CompetitionId, CompetitionInventory, Ticket, TicketNumber, TicketStatus, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// `PostgreSQL`-backed ticket inventory.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect to `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_available(
        tx: &mut Transaction<'static, Postgres>,
        competition_id: CompetitionId,
        total: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO tickets (competition_id, ticket_number, status)
            SELECT $1, n, 'available' FROM generate_series(1, $2) AS n
            ",
        )
        .bind(competition_id.value())
        .bind(total)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn lock_competition(
        tx: &mut Transaction<'static, Postgres>,
        competition_id: CompetitionId,
    ) -> Result<CompetitionInventory, StoreError> {
        let row = sqlx::query(
            r"
            SELECT competition_id, total_tickets, tickets_sold
            FROM competition_inventory
            WHERE competition_id = $1
            FOR UPDATE
            ",
        )
        .bind(competition_id.value())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::CompetitionNotFound(competition_id))?;
        inventory_from_row(&row)
    }

    /// Locks the requested ticket rows in ascending number order.
    async fn lock_tickets(
        tx: &mut Transaction<'static, Postgres>,
        competition_id: CompetitionId,
        numbers: &[i32],
    ) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE competition_id = $1 AND ticket_number = ANY($2)
            ORDER BY ticket_number
            FOR UPDATE
            "
        ))
        .bind(competition_id.value())
        .bind(numbers)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error)?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn do_initialize(
        &self,
        competition_id: CompetitionId,
        total_tickets: u32,
    ) -> Result<(), StoreError> {
        if total_tickets == 0 {
            return Err(StoreError::InvalidTotal(total_tickets));
        }
        let total = to_db(total_tickets)?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inserted = sqlx::query(
            r"
            INSERT INTO competition_inventory (competition_id, total_tickets, tickets_sold)
            VALUES ($1, $2, 0)
            ON CONFLICT (competition_id) DO NOTHING
            ",
        )
        .bind(competition_id.value())
        .bind(total)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(StoreError::AlreadyInitialized(competition_id));
        }

        Self::insert_available(&mut tx, competition_id, total).await?;
        tx.commit().await.map_err(db_error)?;

        tracing::info!(
            competition_id = competition_id.value(),
            total_tickets,
            "Ticket inventory initialized"
        );
        Ok(())
    }

    async fn do_reset(&self, competition_id: CompetitionId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inventory = Self::lock_competition(&mut tx, competition_id).await?;

        sqlx::query("DELETE FROM tickets WHERE competition_id = $1")
            .bind(competition_id.value())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Self::insert_available(&mut tx, competition_id, to_db(inventory.total_tickets)?).await?;
        sqlx::query("UPDATE competition_inventory SET tickets_sold = 0 WHERE competition_id = $1")
            .bind(competition_id.value())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::warn!(competition_id = competition_id.value(), "Ticket inventory reset");
        Ok(())
    }

    async fn do_claim(&self, claim: Claim) -> Result<ClaimOutcome, StoreError> {
        let numbers = numbers_to_db(&claim.ticket_numbers)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let locked = Self::lock_tickets(&mut tx, claim.competition_id, &numbers).await?;
        let conflicting: Vec<TicketNumber> = claim
            .ticket_numbers
            .iter()
            .copied()
            .filter(|number| {
                !locked
                    .iter()
                    .any(|ticket| ticket.number == *number && ticket.is_available_at(claim.now))
            })
            .collect();
        if !conflicting.is_empty() {
            tx.rollback().await.map_err(db_error)?;
            return Ok(ClaimOutcome::Unavailable { conflicting });
        }

        // Same predicate as `Ticket::is_available_at`; a short count rolls everything back.
        let updated = sqlx::query(
            r"
            UPDATE tickets
            SET status = 'reserved', user_id = $3, reservation_expiry = $4, order_id = NULL
            WHERE competition_id = $1
              AND ticket_number = ANY($2)
              AND (status = 'available'
                   OR (status = 'reserved' AND reservation_expiry <= $5))
            ",
        )
        .bind(claim.competition_id.value())
        .bind(&numbers)
        .bind(claim.user_id.as_str())
        .bind(claim.expires_at.inner())
        .bind(claim.now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() != numbers.len() as u64 {
            tx.rollback().await.map_err(db_error)?;
            metrics::counter!("raffle_store_rollbacks_total", "operation" => "claim").increment(1);
            return Ok(ClaimOutcome::Unavailable {
                conflicting: claim.ticket_numbers,
            });
        }

        tx.commit().await.map_err(db_error)?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn do_release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: &[TicketNumber],
        holder: &UserId,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let numbers = numbers_to_db(ticket_numbers)?;
        // Rows are locked in ticket-number order, the same order `claim` uses.
        let rows = sqlx::query(
            r"
            WITH held AS (
                SELECT ticket_number
                FROM tickets
                WHERE competition_id = $1
                  AND ticket_number = ANY($2)
                  AND status = 'reserved'
                  AND user_id = $3
                ORDER BY ticket_number
                FOR UPDATE
            )
            UPDATE tickets t
            SET status = 'available', user_id = NULL, reservation_expiry = NULL, order_id = NULL
            FROM held
            WHERE t.competition_id = $1
              AND t.ticket_number = held.ticket_number
              AND t.status = 'reserved'
              AND t.user_id = $3
            RETURNING t.ticket_number
            ",
        )
        .bind(competition_id.value())
        .bind(&numbers)
        .bind(holder.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let raw = rows
            .iter()
            .map(|row| row.try_get::<i32, _>("ticket_number").map_err(db_error))
            .collect::<Result<Vec<_>, _>>()?;
        let mut released = numbers_from_db(raw)?;
        released.sort();
        Ok(released)
    }

    async fn do_finalize(&self, finalize: Finalize) -> Result<FinalizeOutcome, StoreError> {
        let numbers = numbers_to_db(&finalize.ticket_numbers)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Competition row first, then tickets: the same order as `replace_tickets`.
        Self::lock_competition(&mut tx, finalize.competition_id).await?;
        let locked = Self::lock_tickets(&mut tx, finalize.competition_id, &numbers).await?;

        let outcome = finalize.evaluate(&locked);
        let FinalizeOutcome::Purchased { count } = outcome else {
            tx.rollback().await.map_err(db_error)?;
            return Ok(outcome);
        };

        sqlx::query(
            r"
            UPDATE tickets
            SET status = 'purchased', order_id = $3, reservation_expiry = NULL
            WHERE competition_id = $1 AND ticket_number = ANY($2)
            ",
        )
        .bind(finalize.competition_id.value())
        .bind(&numbers)
        .bind(finalize.order_id.value())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r"
            UPDATE competition_inventory
            SET tickets_sold = tickets_sold + $2
            WHERE competition_id = $1
            ",
        )
        .bind(finalize.competition_id.value())
        .bind(to_db(count)?)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(outcome)
    }

    async fn do_sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        // Lock in (competition, number) order and skip rows a claim already holds;
        // a skipped hold is either taken over by that claim or picked up next pass.
        let result = sqlx::query(
            r"
            WITH lapsed AS (
                SELECT competition_id, ticket_number
                FROM tickets
                WHERE status = 'reserved' AND reservation_expiry <= $1
                ORDER BY competition_id, ticket_number
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tickets t
            SET status = 'available', user_id = NULL, reservation_expiry = NULL
            FROM lapsed
            WHERE t.competition_id = lapsed.competition_id
              AND t.ticket_number = lapsed.ticket_number
              AND t.status = 'reserved'
              AND t.reservation_expiry <= $1
            ",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn do_replace(
        &self,
        competition_id: CompetitionId,
        tickets: Vec<Ticket>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inventory = Self::lock_competition(&mut tx, competition_id).await?;

        for ticket in &tickets {
            if ticket.competition_id != competition_id
                || !inventory.contains(ticket.number)
                || !ticket.is_well_formed()
            {
                tx.rollback().await.map_err(db_error)?;
                return Err(StoreError::Corrupt(format!(
                    "Rejected projection row for ticket {} of competition {competition_id}",
                    ticket.number
                )));
            }
        }

        sqlx::query(
            r"
            UPDATE tickets
            SET status = 'available', user_id = NULL, reservation_expiry = NULL, order_id = NULL
            WHERE competition_id = $1 AND status <> 'available'
            ",
        )
        .bind(competition_id.value())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for ticket in tickets
            .iter()
            .filter(|ticket| ticket.status != TicketStatus::Available)
        {
            sqlx::query(
                r"
                UPDATE tickets
                SET status = $3, user_id = $4, reservation_expiry = $5, order_id = $6
                WHERE competition_id = $1 AND ticket_number = $2
                ",
            )
            .bind(competition_id.value())
            .bind(to_db(ticket.number.value())?)
            .bind(ticket.status.as_str())
            .bind(ticket.holder.as_ref().map(UserId::as_str))
            .bind(ticket.reservation_expiry.map(|expiry| expiry.inner()))
            .bind(ticket.order_id.map(|id| id.value()))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let sold = sqlx::query(
            r"
            UPDATE competition_inventory
            SET tickets_sold = (
                SELECT COUNT(*) FROM tickets
                WHERE competition_id = $1 AND status = 'purchased'
            )
            WHERE competition_id = $1
            RETURNING tickets_sold
            ",
        )
        .bind(competition_id.value())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        let tickets_sold = from_db(sold.try_get("tickets_sold").map_err(db_error)?)?;

        tx.commit().await.map_err(db_error)?;
        tracing::info!(
            competition_id = competition_id.value(),
            tickets_sold,
            "Ticket projection replaced"
        );
        Ok(())
    }
}

impl TicketStore for PostgresTicketStore {
    fn initialize(&self, competition_id: CompetitionId, total_tickets: u32) -> StoreFuture<'_, ()> {
        Box::pin(self.do_initialize(competition_id, total_tickets))
    }

    fn reset(&self, competition_id: CompetitionId) -> StoreFuture<'_, ()> {
        Box::pin(self.do_reset(competition_id))
    }

    fn competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<CompetitionInventory>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT competition_id, total_tickets, tickets_sold
                FROM competition_inventory
                WHERE competition_id = $1
                ",
            )
            .bind(competition_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(inventory_from_row).transpose()
        })
    }

    fn competitions(&self) -> StoreFuture<'_, Vec<CompetitionInventory>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT competition_id, total_tickets, tickets_sold
                FROM competition_inventory
                ORDER BY competition_id
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter().map(inventory_from_row).collect()
        })
    }

    fn load_tickets(&self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE competition_id = $1 ORDER BY ticket_number"
            ))
            .bind(competition_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter().map(ticket_from_row).collect()
        })
    }

    fn load_ticket(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE competition_id = $1 AND ticket_number = $2"
            ))
            .bind(competition_id.value())
            .bind(to_db(number.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(ticket_from_row).transpose()
        })
    }

    fn claim(&self, claim: Claim) -> StoreFuture<'_, ClaimOutcome> {
        Box::pin(self.do_claim(claim))
    }

    fn release(
        &self,
        competition_id: CompetitionId,
        ticket_numbers: Vec<TicketNumber>,
        holder: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        Box::pin(async move { self.do_release(competition_id, &ticket_numbers, &holder).await })
    }

    fn finalize(&self, finalize: Finalize) -> StoreFuture<'_, FinalizeOutcome> {
        Box::pin(self.do_finalize(finalize))
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(self.do_sweep(now))
    }

    fn replace_tickets(
        &self,
        competition_id: CompetitionId,
        tickets: Vec<Ticket>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(self.do_replace(competition_id, tickets))
    }
}
