//! Row decoding and integer conversions shared by the store and the ledger.

use raffle_core::StoreError;
use raffle_core::types::{
    CompetitionId, CompetitionInventory, Order, OrderId, PaymentStatus, ReservationExpiry,
    Ticket, TicketNumber, TicketStatus, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const TICKET_COLUMNS: &str =
    "competition_id, ticket_number, status, user_id, reservation_expiry, order_id";

pub(crate) const ORDER_COLUMNS: &str =
    "order_id, competition_id, user_id, ticket_numbers, payment_status, created_at";

#[allow(clippy::needless_pass_by_value)] // used as `map_err(db_error)`
pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

pub(crate) fn to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{value} exceeds INTEGER range")))
}

pub(crate) fn from_db(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("Negative count: {value}")))
}

pub(crate) fn numbers_to_db(numbers: &[TicketNumber]) -> Result<Vec<i32>, StoreError> {
    numbers.iter().map(|number| to_db(number.value())).collect()
}

pub(crate) fn numbers_from_db(raw: Vec<i32>) -> Result<Vec<TicketNumber>, StoreError> {
    raw.into_iter()
        .map(|value| from_db(value).map(TicketNumber::new))
        .collect()
}

pub(crate) fn inventory_from_row(row: &PgRow) -> Result<CompetitionInventory, StoreError> {
    Ok(CompetitionInventory {
        competition_id: CompetitionId::new(row.try_get("competition_id").map_err(db_error)?),
        total_tickets: from_db(row.try_get("total_tickets").map_err(db_error)?)?,
        tickets_sold: from_db(row.try_get("tickets_sold").map_err(db_error)?)?,
    })
}

/// Decodes a ticket row and rejects rows whose fields contradict their status.
pub(crate) fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let holder: Option<String> = row.try_get("user_id").map_err(db_error)?;
    let expiry: Option<DateTime<Utc>> = row.try_get("reservation_expiry").map_err(db_error)?;
    let order_id: Option<i64> = row.try_get("order_id").map_err(db_error)?;

    let ticket = Ticket {
        competition_id: CompetitionId::new(row.try_get("competition_id").map_err(db_error)?),
        number: TicketNumber::new(from_db(row.try_get("ticket_number").map_err(db_error)?)?),
        status: TicketStatus::parse(&status)?,
        holder: holder.map(UserId::new),
        reservation_expiry: expiry.map(ReservationExpiry::new),
        order_id: order_id.map(OrderId::new),
    };

    if ticket.is_well_formed() {
        Ok(ticket)
    } else {
        Err(StoreError::Corrupt(format!(
            "Ticket {} of competition {} has fields inconsistent with status {}",
            ticket.number, ticket.competition_id, ticket.status
        )))
    }
}

pub(crate) fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let payment_status: String = row.try_get("payment_status").map_err(db_error)?;
    let user_id: String = row.try_get("user_id").map_err(db_error)?;

    Ok(Order {
        order_id: OrderId::new(row.try_get("order_id").map_err(db_error)?),
        competition_id: CompetitionId::new(row.try_get("competition_id").map_err(db_error)?),
        user_id: UserId::new(user_id),
        ticket_numbers: numbers_from_db(row.try_get("ticket_numbers").map_err(db_error)?)?,
        payment_status: PaymentStatus::parse(&payment_status)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}
