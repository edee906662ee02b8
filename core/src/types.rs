//! Domain types for raffle ticket inventory.
//!
//! This module contains the identifiers, value objects and records shared by the
//! inventory store, the order ledger and the allocation services.

use crate::store::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default length of a reservation hold, in minutes.
pub const DEFAULT_HOLD_MINUTES: i64 = 30;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a competition (owned by the competition catalogue).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompetitionId(i64);

impl CompetitionId {
    /// Creates a new `CompetitionId`
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for CompetitionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ticket number within a competition, valid in `1..=total_tickets`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Creates a new `TicketNumber`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw number
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Sorts and de-duplicates a requested set of numbers.
    ///
    /// Callers hand the core an ordered collection; the allocation operations treat it
    /// as a set, so `[3, 1, 3]` and `[1, 3]` request the same tickets.
    #[must_use]
    pub fn normalize(numbers: &[Self]) -> Vec<Self> {
        numbers
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl From<u32> for TicketNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identity supplied by the auth layer.
///
/// The core never validates identities, it only compares them for equality.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an order in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates a new `OrderId`
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for OrderId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ticket Status
// ============================================================================

/// Status of a single ticket number. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Free to reserve
    Available,
    /// Held by a buyer until the reservation expires
    Reserved,
    /// Permanently owned, linked to an order
    Purchased,
}

impl TicketStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Purchased => "purchased",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "available" => Ok(Self::Available),
            "reserved" => Ok(Self::Reserved),
            "purchased" => Ok(Self::Purchased),
            _ => Err(StoreError::Corrupt(format!("Invalid ticket status: {s}"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper for reservation expiry with ordering and comparison
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationExpiry(DateTime<Utc>);

impl ReservationExpiry {
    /// Creates a new `ReservationExpiry`
    #[must_use]
    pub const fn new(expiry: DateTime<Utc>) -> Self {
        Self(expiry)
    }

    /// Expiry for a hold starting at `now` and lasting `hold`.
    #[must_use]
    pub fn after(now: DateTime<Utc>, hold: Duration) -> Self {
        Self(now + hold)
    }

    /// Returns the inner `DateTime`
    #[must_use]
    pub const fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    /// Checks if the reservation has expired.
    ///
    /// This is the only expiry comparator in the system; the SQL backend mirrors it
    /// as `reservation_expiry <= $now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.0
    }
}

impl fmt::Display for ReservationExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// One numbered ticket of a competition.
///
/// Field presence follows the status:
///
/// | status      | holder | reservation_expiry | order_id |
/// |-------------|--------|--------------------|----------|
/// | `available` | -      | -                  | -        |
/// | `reserved`  | yes    | yes                | -        |
/// | `purchased` | yes    | -                  | yes      |
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Competition this ticket belongs to
    pub competition_id: CompetitionId,
    /// Ticket number
    pub number: TicketNumber,
    /// Physical status as stored
    pub status: TicketStatus,
    /// Current holder (reserved or purchased)
    pub holder: Option<UserId>,
    /// Hold expiry (reserved only)
    pub reservation_expiry: Option<ReservationExpiry>,
    /// Order that bought the ticket (purchased only)
    pub order_id: Option<OrderId>,
}

impl Ticket {
    /// Creates an available ticket
    #[must_use]
    pub const fn available(competition_id: CompetitionId, number: TicketNumber) -> Self {
        Self {
            competition_id,
            number,
            status: TicketStatus::Available,
            holder: None,
            reservation_expiry: None,
            order_id: None,
        }
    }

    /// Creates a ticket held by `holder` until `expiry`
    #[must_use]
    pub const fn reserved(
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: UserId,
        expiry: ReservationExpiry,
    ) -> Self {
        Self {
            competition_id,
            number,
            status: TicketStatus::Reserved,
            holder: Some(holder),
            reservation_expiry: Some(expiry),
            order_id: None,
        }
    }

    /// Creates a ticket owned by `holder` through `order_id`
    #[must_use]
    pub const fn purchased(
        competition_id: CompetitionId,
        number: TicketNumber,
        holder: UserId,
        order_id: OrderId,
    ) -> Self {
        Self {
            competition_id,
            number,
            status: TicketStatus::Purchased,
            holder: Some(holder),
            reservation_expiry: None,
            order_id: Some(order_id),
        }
    }

    /// Logical status at `now`: a reservation whose hold has lapsed reads as available.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> TicketStatus {
        match self.status {
            TicketStatus::Reserved if !self.hold_is_live(now) => TicketStatus::Available,
            status => status,
        }
    }

    /// Whether a reservation may claim this ticket at `now`.
    #[must_use]
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == TicketStatus::Available
    }

    /// Whether `user` holds a live (unexpired) reservation on this ticket at `now`.
    #[must_use]
    pub fn is_held_by(&self, user: &UserId, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Reserved
            && self.holder.as_ref() == Some(user)
            && self.hold_is_live(now)
    }

    /// Whether this ticket was bought by `user` through `order_id`.
    #[must_use]
    pub fn is_purchased_by(&self, user: &UserId, order_id: OrderId) -> bool {
        self.status == TicketStatus::Purchased
            && self.holder.as_ref() == Some(user)
            && self.order_id == Some(order_id)
    }

    /// Holder as seen at `now` (none once a hold has lapsed).
    #[must_use]
    pub fn effective_holder(&self, now: DateTime<Utc>) -> Option<&UserId> {
        match self.effective_status(now) {
            TicketStatus::Available => None,
            TicketStatus::Reserved | TicketStatus::Purchased => self.holder.as_ref(),
        }
    }

    /// Returns the ticket to the available pool, clearing holder, expiry and order.
    pub fn make_available(&mut self) {
        self.status = TicketStatus::Available;
        self.holder = None;
        self.reservation_expiry = None;
        self.order_id = None;
    }

    /// Checks that optional fields are present exactly when the status requires them.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        match self.status {
            TicketStatus::Available => {
                self.holder.is_none()
                    && self.reservation_expiry.is_none()
                    && self.order_id.is_none()
            }
            TicketStatus::Reserved => {
                self.holder.is_some()
                    && self.reservation_expiry.is_some()
                    && self.order_id.is_none()
            }
            TicketStatus::Purchased => {
                self.holder.is_some()
                    && self.reservation_expiry.is_none()
                    && self.order_id.is_some()
            }
        }
    }

    fn hold_is_live(&self, now: DateTime<Utc>) -> bool {
        self.reservation_expiry
            .is_some_and(|expiry| !expiry.is_expired(now))
    }
}

/// Inventory header for one competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionInventory {
    /// Competition identifier
    pub competition_id: CompetitionId,
    /// Fixed number of tickets, set at initialization
    pub total_tickets: u32,
    /// Denormalized purchased count, only changed alongside ticket status updates
    pub tickets_sold: u32,
}

impl CompetitionInventory {
    /// Checks whether `number` lies in `1..=total_tickets`
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.value() >= 1 && number.value() <= self.total_tickets
    }

    /// Numbers from `numbers` that fall outside this competition's range.
    #[must_use]
    pub fn out_of_range(&self, numbers: &[TicketNumber]) -> Vec<TicketNumber> {
        numbers
            .iter()
            .copied()
            .filter(|number| !self.contains(*number))
            .collect()
    }
}

/// A successful reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Competition the hold applies to
    pub competition_id: CompetitionId,
    /// Holder of the reservation
    pub user_id: UserId,
    /// Held numbers, ascending
    pub ticket_numbers: Vec<TicketNumber>,
    /// When the hold lapses
    pub expires_at: ReservationExpiry,
}

// ============================================================================
// Read Models
// ============================================================================

/// Logical status of every ticket in a competition.
///
/// Each number appears in exactly one bucket; numbers are ascending within a bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Numbers free to reserve (including lapsed holds)
    pub available: Vec<TicketNumber>,
    /// Numbers under a live hold
    pub reserved: Vec<TicketNumber>,
    /// Numbers sold
    pub purchased: Vec<TicketNumber>,
}

impl StatusSnapshot {
    /// Buckets tickets by their status at `now`.
    #[must_use]
    pub fn from_tickets(tickets: &[Ticket], now: DateTime<Utc>) -> Self {
        let mut sorted: Vec<&Ticket> = tickets.iter().collect();
        sorted.sort_by_key(|ticket| ticket.number);

        let mut snapshot = Self::default();
        for ticket in sorted {
            match ticket.effective_status(now) {
                TicketStatus::Available => snapshot.available.push(ticket.number),
                TicketStatus::Reserved => snapshot.reserved.push(ticket.number),
                TicketStatus::Purchased => snapshot.purchased.push(ticket.number),
            }
        }
        snapshot
    }

    /// Total tickets across all buckets
    #[must_use]
    pub fn total(&self) -> usize {
        self.available.len() + self.reserved.len() + self.purchased.len()
    }
}

/// Aggregate counts for a competition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStats {
    /// Competition identifier
    pub competition_id: CompetitionId,
    /// Fixed ticket count
    pub total_tickets: u32,
    /// Logically available
    pub available: u32,
    /// Under a live hold
    pub reserved: u32,
    /// Purchased tickets counted from ticket rows
    pub purchased: u32,
    /// Denormalized counter on the competition
    pub tickets_sold: u32,
}

impl InventoryStats {
    /// Builds stats from the inventory header and a logical snapshot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bucket sizes are bounded by total_tickets (u32)
    pub fn new(inventory: &CompetitionInventory, snapshot: &StatusSnapshot) -> Self {
        Self {
            competition_id: inventory.competition_id,
            total_tickets: inventory.total_tickets,
            available: snapshot.available.len() as u32,
            reserved: snapshot.reserved.len() as u32,
            purchased: snapshot.purchased.len() as u32,
            tickets_sold: inventory.tickets_sold,
        }
    }

    /// Whether the denormalized counter matches the purchased rows.
    #[must_use]
    pub const fn counter_consistent(&self) -> bool {
        self.tickets_sold == self.purchased
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Payment outcome recorded on an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Checkout started, payment not yet confirmed
    Pending,
    /// Payment confirmed
    Completed,
    /// Payment failed
    Failed,
}

impl PaymentStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Corrupt(format!("Invalid payment status: {s}"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger record of a buyer's purchase intent and its payment outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub order_id: OrderId,
    /// Competition the order is for
    pub competition_id: CompetitionId,
    /// Buyer
    pub user_id: UserId,
    /// The specific numbers claimed
    pub ticket_numbers: Vec<TicketNumber>,
    /// Payment outcome
    pub payment_status: PaymentStatus,
    /// When the order was placed
    pub created_at: DateTime<Utc>,
}

/// Ownership lookup result for support and audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipInfo {
    /// Competition identifier
    pub competition_id: CompetitionId,
    /// Ticket number
    pub ticket_number: TicketNumber,
    /// Logical status at lookup time
    pub status: TicketStatus,
    /// Current holder, if any
    pub user_id: Option<UserId>,
    /// Order that bought the ticket, if purchased
    pub order_id: Option<OrderId>,
    /// When the owning order was placed, if known
    pub purchased_at: Option<DateTime<Utc>>,
    /// Hold expiry, if reserved
    pub reservation_expiry: Option<ReservationExpiry>,
}
