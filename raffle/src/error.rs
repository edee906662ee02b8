//! Error types for the allocation services.
//!
//! Every service operation has its own error enum so callers can match exhaustively on
//! the failures that operation can actually produce. All of them classify into one
//! [`ErrorKind`], which callers map to status codes and retry hints.

use raffle_core::StoreError;
use raffle_core::types::{CompetitionId, TicketNumber};
use std::fmt;
use thiserror::Error;

/// Error taxonomy shared by every service operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Competition unknown or ticket outside its range. Not retried.
    ///
    /// Out-of-range numbers land here rather than under [`InvalidInput`](Self::InvalidInput):
    /// the request is well formed, the numbers just do not exist in that competition.
    NotFound,
    /// Numbers unavailable or hold mismatched/expired. Caller may retry with other input.
    Conflict,
    /// Empty or malformed request, rejected before any mutation.
    InvalidInput,
    /// Backing store failure. Fatal for this call.
    StoreFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::StoreFailure => "store_failure",
        })
    }
}

/// Classifies a backend error.
#[must_use]
pub const fn store_error_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::CompetitionNotFound(_) | StoreError::OrderNotFound(_) => ErrorKind::NotFound,
        StoreError::AlreadyInitialized(_) | StoreError::DuplicateOrder(_) => ErrorKind::Conflict,
        StoreError::InvalidTotal(_) => ErrorKind::InvalidInput,
        StoreError::Database(_) | StoreError::Corrupt(_) => ErrorKind::StoreFailure,
    }
}

/// Renders numbers as `1, 2, 3` for error messages.
struct NumberList<'a>(&'a [TicketNumber]);

impl fmt::Display for NumberList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, number) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{number}")?;
        }
        Ok(())
    }
}

fn list(numbers: &[TicketNumber]) -> NumberList<'_> {
    NumberList(numbers)
}

/// Errors from inventory setup and read operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// Ticket number outside `1..=total_tickets`.
    #[error("Invalid ticket number {number} for competition {competition_id}")]
    InvalidTicketNumber {
        /// Competition queried
        competition_id: CompetitionId,
        /// Offending number
        number: TicketNumber,
    },

    /// Backend error.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for InventoryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CompetitionNotFound(id) => Self::CompetitionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl InventoryError {
    /// Taxonomy class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_) | Self::InvalidTicketNumber { .. } => ErrorKind::NotFound,
            Self::Store(error) => store_error_kind(error),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

/// Errors from [`reserve`](crate::ReservationManager::reserve).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// The request named no ticket numbers.
    #[error("Reservation request contains no ticket numbers")]
    EmptyRequest,

    /// Numbers outside `1..=total_tickets`; nothing was changed.
    #[error("Invalid ticket numbers: {}", list(.0))]
    InvalidTicketNumber(Vec<TicketNumber>),

    /// Numbers not free at attempt time; nothing was changed.
    #[error("Tickets unavailable: {}", list(.0))]
    TicketsUnavailable(Vec<TicketNumber>),

    /// Backend error; nothing was changed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReservationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CompetitionNotFound(id) => Self::CompetitionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl ReservationError {
    /// Taxonomy class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_) | Self::InvalidTicketNumber(_) => ErrorKind::NotFound,
            Self::EmptyRequest => ErrorKind::InvalidInput,
            Self::TicketsUnavailable(_) => ErrorKind::Conflict,
            Self::Store(error) => store_error_kind(error),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

/// Errors from [`release`](crate::ReservationManager::release).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// Numbers outside `1..=total_tickets`; nothing was changed.
    #[error("Invalid ticket numbers: {}", list(.0))]
    InvalidTicketNumber(Vec<TicketNumber>),

    /// Backend error.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReleaseError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CompetitionNotFound(id) => Self::CompetitionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl ReleaseError {
    /// Taxonomy class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_) | Self::InvalidTicketNumber(_) => ErrorKind::NotFound,
            Self::Store(error) => store_error_kind(error),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

/// Errors from [`purchase`](crate::PurchaseFinalizer::purchase).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// The request named no ticket numbers.
    #[error("Purchase request contains no ticket numbers")]
    EmptyRequest,

    /// Numbers outside `1..=total_tickets`; nothing was changed.
    #[error("Invalid ticket numbers: {}", list(.0))]
    InvalidTicketNumber(Vec<TicketNumber>),

    /// Numbers held by someone else, already sold, or with a lapsed hold; nothing was changed.
    #[error("Hold expired or mismatched for tickets: {}", list(.0))]
    HoldExpiredOrMismatched(Vec<TicketNumber>),

    /// Backend error; nothing was changed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PurchaseError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CompetitionNotFound(id) => Self::CompetitionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl PurchaseError {
    /// Taxonomy class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_) | Self::InvalidTicketNumber(_) => ErrorKind::NotFound,
            Self::EmptyRequest => ErrorKind::InvalidInput,
            Self::HoldExpiredOrMismatched(_) => ErrorKind::Conflict,
            Self::Store(error) => store_error_kind(error),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Safe only because the finalizer de-duplicates on `order_id`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

/// Errors from reconciliation, audit and ownership lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// No inventory exists for this competition.
    #[error("Competition not found: {0}")]
    CompetitionNotFound(CompetitionId),

    /// Ticket number outside `1..=total_tickets`.
    #[error("Invalid ticket number {number} for competition {competition_id}")]
    InvalidTicketNumber {
        /// Competition queried
        competition_id: CompetitionId,
        /// Offending number
        number: TicketNumber,
    },

    /// Backend error.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReconcileError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CompetitionNotFound(id) => Self::CompetitionNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl ReconcileError {
    /// Taxonomy class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CompetitionNotFound(_) | Self::InvalidTicketNumber { .. } => ErrorKind::NotFound,
            Self::Store(error) => store_error_kind(error),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(raw: &[u32]) -> Vec<TicketNumber> {
        raw.iter().copied().map(TicketNumber::new).collect()
    }

    #[test]
    fn messages_list_ticket_numbers() {
        let error = ReservationError::TicketsUnavailable(numbers(&[3, 4]));
        assert_eq!(error.to_string(), "Tickets unavailable: 3, 4");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ReservationError::EmptyRequest.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            ReservationError::TicketsUnavailable(numbers(&[1])).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PurchaseError::HoldExpiredOrMismatched(numbers(&[9])).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ReleaseError::InvalidTicketNumber(numbers(&[0])).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            InventoryError::from(StoreError::AlreadyInitialized(CompetitionId::new(1))).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn store_not_found_maps_to_dedicated_variant() {
        let error = PurchaseError::from(StoreError::CompetitionNotFound(CompetitionId::new(4)));
        assert_eq!(error, PurchaseError::CompetitionNotFound(CompetitionId::new(4)));
    }

    #[test]
    fn only_database_failures_are_retryable() {
        assert!(ReconcileError::Store(StoreError::Database("timeout".into())).is_retryable());
        assert!(!ReconcileError::Store(StoreError::Corrupt("bad row".into())).is_retryable());
        assert!(!PurchaseError::EmptyRequest.is_retryable());
    }
}
