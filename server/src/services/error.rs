use thiserror::Error;

use crate::store::StoreError;

/// Outcomes of voucher operations that callers must be able to tell apart.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("{0} is not a valid denomination (allowed: 500, 1000, 2000, 5000)")]
    InvalidDenomination(i64),

    #[error("Quantity must be between 1 and {max}, got {quantity}")]
    InvalidQuantity { quantity: i64, max: i32 },

    #[error("Ticket not found")]
    NotFound,

    #[error("Batch not found")]
    BatchNotFound,

    #[error("Ticket has already been redeemed")]
    AlreadyRedeemed,

    #[error("Ticket has expired")]
    Expired,

    #[error("Ticket has been invalidated")]
    Invalid,

    #[error("Ticket is being updated concurrently, please retry")]
    StorageConflict,

    #[error("{0}")]
    Validation(String),

    #[error("Storage error")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for TicketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => TicketError::StorageConflict,
            other => TicketError::Storage(other),
        }
    }
}
