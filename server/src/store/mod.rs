//! Ticket persistence.
//!
//! The lifecycle manager and reporter only talk to [`TicketStore`]. The
//! Postgres implementation is the production backend; the in-memory one has
//! the same semantics and backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BatchSummary, Ticket, TicketBatch, TicketStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryTicketStore;
pub use postgres::PgTicketStore;

/// Postgres SQLSTATE codes that mean "another writer got there first".
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Database error")]
    Database(#[source] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if matches!(
                    code.as_ref(),
                    UNIQUE_VIOLATION | SERIALIZATION_FAILURE | DEADLOCK_DETECTED
                ) {
                    return StoreError::Conflict(db_err.message().to_string());
                }
            }
        }
        StoreError::Database(err)
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Admin listing filter. `status` matches the effective status, so an
/// overdue ticket that has not been swept yet is listed as `EXPIRED`.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub batch_id: Option<Uuid>,
}

impl TicketFilter {
    pub fn matches(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        self.status
            .map_or(true, |status| ticket.effective_status(now) == status)
            && self.batch_id.map_or(true, |id| ticket.batch_id == id)
    }
}

/// Whether a ticket can contribute to the report window `[start, end)`:
/// it existed before the window closed and did not reach a terminal state
/// before the window opened.
pub fn touches_window(ticket: &Ticket, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    ticket.created_at < end
        && ticket.used_at.map_or(true, |at| at >= start)
        && ticket.invalidated_at.map_or(true, |at| at >= start)
        && ticket.expired_at().map_or(true, |at| at >= start)
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Persist a batch and all of its tickets, or nothing.
    async fn insert_batch(&self, batch: &TicketBatch, tickets: &[Ticket]) -> Result<(), StoreError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError>;

    /// Atomic CAS: mark the ticket `USED` at `now` only if it is still
    /// `UNUSED` and not past its expiry. Returns `None` when the guard failed
    /// or the code is unknown.
    async fn redeem_if_unused(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Atomic CAS: mark the ticket `INVALID` only if it is still `UNUSED` and
    /// not past its expiry.
    async fn invalidate_if_unused(
        &self,
        code: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Move every `UNUSED` ticket with `expires_at <= as_of` to `EXPIRED`.
    /// Returns the number of tickets changed.
    async fn expire_overdue(&self, as_of: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Tickets for which [`touches_window`] holds.
    async fn tickets_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError>;

    async fn find_batch(&self, id: Uuid) -> Result<Option<(TicketBatch, Vec<Ticket>)>, StoreError>;

    /// Newest batches first.
    async fn list_batches(
        &self,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchSummary>, StoreError>;

    /// Newest tickets first.
    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// Release the underlying connections. Called once at shutdown.
    async fn close(&self);
}
