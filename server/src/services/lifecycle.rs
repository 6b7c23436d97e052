//! Ticket lifecycle: issuance, redemption, expiry and invalidation.
//!
//! State changes go through the store's compare-and-set operations. When a
//! guard fails, the current row is read back to tell the caller exactly why.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::code::{normalize_code, CodeGenerator};
use super::error::TicketError;
use crate::models::{
    BatchDetail, BatchSummary, Denomination, IssuedBatch, NewBatch, Ticket, TicketBatch,
    TicketStatus,
};
use crate::store::{Page, TicketFilter, TicketStore};

pub const DEFAULT_MAX_BATCH_SIZE: i32 = 10_000;
/// Upper bound for the configurable batch size.
pub const BATCH_SIZE_CEILING: i32 = 100_000;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_REASON_LEN: usize = 500;

pub struct LifecycleManager {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    codes: CodeGenerator,
    max_batch_size: i32,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        codes: CodeGenerator,
        max_batch_size: i32,
    ) -> Self {
        Self {
            store,
            clock,
            codes,
            max_batch_size,
        }
    }

    /// Issue `quantity` unused tickets of `value` as one batch.
    ///
    /// Nothing is written unless every ticket is.
    pub async fn issue_batch(
        &self,
        quantity: i64,
        value: i64,
        description: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedBatch, TicketError> {
        let new_batch = self.check_new_batch(quantity, value, description, expires_at)?;

        let issued = self
            .with_conflict_retry("issue_batch", || self.try_issue(&new_batch))
            .await?;

        info!(
            batch_id = %issued.batch.id,
            value = %issued.batch.value,
            quantity = issued.batch.quantity,
            "Ticket batch issued"
        );
        Ok(issued)
    }

    fn check_new_batch(
        &self,
        quantity: i64,
        value: i64,
        description: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<NewBatch, TicketError> {
        let value =
            Denomination::try_from(value).map_err(|e| TicketError::InvalidDenomination(e.0))?;

        if quantity <= 0 || quantity > i64::from(self.max_batch_size) {
            return Err(TicketError::InvalidQuantity {
                quantity,
                max: self.max_batch_size,
            });
        }

        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(TicketError::Validation(format!(
                "Description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        if expires_at.is_some_and(|at| at <= self.clock.now()) {
            return Err(TicketError::Validation(
                "Expiry must be in the future".to_string(),
            ));
        }

        Ok(NewBatch {
            quantity: quantity as i32,
            value,
            description,
            expires_at,
        })
    }

    async fn try_issue(&self, new_batch: &NewBatch) -> Result<IssuedBatch, TicketError> {
        let now = self.clock.now();
        let batch = TicketBatch {
            id: Uuid::new_v4(),
            value: new_batch.value,
            quantity: new_batch.quantity,
            description: new_batch.description.clone(),
            expires_at: new_batch.expires_at,
            created_at: now,
        };

        let tickets: Vec<Ticket> = self
            .codes
            .generate_distinct(new_batch.quantity as usize)
            .into_iter()
            .map(|code| Ticket::new_unused(code, batch.value, batch.id, now, batch.expires_at))
            .collect();

        self.store.insert_batch(&batch, &tickets).await?;
        Ok(IssuedBatch { batch, tickets })
    }

    /// Mark the ticket used. Exactly one of any number of concurrent calls
    /// for the same code succeeds; the others see `AlreadyRedeemed`.
    pub async fn redeem(&self, code: &str) -> Result<Ticket, TicketError> {
        let code = normalize_code(code);
        let result = self
            .with_conflict_retry("redeem", || self.try_redeem(&code))
            .await;

        match &result {
            Ok(ticket) => info!(ticket_id = %ticket.id, value = %ticket.value, "Ticket redeemed"),
            Err(e) => info!(error = %e, "Ticket redemption refused"),
        }
        result
    }

    async fn try_redeem(&self, code: &str) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        if let Some(ticket) = self.store.redeem_if_unused(code, now).await? {
            return Ok(ticket);
        }
        Err(self.refusal(code, now).await)
    }

    /// Administrative override: `UNUSED -> INVALID`.
    pub async fn invalidate(&self, code: &str, reason: &str) -> Result<Ticket, TicketError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TicketError::Validation(
                "An invalidation reason is required".to_string(),
            ));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(TicketError::Validation(format!(
                "Reason must be at most {MAX_REASON_LEN} characters"
            )));
        }

        let code = normalize_code(code);
        let ticket = self
            .with_conflict_retry("invalidate", || self.try_invalidate(&code, reason))
            .await?;

        warn!(ticket_id = %ticket.id, reason, "Ticket invalidated");
        Ok(ticket)
    }

    async fn try_invalidate(&self, code: &str, reason: &str) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        if let Some(ticket) = self.store.invalidate_if_unused(code, reason, now).await? {
            return Ok(ticket);
        }
        Err(self.refusal(code, now).await)
    }

    /// Why a guarded transition out of `UNUSED` did not apply.
    async fn refusal(&self, code: &str, now: DateTime<Utc>) -> TicketError {
        let current = match self.store.find_by_code(code).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return TicketError::NotFound,
            Err(e) => return e.into(),
        };

        match current.effective_status(now) {
            TicketStatus::Used => TicketError::AlreadyRedeemed,
            TicketStatus::Expired => TicketError::Expired,
            TicketStatus::Invalid => TicketError::Invalid,
            // The guard saw a different row version than this read.
            TicketStatus::Unused => TicketError::StorageConflict,
        }
    }

    /// Sweep unused tickets whose expiry is at or before `as_of`.
    /// Returns how many were changed; a repeated call changes nothing.
    /// Expire every unused ticket whose expiry has passed by `as_of`.
    ///
    /// `as_of` may not be in the future, or tickets would be expired before
    /// their expiry instant.
    pub async fn expire_overdue(&self, as_of: DateTime<Utc>) -> Result<u64, TicketError> {
        let now = self.clock.now();
        if as_of > now {
            return Err(TicketError::Validation(format!(
                "as_of {as_of} is later than the current time {now}"
            )));
        }
        let expired = self.store.expire_overdue(as_of).await?;
        if expired > 0 {
            info!(expired, as_of = %as_of, "Expired overdue tickets");
        }
        Ok(expired)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn ticket(&self, code: &str) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        self.store
            .find_by_code(&normalize_code(code))
            .await?
            .map(|t| observed(t, now))
            .ok_or(TicketError::NotFound)
    }

    pub async fn batch(&self, id: Uuid) -> Result<BatchDetail, TicketError> {
        let now = self.clock.now();
        let (batch, members) = self
            .store
            .find_batch(id)
            .await?
            .ok_or(TicketError::BatchNotFound)?;

        let summary = BatchSummary::from_members(batch, &members, now);
        let tickets = members.into_iter().map(|t| observed(t, now)).collect();
        Ok(BatchDetail { summary, tickets })
    }

    pub async fn list_batches(&self, page: Page) -> Result<Vec<BatchSummary>, TicketError> {
        Ok(self.store.list_batches(page, self.clock.now()).await?)
    }

    pub async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
    ) -> Result<Vec<Ticket>, TicketError> {
        let now = self.clock.now();
        let tickets = self.store.list_tickets(filter, page, now).await?;
        Ok(tickets.into_iter().map(|t| observed(t, now)).collect())
    }

    /// Run `op`, and run it once more if it lost a write race.
    async fn with_conflict_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, TicketError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TicketError>>,
    {
        match op().await {
            Err(TicketError::StorageConflict) => {
                warn!(operation, "Storage conflict, retrying once");
                op().await
            }
            other => other,
        }
    }
}

/// Report the effective status so unswept overdue tickets read as expired.
fn observed(mut ticket: Ticket, now: DateTime<Utc>) -> Ticket {
    ticket.status = ticket.effective_status(now);
    ticket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::FixedClock;
    use crate::store::{MemoryTicketStore, StoreError};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn setup() -> (LifecycleManager, Arc<MemoryTicketStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryTicketStore::new());
        let clock = Arc::new(FixedClock::at(start()));
        let manager = LifecycleManager::new(
            store.clone(),
            clock.clone(),
            CodeGenerator::default(),
            DEFAULT_MAX_BATCH_SIZE,
        );
        (manager, store, clock)
    }

    #[tokio::test]
    async fn test_issue_batch_creates_distinct_unused_tickets() {
        let (manager, _, _) = setup();
        let issued = manager
            .issue_batch(25, 2000, Some("  spring promo ".to_string()), None)
            .await
            .unwrap();

        assert_eq!(issued.batch.quantity, 25);
        assert_eq!(issued.batch.description.as_deref(), Some("spring promo"));
        assert_eq!(issued.tickets.len(), 25);
        let codes: HashSet<&str> = issued.tickets.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes.len(), 25);
        for ticket in &issued.tickets {
            assert_eq!(ticket.status, TicketStatus::Unused);
            assert_eq!(ticket.value, Denomination::V2000);
            assert_eq!(ticket.batch_id, issued.batch.id);
            assert!(ticket.used_at.is_none());
        }

        let detail = manager.batch(issued.batch.id).await.unwrap();
        assert_eq!(detail.tickets.len(), 25);
        assert_eq!(detail.summary.counts.unused, 25);
    }

    #[tokio::test]
    async fn test_issue_batch_rejects_bad_input_without_writing() {
        let (manager, store, _) = setup();

        let err = manager.issue_batch(3, 750, None, None).await.unwrap_err();
        assert!(matches!(err, TicketError::InvalidDenomination(750)));

        for quantity in [0, -1, i64::from(DEFAULT_MAX_BATCH_SIZE) + 1] {
            let err = manager.issue_batch(quantity, 500, None, None).await.unwrap_err();
            assert!(matches!(err, TicketError::InvalidQuantity { .. }), "{quantity}");
        }

        let err = manager
            .issue_batch(1, 500, None, Some(start() - Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::Validation(_)));

        assert_eq!(store.ticket_count().await, 0);
        assert_eq!(store.batch_count().await, 0);
    }

    #[tokio::test]
    async fn test_redeem_once_then_already_redeemed() {
        let (manager, _, clock) = setup();
        let issued = manager.issue_batch(1, 500, None, None).await.unwrap();
        let code = issued.tickets[0].code.clone();

        clock.advance(Duration::minutes(5));
        let redeemed = manager.redeem(&code.to_lowercase()).await.unwrap();
        assert_eq!(redeemed.status, TicketStatus::Used);
        assert_eq!(redeemed.used_at, Some(start() + Duration::minutes(5)));

        let err = manager.redeem(&code).await.unwrap_err();
        assert!(matches!(err, TicketError::AlreadyRedeemed));
    }

    #[tokio::test]
    async fn test_redeem_unknown_code() {
        let (manager, _, _) = setup();
        assert!(matches!(
            manager.redeem("NOPE-NOPE-NOPE").await.unwrap_err(),
            TicketError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_redeem_past_expiry_is_expired_before_sweep() {
        let (manager, _, clock) = setup();
        let issued = manager
            .issue_batch(1, 1000, None, Some(start() + Duration::hours(1)))
            .await
            .unwrap();
        let code = &issued.tickets[0].code;

        clock.advance(Duration::hours(1));
        assert!(matches!(
            manager.redeem(code).await.unwrap_err(),
            TicketError::Expired
        ));
        assert_eq!(manager.ticket(code).await.unwrap().status, TicketStatus::Expired);
    }

    #[tokio::test]
    async fn test_invalidate_only_from_unused() {
        let (manager, _, _) = setup();
        let issued = manager.issue_batch(2, 5000, None, None).await.unwrap();
        let first = &issued.tickets[0].code;
        let second = &issued.tickets[1].code;

        assert!(matches!(
            manager.invalidate(first, "   ").await.unwrap_err(),
            TicketError::Validation(_)
        ));

        let invalid = manager.invalidate(first, "reported stolen").await.unwrap();
        assert_eq!(invalid.status, TicketStatus::Invalid);
        assert_eq!(invalid.invalid_reason.as_deref(), Some("reported stolen"));
        assert!(invalid.invalidated_at.is_some());

        assert!(matches!(
            manager.redeem(first).await.unwrap_err(),
            TicketError::Invalid
        ));
        assert!(matches!(
            manager.invalidate(first, "again").await.unwrap_err(),
            TicketError::Invalid
        ));

        manager.redeem(second).await.unwrap();
        assert!(matches!(
            manager.invalidate(second, "too late").await.unwrap_err(),
            TicketError::AlreadyRedeemed
        ));
    }

    #[tokio::test]
    async fn test_expire_overdue_refuses_future_sweep() {
        let (manager, store, _) = setup();
        let issued = manager
            .issue_batch(1, 1000, None, Some(start() + Duration::days(30)))
            .await
            .unwrap();

        let err = manager
            .expire_overdue(start() + Duration::days(31))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::Validation(_)));

        let code = &issued.tickets[0].code;
        let stored = store.find_by_code(code).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Unused);
        assert_eq!(manager.redeem(code).await.unwrap().status, TicketStatus::Used);
    }

    #[tokio::test]
    async fn test_expire_overdue_is_idempotent() {
        let (manager, _, clock) = setup();
        manager
            .issue_batch(3, 500, None, Some(start() + Duration::days(1)))
            .await
            .unwrap();
        manager.issue_batch(2, 500, None, None).await.unwrap();

        clock.advance(Duration::days(2));
        let as_of = manager.now();
        assert_eq!(manager.expire_overdue(as_of).await.unwrap(), 3);
        assert_eq!(manager.expire_overdue(as_of).await.unwrap(), 0);

        let expired = manager
            .list_tickets(
                &TicketFilter {
                    status: Some(TicketStatus::Expired),
                    batch_id: None,
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(expired.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeem_has_single_winner() {
        let (manager, _, _) = setup();
        let manager = Arc::new(manager);
        let issued = manager.issue_batch(1, 1000, None, None).await.unwrap();
        let code = issued.tickets[0].code.clone();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { manager.redeem(&code).await }));
        }

        let mut successes = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(TicketError::AlreadyRedeemed) => already += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((successes, already), (1, 1));
    }

    /// Store whose redeem guard reports a conflict a fixed number of times.
    struct ConflictingStore {
        inner: MemoryTicketStore,
        conflicts_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TicketStore for ConflictingStore {
        async fn insert_batch(&self, batch: &TicketBatch, tickets: &[Ticket]) -> Result<(), StoreError> {
            self.inner.insert_batch(batch, tickets).await
        }
        async fn find_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
            self.inner.find_by_code(code).await
        }
        async fn redeem_if_unused(
            &self,
            code: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<Ticket>, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict("could not serialize access".to_string()));
            }
            self.inner.redeem_if_unused(code, now).await
        }
        async fn invalidate_if_unused(
            &self,
            code: &str,
            reason: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<Ticket>, StoreError> {
            self.inner.invalidate_if_unused(code, reason, now).await
        }
        async fn expire_overdue(&self, as_of: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.expire_overdue(as_of).await
        }
        async fn tickets_for_window(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Ticket>, StoreError> {
            self.inner.tickets_for_window(start, end).await
        }
        async fn find_batch(
            &self,
            id: Uuid,
        ) -> Result<Option<(TicketBatch, Vec<Ticket>)>, StoreError> {
            self.inner.find_batch(id).await
        }
        async fn list_batches(
            &self,
            page: Page,
            now: DateTime<Utc>,
        ) -> Result<Vec<BatchSummary>, StoreError> {
            self.inner.list_batches(page, now).await
        }
        async fn list_tickets(
            &self,
            filter: &TicketFilter,
            page: Page,
            now: DateTime<Utc>,
        ) -> Result<Vec<Ticket>, StoreError> {
            self.inner.list_tickets(filter, page, now).await
        }
        async fn close(&self) {}
    }

    async fn conflicting(conflicts: usize) -> (LifecycleManager, Arc<ConflictingStore>, String) {
        let store = Arc::new(ConflictingStore {
            inner: MemoryTicketStore::new(),
            conflicts_left: AtomicUsize::new(conflicts),
            attempts: AtomicUsize::new(0),
        });
        let manager = LifecycleManager::new(
            store.clone(),
            Arc::new(FixedClock::at(start())),
            CodeGenerator::default(),
            DEFAULT_MAX_BATCH_SIZE,
        );
        let issued = manager.issue_batch(1, 500, None, None).await.unwrap();
        let code = issued.tickets[0].code.clone();
        (manager, store, code)
    }

    #[tokio::test]
    async fn test_storage_conflict_is_retried_once() {
        let (manager, store, code) = conflicting(1).await;
        assert!(manager.redeem(&code).await.is_ok());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_storage_conflict_surfaces_after_retry() {
        let (manager, store, code) = conflicting(5).await;
        assert!(matches!(
            manager.redeem(&code).await.unwrap_err(),
            TicketError::StorageConflict
        ));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }
}
