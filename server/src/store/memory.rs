use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{touches_window, Page, StoreError, TicketFilter, TicketStore};
use crate::models::{BatchSummary, Ticket, TicketBatch, TicketStatus};

#[derive(Default)]
struct Tables {
    batches: HashMap<Uuid, TicketBatch>,
    /// Keyed by code, the unique lookup key.
    tickets: HashMap<String, Ticket>,
}

/// In-process store. Each operation holds the table lock for its whole
/// duration, which makes the status guards atomic.
#[derive(Default)]
pub struct MemoryTicketStore {
    tables: Mutex<Tables>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn ticket_count(&self) -> usize {
        self.tables.lock().await.tickets.len()
    }

    #[cfg(test)]
    pub(crate) async fn batch_count(&self) -> usize {
        self.tables.lock().await.batches.len()
    }

    /// Test hook for backdating rows the way a long-running deployment
    /// would have them.
    #[cfg(test)]
    pub(crate) async fn update_ticket<F>(&self, code: &str, f: F)
    where
        F: FnOnce(&mut Ticket),
    {
        if let Some(ticket) = self.tables.lock().await.tickets.get_mut(code) {
            f(ticket);
        }
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, Uuid)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn insert_batch(&self, batch: &TicketBatch, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;

        if tables.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!(
                "batch {} already exists",
                batch.id
            )));
        }
        let mut seen = HashSet::with_capacity(tickets.len());
        for ticket in tickets {
            if tables.tickets.contains_key(&ticket.code) || !seen.insert(ticket.code.as_str()) {
                return Err(StoreError::Conflict(format!(
                    "ticket code {} already exists",
                    ticket.code
                )));
            }
        }

        tables.batches.insert(batch.id, batch.clone());
        for ticket in tickets {
            tables.tickets.insert(ticket.code.clone(), ticket.clone());
        }
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tables.lock().await.tickets.get(code).cloned())
    }

    async fn redeem_if_unused(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tickets.get_mut(code) {
            Some(ticket)
                if ticket.status == TicketStatus::Unused && !ticket.is_past_expiry(now) =>
            {
                ticket.status = TicketStatus::Used;
                ticket.used_at = Some(now);
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn invalidate_if_unused(
        &self,
        code: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tickets.get_mut(code) {
            Some(ticket)
                if ticket.status == TicketStatus::Unused && !ticket.is_past_expiry(now) =>
            {
                ticket.status = TicketStatus::Invalid;
                ticket.invalidated_at = Some(now);
                ticket.invalid_reason = Some(reason.to_string());
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_overdue(&self, as_of: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for ticket in tables.tickets.values_mut() {
            if ticket.status == TicketStatus::Unused && ticket.is_past_expiry(as_of) {
                ticket.status = TicketStatus::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn tickets_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| touches_window(t, start, end))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(tickets)
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<(TicketBatch, Vec<Ticket>)>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(batch) = tables.batches.get(&id).cloned() else {
            return Ok(None);
        };
        let mut members: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.batch_id == id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(Some((batch, members)))
    }

    async fn list_batches(
        &self,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchSummary>, StoreError> {
        let tables = self.tables.lock().await;
        let mut batches: Vec<TicketBatch> = tables.batches.values().cloned().collect();
        newest_first(&mut batches, |b| (b.created_at, b.id));

        let summaries = paginate(batches, page)
            .into_iter()
            .map(|batch| {
                let members: Vec<Ticket> = tables
                    .tickets
                    .values()
                    .filter(|t| t.batch_id == batch.id)
                    .cloned()
                    .collect();
                BatchSummary::from_members(batch, &members, now)
            })
            .collect();
        Ok(summaries)
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| filter.matches(t, now))
            .cloned()
            .collect();
        newest_first(&mut tickets, |t| (t.created_at, t.id));
        Ok(paginate(tickets, page))
    }

    async fn close(&self) {
        tracing::debug!("In-memory ticket store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Denomination;
    use chrono::Duration;

    fn batch_with(codes: &[&str], expires_at: Option<DateTime<Utc>>) -> (TicketBatch, Vec<Ticket>) {
        let now = Utc::now();
        let batch = TicketBatch {
            id: Uuid::new_v4(),
            value: Denomination::V500,
            quantity: codes.len() as i32,
            description: None,
            expires_at,
            created_at: now,
        };
        let tickets = codes
            .iter()
            .map(|code| Ticket::new_unused(code.to_string(), batch.value, batch.id, now, expires_at))
            .collect();
        (batch, tickets)
    }

    #[tokio::test]
    async fn test_insert_batch_rejects_duplicate_codes_without_partial_writes() {
        let store = MemoryTicketStore::new();
        let (batch, tickets) = batch_with(&["AAAA-AAAA", "BBBB-BBBB"], None);
        store.insert_batch(&batch, &tickets).await.unwrap();

        let (batch2, tickets2) = batch_with(&["CCCC-CCCC", "AAAA-AAAA"], None);
        let err = store.insert_batch(&batch2, &tickets2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.ticket_count().await, 2);
        assert_eq!(store.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_redeem_guard_only_fires_once() {
        let store = MemoryTicketStore::new();
        let (batch, tickets) = batch_with(&["AAAA-AAAA"], None);
        store.insert_batch(&batch, &tickets).await.unwrap();

        let now = Utc::now();
        let first = store.redeem_if_unused("AAAA-AAAA", now).await.unwrap();
        assert_eq!(first.unwrap().used_at, Some(now));
        assert!(store.redeem_if_unused("AAAA-AAAA", now).await.unwrap().is_none());
        assert!(store.redeem_if_unused("ZZZZ-ZZZZ", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guards_refuse_overdue_tickets() {
        let store = MemoryTicketStore::new();
        let (batch, tickets) = batch_with(&["AAAA-AAAA"], Some(Utc::now() - Duration::minutes(1)));
        store.insert_batch(&batch, &tickets).await.unwrap();

        let now = Utc::now();
        assert!(store.redeem_if_unused("AAAA-AAAA", now).await.unwrap().is_none());
        assert!(store
            .invalidate_if_unused("AAAA-AAAA", "lost", now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.expire_overdue(now).await.unwrap(), 1);
        assert_eq!(store.expire_overdue(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_tickets_filters_by_effective_status() {
        let store = MemoryTicketStore::new();
        let (batch, tickets) = batch_with(&["AAAA-AAAA"], Some(Utc::now() - Duration::minutes(1)));
        let (batch2, tickets2) = batch_with(&["BBBB-BBBB"], None);
        store.insert_batch(&batch, &tickets).await.unwrap();
        store.insert_batch(&batch2, &tickets2).await.unwrap();

        let now = Utc::now();
        let expired = TicketFilter {
            status: Some(TicketStatus::Expired),
            batch_id: None,
        };
        let listed = store.list_tickets(&expired, Page::default(), now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, "AAAA-AAAA");

        let by_batch = TicketFilter {
            status: None,
            batch_id: Some(batch2.id),
        };
        let listed = store.list_tickets(&by_batch, Page::default(), now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, "BBBB-BBBB");
    }
}
