//! PostgreSQL ticket store.
//!
//! All status changes are single conditional `UPDATE ... RETURNING`
//! statements guarded on `status = 'UNUSED'`, so concurrent writers cannot
//! both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{Page, StoreError, TicketFilter, TicketStore};
use crate::models::{BatchSummary, Denomination, StatusCounts, Ticket, TicketBatch, TicketStatus};

const TICKET_COLUMNS: &str = "id, code, value, status, batch_id, created_at, used_at, \
                              expires_at, invalidated_at, invalid_reason";

/// Postgres caps bind parameters at 65535 per statement; each ticket row binds 7.
const INSERT_CHUNK: usize = 5000;

#[derive(Debug, FromRow)]
struct TicketRow {
    id: Uuid,
    code: String,
    value: i32,
    status: String,
    batch_id: Uuid,
    created_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    invalidated_at: Option<DateTime<Utc>>,
    invalid_reason: Option<String>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let value = Denomination::try_from(i64::from(row.value))
            .map_err(|e| StoreError::Corrupt(format!("ticket {}: {}", row.id, e)))?;
        let status = row
            .status
            .parse::<TicketStatus>()
            .map_err(|e| StoreError::Corrupt(format!("ticket {}: {}", row.id, e)))?;

        Ok(Ticket {
            id: row.id,
            code: row.code,
            value,
            status,
            batch_id: row.batch_id,
            created_at: row.created_at,
            used_at: row.used_at,
            expires_at: row.expires_at,
            invalidated_at: row.invalidated_at,
            invalid_reason: row.invalid_reason,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    value: i32,
    quantity: i32,
    description: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for TicketBatch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let value = Denomination::try_from(i64::from(row.value))
            .map_err(|e| StoreError::Corrupt(format!("batch {}: {}", row.id, e)))?;
        Ok(TicketBatch {
            id: row.id,
            value,
            quantity: row.quantity,
            description: row.description,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchSummaryRow {
    #[sqlx(flatten)]
    batch: BatchRow,
    unused: i64,
    used: i64,
    expired: i64,
    invalid: i64,
}

fn into_tickets(rows: Vec<TicketRow>) -> Result<Vec<Ticket>, StoreError> {
    rows.into_iter().map(Ticket::try_from).collect()
}

pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Successfully connected to database");

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::info!("Migrations run successfully");

        Ok(Self::new(pool))
    }
}

/// Appends the effective-status predicate for `status` at bind `now`.
fn push_effective_status(
    qb: &mut QueryBuilder<'_, Postgres>,
    status: TicketStatus,
    now: DateTime<Utc>,
) {
    match status {
        TicketStatus::Unused => {
            qb.push("(status = 'UNUSED' AND (expires_at IS NULL OR expires_at > ");
            qb.push_bind(now);
            qb.push("))");
        }
        TicketStatus::Expired => {
            qb.push("(status = 'EXPIRED' OR (status = 'UNUSED' AND expires_at <= ");
            qb.push_bind(now);
            qb.push("))");
        }
        other => {
            qb.push("status = ");
            qb.push_bind(other.as_str());
        }
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn insert_batch(&self, batch: &TicketBatch, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ticket_batches (id, value, quantity, description, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(batch.id)
        .bind(batch.value.amount() as i32)
        .bind(batch.quantity)
        .bind(&batch.description)
        .bind(batch.expires_at)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        for chunk in tickets.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO tickets (id, code, value, status, batch_id, created_at, expires_at) ",
            );
            qb.push_values(chunk, |mut row, ticket| {
                row.push_bind(ticket.id)
                    .push_bind(&ticket.code)
                    .push_bind(ticket.value.amount() as i32)
                    .push_bind(ticket.status.as_str())
                    .push_bind(ticket.batch_id)
                    .push_bind(ticket.created_at)
                    .push_bind(ticket.expires_at);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn redeem_if_unused(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = 'USED', used_at = $2
            WHERE code = $1
              AND status = 'UNUSED'
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn invalidate_if_unused(
        &self,
        code: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = 'INVALID', invalidated_at = $3, invalid_reason = $2
            WHERE code = $1
              AND status = 'UNUSED'
              AND (expires_at IS NULL OR expires_at > $3)
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn expire_overdue(&self, as_of: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET status = 'EXPIRED'
            WHERE status = 'UNUSED' AND expires_at <= $1
            "#,
        )
        .bind(as_of)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn tickets_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE created_at < $2
              AND (used_at IS NULL OR used_at >= $1)
              AND (invalidated_at IS NULL OR invalidated_at >= $1)
              AND (expires_at IS NULL OR GREATEST(expires_at, created_at) >= $1)
            ORDER BY code
            "#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        into_tickets(rows)
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<(TicketBatch, Vec<Ticket>)>, StoreError> {
        let batch = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, value, quantity, description, expires_at, created_at
            FROM ticket_batches
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(batch) = batch else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE batch_id = $1 ORDER BY code"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((TicketBatch::try_from(batch)?, into_tickets(rows)?)))
    }

    async fn list_batches(
        &self,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<BatchSummary>, StoreError> {
        let rows = sqlx::query_as::<_, BatchSummaryRow>(
            r#"
            SELECT b.id, b.value, b.quantity, b.description, b.expires_at, b.created_at,
                   COUNT(t.id) FILTER (
                       WHERE t.status = 'UNUSED' AND (t.expires_at IS NULL OR t.expires_at > $3)
                   ) AS unused,
                   COUNT(t.id) FILTER (WHERE t.status = 'USED') AS used,
                   COUNT(t.id) FILTER (
                       WHERE t.status = 'EXPIRED' OR (t.status = 'UNUSED' AND t.expires_at <= $3)
                   ) AS expired,
                   COUNT(t.id) FILTER (WHERE t.status = 'INVALID') AS invalid
            FROM ticket_batches b
            LEFT JOIN tickets t ON t.batch_id = b.id
            GROUP BY b.id
            ORDER BY b.created_at DESC, b.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit)
        .bind(page.offset)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(BatchSummary {
                    batch: TicketBatch::try_from(row.batch)?,
                    counts: StatusCounts {
                        unused: row.unused,
                        used: row.used,
                        expired: row.expired,
                        invalid: row.invalid,
                    },
                })
            })
            .collect()
    }

    async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE TRUE"));

        if let Some(status) = filter.status {
            qb.push(" AND ");
            push_effective_status(&mut qb, status, now);
        }
        if let Some(batch_id) = filter.batch_id {
            qb.push(" AND batch_id = ");
            qb.push_bind(batch_id);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset);

        let rows = qb
            .build_query_as::<TicketRow>()
            .fetch_all(&self.pool)
            .await?;

        into_tickets(rows)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
