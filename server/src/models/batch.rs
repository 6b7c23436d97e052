use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::{Denomination, Ticket, TicketStatus};

/// A group of tickets issued together at one denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBatch {
    pub id: Uuid,
    pub value: Denomination,
    pub quantity: i32,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for issuing a batch, already range-checked by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub quantity: i32,
    pub value: Denomination,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-status member counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub unused: i64,
    pub used: i64,
    pub expired: i64,
    pub invalid: i64,
}

impl StatusCounts {
    pub fn record(&mut self, status: TicketStatus) {
        match status {
            TicketStatus::Unused => self.unused += 1,
            TicketStatus::Used => self.used += 1,
            TicketStatus::Expired => self.expired += 1,
            TicketStatus::Invalid => self.invalid += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.unused + self.used + self.expired + self.invalid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: TicketBatch,
    pub counts: StatusCounts,
}

impl BatchSummary {
    /// Counts are taken from the effective status at `now`, so unswept
    /// overdue tickets already show as expired.
    pub fn from_members(batch: TicketBatch, members: &[Ticket], now: DateTime<Utc>) -> Self {
        let mut counts = StatusCounts::default();
        for ticket in members {
            counts.record(ticket.effective_status(now));
        }
        Self { batch, counts }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub tickets: Vec<Ticket>,
}

/// A freshly issued batch together with every ticket it created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedBatch {
    #[serde(flatten)]
    pub batch: TicketBatch,
    pub tickets: Vec<Ticket>,
}
