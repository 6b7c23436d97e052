use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary value a ticket can carry. Only these four tiers exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Denomination {
    V500,
    V1000,
    V2000,
    V5000,
}

impl Denomination {
    /// All denominations in ascending order of value
    pub const ALL: [Denomination; 4] = [
        Denomination::V500,
        Denomination::V1000,
        Denomination::V2000,
        Denomination::V5000,
    ];

    pub fn amount(&self) -> i64 {
        match self {
            Denomination::V500 => 500,
            Denomination::V1000 => 1000,
            Denomination::V2000 => 2000,
            Denomination::V5000 => 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDenomination(pub i64);

impl fmt::Display for UnknownDenomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not a ticket denomination (expected 500, 1000, 2000 or 5000)",
            self.0
        )
    }
}

impl TryFrom<i64> for Denomination {
    type Error = UnknownDenomination;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Denomination::ALL
            .into_iter()
            .find(|d| d.amount() == value)
            .ok_or(UnknownDenomination(value))
    }
}

impl From<Denomination> for i64 {
    fn from(value: Denomination) -> Self {
        value.amount()
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.amount())
    }
}

/// Stored lifecycle state of a ticket.
///
/// `Unused` is the only non-terminal state. Every other state is reached
/// from `Unused` exactly once and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Unused,
    Used,
    Expired,
    Invalid,
}

impl TicketStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TicketStatus::Unused)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (
                TicketStatus::Unused,
                TicketStatus::Used | TicketStatus::Expired | TicketStatus::Invalid
            )
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Unused => "UNUSED",
            TicketStatus::Used => "USED",
            TicketStatus::Expired => "EXPIRED",
            TicketStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNUSED" => Ok(TicketStatus::Unused),
            "USED" => Ok(TicketStatus::Used),
            "EXPIRED" => Ok(TicketStatus::Expired),
            "INVALID" => Ok(TicketStatus::Invalid),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub code: String,
    pub value: Denomination,
    pub status: TicketStatus,
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub invalid_reason: Option<String>,
}

impl Ticket {
    pub fn new_unused(
        code: String,
        value: Denomination,
        batch_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            value,
            status: TicketStatus::Unused,
            batch_id,
            created_at,
            used_at: None,
            expires_at,
            invalidated_at: None,
            invalid_reason: None,
        }
    }

    /// Whether `expires_at` has been reached at `now`.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Status as observed at `now`: an unused ticket past its expiry is
    /// already expired, even if the stored row has not been swept yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> TicketStatus {
        if self.status == TicketStatus::Unused && self.is_past_expiry(now) {
            TicketStatus::Expired
        } else {
            self.status
        }
    }

    /// Instant the ticket became logically expired. A ticket issued with an
    /// expiry already in the past is expired from the moment it was created.
    pub fn expired_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.map(|at| at.max(self.created_at))
    }
}
