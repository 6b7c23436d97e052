use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ticket::Denomination;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationSubtotal {
    pub value: Denomination,
    pub quantity: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub value: Denomination,
    pub quantity: i64,
}

/// End-of-day reconciliation, always derived from ticket records.
///
/// Buckets list only denominations with a non-zero count, ascending by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_revenue: i64,
    pub tickets_sold: Vec<DenominationSubtotal>,
    pub remaining_tickets: Vec<DenominationCount>,
    pub invalid_tickets: Vec<DenominationCount>,
}
