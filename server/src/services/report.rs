//! Daily reconciliation.
//!
//! A report is a pure function of the ticket rows and the calendar day, so
//! generating it twice over the same rows gives the same result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use super::error::TicketError;
use crate::models::{DailyReport, Denomination, DenominationCount, DenominationSubtotal, Ticket};
use crate::store::{touches_window, TicketStore};

/// Longest span `generate_range` accepts, in days.
pub const MAX_RANGE_DAYS: i64 = 93;

/// Where a ticket lands in the report for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Sold,
    Remaining,
    Invalid,
}

fn classify(ticket: &Ticket, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Bucket> {
    if ticket.created_at >= end {
        return None;
    }
    let on_day = |at: DateTime<Utc>| at >= start && at < end;

    // Terminal transitions after the day closed leave the ticket live at day end.
    if let Some(used_at) = ticket.used_at {
        return match used_at {
            at if on_day(at) => Some(Bucket::Sold),
            at if at >= end => Some(Bucket::Remaining),
            _ => None,
        };
    }
    if let Some(invalidated_at) = ticket.invalidated_at {
        return match invalidated_at {
            at if on_day(at) => Some(Bucket::Invalid),
            at if at >= end => Some(Bucket::Remaining),
            _ => None,
        };
    }
    match ticket.expired_at() {
        Some(at) if on_day(at) => Some(Bucket::Invalid),
        Some(at) if at < start => None,
        _ => Some(Bucket::Remaining),
    }
}

/// Partition `tickets` for the day `[start, end)`.
pub fn build_report(
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tickets: &[Ticket],
) -> DailyReport {
    let mut sold: BTreeMap<Denomination, i64> = BTreeMap::new();
    let mut remaining: BTreeMap<Denomination, i64> = BTreeMap::new();
    let mut invalid: BTreeMap<Denomination, i64> = BTreeMap::new();

    for ticket in tickets {
        let bucket = match classify(ticket, start, end) {
            Some(Bucket::Sold) => &mut sold,
            Some(Bucket::Remaining) => &mut remaining,
            Some(Bucket::Invalid) => &mut invalid,
            None => continue,
        };
        *bucket.entry(ticket.value).or_default() += 1;
    }

    let tickets_sold: Vec<DenominationSubtotal> = sold
        .into_iter()
        .map(|(value, quantity)| DenominationSubtotal {
            value,
            quantity,
            total: value.amount() * quantity,
        })
        .collect();
    let counts = |map: BTreeMap<Denomination, i64>| -> Vec<DenominationCount> {
        map.into_iter()
            .map(|(value, quantity)| DenominationCount { value, quantity })
            .collect()
    };

    DailyReport {
        date,
        total_revenue: tickets_sold.iter().map(|s| s.total).sum(),
        tickets_sold,
        remaining_tickets: counts(remaining),
        invalid_tickets: counts(invalid),
    }
}

/// Read-only reporter over the ticket store.
pub struct DailyReporter {
    store: Arc<dyn TicketStore>,
    offset: FixedOffset,
}

impl DailyReporter {
    /// `offset` is the business timezone calendar days are cut in.
    pub fn new(store: Arc<dyn TicketStore>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// UTC bounds of `date` in the business timezone, end exclusive.
    ///
    /// Dates whose window falls outside chrono's representable range are
    /// rejected rather than wrapped.
    pub fn day_window(
        &self,
        date: NaiveDate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), TicketError> {
        let offset = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        let start = date
            .and_time(NaiveTime::MIN)
            .checked_sub_signed(offset)
            .map(|naive| Utc.from_utc_datetime(&naive));
        let window = start.and_then(|start| {
            start
                .checked_add_signed(Duration::days(1))
                .map(|end| (start, end))
        });
        window.ok_or_else(|| {
            TicketError::Validation(format!("{date} is out of the reportable range"))
        })
    }

    pub async fn generate(&self, date: NaiveDate) -> Result<DailyReport, TicketError> {
        let (start, end) = self.day_window(date)?;
        let tickets = self.store.tickets_for_window(start, end).await?;
        tracing::debug!(%date, tickets = tickets.len(), "Generating daily report");
        Ok(build_report(date, start, end, &tickets))
    }

    /// One report per day from `from` to `to`, both inclusive.
    pub async fn generate_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyReport>, TicketError> {
        if to < from {
            return Err(TicketError::Validation(
                "Range end must not be before its start".to_string(),
            ));
        }
        let days = (to - from).num_days() + 1;
        if days > MAX_RANGE_DAYS {
            return Err(TicketError::Validation(format!(
                "Range may span at most {MAX_RANGE_DAYS} days"
            )));
        }

        let windows = (0..days)
            .map(|i| {
                // Bounded by `to`, so this never leaves the calendar.
                let date = from + Duration::days(i);
                self.day_window(date).map(|window| (date, window))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let (range_start, range_end) = match (windows.first(), windows.last()) {
            (Some((_, (start, _))), Some((_, (_, end)))) => (*start, *end),
            _ => return Ok(Vec::new()),
        };
        let tickets = self.store.tickets_for_window(range_start, range_end).await?;

        let reports = windows
            .into_iter()
            .map(|(date, (start, end))| {
                let relevant: Vec<Ticket> = tickets
                    .iter()
                    .filter(|t| touches_window(t, start, end))
                    .cloned()
                    .collect();
                build_report(date, start, end, &relevant)
            })
            .collect();
        Ok(reports)
    }
}
