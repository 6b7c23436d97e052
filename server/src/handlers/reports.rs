use axum::extract::{Path, State};
use axum::response::Response;
use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use super::extract::ValidatedQuery;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize, Validate)]
pub struct ReportRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::ValidationError(format!("'{raw}' is not a YYYY-MM-DD date")))
}

/// GET /api/v1/reports/daily/:date
pub async fn daily_report(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, AppError> {
    let report = state.reporter.generate(parse_date(&date)?).await?;
    Ok(success(report, "Daily report generated"))
}

/// GET /api/v1/reports/daily?from=YYYY-MM-DD&to=YYYY-MM-DD
pub async fn daily_report_range(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ReportRangeQuery>,
) -> Result<Response, AppError> {
    let reports = state.reporter.generate_range(query.from, query.to).await?;
    Ok(success(reports, "Daily reports generated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-05-01").unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert!(parse_date("01/05/2024").is_err());
        assert!(parse_date("2024-02-30").is_err());
    }
}
