use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::extract::{ValidatedJson, ValidatedQuery};
use crate::models::Denomination;
use crate::state::AppState;
use crate::store::Page;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

fn validate_denomination(value: i64) -> Result<(), ValidationError> {
    Denomination::try_from(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("denomination"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueBatchPayload {
    // Matches BATCH_SIZE_CEILING; the configured limit is enforced on issue.
    #[validate(range(min = 1, max = 100_000))]
    pub quantity: i64,
    #[validate(custom(function = "validate_denomination"))]
    pub value: i64,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PageQuery {
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::ValidationError(format!("'{raw}' is not a valid batch id")))
}

/// POST /api/v1/batches
pub async fn issue_batch(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<IssueBatchPayload>,
) -> Result<Response, AppError> {
    let issued = state
        .lifecycle
        .issue_batch(
            payload.quantity,
            payload.value,
            payload.description,
            payload.expires_at,
        )
        .await?;

    let message = format!("Issued {} tickets", issued.tickets.len());
    Ok(created(issued, message))
}

/// GET /api/v1/batches
pub async fn list_batches(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<PageQuery>,
) -> Result<Response, AppError> {
    let batches = state.lifecycle.list_batches(query.page()).await?;
    Ok(success(batches, "Batches retrieved"))
}

/// GET /api/v1/batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let detail = state.lifecycle.batch(parse_uuid(&id)?).await?;
    Ok(success(detail, "Batch retrieved"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_payload_schema() {
        let ok = IssueBatchPayload {
            quantity: 3,
            value: 1000,
            description: None,
            expires_at: None,
        };
        assert!(ok.validate().is_ok());

        let bad_value = IssueBatchPayload { value: 750, ..ok };
        let errors = bad_value.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("value"));

        let bad_quantity = IssueBatchPayload {
            quantity: 0,
            value: 500,
            description: None,
            expires_at: None,
        };
        let errors = bad_quantity.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("quantity"));
    }

    #[test]
    fn test_validate_denomination_takes_the_value() {
        for value in [500, 1000, 2000, 5000] {
            assert!(validate_denomination(value).is_ok());
        }
        for value in [0, -500, 750, 10_000] {
            assert!(validate_denomination(value).is_err());
        }
    }
}
