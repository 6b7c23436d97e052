use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::extract::{ValidatedJson, ValidatedQuery};
use crate::models::TicketStatus;
use crate::state::AppState;
use crate::store::{Page, TicketFilter};
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize, Validate)]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
    pub batch_id: Option<Uuid>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvalidatePayload {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExpireQuery {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ExpireOutcome {
    as_of: DateTime<Utc>,
    expired: u64,
}

/// GET /api/v1/tickets
pub async fn list_tickets(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<TicketListQuery>,
) -> Result<Response, AppError> {
    let filter = TicketFilter {
        status: query.status,
        batch_id: query.batch_id,
    };
    let tickets = state
        .lifecycle
        .list_tickets(&filter, Page::new(query.limit, query.offset))
        .await?;
    Ok(success(tickets, "Tickets retrieved"))
}

/// GET /api/v1/tickets/:code
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let ticket = state.lifecycle.ticket(&code).await?;
    Ok(success(ticket, "Ticket retrieved"))
}

/// POST /api/v1/tickets/:code/redeem
pub async fn redeem_ticket(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let ticket = state.lifecycle.redeem(&code).await?;
    Ok(success(ticket, "Ticket redeemed"))
}

/// POST /api/v1/tickets/:code/invalidate
pub async fn invalidate_ticket(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ValidatedJson(payload): ValidatedJson<InvalidatePayload>,
) -> Result<Response, AppError> {
    let ticket = state.lifecycle.invalidate(&code, &payload.reason).await?;
    Ok(success(ticket, "Ticket invalidated"))
}

/// POST /api/v1/tickets/expire
pub async fn expire_overdue(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ExpireQuery>,
) -> Result<Response, AppError> {
    let as_of = query.as_of.unwrap_or_else(|| state.lifecycle.now());
    let expired = state.lifecycle.expire_overdue(as_of).await?;
    Ok(success(
        ExpireOutcome { as_of, expired },
        "Overdue tickets expired",
    ))
}
