use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};
use validator::ValidationErrors;

use crate::services::TicketError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid request payload")]
    InvalidPayload(#[from] ValidationErrors),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Ticket(#[from] TicketError),
}

impl AppError {
    /// Schema failures on the denomination or quantity field are reported
    /// with the same code the lifecycle manager would use.
    fn payload_field(errors: &ValidationErrors) -> Option<&'static str> {
        let fields = errors.field_errors();
        if fields.contains_key("value") {
            Some("value")
        } else if fields.contains_key("quantity") {
            Some("quantity")
        } else {
            None
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidPayload(errors) => match Self::payload_field(errors) {
                Some(_) => StatusCode::UNPROCESSABLE_ENTITY,
                None => StatusCode::BAD_REQUEST,
            },
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Ticket(e) => match e {
                TicketError::InvalidDenomination(_) | TicketError::InvalidQuantity { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                TicketError::NotFound | TicketError::BatchNotFound => StatusCode::NOT_FOUND,
                TicketError::AlreadyRedeemed | TicketError::Invalid => StatusCode::CONFLICT,
                TicketError::Expired => StatusCode::GONE,
                TicketError::StorageConflict => StatusCode::SERVICE_UNAVAILABLE,
                TicketError::Validation(_) => StatusCode::BAD_REQUEST,
                TicketError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::InvalidPayload(errors) => match Self::payload_field(errors) {
                Some("value") => "INVALID_DENOMINATION",
                Some(_) => "INVALID_QUANTITY",
                None => "VALIDATION_ERROR",
            },
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Ticket(e) => match e {
                TicketError::InvalidDenomination(_) => "INVALID_DENOMINATION",
                TicketError::InvalidQuantity { .. } => "INVALID_QUANTITY",
                TicketError::NotFound => "TICKET_NOT_FOUND",
                TicketError::BatchNotFound => "BATCH_NOT_FOUND",
                TicketError::AlreadyRedeemed => "TICKET_ALREADY_REDEEMED",
                TicketError::Expired => "TICKET_EXPIRED",
                TicketError::Invalid => "TICKET_INVALID",
                TicketError::StorageConflict => "STORAGE_CONFLICT",
                TicketError::Validation(_) => "VALIDATION_ERROR",
                TicketError::Storage(_) => "STORAGE_ERROR",
            },
        }
    }

    fn log(&self) {
        match self {
            AppError::Ticket(TicketError::Storage(e)) => {
                error!(error = ?e, "Storage error");
            }
            other if other.status_code().is_server_error() => {
                error!(error = ?other, code = other.code(), "Application error");
            }
            other => {
                warn!(error = %other, code = other.code(), "Request rejected");
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::InvalidPayload(_) => match self.code() {
                "INVALID_DENOMINATION" => {
                    "Value must be one of 500, 1000, 2000 or 5000".to_string()
                }
                "INVALID_QUANTITY" => "Quantity is out of range".to_string(),
                _ => "The request payload is invalid".to_string(),
            },
            AppError::ValidationError(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Ticket(TicketError::Storage(_)) => "A storage error occurred".to_string(),
            AppError::Ticket(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Field-level schema errors are safe to return; storage details never are.
        let details = match &self {
            AppError::InvalidPayload(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        };

        error_response(code, self.public_message(), details, status)
    }
}
