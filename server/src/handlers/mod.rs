use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod batches;
pub mod extract;
pub mod reports;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "voucher-api",
    };

    success(payload, "Health check successful")
}

pub async fn route_not_found(uri: Uri) -> Response {
    AppError::NotFound(format!("No route for '{}'", uri.path())).into_response()
}
