use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, security_headers, Config};
use crate::handlers::{batches, health_check, reports, route_not_found, tickets};
use crate::state::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/batches",
            post(batches::issue_batch).get(batches::list_batches),
        )
        .route("/batches/:id", get(batches::get_batch))
        .route("/tickets", get(tickets::list_tickets))
        .route("/tickets/expire", post(tickets::expire_overdue))
        .route("/tickets/:code", get(tickets::get_ticket))
        .route("/tickets/:code/redeem", post(tickets::redeem_ticket))
        .route("/tickets/:code/invalidate", post(tickets::invalidate_ticket))
        .route("/reports/daily", get(reports::daily_report_range))
        .route("/reports/daily/:date", get(reports::daily_report))
}

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .fallback(route_not_found)
        .with_state(state);

    for layer in security_headers(config.production) {
        router = router.layer(layer);
    }

    router
        .layer(create_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}
