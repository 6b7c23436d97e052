//! Voucher issuance, redemption and daily reconciliation service.

pub mod config;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
