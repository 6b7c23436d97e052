use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::FixedOffset;
use thiserror::Error;

use crate::services::code::{is_valid_code_length, DEFAULT_CODE_LENGTH};
use crate::services::lifecycle::{BATCH_SIZE_CEILING, DEFAULT_MAX_BATCH_SIZE};

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::security_headers;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/vouchers";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub max_batch_size: i32,
    pub code_length: usize,
    pub report_offset: FixedOffset,
    pub log_format: LogFormat,
    pub cors_allowed_origins: Vec<String>,
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_batch_size: i32 = parse_or(&lookup, "MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?;
        if !(1..=BATCH_SIZE_CEILING).contains(&max_batch_size) {
            return Err(ConfigError::Invalid {
                key: "MAX_BATCH_SIZE",
                reason: format!("must be between 1 and {BATCH_SIZE_CEILING}"),
            });
        }

        let code_length: usize = parse_or(&lookup, "TICKET_CODE_LENGTH", DEFAULT_CODE_LENGTH)?;
        if !is_valid_code_length(code_length) {
            return Err(ConfigError::Invalid {
                key: "TICKET_CODE_LENGTH",
                reason: "must be a multiple of 4 between 8 and 32".to_string(),
            });
        }

        let offset_minutes: i32 = parse_or(&lookup, "REPORT_UTC_OFFSET_MINUTES", 0)?;
        let report_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "REPORT_UTC_OFFSET_MINUTES",
                reason: "must be within +/- 24 hours".to_string(),
            })?;

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| {
                cors::DEFAULT_ALLOWED_ORIGINS
                    .iter()
                    .map(|o| o.to_string())
                    .collect()
            });

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            server_addr: parse_or(&lookup, "SERVER_ADDR", SocketAddr::from(([0, 0, 0, 0], 3001)))?,
            store_backend: parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?,
            max_batch_size,
            code_length,
            report_offset,
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Text)?,
            cors_allowed_origins,
            production: lookup("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
