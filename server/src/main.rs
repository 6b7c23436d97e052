use std::process::ExitCode;
use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;

use voucher_server::config::{Config, StoreBackend};
use voucher_server::logging::init_logging;
use voucher_server::routes::create_routes;
use voucher_server::services::{CodeGenerator, DailyReporter, LifecycleManager, SystemClock};
use voucher_server::state::AppState;
use voucher_server::store::{MemoryTicketStore, PgTicketStore, TicketStore};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_format);

    let store: Arc<dyn TicketStore> = match config.store_backend {
        StoreBackend::Postgres => {
            match PgTicketStore::connect(&config.database_url, config.database_max_connections)
                .await
            {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to open ticket store");
                    return ExitCode::FAILURE;
                }
            }
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ticket store; tickets are lost on restart");
            Arc::new(MemoryTicketStore::new())
        }
    };

    let lifecycle = LifecycleManager::new(
        store.clone(),
        Arc::new(SystemClock),
        CodeGenerator::new(config.code_length),
        config.max_batch_size,
    );
    let reporter = DailyReporter::new(store.clone(), config.report_offset);
    let app = create_routes(AppState::new(lifecycle, reporter), &config);

    let listener = match TcpListener::bind(config.server_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.server_addr, "Failed to bind address");
            store.close().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        addr = %config.server_addr,
        max_batch_size = config.max_batch_size,
        report_offset = %config.report_offset,
        "Voucher server listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    store.close().await;

    match served {
        Ok(()) => {
            tracing::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
