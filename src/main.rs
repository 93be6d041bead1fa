//! Reglements API - Main entry point.

use reglements_api::api::AppState;
use reglements_api::auth::ApiKey;
use reglements_api::config::Config;
use reglements_api::db::{Database, DialectAdapter};
use reglements_api::models::BackendDescriptor;
use reglements_api::server::HttpServer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!(
        environment = %config.environment(),
        "Starting Reglements API v{}",
        env!("CARGO_PKG_VERSION")
    );

    let descriptor = BackendDescriptor::parse(&config.database_url)?;
    info!(
        db_type = %descriptor.db_type,
        database = ?descriptor.database,
        "Using {} database",
        descriptor.db_type.display_name()
    );

    let adapter = DialectAdapter::new(config.returning_key_column.clone());
    let db = match Database::connect(&descriptor, adapter, config.environment()).await {
        Ok(db) => db,
        Err(e) => {
            error!(
                error = %e,
                suggestion = e.suggestion().unwrap_or_default(),
                "Database connection failed"
            );
            return Err(e.into());
        }
    };
    let api_key = ApiKey::new(&config.api_key)?;

    let server = HttpServer::new(
        AppState::new(db, config.environment()),
        api_key,
        config.http_bind_addr(),
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
