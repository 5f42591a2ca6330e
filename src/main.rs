use ballot_count::config::Config;
use ballot_count::db::Database;
use ballot_count::handlers;
use ballot_count::results::ResultsService;
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let database = match Database::connect(&config.database_url, config.max_connections).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let service = ResultsService::new(database, config.branding.clone())
        .with_refresh_interval(config.refresh_interval);
    let app = handlers::router(service);

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    info!(
        "Serving results on {} (dashboards refresh every {:?})",
        config.bind_addr, config.refresh_interval
    );

    if let Err(why) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
    {
        error!("Server error: {:?}", why);
    }
}
