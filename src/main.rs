//! This file defines the sigplot-data-service binary entry point.

use sigplot_data_service::app;
use sigplot_data_service::cli;
use sigplot_data_service::metrics;
use sigplot_data_service::server;
use sigplot_data_service::tracing;

use std::process::exit;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    ::tracing::info!("{:?}", args);
    metrics::register_metrics();
    let state = match app::init(&args) {
        Ok(state) => state,
        Err(err) => {
            ::tracing::error!("Failed to initialise: {}", err);
            exit(1)
        }
    };
    let service = app::service(state);
    server::serve(&args, service).await;
}
