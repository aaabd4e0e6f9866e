/// Main entry point for rs_workspace
// Import modules
mod api;
mod app_state;
mod config;
mod handlers;
mod pty;
mod server;
mod service;

// Use public API from modules
use app_state::AppState;
use config::{ConfigLoader, init_logging};
use server::{build_router, run_server_with_graceful_shutdown};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load configuration
    let config_loader = ConfigLoader::new();
    let config = match config_loader.load_config(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            std::process::exit(1);
        }
    };

    // Create application state with configuration
    let app_state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialise application state: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        terminal_backend = %app_state.terminals.describe_default_backend(),
        "Application state ready"
    );

    // Build router and run server
    let app = build_router(app_state.clone());
    if let Err(e) = run_server_with_graceful_shutdown(app, &app_state.config.server).await {
        error!("Server error: {}", e);
    }

    app_state.shutdown().await;
}
