/// Server implementation for rs_workspace
use std::net::SocketAddr;

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{app_state::AppState, config::ServerConfig, handlers};

/// Banner served at `/`
const BANNER: &str = "rs_workspace - workspace session portal";

/// Build the application router with routes
pub fn build_router(state: AppState) -> Router {
    // Create CORS layer to allow cross-origin requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { BANNER }))
        .route("/health", get(handlers::rest::health_check))
        // Session lifecycle
        .route(
            "/sessions",
            post(handlers::rest::create_session).get(handlers::rest::list_sessions),
        )
        .route(
            "/sessions/:session_id/status",
            get(handlers::rest::session_status),
        )
        .route(
            "/sessions/:session_id/stop",
            post(handlers::rest::stop_session),
        )
        // Workspace and terminal API
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build API routes for workspace files and terminals
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/backend", get(handlers::rest::backend_info))
        .route("/editors", get(handlers::rest::list_editors))
        .route("/sessions/:session_id/tree", get(handlers::files::get_tree))
        .route(
            "/sessions/:session_id/file",
            get(handlers::files::read_file).put(handlers::files::write_file),
        )
        .route(
            "/sessions/:session_id/terminal",
            get(handlers::terminal::poll_terminal).post(handlers::terminal::send_terminal_input),
        )
}

/// Run the HTTP server until Ctrl+C or SIGTERM
pub async fn run_server_with_graceful_shutdown(
    router: Router,
    config: &ServerConfig,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;

    info!("Server running on http://{}", addr);
    info!("Backend URLs advertised on host {}", config.access_host);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
