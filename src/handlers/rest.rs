/// REST API handlers for workspace session management
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};

use crate::{
    api::{
        ApiError,
        dto::{
            BackendResponse, CreateSessionRequest, SessionResponse, StatusResponse,
            SuccessResponse,
        },
    },
    app_state::{AppState, SessionStatus},
    service::editors::detect_editor_options,
};

/// Create a new workspace session and launch it in the background
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        repo_url = ?req.repo_url,
        project_name = ?req.project_name,
        "Creating new workspace session"
    );

    let session = state.sessions.create(req.repo_url, req.project_name).await?;

    // 准备工作区和启动后端放到独立任务中
    let sessions = state.sessions.clone();
    let session_id = session.id.clone();
    tokio::spawn(async move {
        match sessions.launch(&session_id).await {
            Ok(session) if session.status == SessionStatus::Error => {
                error!(
                    session_id = %session_id,
                    error = ?session.error_message,
                    "Session launch ended in error"
                );
            }
            Ok(_) => {}
            Err(e) => error!(session_id = %session_id, error = %e, "Session launch failed"),
        }
    });

    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// Get all workspace sessions, newest first
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionResponse> = state
        .sessions
        .list()
        .await
        .into_iter()
        .map(SessionResponse::from)
        .collect();

    (StatusCode::OK, Json(sessions))
}

/// Get one workspace session
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    state
        .sessions
        .get(&session_id)
        .await
        .map(|session| Json(SessionResponse::from(session)))
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", session_id)))
}

/// Stop a workspace session; unknown ids are acknowledged as well
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!(session_id = %session_id, "Stopping workspace session");
    state.stop_session(&session_id).await;
    (StatusCode::OK, Json(StatusResponse::ok()))
}

/// Report what new terminals run on
pub async fn backend_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(BackendResponse {
        backend: state.terminals.describe_default_backend(),
    })
}

/// Local editors that could open a workspace on this host
pub async fn list_editors() -> impl IntoResponse {
    Json(detect_editor_options())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(SuccessResponse {
            success: true,
            message: "Health check passed".to_string(),
        }),
    )
}
