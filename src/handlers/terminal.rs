/// Offset-polled terminal endpoints
use axum::extract::{Json, Path, Query, State};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::{
    api::{
        ApiError,
        dto::{StatusResponse, TerminalInputRequest, TerminalPollQuery, TerminalPollResponse},
    },
    app_state::AppState,
    handlers::terminal_workspace,
};

/// Output produced since `offset`, creating the terminal on first access
pub async fn poll_terminal(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TerminalPollQuery>,
) -> Result<Json<TerminalPollResponse>, ApiError> {
    let workspace_dir = terminal_workspace(&state, &session_id).await?;
    let terminal = state.terminals.ensure(&session_id, &workspace_dir).await?;

    let output = terminal.read(query.offset());
    Ok(Json(TerminalPollResponse {
        offset: output.offset,
        output: String::from_utf8_lossy(&output.data).into_owned(),
        closed: output.closed,
    }))
}

/// Forward base64 encoded input to the terminal
pub async fn send_terminal_input(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<TerminalInputRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let data = STANDARD.decode(req.data.trim()).map_err(|e| {
        debug!(session_id = %session_id, error = %e, "Rejected terminal input");
        ApiError::bad_request(format!("Invalid base64 input: {}", e))
    })?;

    let workspace_dir = terminal_workspace(&state, &session_id).await?;
    let terminal = state.terminals.ensure(&session_id, &workspace_dir).await?;
    terminal.write(&data).map_err(|e| {
        warn!(session_id = %session_id, error = %e, "Terminal input rejected");
        ApiError::from(e)
    })?;

    Ok(Json(StatusResponse::ok()))
}
