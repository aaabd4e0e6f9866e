/// HTTP handlers
pub mod files;
pub mod rest;
pub mod terminal;

use std::path::PathBuf;

use crate::api::ApiError;
use crate::app_state::{AppState, SessionStatus};

/// Workspace directory of a session that exists on disk.
///
/// 404 for unknown sessions, 409 while the directory has not been prepared.
pub(crate) async fn session_workspace(
    state: &AppState,
    session_id: &str,
) -> Result<PathBuf, ApiError> {
    let session = state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Session not found: {}", session_id)))?;

    let exists = tokio::fs::metadata(&session.workspace_dir)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !exists {
        return Err(ApiError::conflict(format!(
            "Workspace for session {} is not ready",
            session_id
        )));
    }
    Ok(session.workspace_dir)
}

/// Like `session_workspace`, but a stopped session gets 409 so its terminal
/// is not brought back
pub(crate) async fn terminal_workspace(
    state: &AppState,
    session_id: &str,
) -> Result<PathBuf, ApiError> {
    let workspace_dir = session_workspace(state, session_id).await?;
    let stopped = state
        .sessions
        .get(session_id)
        .await
        .is_none_or(|session| session.status == SessionStatus::Stopped);
    if stopped {
        return Err(ApiError::conflict(format!(
            "Session {} is stopped",
            session_id
        )));
    }
    Ok(workspace_dir)
}
