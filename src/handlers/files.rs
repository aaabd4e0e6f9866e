/// Workspace file browsing and editing endpoints
use axum::extract::{Json, Path, Query, State};
use tracing::info;

use crate::{
    api::{
        ApiError,
        dto::{FileResponse, PathQuery, StatusResponse, TreeResponse, WriteFileRequest},
    },
    app_state::AppState,
    handlers::session_workspace,
    service::workspace,
};

/// List one directory of the workspace
pub async fn get_tree(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<TreeResponse>, ApiError> {
    let root = session_workspace(&state, &session_id).await?;
    let listing = workspace::list_directory(&root, &query.path).await?;
    Ok(Json(TreeResponse::from(listing)))
}

pub async fn read_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileResponse>, ApiError> {
    let root = session_workspace(&state, &session_id).await?;
    let file = workspace::read_file(&root, &query.path).await?;
    Ok(Json(FileResponse::from(file)))
}

pub async fn write_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<WriteFileRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let root = session_workspace(&state, &session_id).await?;
    workspace::write_file(&root, &req.path, &req.content).await?;
    info!(session_id = %session_id, path = %req.path, "Saved workspace file");
    Ok(Json(StatusResponse::ok()))
}
