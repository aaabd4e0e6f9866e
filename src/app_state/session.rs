/// Workspace session record
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workspace session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, port reserved, nothing on disk yet
    Pending,
    /// Workspace preparation or backend start in progress
    Launching,
    /// Backend started
    Running,
    /// Launch failed and was rolled back
    Error,
    /// Stopped by request or at shutdown; final
    Stopped,
}

impl SessionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Launching)
                | (Launching, Running)
                | (Launching, Error)
                | (Pending | Launching | Running | Error, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Launching => "launching",
            SessionStatus::Running => "running",
            SessionStatus::Error => "error",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workspace session structure.
///
/// Not serialisable on purpose: `secret` must never leave the process, the
/// HTTP layer maps sessions onto its own response type.
#[derive(Debug, Clone)]
pub struct Session {
    /// 8 hex character session ID
    pub id: String,

    pub project_name: String,

    pub repo_url: Option<String>,

    /// Absolute workspace directory
    pub workspace_dir: PathBuf,

    /// Leased port; `None` once released
    pub port: Option<u16>,

    /// Password handed to the backend service
    pub secret: String,

    /// Container or process name of the backend
    pub backend_name: String,

    pub status: SessionStatus,

    /// Human readable description of what serves this session
    pub backend: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub error_message: Option<String>,

    pub access_url: Option<String>,
}

impl Session {
    /// Create a new pending session
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        project_name: String,
        repo_url: Option<String>,
        workspace_dir: PathBuf,
        port: u16,
        secret: String,
        backend_name: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_name,
            repo_url,
            workspace_dir,
            port: Some(port),
            secret,
            backend_name,
            status: SessionStatus::Pending,
            backend: None,
            created_at,
            updated_at: created_at,
            error_message: None,
            access_url: None,
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn set_status(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}
