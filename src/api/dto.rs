/// Data Transfer Objects (DTOs) for REST API endpoints
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::{Session, SessionStatus};
use crate::service::workspace::{DirectoryEntry, DirectoryListing, EntryKind, FileContent};

/// Request DTO for creating a new workspace session
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CreateSessionRequest {
    /// Optional Git repository to clone into the workspace
    pub repo_url: Option<String>,

    /// Optional human readable project name
    pub project_name: Option<String>,
}

/// Response DTO for a workspace session; never carries the access secret
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    pub project_name: String,
    pub repo_url: Option<String>,
    pub workspace_dir: String,
    pub port: Option<u16>,
    pub status: SessionStatus,
    pub backend: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub access_url: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            project_name: session.project_name,
            repo_url: session.repo_url,
            workspace_dir: session.workspace_dir.to_string_lossy().into_owned(),
            port: session.port,
            status: session.status,
            backend: session.backend,
            created_at: session.created_at,
            updated_at: session.updated_at,
            error_message: session.error_message,
            access_url: session.access_url,
        }
    }
}

/// Default terminal backend description
#[derive(Debug, Serialize, Deserialize)]
pub struct BackendResponse {
    pub backend: String,
}

/// Query of a terminal poll; anything that is not an integer reads as 0
#[derive(Debug, Default, Deserialize)]
pub struct TerminalPollQuery {
    pub offset: Option<String>,
}

impl TerminalPollQuery {
    pub fn offset(&self) -> i64 {
        self.offset
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Response DTO for a terminal poll
#[derive(Debug, Serialize, Deserialize)]
pub struct TerminalPollResponse {
    /// Offset to send with the next poll
    pub offset: usize,

    /// Output since the requested offset, decoded lossily as UTF-8
    pub output: String,

    pub closed: bool,
}

/// Request DTO for terminal input
#[derive(Debug, Deserialize, Serialize)]
pub struct TerminalInputRequest {
    /// Base64 encoded raw bytes
    #[serde(default)]
    pub data: String,
}

/// `?path=` query of the file endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TreeEntryResponse {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<DirectoryEntry> for TreeEntryResponse {
    fn from(entry: DirectoryEntry) -> Self {
        let kind = match entry.kind {
            EntryKind::Dir => "dir",
            EntryKind::File => "file",
        };
        Self {
            name: entry.name,
            path: entry.path,
            kind: kind.to_string(),
        }
    }
}

/// Response DTO for a directory listing
#[derive(Debug, Serialize, Deserialize)]
pub struct TreeResponse {
    pub path: String,
    pub parent: Option<String>,
    pub entries: Vec<TreeEntryResponse>,
}

impl From<DirectoryListing> for TreeResponse {
    fn from(listing: DirectoryListing) -> Self {
        Self {
            path: listing.path,
            parent: listing.parent,
            entries: listing.entries.into_iter().map(Into::into).collect(),
        }
    }
}

/// Response DTO for a file read
#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub path: String,
    pub content: String,
    pub encoding: String,
}

impl From<FileContent> for FileResponse {
    fn from(file: FileContent) -> Self {
        Self {
            path: file.path,
            content: file.content,
            encoding: "utf-8".to_string(),
        }
    }
}

/// Request DTO for a file write
#[derive(Debug, Deserialize, Serialize)]
pub struct WriteFileRequest {
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub content: String,
}

/// `{"status": "ok"}` acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Generic success response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    /// Success flag
    pub success: bool,

    /// Response message
    pub message: String,
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag
    pub error: bool,

    /// Error message
    pub message: String,

    /// Optional error code
    pub code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_poll_offset_parsing() {
        let parse = |raw: Option<&str>| {
            TerminalPollQuery {
                offset: raw.map(str::to_string),
            }
            .offset()
        };
        assert_eq!(parse(None), 0);
        assert_eq!(parse(Some("17")), 17);
        assert_eq!(parse(Some(" 5 ")), 5);
        assert_eq!(parse(Some("-3")), -3);
        assert_eq!(parse(Some("abc")), 0);
        assert_eq!(parse(Some("")), 0);
    }

    #[test]
    fn test_session_response_hides_secret() {
        let session = Session::new(
            "ab12cd34".to_string(),
            "demo".to_string(),
            None,
            PathBuf::from("/srv/session/x"),
            20001,
            "super-secret-value".to_string(),
            "portal-vscode-demo-ab12cd34".to_string(),
            Utc::now(),
        );
        let json = serde_json::to_value(SessionResponse::from(session)).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["port"], 20001);
        assert_eq!(json["workspace_dir"], "/srv/session/x");
        assert!(!json.to_string().contains("super-secret-value"));
        assert!(json.get("secret").is_none());
    }

    #[test]
    fn test_tree_entry_type_field() {
        let entry = TreeEntryResponse::from(DirectoryEntry {
            name: "src".to_string(),
            path: "src".to_string(),
            kind: EntryKind::Dir,
        });
        let json = serde_json::to_value(entry).unwrap();
        assert_eq!(json["type"], "dir");
    }
}
