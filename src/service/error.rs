/// Error types for the service layer
use thiserror::Error;

/// Service layer error type
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Every port in the configured range is leased or bound
    #[error("No ports available in range {start}..{end}")]
    NoPortsAvailable { start: u16, end: u16 },

    /// Port range cannot hold a single port
    #[error("Invalid port range: end ({end}) must be greater than start ({start})")]
    InvalidPortRange { start: u16, end: u16 },

    /// Clone or template rendering failed
    #[error("Workspace preparation failed: {0}")]
    WorkspacePreparationFailed(String),

    /// Container or host process could not be started
    #[error("Backend launch failed: {0}")]
    BackendLaunchFailed(String),

    /// Input sent to a terminal whose process has exited
    #[error("Terminal session has been closed")]
    TerminalClosed,

    /// Low level terminal write failure
    #[error("Terminal write failed: {0}")]
    TerminalWrite(#[source] std::io::Error),

    /// Requested path resolves outside the workspace root
    #[error("Path escapes the workspace root: {0}")]
    InvalidPathEscape(String),

    /// Directory listing requested for something that is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// File operation requested on a directory
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// No session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PTY error
    #[error("PTY error: {0}")]
    Pty(#[from] crate::pty::PtyError),

    /// Background task failed to complete
    #[error("Background task error: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServiceError::Task(e.to_string())
    }
}

/// Result alias for the service layer
pub type ServiceResult<T> = Result<T, ServiceError>;
