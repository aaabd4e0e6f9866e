/// Service layer for workspace sessions
/// Port leasing, backend launch, workspace preparation and the terminal
/// bridge live here; the HTTP layer only maps requests onto these types.
pub mod backend_launcher;
pub mod container_backend;
pub mod editors;
mod error;
pub mod port_allocator;
pub mod session_manager;
pub mod terminal_manager;
pub mod terminal_session;
pub mod workspace;

// Re-export public types and functions
pub use backend_launcher::{BackendLauncher, select_launcher};
pub use error::{ServiceError, ServiceResult};
pub use session_manager::SessionManager;
pub use terminal_manager::TerminalManager;
