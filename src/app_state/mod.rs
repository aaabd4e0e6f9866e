/// Application state management for rs_workspace
mod app_state;
mod session;

pub use app_state::AppState;
pub use session::{Session, SessionStatus};
