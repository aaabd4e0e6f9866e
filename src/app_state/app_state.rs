/// Application state shared across handlers
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::service::{
    BackendLauncher, ServiceResult, SessionManager, TerminalManager, select_launcher,
};

const TERMINAL_CLOSE_GRACE: Duration = Duration::from_secs(1);
const BACKEND_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Application state containing the session and terminal registries
#[derive(Clone)]
pub struct AppState {
    /// Workspace sessions
    pub sessions: Arc<SessionManager>,
    /// Terminals, one per session at most
    pub terminals: Arc<TerminalManager>,
    /// Application configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Create application state, detecting the backend from configuration
    pub fn new(mut config: AppConfig) -> ServiceResult<Self> {
        // 容器挂载需要绝对路径
        config.workspace.root = std::path::absolute(&config.workspace.root)?;
        let launcher = select_launcher(&config);
        let terminals = TerminalManager::new(config.container.clone(), config.terminal.clone());
        let state = Self::with_parts(config, launcher, terminals)?;
        state.spawn_backend_watch(BACKEND_WATCH_INTERVAL);
        Ok(state)
    }

    pub fn with_parts(
        config: AppConfig,
        launcher: Arc<dyn BackendLauncher>,
        terminals: TerminalManager,
    ) -> ServiceResult<Self> {
        info!(
            root = ?config.workspace.root,
            ports = ?(config.ports.start..config.ports.end),
            launcher = %launcher.describe(),
            "Initialising application state"
        );
        Ok(Self {
            sessions: Arc::new(SessionManager::new(&config, launcher)?),
            terminals: Arc::new(terminals),
            config: Arc::new(config),
        })
    }

    /// Stop a session and close its terminal
    pub async fn stop_session(&self, session_id: &str) {
        self.sessions.stop(session_id).await;
        let terminal = self.terminals.get(session_id).await;
        self.terminals.close(session_id).await;
        if let Some(terminal) = terminal {
            if timeout(TERMINAL_CLOSE_GRACE, terminal.wait_closed()).await.is_err() {
                warn!(session_id = %session_id, "Terminal did not close in time");
            }
        }
    }

    /// Periodically stop sessions whose backend exited and close their
    /// terminals. Ends once the state is dropped.
    pub fn spawn_backend_watch(&self, every: Duration) -> JoinHandle<()> {
        let sessions = Arc::downgrade(&self.sessions);
        let terminals = Arc::downgrade(&self.terminals);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (Some(sessions), Some(terminals)) = (sessions.upgrade(), terminals.upgrade())
                else {
                    debug!("Application state dropped, backend watch exiting");
                    return;
                };
                for session_id in sessions.reap_exited_backends().await {
                    terminals.close(&session_id).await;
                }
            }
        })
    }

    /// Kill every terminal and stop every session
    pub async fn shutdown(&self) {
        info!("Shutting down application state");
        self.terminals.shutdown().await;
        self.sessions.shutdown().await;
    }
}
