/// Session manager owning the workspace session registry and lifecycle
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use futures_util::future::join_all;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_state::{Session, SessionStatus};
use crate::config::AppConfig;
use crate::service::backend_launcher::{BackendLauncher, LaunchOutcome, LaunchSpec};
use crate::service::port_allocator::PortAllocator;
use crate::service::workspace::{apply_template, folder_name, prepare_workspace, slugify};
use crate::service::{ServiceError, ServiceResult};

/// Random bytes in an access secret
const SECRET_BYTES: usize = 16;

/// Session manager responsible for creating, launching and stopping sessions
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    ports: PortAllocator,
    launcher: Arc<dyn BackendLauncher>,
    workspace_root: PathBuf,
    template: Option<PathBuf>,
}

/// What `launch` needs from the record, captured while moving to `Launching`
struct LaunchPlan {
    spec: LaunchSpec,
    repo_url: Option<String>,
    project_name: String,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(config: &AppConfig, launcher: Arc<dyn BackendLauncher>) -> ServiceResult<Self> {
        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            ports: PortAllocator::new(config.ports.start, config.ports.end)?,
            launcher,
            workspace_root: config.workspace.root.clone(),
            template: config.workspace.template.clone(),
        })
    }

    /// Register a new pending session and reserve its port.
    ///
    /// Touches neither the filesystem nor the network.
    pub async fn create(
        &self,
        repo_url: Option<String>,
        project_name: Option<String>,
    ) -> ServiceResult<Session> {
        let project_name = project_name.unwrap_or_default().trim().to_string();
        let repo_url = repo_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let id = self.unused_session_id().await;
        let port = self.ports.acquire(&id).await?;
        let created_at = Utc::now();
        let workspace_dir = self
            .workspace_root
            .join(folder_name(created_at, &project_name, &id));
        let backend_name = format!(
            "portal-{}",
            slugify(&format!("vscode-{}-{}", project_name, id))
        );

        let mut session = Session::new(
            id.clone(),
            project_name,
            repo_url,
            workspace_dir,
            port,
            generate_secret(),
            backend_name,
            created_at,
        );
        session.backend = Some(self.launcher.describe());

        info!(
            session_id = %id,
            port,
            dir = ?session.workspace_dir,
            repo_url = ?session.repo_url,
            "Created session"
        );
        self.sessions.lock().await.insert(id, session.clone());
        Ok(session)
    }

    /// Prepare the workspace and start the backend.
    ///
    /// Launch failures are not returned as errors: the session ends up in
    /// `Error` with the message and its port released.
    pub async fn launch(&self, session_id: &str) -> ServiceResult<Session> {
        let plan = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| ServiceError::SessionNotFound(session_id.to_string()))?;
            let Some(port) = session.port else {
                return Ok(session.clone());
            };
            if !session.set_status(SessionStatus::Launching) {
                debug!(session_id = %session_id, status = %session.status, "Session not launchable");
                return Ok(session.clone());
            }
            LaunchPlan {
                spec: LaunchSpec {
                    session_id: session.id.clone(),
                    backend_name: session.backend_name.clone(),
                    workspace_dir: session.workspace_dir.clone(),
                    port,
                    secret: session.secret.clone(),
                },
                repo_url: session.repo_url.clone(),
                project_name: session.project_name.clone(),
            }
        };

        info!(session_id = %session_id, "Launching session");
        match self.run_launch(&plan).await {
            Ok(outcome) => self.finish_launch(&plan, outcome).await,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Session launch failed");
                self.rollback(&plan, &e).await
            }
        }
    }

    /// Stop a session. Unknown or already stopped sessions are a no-op.
    pub async fn stop(&self, session_id: &str) {
        let released = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                Some(session) => {
                    if session.set_status(SessionStatus::Stopped) {
                        Some((session.backend_name.clone(), session.port.take()))
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        let Some((backend_name, port)) = released else {
            debug!(session_id = %session_id, "Stop ignored, session unknown or already stopped");
            return;
        };

        if let Err(e) = self.launcher.stop(&backend_name).await {
            warn!(session_id = %session_id, error = %e, "Failed to stop backend");
        }
        if let Some(port) = port {
            self.ports.release(port).await;
        }
        info!(session_id = %session_id, "Stopped session");
    }

    /// Stop running sessions whose backend ended on its own.
    ///
    /// Returns the ids that were stopped.
    pub async fn reap_exited_backends(&self) -> Vec<String> {
        let running: Vec<(String, String)> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|session| session.status == SessionStatus::Running)
            .map(|session| (session.id.clone(), session.backend_name.clone()))
            .collect();

        let mut reaped = Vec::new();
        for (session_id, backend_name) in running {
            let Some(exit) = self.launcher.exited(&backend_name).await else {
                continue;
            };
            let port = {
                let mut sessions = self.sessions.lock().await;
                match sessions.get_mut(&session_id) {
                    Some(session) if session.status == SessionStatus::Running => {
                        session.set_status(SessionStatus::Stopped);
                        session.error_message = Some(format!("backend exited: {}", exit));
                        session.port.take()
                    }
                    _ => continue,
                }
            };
            if let Some(port) = port {
                self.ports.release(port).await;
            }
            warn!(session_id = %session_id, exit = %exit, "Session backend exited, session stopped");
            reaped.push(session_id);
        }
        reaped
    }

    /// All sessions, newest first
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Stop every session that is not stopped yet
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|session| session.status != SessionStatus::Stopped)
            .map(|session| session.id.clone())
            .collect();

        info!(count = ids.len(), "Stopping all sessions");
        join_all(ids.iter().map(|id| self.stop(id))).await;
    }

    async fn unused_session_id(&self) -> String {
        let sessions = self.sessions.lock().await;
        loop {
            let id = new_session_id();
            if !sessions.contains_key(&id) {
                return id;
            }
        }
    }

    async fn run_launch(&self, plan: &LaunchPlan) -> ServiceResult<LaunchOutcome> {
        let dir = &plan.spec.workspace_dir;
        prepare_workspace(dir, plan.repo_url.as_deref())
            .await
            .map_err(as_preparation_failure)?;
        apply_template(dir, &plan.project_name, self.template.as_deref())
            .await
            .map_err(as_preparation_failure)?;
        self.launcher.start(&plan.spec).await
    }

    async fn finish_launch(
        &self,
        plan: &LaunchPlan,
        outcome: LaunchOutcome,
    ) -> ServiceResult<Session> {
        let session_id = &plan.spec.session_id;
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(session_id) {
                if session.set_status(SessionStatus::Running) {
                    session.access_url = outcome.access_url;
                    session.backend = Some(outcome.description);
                    info!(
                        session_id = %session_id,
                        access_url = ?session.access_url,
                        "Session running"
                    );
                    return Ok(session.clone());
                }
            }
        }

        // 启动期间会话已被停止，端口已由 stop 释放，可能已租给其他会话
        warn!(session_id = %session_id, "Session stopped during launch, tearing down backend");
        if let Err(e) = self.launcher.stop(&plan.spec.backend_name).await {
            debug!(session_id = %session_id, error = %e, "Teardown after stop failed");
        }
        self.get(session_id)
            .await
            .ok_or_else(|| ServiceError::SessionNotFound(session_id.to_string()))
    }

    /// Undo a failed launch and record why it failed
    async fn rollback(&self, plan: &LaunchPlan, cause: &ServiceError) -> ServiceResult<Session> {
        let session_id = &plan.spec.session_id;
        // 只释放记录中仍持有的端口
        let (snapshot, port) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| ServiceError::SessionNotFound(session_id.to_string()))?;
            let port = session.port.take();
            if session.set_status(SessionStatus::Error) {
                session.error_message = Some(cause.to_string());
            }
            (session.clone(), port)
        };

        if let Err(e) = self.launcher.stop(&plan.spec.backend_name).await {
            debug!(session_id = %session_id, error = %e, "Rollback stop failed");
        }
        if let Some(port) = port {
            self.ports.release(port).await;
        }
        Ok(snapshot)
    }
}

fn as_preparation_failure(e: ServiceError) -> ServiceError {
    match e {
        ServiceError::WorkspacePreparationFailed(_) => e,
        other => ServiceError::WorkspacePreparationFailed(other.to_string()),
    }
}

/// 8 lowercase hex characters
fn new_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// 16 random bytes, URL-safe base64 without padding
fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::backend_launcher::HostLauncher;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Launcher whose start can fail or wait on a gate; records stop calls
    #[derive(Default)]
    struct FakeLauncher {
        fail: bool,
        gate: Option<Arc<Notify>>,
        stopped: std::sync::Mutex<Vec<String>>,
        dead: std::sync::Mutex<Vec<String>>,
    }

    impl FakeLauncher {
        fn stopped(&self) -> Vec<String> {
            self.stopped.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BackendLauncher for FakeLauncher {
        async fn start(&self, spec: &LaunchSpec) -> ServiceResult<LaunchOutcome> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(ServiceError::BackendLaunchFailed("image pull denied".to_string()));
            }
            Ok(LaunchOutcome {
                access_url: Some(format!("http://127.0.0.1:{}/", spec.port)),
                description: "fake backend".to_string(),
            })
        }

        async fn stop(&self, backend_name: &str) -> ServiceResult<()> {
            self.stopped.lock().unwrap().push(backend_name.to_string());
            Ok(())
        }

        async fn exited(&self, backend_name: &str) -> Option<String> {
            let mut dead = self.dead.lock().unwrap();
            let index = dead.iter().position(|name| name == backend_name)?;
            dead.remove(index);
            Some("exit status: 1".to_string())
        }

        fn describe(&self) -> String {
            "fake backend".to_string()
        }
    }

    fn config(root: &std::path::Path, start: u16, end: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace.root = root.to_path_buf();
        config.ports.start = start;
        config.ports.end = end;
        config
    }

    fn host_launcher() -> Arc<dyn BackendLauncher> {
        Arc::new(HostLauncher::new(
            None,
            "/bin/bash".to_string(),
            "127.0.0.1".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_create_and_launch_on_host_shell() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(&config(root.path(), 47000, 47050), host_launcher()).unwrap();

        let created = manager.create(Some("".to_string()), Some("demo".to_string())).await.unwrap();
        assert_eq!(created.status, SessionStatus::Pending);
        assert_eq!(created.id.len(), 8);
        assert!(created.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(created.repo_url.is_none());
        assert!(created.port.is_some());
        assert!(!created.secret.is_empty());
        assert!(!created.workspace_dir.exists());
        assert_eq!(
            created.backend_name,
            format!("portal-vscode-demo-{}", created.id)
        );

        let launched = manager.launch(&created.id).await.unwrap();
        assert_eq!(launched.status, SessionStatus::Running);
        assert!(launched.backend.as_deref().unwrap().contains("host shell"));
        let folder = launched.workspace_dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(folder.contains("demo"));
        assert!(folder.ends_with(&created.id));
        assert!(launched.workspace_dir.join(".devcontainer/devcontainer.json").is_file());
        assert_eq!(launched.port, created.port);
    }

    #[tokio::test]
    async fn test_bad_repository_ends_in_error() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(&config(root.path(), 47100, 47150), host_launcher()).unwrap();

        let created = manager
            .create(
                Some("https://bad.invalid/repo.git".to_string()),
                Some("x".to_string()),
            )
            .await
            .unwrap();
        let failed = tokio::time::timeout(Duration::from_secs(120), manager.launch(&created.id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(failed.status, SessionStatus::Error);
        assert_eq!(failed.port, None);
        assert!(!failed.workspace_dir.exists());
        assert_eq!(manager.ports.leased_count().await, 0);

        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert!(!listed[0].error_message.as_deref().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn test_failed_backend_start_rolls_back() {
        let root = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..FakeLauncher::default()
        });
        let manager = SessionManager::new(&config(root.path(), 47200, 47250), launcher.clone()).unwrap();

        let created = manager.create(None, Some("app".to_string())).await.unwrap();
        let failed = manager.launch(&created.id).await.unwrap();

        assert_eq!(failed.status, SessionStatus::Error);
        assert_eq!(failed.port, None);
        assert!(failed.error_message.unwrap().contains("image pull denied"));
        assert_eq!(launcher.stopped(), vec![created.backend_name.clone()]);
        assert_eq!(manager.ports.leased_count().await, 0);

        // Error is only left through stop
        let again = manager.launch(&created.id).await.unwrap();
        assert_eq!(again.status, SessionStatus::Error);
        manager.stop(&created.id).await;
        assert_eq!(manager.get(&created.id).await.unwrap().status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let root = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let manager = SessionManager::new(&config(root.path(), 47300, 47350), launcher.clone()).unwrap();

        let created = manager.create(None, None).await.unwrap();
        let running = manager.launch(&created.id).await.unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert_eq!(running.access_url, Some(format!("http://127.0.0.1:{}/", created.port.unwrap())));

        manager.stop(&created.id).await;
        manager.stop(&created.id).await;
        manager.stop("deadbeef").await;

        let stopped = manager.get(&created.id).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(stopped.port, None);
        assert_eq!(launcher.stopped().len(), 1);
        assert_eq!(manager.ports.leased_count().await, 0);

        let relaunched = manager.launch(&created.id).await.unwrap();
        assert_eq!(relaunched.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_during_launch_tears_down_backend() {
        let root = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = Arc::new(FakeLauncher {
            gate: Some(gate.clone()),
            ..FakeLauncher::default()
        });
        let manager = Arc::new(
            SessionManager::new(&config(root.path(), 47400, 47450), launcher.clone()).unwrap(),
        );
        let created = manager.create(None, Some("race".to_string())).await.unwrap();

        let launch = tokio::spawn({
            let manager = manager.clone();
            let id = created.id.clone();
            async move { manager.launch(&id).await }
        });
        while manager.get(&created.id).await.unwrap().status != SessionStatus::Launching {
            tokio::task::yield_now().await;
        }
        manager.stop(&created.id).await;
        gate.notify_one();

        let result = launch.await.unwrap().unwrap();
        assert_eq!(result.status, SessionStatus::Stopped);
        assert_eq!(launcher.stopped().len(), 2);
        assert_eq!(manager.ports.leased_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_launch_keeps_port_of_next_owner() {
        let root = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let Some(end) = port.checked_add(1) else {
            return;
        };
        for fail in [false, true] {
            let gate = Arc::new(Notify::new());
            let launcher = Arc::new(FakeLauncher {
                fail,
                gate: Some(gate.clone()),
                ..FakeLauncher::default()
            });
            let manager = Arc::new(SessionManager::new(&config(root.path(), port, end), launcher).unwrap());

            let first = manager.create(None, Some("first".to_string())).await.unwrap();
            let launch = tokio::spawn({
                let manager = manager.clone();
                let id = first.id.clone();
                async move { manager.launch(&id).await }
            });
            while manager.get(&first.id).await.unwrap().status != SessionStatus::Launching {
                tokio::task::yield_now().await;
            }
            manager.stop(&first.id).await;

            let second = manager.create(None, Some("second".to_string())).await.unwrap();
            assert_eq!(second.port, Some(port));
            gate.notify_one();
            let finished = launch.await.unwrap().unwrap();
            assert_eq!(finished.status, SessionStatus::Stopped);

            assert_eq!(manager.ports.owner_of(port).await, Some(second.id.clone()));
            assert!(matches!(
                manager.create(None, None).await,
                Err(ServiceError::NoPortsAvailable { .. })
            ));
            manager.stop(&second.id).await;
        }
    }

    #[tokio::test]
    async fn test_exited_backend_stops_session() {
        let root = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let manager = SessionManager::new(&config(root.path(), 47600, 47650), launcher.clone()).unwrap();

        let alive = manager.create(None, Some("alive".to_string())).await.unwrap();
        let dying = manager.create(None, Some("dying".to_string())).await.unwrap();
        manager.launch(&alive.id).await.unwrap();
        manager.launch(&dying.id).await.unwrap();
        assert!(manager.reap_exited_backends().await.is_empty());

        launcher.dead.lock().unwrap().push(dying.backend_name.clone());
        assert_eq!(manager.reap_exited_backends().await, vec![dying.id.clone()]);

        let stopped = manager.get(&dying.id).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(stopped.port, None);
        assert!(stopped.error_message.unwrap().contains("backend exited"));
        assert_eq!(manager.get(&alive.id).await.unwrap().status, SessionStatus::Running);
        assert_eq!(manager.ports.leased_count().await, 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_shutdown_stops_all() {
        let root = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::default());
        let manager = SessionManager::new(&config(root.path(), 47500, 47550), launcher.clone()).unwrap();

        let first = manager.create(None, Some("one".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.create(None, Some("two".to_string())).await.unwrap();
        manager.launch(&second.id).await.unwrap();

        let ids: Vec<String> = manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        manager.shutdown().await;
        for session in manager.list().await {
            assert_eq!(session.status, SessionStatus::Stopped);
            assert_eq!(session.port, None);
        }
        assert_eq!(manager.ports.leased_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_fails_when_ports_exhausted() {
        let root = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let Some(end) = port.checked_add(1) else {
            return;
        };
        let manager = SessionManager::new(&config(root.path(), port, end), host_launcher()).unwrap();

        manager.create(None, None).await.unwrap();
        assert!(matches!(
            manager.create(None, None).await,
            Err(ServiceError::NoPortsAvailable { .. })
        ));
        assert_eq!(manager.list().await.len(), 1);
    }

    #[test]
    fn test_secret_and_id_shape() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 22);
        assert!(!secret.contains('='));
        assert_ne!(secret, generate_secret());
        assert_eq!(new_session_id().len(), 8);
    }
}
