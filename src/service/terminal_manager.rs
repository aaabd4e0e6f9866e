/// Terminal manager owning one terminal session per workspace session
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{ContainerConfig, TerminalConfig};
use crate::pty::{PortablePtyFactory, PtyConfig, PtyFactory, SpawnedPty};
use crate::service::container_backend::{BackendResolver, ContainerBackend};
use crate::service::terminal_session::TerminalSession;
use crate::service::ServiceResult;

/// Upper bound on waiting for killed terminals at shutdown
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-session slot; its lock serialises creation for that session only
type TerminalSlot = Arc<tokio::sync::Mutex<Option<Arc<TerminalSession>>>>;

/// Description used when terminals run directly on the host
pub fn host_shell_description(shell: &str) -> String {
    format!("host shell · {}", shell)
}

/// Terminal manager responsible for creating, reusing and closing terminals
pub struct TerminalManager {
    resolver: BackendResolver,
    factory: Arc<dyn PtyFactory>,
    settings: TerminalConfig,
    slots: Mutex<HashMap<String, TerminalSlot>>,
}

impl TerminalManager {
    /// Create a terminal manager backed by the native PTY system
    pub fn new(container: ContainerConfig, settings: TerminalConfig) -> Self {
        Self::with_parts(
            BackendResolver::new(container),
            Arc::new(PortablePtyFactory),
            settings,
        )
    }

    pub fn with_parts(
        resolver: BackendResolver,
        factory: Arc<dyn PtyFactory>,
        settings: TerminalConfig,
    ) -> Self {
        Self {
            resolver,
            factory,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Live terminal for `session_id`, creating one if missing or closed.
    ///
    /// Concurrent callers for the same id get the same instance. A container
    /// spawn failure switches the process to the host shell for good and is
    /// retried once on the host.
    pub async fn ensure(
        &self,
        session_id: &str,
        workspace_dir: &Path,
    ) -> ServiceResult<Arc<TerminalSession>> {
        let slot = self.slot(session_id);
        let mut current = slot.lock().await;
        if let Some(existing) = current.as_ref() {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            debug!(session_id = %session_id, "Previous terminal closed, creating a new one");
        }

        info!(session_id = %session_id, cwd = ?workspace_dir, "Initialising terminal session");
        let terminal = match self.resolver.current() {
            Some(backend) => match self.spawn_container(&backend, session_id, workspace_dir).await {
                Ok(terminal) => terminal,
                Err(e) => {
                    error!(
                        session_id = %session_id,
                        runtime = %backend.runtime,
                        error = %e,
                        "Container terminal failed, falling back to host shell"
                    );
                    if self.resolver.disable_container() {
                        warn!(selection = ?self.resolver.selection(), "Terminal backend switched");
                    }
                    self.spawn_host_shell(session_id, workspace_dir).await?
                }
            },
            None => self.spawn_host_shell(session_id, workspace_dir).await?,
        };

        *current = Some(terminal.clone());
        Ok(terminal)
    }

    /// Existing terminal for `session_id`, open or closed
    pub async fn get(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        let slot = self.lock_slots().get(session_id).cloned()?;
        let current = slot.lock().await;
        current.clone()
    }

    /// What newly created terminals will run on
    pub fn describe_default_backend(&self) -> String {
        match self.resolver.current() {
            Some(backend) => backend.describe(),
            None => host_shell_description(&self.settings.shell),
        }
    }

    #[cfg(test)]
    pub fn backend_selection(&self) -> crate::service::container_backend::BackendSelection {
        self.resolver.selection()
    }

    /// Kill and forget the terminal of one session
    pub async fn close(&self, session_id: &str) {
        let slot = self.lock_slots().remove(session_id);
        if let Some(slot) = slot {
            if let Some(terminal) = slot.lock().await.take() {
                info!(
                    session_id = %session_id,
                    container = ?terminal.container_name(),
                    "Closing terminal session"
                );
                terminal.kill();
            }
        }
    }

    /// Kill every live terminal and give the pumps a moment to drain
    pub async fn shutdown(&self) {
        let slots: Vec<(String, TerminalSlot)> = self.lock_slots().drain().collect();
        info!(count = slots.len(), "Shutting down terminal sessions");

        let mut killed = Vec::new();
        for (session_id, slot) in slots {
            if let Some(terminal) = slot.lock().await.take() {
                debug!(session_id = %session_id, "Killing terminal");
                terminal.kill();
                killed.push(terminal);
            }
        }

        let drained = join_all(killed.iter().map(|terminal| terminal.wait_closed()));
        if timeout(SHUTDOWN_DRAIN_TIMEOUT, drained).await.is_err() {
            warn!("Timed out waiting for terminals to close");
        }
    }

    fn slot(&self, session_id: &str) -> TerminalSlot {
        self.lock_slots()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, TerminalSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.poll_interval_ms)
    }

    fn pty_config(&self, command: String, args: Vec<String>) -> PtyConfig {
        PtyConfig {
            command,
            args,
            cols: self.settings.columns,
            rows: self.settings.rows,
            env: vec![("TERM".to_string(), self.settings.term.clone())],
            cwd: None,
        }
    }

    async fn spawn_container(
        &self,
        backend: &ContainerBackend,
        session_id: &str,
        workspace_dir: &Path,
    ) -> ServiceResult<Arc<TerminalSession>> {
        let command = backend.build_command(session_id, workspace_dir);
        remove_stale_container(backend, &command.container_name).await;

        info!(
            session_id = %session_id,
            runtime = %backend.runtime,
            container = %command.container_name,
            image = %backend.image,
            "Starting container terminal"
        );
        let config = self.pty_config(command.program, command.args);
        let spawned = self.spawn_pty(config).await?;
        TerminalSession::start(
            session_id,
            workspace_dir,
            spawned,
            backend.describe(),
            Some(command.container_name),
            self.poll_interval(),
        )
    }

    async fn spawn_host_shell(
        &self,
        session_id: &str,
        workspace_dir: &Path,
    ) -> ServiceResult<Arc<TerminalSession>> {
        let mut config = self.pty_config(self.settings.shell.clone(), Vec::new());
        config.cwd = Some(workspace_dir.to_path_buf());

        info!(session_id = %session_id, shell = %self.settings.shell, "Starting host shell terminal");
        let spawned = self.spawn_pty(config).await?;
        TerminalSession::start(
            session_id,
            workspace_dir,
            spawned,
            host_shell_description(&self.settings.shell),
            None,
            self.poll_interval(),
        )
    }

    async fn spawn_pty(&self, config: PtyConfig) -> ServiceResult<SpawnedPty> {
        let factory = self.factory.clone();
        debug!(factory = factory.name(), command = %config.command, "Spawning PTY process");
        let spawned = tokio::task::spawn_blocking(move || factory.spawn(&config)).await??;
        Ok(spawned)
    }
}

/// Remove a leftover container with the same name; failures are ignored
async fn remove_stale_container(backend: &ContainerBackend, container_name: &str) {
    let result = Command::new(&backend.runtime)
        .args(backend.removal_args(container_name))
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {
            debug!(container = %container_name, "Removed stale container");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(runtime = %backend.runtime, error = %e, "Could not run container cleanup");
        }
    }
}
