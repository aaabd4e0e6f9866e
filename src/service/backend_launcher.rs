/// Backend launchers start and stop the per-session editor service
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ServiceConfig};
use crate::service::container_backend::{ContainerBackend, detect_container_backend};
use crate::service::terminal_manager::host_shell_description;
use crate::service::{ServiceError, ServiceResult};

/// Everything a launcher needs to start one session backend
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub session_id: String,
    pub backend_name: String,
    pub workspace_dir: PathBuf,
    pub port: u16,
    pub secret: String,
}

/// What a successful start produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub access_url: Option<String>,
    pub description: String,
}

/// Starts and stops session backends
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    /// Start the backend for a session; any previous backend with the same
    /// name is removed first
    async fn start(&self, spec: &LaunchSpec) -> ServiceResult<LaunchOutcome>;

    /// Stop a backend by name. Unknown names are not an error.
    async fn stop(&self, backend_name: &str) -> ServiceResult<()>;

    /// Exit status of a backend that ended on its own, if this launcher
    /// supervises it. A reported backend is forgotten.
    async fn exited(&self, _backend_name: &str) -> Option<String> {
        None
    }

    /// What this launcher runs sessions on
    fn describe(&self) -> String;
}

/// Container launcher when a runtime is available, host launcher otherwise
pub fn select_launcher(config: &AppConfig) -> Arc<dyn BackendLauncher> {
    match detect_container_backend(&config.container) {
        Some(backend) => Arc::new(ContainerLauncher::new(
            backend,
            config.service.clone(),
            config.server.access_host.clone(),
        )),
        None => Arc::new(HostLauncher::new(
            config.service.host_command.clone(),
            config.terminal.shell.clone(),
            config.server.access_host.clone(),
        )),
    }
}

/// Runs code-server in a detached container per session
pub struct ContainerLauncher {
    backend: ContainerBackend,
    service: ServiceConfig,
    access_host: String,
}

impl ContainerLauncher {
    pub fn new(backend: ContainerBackend, service: ServiceConfig, access_host: String) -> Self {
        Self {
            backend,
            service,
            access_host,
        }
    }

    /// `run -d` arguments for one session
    pub fn run_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let workdir = &self.backend.workdir;
        let internal_port = self.service.internal_port;
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.backend_name.clone(),
            "-p".to_string(),
            format!("{}:{}", spec.port, internal_port),
            "-v".to_string(),
            format!("{}:{}", spec.workspace_dir.display(), workdir),
            "-e".to_string(),
            format!("PASSWORD={}", spec.secret),
            self.service.image.clone(),
            "code-server".to_string(),
            workdir.clone(),
            "--bind-addr".to_string(),
            format!("0.0.0.0:{}", internal_port),
            "--auth".to_string(),
            "password".to_string(),
            "--disable-telemetry".to_string(),
            "--disable-update-check".to_string(),
        ]
    }

    pub fn access_url(&self, port: u16) -> String {
        format!(
            "http://{}:{}/?folder={}",
            self.access_host, port, self.backend.workdir
        )
    }

    async fn remove(&self, backend_name: &str) -> ServiceResult<()> {
        let output = Command::new(&self.backend.runtime)
            .args(self.backend.removal_args(backend_name))
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            debug!(container = %backend_name, "Removed container");
        }
        Ok(())
    }
}

#[async_trait]
impl BackendLauncher for ContainerLauncher {
    async fn start(&self, spec: &LaunchSpec) -> ServiceResult<LaunchOutcome> {
        if let Err(e) = self.remove(&spec.backend_name).await {
            debug!(container = %spec.backend_name, error = %e, "Pre-launch cleanup failed");
        }

        info!(
            session_id = %spec.session_id,
            container = %spec.backend_name,
            port = spec.port,
            image = %self.service.image,
            "Starting backend container"
        );
        let output = Command::new(&self.backend.runtime)
            .args(self.run_args(spec))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ServiceError::BackendLaunchFailed(format!(
                    "failed to run {}: {}",
                    self.backend.runtime, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} run exited with {}", self.backend.runtime, output.status)
            } else {
                stderr
            };
            return Err(ServiceError::BackendLaunchFailed(message));
        }

        Ok(LaunchOutcome {
            access_url: Some(self.access_url(spec.port)),
            description: self.describe(),
        })
    }

    async fn stop(&self, backend_name: &str) -> ServiceResult<()> {
        info!(container = %backend_name, "Removing backend container");
        self.remove(backend_name).await
    }

    fn describe(&self) -> String {
        format!("{} container · image {}", self.backend.label, self.service.image)
    }
}

/// Runs sessions on the host.
///
/// With a configured `host_command` each session gets a supervised child
/// process; without one sessions are served by the host shell terminal only.
pub struct HostLauncher {
    command: Option<Vec<String>>,
    shell: String,
    access_host: String,
    children: Mutex<HashMap<String, Child>>,
}

impl HostLauncher {
    pub fn new(command: Option<Vec<String>>, shell: String, access_host: String) -> Self {
        Self {
            command: command.filter(|argv| !argv.is_empty()),
            shell,
            access_host,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Substitute `{port}`, `{workspace}` and `{password}` in every argument
    pub fn render_command(argv: &[String], spec: &LaunchSpec) -> Vec<String> {
        let workspace = spec.workspace_dir.display().to_string();
        let port = spec.port.to_string();
        argv.iter()
            .map(|arg| {
                arg.replace("{port}", &port)
                    .replace("{workspace}", &workspace)
                    .replace("{password}", &spec.secret)
            })
            .collect()
    }

    #[cfg(test)]
    pub async fn running_count(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[async_trait]
impl BackendLauncher for HostLauncher {
    async fn start(&self, spec: &LaunchSpec) -> ServiceResult<LaunchOutcome> {
        self.stop(&spec.backend_name).await?;

        let Some(argv) = self.command.as_ref() else {
            info!(session_id = %spec.session_id, "Session served by host shell terminal");
            return Ok(LaunchOutcome {
                access_url: None,
                description: self.describe(),
            });
        };

        let rendered = Self::render_command(argv, spec);
        let Some((program, args)) = rendered.split_first() else {
            return Err(ServiceError::BackendLaunchFailed(
                "empty host command".to_string(),
            ));
        };

        info!(
            session_id = %spec.session_id,
            program = %program,
            port = spec.port,
            "Starting host backend process"
        );
        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.workspace_dir)
            .env("PASSWORD", &spec.secret)
            .env("PORT", spec.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServiceError::BackendLaunchFailed(format!("failed to start {}: {}", program, e))
            })?;

        self.children
            .lock()
            .await
            .insert(spec.backend_name.clone(), child);

        Ok(LaunchOutcome {
            access_url: Some(format!("http://{}:{}/", self.access_host, spec.port)),
            description: self.describe(),
        })
    }

    async fn stop(&self, backend_name: &str) -> ServiceResult<()> {
        let child = self.children.lock().await.remove(backend_name);
        if let Some(mut child) = child {
            info!(backend = %backend_name, pid = ?child.id(), "Stopping host backend process");
            if let Err(e) = child.kill().await {
                warn!(backend = %backend_name, error = %e, "Failed to kill host backend process");
                return Err(ServiceError::Io(e));
            }
        }
        Ok(())
    }

    async fn exited(&self, backend_name: &str) -> Option<String> {
        let mut children = self.children.lock().await;
        let child = children.get_mut(backend_name)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                children.remove(backend_name);
                Some(status.to_string())
            }
            Ok(None) => None,
            Err(e) => {
                warn!(backend = %backend_name, error = %e, "Failed to poll host backend process");
                None
            }
        }
    }

    fn describe(&self) -> String {
        match self.command.as_ref().and_then(|argv| argv.first()) {
            Some(program) => format!("host process · {}", program),
            None => host_shell_description(&self.shell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &std::path::Path) -> LaunchSpec {
        LaunchSpec {
            session_id: "ab12cd34".to_string(),
            backend_name: "portal-vscode-demo-ab12cd34".to_string(),
            workspace_dir: dir.to_path_buf(),
            port: 20005,
            secret: "s3cret".to_string(),
        }
    }

    fn container_launcher() -> ContainerLauncher {
        ContainerLauncher::new(
            ContainerBackend {
                runtime: "docker".to_string(),
                label: "Docker".to_string(),
                image: "terminal:latest".to_string(),
                extra_args: Vec::new(),
                workdir: "/workspace".to_string(),
                shell: "/bin/bash".to_string(),
            },
            ServiceConfig::default(),
            "10.0.0.5".to_string(),
        )
    }

    #[test]
    fn test_container_run_args() {
        let launcher = container_launcher();
        let args = launcher.run_args(&spec(std::path::Path::new("/srv/ws")));
        assert_eq!(&args[..4], &["run", "-d", "--name", "portal-vscode-demo-ab12cd34"]);
        assert!(args.contains(&"20005:8080".to_string()));
        assert!(args.contains(&"/srv/ws:/workspace".to_string()));
        assert!(args.contains(&"PASSWORD=s3cret".to_string()));
        assert!(args.contains(&"android-dev-base:latest".to_string()));
        assert!(args.contains(&"0.0.0.0:8080".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--disable-update-check"));
        assert_eq!(
            launcher.access_url(20005),
            "http://10.0.0.5:20005/?folder=/workspace"
        );
        assert!(launcher.describe().starts_with("Docker container"));
    }

    #[test]
    fn test_render_host_command() {
        let argv = vec![
            "serve".to_string(),
            "--port={port}".to_string(),
            "{workspace}".to_string(),
            "--password".to_string(),
            "{password}".to_string(),
        ];
        let rendered = HostLauncher::render_command(&argv, &spec(std::path::Path::new("/w")));
        assert_eq!(rendered, vec!["serve", "--port=20005", "/w", "--password", "s3cret"]);
    }

    #[tokio::test]
    async fn test_host_launcher_without_command() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = HostLauncher::new(None, "/bin/bash".to_string(), "127.0.0.1".to_string());
        let outcome = launcher.start(&spec(dir.path())).await.unwrap();
        assert_eq!(outcome.access_url, None);
        assert_eq!(outcome.description, "host shell · /bin/bash");
        launcher.stop("portal-vscode-demo-ab12cd34").await.unwrap();
        launcher.stop("unknown").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_launcher_supervises_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = HostLauncher::new(
            Some(vec!["sleep".to_string(), "30".to_string()]),
            "/bin/sh".to_string(),
            "127.0.0.1".to_string(),
        );
        let outcome = launcher.start(&spec(dir.path())).await.unwrap();
        assert_eq!(outcome.access_url.as_deref(), Some("http://127.0.0.1:20005/"));
        assert_eq!(outcome.description, "host process · sleep");
        assert_eq!(launcher.running_count().await, 1);

        launcher.stop("portal-vscode-demo-ab12cd34").await.unwrap();
        assert_eq!(launcher.running_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_host_launcher_reports_exited_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = HostLauncher::new(
            Some(vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()]),
            "/bin/sh".to_string(),
            "127.0.0.1".to_string(),
        );
        launcher.start(&spec(dir.path())).await.unwrap();

        let mut reported = None;
        for _ in 0..100 {
            reported = launcher.exited("portal-vscode-demo-ab12cd34").await;
            if reported.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(reported.unwrap().contains('3'));
        assert_eq!(launcher.running_count().await, 0);
        assert_eq!(launcher.exited("portal-vscode-demo-ab12cd34").await, None);
        assert_eq!(container_launcher().exited("portal-vscode-demo-ab12cd34").await, None);
    }

    #[tokio::test]
    async fn test_host_launcher_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = HostLauncher::new(
            Some(vec!["/nonexistent/editor-server".to_string()]),
            "/bin/sh".to_string(),
            "127.0.0.1".to_string(),
        );
        let result = launcher.start(&spec(dir.path())).await;
        assert!(matches!(result, Err(ServiceError::BackendLaunchFailed(_))));
        assert_eq!(launcher.running_count().await, 0);
    }
}
