/// Container runtime detection and command construction for terminal backends
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::config::ContainerConfig;

/// Prefix of every terminal container name
const CONTAINER_NAME_PREFIX: &str = "devsession-";

/// An immutable description of the container runtime in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBackend {
    pub runtime: String,
    pub label: String,
    pub image: String,
    pub extra_args: Vec<String>,
    pub workdir: String,
    pub shell: String,
}

/// A fully built container invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub container_name: String,
}

impl ContainerBackend {
    /// Interactive, auto-removed container with the workspace bind-mounted
    pub fn build_command(&self, session_id: &str, workspace_dir: &Path) -> ContainerCommand {
        let container_name = container_name(session_id);
        let volume = format!("{}:{}", workspace_dir.display(), self.workdir);

        let mut args: Vec<String> = [
            "run",
            "--rm",
            "-i",
            "-t",
            "--name",
            container_name.as_str(),
            "-v",
            volume.as_str(),
            "-w",
            self.workdir.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(self.extra_args.iter().cloned());
        args.push(self.image.clone());
        args.push(self.shell.clone());

        ContainerCommand {
            program: self.runtime.clone(),
            args,
            container_name,
        }
    }

    /// Arguments that force-remove a container by name
    pub fn removal_args(&self, container_name: &str) -> Vec<String> {
        vec!["rm".to_string(), "-f".to_string(), container_name.to_string()]
    }

    pub fn describe(&self) -> String {
        format!("{} container · image {}", self.label, self.image)
    }
}

/// Deterministic container name for a session.
///
/// Restricted to the character set container runtimes accept so that a stale
/// container from an earlier run can be found and removed by name.
pub fn container_name(session_id: &str) -> String {
    let sanitized: String = session_id
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches(|c| matches!(c, '-' | '_' | '.'));
    let base = if trimmed.is_empty() { "session" } else { trimmed };
    format!("{}{}", CONTAINER_NAME_PREFIX, base)
}

fn runtime_label(runtime: &str) -> String {
    match runtime.to_lowercase().as_str() {
        "docker" => "Docker".to_string(),
        "podman" => "Podman".to_string(),
        _ => {
            let mut chars = runtime.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// Probe PATH for the first configured runtime
pub fn detect_container_backend(config: &ContainerConfig) -> Option<ContainerBackend> {
    detect_with(config, |name| which::which(name).ok())
}

/// Runtime detection with an injectable executable lookup
pub fn detect_with<F>(config: &ContainerConfig, find: F) -> Option<ContainerBackend>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if config.force_host_terminal {
        info!("Container terminals disabled by configuration, using host shell");
        return None;
    }

    for runtime in &config.runtimes {
        if let Some(path) = find(runtime) {
            info!(
                runtime = %runtime,
                path = ?path,
                image = %config.image,
                extra_args = ?config.args,
                "Using container runtime for terminals"
            );
            return Some(ContainerBackend {
                runtime: runtime.clone(),
                label: runtime_label(runtime),
                image: config.image.clone(),
                extra_args: config.args.clone(),
                workdir: config.workdir.clone(),
                shell: config.shell.clone(),
            });
        }
    }

    info!(
        candidates = ?config.runtimes,
        "No container runtime found, using host shell"
    );
    None
}

/// Why terminals run on the host shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostShellReason {
    /// `force_host_terminal` or its environment override
    Forced,
    /// None of the candidate runtimes is on PATH
    NoRuntime,
    /// A container launch failed earlier in this process
    LaunchFailed,
}

/// Backend selection state.
///
/// `Unresolved` moves to one of the other two on first use. `Container` can
/// move to `HostShell(LaunchFailed)` once. `HostShell` is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    Unresolved,
    Container(ContainerBackend),
    HostShell(HostShellReason),
}

/// Lazily resolved, process-wide backend choice for terminals
pub struct BackendResolver {
    config: ContainerConfig,
    selection: Mutex<BackendSelection>,
}

impl BackendResolver {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            selection: Mutex::new(BackendSelection::Unresolved),
        }
    }

    /// Start from a known selection instead of probing PATH
    pub fn with_selection(config: ContainerConfig, selection: BackendSelection) -> Self {
        Self {
            config,
            selection: Mutex::new(selection),
        }
    }

    /// The container backend to use, resolving it on first call
    pub fn current(&self) -> Option<ContainerBackend> {
        let mut selection = self.lock();
        if *selection == BackendSelection::Unresolved {
            *selection = match detect_container_backend(&self.config) {
                Some(backend) => BackendSelection::Container(backend),
                None if self.config.force_host_terminal => {
                    BackendSelection::HostShell(HostShellReason::Forced)
                }
                None => BackendSelection::HostShell(HostShellReason::NoRuntime),
            };
        }
        match &*selection {
            BackendSelection::Container(backend) => Some(backend.clone()),
            _ => None,
        }
    }

    /// Permanently switch to the host shell. Returns true on the first switch.
    pub fn disable_container(&self) -> bool {
        let mut selection = self.lock();
        if matches!(*selection, BackendSelection::HostShell(_)) {
            return false;
        }
        warn!("Container terminals permanently disabled for this process");
        *selection = BackendSelection::HostShell(HostShellReason::LaunchFailed);
        true
    }

    pub fn selection(&self) -> BackendSelection {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendSelection> {
        // 中毒时沿用内部状态
        self.selection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
