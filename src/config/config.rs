/// Configuration data structures for rs_workspace
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ConfigError;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener and public addressing
    pub server: ServerConfig,

    /// Where session workspaces live
    pub workspace: WorkspaceConfig,

    /// Port range handed out to session backends
    pub ports: PortRangeConfig,

    /// Container runtime used for terminals
    pub container: ContainerConfig,

    /// Per-session code-server backend
    pub service: ServiceConfig,

    /// Terminal bridge settings
    pub terminal: TerminalConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Host name used when building session access URLs
    pub access_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1539,
            access_host: "127.0.0.1".to_string(),
        }
    }
}

/// Workspace configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one sub-directory per session
    pub root: PathBuf,

    /// devcontainer template; the built-in one is used when unset
    pub template: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("session"),
            template: None,
        }
    }
}

/// Port range `[start, end)`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PortRangeConfig {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 21000,
        }
    }
}

/// Container runtime configuration for terminal backends
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ContainerConfig {
    /// Runtime executables probed on PATH, in order
    pub runtimes: Vec<String>,

    /// Image the terminal container runs
    pub image: String,

    /// Extra arguments passed to `<runtime> run`
    pub args: Vec<String>,

    /// Mount point of the workspace inside the container
    pub workdir: String,

    /// Shell started inside the container
    pub shell: String,

    /// Skip runtime detection and always use the host shell
    pub force_host_terminal: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtimes: vec!["docker".to_string(), "podman".to_string()],
            image: "mcr.microsoft.com/devcontainers/base:ubuntu".to_string(),
            args: Vec::new(),
            workdir: "/workspace".to_string(),
            shell: "/bin/bash".to_string(),
            force_host_terminal: false,
        }
    }
}

/// Session backend (code-server) configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// Image used for the code-server container
    pub image: String,

    /// Port code-server listens on inside the container
    pub internal_port: u16,

    /// Command run on the host when no container runtime exists.
    /// `{port}`, `{workspace}` and `{password}` are substituted.
    pub host_command: Option<Vec<String>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image: "android-dev-base:latest".to_string(),
            internal_port: 8080,
            host_command: None,
        }
    }
}

/// Terminal bridge configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TerminalConfig {
    /// Host shell used when no container backend is active
    pub shell: String,

    /// Value of TERM for spawned processes
    pub term: String,

    /// Initial PTY columns
    pub columns: u16,

    /// Initial PTY rows
    pub rows: u16,

    /// Reader poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            term: "xterm-256color".to_string(),
            columns: 80,
            rows: 24,
            poll_interval_ms: 200,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,

    /// Directory for daily rolling log files
    pub directory: Option<PathBuf>,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

impl AppConfig {
    /// Apply environment overrides using the given lookup.
    ///
    /// Takes a lookup function instead of reading the process environment
    /// directly so tests can feed their own values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(runtimes) = lookup("WORKSPACE_CONTAINER_RUNTIME") {
            self.container.runtimes = runtimes
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(image) = lookup("WORKSPACE_CONTAINER_IMAGE") {
            self.container.image = image;
        }
        if let Some(args) = lookup("WORKSPACE_CONTAINER_ARGS") {
            self.container.args = shlex::split(&args).ok_or_else(|| {
                ConfigError::InvalidValue("WORKSPACE_CONTAINER_ARGS".to_string(), args.clone())
            })?;
        }
        if let Some(workdir) = lookup("WORKSPACE_CONTAINER_WORKDIR") {
            self.container.workdir = workdir;
        }
        if let Some(shell) = lookup("WORKSPACE_CONTAINER_SHELL") {
            self.container.shell = shell;
        }
        if let Some(flag) = lookup("WORKSPACE_FORCE_HOST_TERMINAL") {
            self.container.force_host_terminal = !flag.trim().is_empty();
        }
        if let Some(image) = lookup("DEV_CONTAINER_IMAGE") {
            self.service.image = image;
        }
        if let Some(host) = lookup("PORTAL_ACCESS_HOST") {
            self.server.access_host = host;
        }
        if let Some(start) = lookup("WORKSPACE_PORT_RANGE_START") {
            self.ports.start = parse_port("WORKSPACE_PORT_RANGE_START", &start)?;
        }
        if let Some(end) = lookup("WORKSPACE_PORT_RANGE_END") {
            self.ports.end = parse_port("WORKSPACE_PORT_RANGE_END", &end)?;
        }
        if let Some(shell) = lookup("SHELL") {
            if !shell.trim().is_empty() {
                self.terminal.shell = shell;
            }
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.end <= self.ports.start {
            return Err(ConfigError::InvalidStructure(format!(
                "ports.end ({}) must be greater than ports.start ({})",
                self.ports.end, self.ports.start
            )));
        }
        if self.terminal.shell.trim().is_empty() {
            return Err(ConfigError::InvalidStructure(
                "terminal.shell must not be empty".to_string(),
            ));
        }
        if self.container.shell.trim().is_empty() {
            return Err(ConfigError::InvalidStructure(
                "container.shell must not be empty".to_string(),
            ));
        }
        if self.terminal.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidStructure(
                "terminal.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_container_settings() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("WORKSPACE_CONTAINER_RUNTIME", " podman , ,nerdctl"),
                ("WORKSPACE_CONTAINER_ARGS", "--network host -e 'A=b c'"),
                ("WORKSPACE_FORCE_HOST_TERMINAL", "1"),
                ("PORTAL_ACCESS_HOST", "dev.local"),
            ]))
            .unwrap();

        assert_eq!(config.container.runtimes, vec!["podman", "nerdctl"]);
        assert_eq!(
            config.container.args,
            vec!["--network", "host", "-e", "A=b c"]
        );
        assert!(config.container.force_host_terminal);
        assert_eq!(config.server.access_host, "dev.local");
    }

    #[test]
    fn test_empty_force_flag_keeps_container_enabled() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(lookup_from(&[("WORKSPACE_FORCE_HOST_TERMINAL", "  ")]))
            .unwrap();
        assert!(!config.container.force_host_terminal);
    }

    #[test]
    fn test_invalid_port_override_is_rejected() {
        let mut config = AppConfig::default();
        let result =
            config.apply_env_overrides(lookup_from(&[("WORKSPACE_PORT_RANGE_START", "seventy")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(..))));
    }

    #[test]
    fn test_validate_rejects_empty_port_range() {
        let mut config = AppConfig::default();
        config.ports.start = 30000;
        config.ports.end = 30000;
        assert!(config.validate().is_err());

        config.ports.end = 30001;
        assert!(config.validate().is_ok());
    }
}
