/// Configuration file loader for rs_workspace
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{AppConfig, ConfigError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "RS_WORKSPACE_CONFIG";

/// Configuration loader responsible for loading and parsing configuration files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration, then apply `.env` and process environment overrides.
    ///
    /// An explicitly named file must exist. The default `config.toml` is
    /// optional and built-in defaults are used when it is absent.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        // .env 文件是可选的
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {:?}", path);
        }

        let explicit = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                self.load_config_from_file(&path)?
            }
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    info!("Using default configuration file path: {:?}", path);
                    self.load_config_from_file(&path)?
                } else {
                    info!("No configuration file at {:?}, using defaults", path);
                    AppConfig::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    /// Load configuration from a specific file path
    fn load_config_from_file(&self, path: &Path) -> Result<AppConfig, ConfigError> {
        info!("Loading configuration from file: {:?}", path);
        let contents = fs::read_to_string(path)?;
        self.parse_config(&contents)
    }

    /// Parse configuration from string content
    pub fn parse_config(&self, content: &str) -> Result<AppConfig, ConfigError> {
        let config = toml::from_str::<AppConfig>(content)?;
        info!("Configuration parsed successfully");
        Ok(config)
    }
}

/// Default configuration path
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    // 使用当前工作目录作为默认配置文件目录
    Ok(std::env::current_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_config_keeps_defaults() {
        let loader = ConfigLoader::new();
        let config = loader
            .parse_config(
                r#"
                [ports]
                start = 31000
                end = 31010

                [container]
                runtimes = ["podman"]
                "#,
            )
            .unwrap();

        assert_eq!(config.ports.start, 31000);
        assert_eq!(config.ports.end, 31010);
        assert_eq!(config.container.runtimes, vec!["podman"]);
        assert_eq!(config.container.workdir, "/workspace");
        assert_eq!(config.server.port, 1539);
        assert_eq!(config.terminal.poll_interval_ms, 200);
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        let loader = ConfigLoader::new();
        let result = loader.parse_config("[ports\nstart = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = ConfigLoader::new().load_config(Some(&missing));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[server]\nport = 4000\n[ports]\nstart = 25000\nend = 25100").unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load_config_from_file(&path).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.ports.start, 25000);
    }
}
