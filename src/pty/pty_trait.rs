use std::io::{Read, Write};

use portable_pty::{Child, MasterPty};
use thiserror::Error;

// ================ 配置与错误类型 ================

#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
    pub cwd: Option<std::path::PathBuf>,
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Other error: {0}")]
    Other(String),
}

// portable-pty 的接口返回 anyhow::Error
impl From<anyhow::Error> for PtyError {
    fn from(error: anyhow::Error) -> Self {
        PtyError::Other(error.to_string())
    }
}

// ================ 核心类型定义 ================

/// Handles of a freshly spawned process attached to a PTY.
///
/// The slave side is already closed in the parent; only the child holds it.
pub struct SpawnedPty {
    pub master: Box<dyn MasterPty + Send>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// PTY工厂Trait
pub trait PtyFactory: Send + Sync {
    /// Open a PTY and spawn the configured command on it. Blocking.
    fn spawn(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError>;

    /// 工厂名称
    fn name(&self) -> &'static str;
}
