use crate::pty::pty_trait::{PtyConfig, PtyError, PtyFactory, SpawnedPty};
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use tracing::{debug, error, info};

/// 基于 portable-pty 的 PTY 工厂
#[derive(Debug, Default)]
pub struct PortablePtyFactory;

impl PtyFactory for PortablePtyFactory {
    fn spawn(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        info!(
            "PortablePty: Creating PTY with command: {:?}, args: {:?}",
            config.command, config.args
        );

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("PortablePty: Failed to spawn {:?}: {}", config.command, e);
            PtyError::SpawnFailed(format!("{}: {}", config.command, e))
        })?;
        // 子进程持有自己的 slave 句柄，这里关闭父进程的那一份
        drop(pair.slave);

        let reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;

        debug!("PortablePty: spawned pid {:?}", child.process_id());
        Ok(SpawnedPty {
            master: pair.master,
            reader,
            writer,
            child,
        })
    }

    fn name(&self) -> &'static str {
        "portable-pty"
    }
}
