/// One pseudo-terminal and the process attached to it, exposed as an
/// append-only output log read by offset.
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use portable_pty::{Child, ChildKiller, MasterPty};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::pty::SpawnedPty;
use crate::service::{ServiceError, ServiceResult};

/// Bytes requested per read from the PTY master
const READ_CHUNK_SIZE: usize = 4096;

/// Chunks buffered between the blocking reader and the pump
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Result of an offset read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutput {
    /// Buffer length at the time of the read; pass it back as the next offset
    pub offset: usize,
    /// Every byte appended since the requested offset
    pub data: Vec<u8>,
    /// Whether the session had closed when the read was taken
    pub closed: bool,
}

#[derive(Default)]
struct OutputLog {
    buffer: Vec<u8>,
    closed: bool,
}

/// Terminal session bound to one PTY.
///
/// The buffer only grows and `closed` never flips back. A background reader
/// thread feeds chunks to a pump task, which appends them and marks the
/// session closed once the child has exited and nothing more arrives.
pub struct TerminalSession {
    session_id: String,
    workspace_dir: PathBuf,
    backend_description: String,
    container_name: Option<String>,
    pid: Option<u32>,
    log: Arc<Mutex<OutputLog>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closed_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("session_id", &self.session_id)
            .field("workspace_dir", &self.workspace_dir)
            .field("backend", &self.backend_description)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TerminalSession {
    /// Wire up a spawned PTY process. Must be called inside a Tokio runtime.
    pub fn start(
        session_id: &str,
        workspace_dir: &Path,
        spawned: SpawnedPty,
        backend_description: String,
        container_name: Option<String>,
        poll_interval: Duration,
    ) -> ServiceResult<Arc<Self>> {
        let SpawnedPty {
            master,
            reader,
            writer,
            mut child,
        } = spawned;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        // 读取线程是阻塞的，不占用 tokio 的阻塞线程池
        let reader_session = session_id.to_string();
        let spawn_result = std::thread::Builder::new()
            .name(format!("pty-reader-{}", session_id))
            .spawn(move || read_pty(reader, chunk_tx, &reader_session));
        if let Err(e) = spawn_result {
            error!(session_id = %session_id, error = %e, "Failed to start PTY reader thread");
            let _ = child.kill();
            return Err(ServiceError::Io(e));
        }

        let log = Arc::new(Mutex::new(OutputLog::default()));
        let writer = Arc::new(Mutex::new(Some(writer)));
        let (closed_tx, closed_rx) = watch::channel(false);

        let session = Arc::new(Self {
            session_id: session_id.to_string(),
            workspace_dir: workspace_dir.to_path_buf(),
            backend_description,
            container_name,
            pid,
            log: log.clone(),
            writer: writer.clone(),
            killer: Mutex::new(killer),
            closed_rx,
        });

        tokio::spawn(pump_output(PumpContext {
            session_id: session_id.to_string(),
            workspace_dir: workspace_dir.to_path_buf(),
            chunk_rx,
            child,
            master,
            log,
            writer,
            closed_tx,
            poll_interval,
        }));

        info!(
            session_id = %session.session_id,
            cwd = ?session.workspace_dir,
            pid = ?session.pid,
            backend = %session.backend_description,
            "Started terminal session"
        );
        Ok(session)
    }

    /// Everything appended since `offset`.
    ///
    /// Offsets are clamped into `[0, len]`, so stale or bogus values are
    /// harmless. Reading never consumes output.
    pub fn read(&self, offset: i64) -> TerminalOutput {
        let log = lock(&self.log);
        let len = log.buffer.len();
        let start = offset.clamp(0, len as i64) as usize;
        TerminalOutput {
            offset: len,
            data: log.buffer[start..].to_vec(),
            closed: log.closed,
        }
    }

    /// Forward raw bytes to the process input
    pub fn write(&self, data: &[u8]) -> ServiceResult<()> {
        if self.is_closed() {
            return Err(ServiceError::TerminalClosed);
        }
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(ServiceError::TerminalClosed)?;
        trace!(session_id = %self.session_id, bytes = data.len(), "Writing to terminal");
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| {
                warn!(session_id = %self.session_id, error = %e, "Terminal write failed");
                ServiceError::TerminalWrite(e)
            })
    }

    /// Terminate the attached process; the pump closes the session afterwards
    pub fn kill(&self) {
        if self.is_closed() {
            return;
        }
        info!(session_id = %self.session_id, pid = ?self.pid, "Killing terminal process");
        if let Err(e) = lock(&self.killer).kill() {
            warn!(session_id = %self.session_id, error = %e, "Failed to kill terminal process");
        }
    }

    /// Resolves once the session is closed
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.log).closed
    }

    pub fn backend_description(&self) -> &str {
        &self.backend_description
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Blocking read loop on the PTY master.
///
/// Ends on EOF or on the EIO Linux reports once every slave handle is gone
/// and the queue is empty.
fn read_pty(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>, session_id: &str) {
    let mut buffer = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!(session_id = %session_id, "PTY EOF reached, stopping reader");
                break;
            }
            Ok(n) => {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    debug!(session_id = %session_id, "Output pump gone, stopping reader");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "PTY reader finished");
                break;
            }
        }
    }
}

struct PumpContext {
    session_id: String,
    workspace_dir: PathBuf,
    chunk_rx: mpsc::Receiver<Vec<u8>>,
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    log: Arc<Mutex<OutputLog>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    closed_tx: watch::Sender<bool>,
    poll_interval: Duration,
}

/// Append reader chunks to the log until the child has exited and a full
/// poll interval passes without output, or the reader hits EOF.
async fn pump_output(ctx: PumpContext) {
    let PumpContext {
        session_id,
        workspace_dir,
        mut chunk_rx,
        mut child,
        master,
        log,
        writer,
        closed_tx,
        poll_interval,
    } = ctx;

    let mut exit_status = None;
    loop {
        match timeout(poll_interval, chunk_rx.recv()).await {
            Ok(Some(chunk)) => {
                trace!(session_id = %session_id, bytes = chunk.len(), "Appending terminal output");
                lock(&log).buffer.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(_) => match child.try_wait() {
                Ok(Some(status)) => {
                    exit_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to poll terminal process");
                    break;
                }
            },
        }
    }

    // 读取线程可能已经推送了最后一批数据
    while let Ok(chunk) = chunk_rx.try_recv() {
        lock(&log).buffer.extend_from_slice(&chunk);
    }

    lock(&log).closed = true;
    lock(&writer).take();
    drop(master);
    let _ = closed_tx.send(true);

    if exit_status.is_none() {
        match child.try_wait() {
            Ok(Some(status)) => exit_status = Some(status),
            _ => {
                // Reap in the background so the process does not linger as a zombie
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
        }
    }

    info!(
        session_id = %session_id,
        cwd = ?workspace_dir,
        exit_status = ?exit_status,
        "Terminal session closed"
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pty::{PortablePtyFactory, PtyConfig, PtyFactory};
    use std::time::Instant;

    fn spawn_sh(args: &[&str]) -> SpawnedPty {
        PortablePtyFactory
            .spawn(&PtyConfig {
                command: "/bin/sh".to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                cols: 80,
                rows: 24,
                env: vec![("TERM".to_string(), "xterm-256color".to_string())],
                cwd: None,
            })
            .unwrap()
    }

    fn start(args: &[&str]) -> Arc<TerminalSession> {
        TerminalSession::start(
            "t1",
            Path::new("/"),
            spawn_sh(args),
            "host shell · /bin/sh".to_string(),
            None,
            Duration::from_millis(50),
        )
        .unwrap()
    }

    async fn wait_closed(session: &TerminalSession) {
        tokio::time::timeout(Duration::from_secs(10), session.wait_closed())
            .await
            .expect("terminal did not close in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_produced_right_before_exit_is_kept() {
        let session = start(&["-c", "printf 'first\\n'; printf 'last-line'"]);
        wait_closed(&session).await;

        let output = session.read(0);
        let text = String::from_utf8_lossy(&output.data);
        assert!(output.closed);
        assert!(text.contains("first"));
        assert!(text.contains("last-line"));
        assert_eq!(output.offset, output.data.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_are_idempotent_and_clamped() {
        let session = start(&["-c", "printf 'abcdef'"]);
        wait_closed(&session).await;

        let first = session.read(0);
        let again = session.read(0);
        assert_eq!(first, again);

        let negative = session.read(-42);
        assert_eq!(negative, first);

        let len = first.offset as i64;
        let past_end = session.read(len + 1000);
        assert!(past_end.data.is_empty());
        assert_eq!(past_end.offset, first.offset);

        let tail = session.read(len - 3);
        assert_eq!(tail.data, first.data[first.data.len() - 3..].to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_are_prefix_consistent_while_running() {
        let session = start(&[]);
        session.write(b"echo one\r").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let early = session.read(0);

        session.write(b"echo two\r").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut late = session.read(0);
        while !String::from_utf8_lossy(&late.data).contains("two") && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
            late = session.read(0);
        }

        assert!(late.data.starts_with(&early.data));
        let suffix = session.read(early.offset as i64);
        let mut joined = early.data.clone();
        joined.extend_from_slice(&suffix.data[..late.offset - early.offset]);
        assert_eq!(joined, late.data);

        session.kill();
        wait_closed(&session).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_after_close_fails() {
        let session = start(&["-c", "exit 0"]);
        wait_closed(&session).await;

        let result = session.write(b"ls\r");
        assert!(matches!(result, Err(ServiceError::TerminalClosed)));
        assert!(session.read(0).closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kill_closes_session() {
        let session = start(&[]);
        assert!(!session.is_closed());
        session.kill();
        wait_closed(&session).await;
        assert!(session.is_closed());
    }
}
