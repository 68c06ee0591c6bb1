//! The process bridge: owns the server subprocess and its standard streams.
//!
//! ```text
//!                 ┌──────────── ProcessBridge ────────────┐
//!  write(line) ──▶│ stdin (serialized)                    │
//!                 │ stdout reader ─┐                      │
//!                 │ stderr reader ─┴─▶ unbounded channel ─┼──▶ reactor
//!                 │ monitor: wait() / kill ─▶ exit watch  │
//!                 └───────────────────────────────────────┘
//! ```
//!
//! The reader tasks are the only place that waits on subprocess output. The
//! channel they feed is unbounded so a slow consumer can never stall them.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::info::Info;

/// How long to wait for the process to die after a forced kill.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// How to launch the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory; the daemon's own when `None`.
    pub working_dir: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

struct Running {
    pid: Option<u32>,
    kill: Arc<Notify>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl Running {
    fn exited(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }
}

/// Owner of the server subprocess.
pub struct ProcessBridge {
    config: ProcessConfig,
    running: Mutex<Option<Running>>,
    stdin: AsyncMutex<Option<ChildStdin>>,
}

impl ProcessBridge {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            stdin: AsyncMutex::new(None),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Spawns the server and returns the channel of its output lines.
    ///
    /// The channel closes once both output streams reach end of file.
    pub async fn start(&self) -> ProcessResult<mpsc::UnboundedReceiver<String>> {
        if self.is_alive() {
            return Err(ProcessError::AlreadyRunning);
        }

        let command = self.config.command.clone();
        let mut cmd = Command::new(&command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            if !dir.is_dir() {
                return Err(ProcessError::StartFailed {
                    command,
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("working directory '{}' does not exist", dir.display()),
                    ),
                });
            }
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::spawn(&command, e))?;
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, line_tx));
        }
        *self.stdin.lock().await = child.stdin.take();

        let kill = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill_signal = kill.clone();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_signal.notified() => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid, error = %e, "Failed to kill server process");
                    }
                    child.wait().await
                }
            };
            let code = status.ok().and_then(|s| s.code());
            info!(pid, code = ?code, "Server process exited");
            let _ = exit_tx.send(Some(ProcessExit { code }));
        });

        *self.running.lock() = Some(Running {
            pid,
            kill,
            exit: exit_rx,
        });
        debug!(pid, command = %command, "Spawned server process");
        Ok(line_rx)
    }

    /// Returns `true` while the spawned process has not exited.
    pub fn is_alive(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| r.exited().is_none())
    }

    /// Process id of the live process.
    pub fn pid(&self) -> Option<u32> {
        self.running
            .lock()
            .as_ref()
            .filter(|r| r.exited().is_none())
            .and_then(|r| r.pid)
    }

    /// Writes one line to the server's stdin.
    ///
    /// Writers are serialized so concurrent lines never interleave.
    pub async fn write(&self, line: &str) -> ProcessResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ProcessError::NotRunning)?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        let result = async {
            stdin.write_all(&buf).await?;
            stdin.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                *guard = None;
                Err(ProcessError::StdinClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes an info's raw text unless it was cancelled.
    ///
    /// Returns whether the line was written.
    pub async fn forward(&self, info: &Info) -> ProcessResult<bool> {
        if info.is_cancelled() {
            debug!(id = info.id(), "Info cancelled, not forwarding");
            return Ok(false);
        }
        self.write(info.raw()).await?;
        Ok(true)
    }

    /// Waits up to `timeout` for the process to exit.
    ///
    /// Returns `None` if it is still running, or if no process was started.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ProcessExit> {
        let mut exit = self.running.lock().as_ref()?.exit.clone();
        wait_exit(&mut exit, timeout).await
    }

    /// Waits until the current process, if any, has exited.
    pub async fn wait_stopped(&self) {
        let exit = self.running.lock().as_ref().map(|r| r.exit.clone());
        if let Some(mut exit) = exit {
            let _ = exit.wait_for(Option::is_some).await;
        }
    }

    /// Terminates the process.
    ///
    /// Sends SIGTERM (a kill on other platforms), waits up to `timeout`, then
    /// kills the process and waits [`KILL_GRACE`] more.
    pub async fn stop(&self, timeout: Duration) -> ProcessResult<ProcessExit> {
        let (pid, kill, mut exit) = {
            let running = self.running.lock();
            match running.as_ref() {
                Some(r) if r.exited().is_none() => (r.pid, r.kill.clone(), r.exit.clone()),
                _ => return Err(ProcessError::NotRunning),
            }
        };

        terminate(pid, &kill);
        if let Some(code) = wait_exit(&mut exit, timeout).await {
            self.stdin.lock().await.take();
            return Ok(code);
        }

        warn!(pid, timeout = ?timeout, "Server did not stop in time, killing it");
        kill.notify_one();
        match wait_exit(&mut exit, KILL_GRACE).await {
            Some(code) => {
                self.stdin.lock().await.take();
                Ok(code)
            }
            None => Err(ProcessError::StillRunning { pid }),
        }
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut() {
            running.kill.notify_one();
        }
    }
}

impl std::fmt::Debug for ProcessBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBridge")
            .field("command", &self.config.command)
            .field("pid", &self.pid())
            .finish()
    }
}

async fn wait_exit(
    exit: &mut watch::Receiver<Option<ProcessExit>>,
    timeout: Duration,
) -> Option<ProcessExit> {
    let waited = tokio::time::timeout(timeout, exit.wait_for(Option::is_some))
        .await
        .map(|r| r.map(|state| *state));
    match waited {
        Ok(Ok(state)) => state,
        // Monitor gone: report whatever it last published.
        Ok(Err(_)) => *exit.borrow(),
        Err(_) => None,
    }
}

/// The pid to signal, if it names exactly one process.
///
/// Zero and anything that would wrap to a negative `pid_t` address a whole
/// process group, which includes the daemon itself.
#[cfg(unix)]
fn signal_target(pid: Option<u32>) -> Option<libc::pid_t> {
    pid.and_then(|pid| libc::pid_t::try_from(pid).ok())
        .filter(|pid| *pid > 0)
}

#[cfg(unix)]
fn terminate(pid: Option<u32>, kill: &Notify) {
    use libc::SIGTERM;

    let Some(target) = signal_target(pid) else {
        warn!(pid, "No usable process id, killing the server instead");
        kill.notify_one();
        return;
    };
    // SAFETY: `kill(2)` is memory-safe even when the PID is stale; the call
    // only sends a signal.
    let result = unsafe { libc::kill(target, SIGTERM) };
    if result != 0 {
        warn!(pid = target, error = %io::Error::last_os_error(), "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>, kill: &Notify) {
    kill.notify_one();
}

async fn read_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read server output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::info::{InfoSource, ParsedFields};

    fn sh(script: &str) -> ProcessBridge {
        ProcessBridge::new(ProcessConfig::new("sh").arg("-c").arg(script))
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let bridge = ProcessBridge::new(ProcessConfig::new("cat"));
        let mut lines = bridge.start().await.unwrap();
        assert!(bridge.is_alive());
        assert!(bridge.pid().is_some());

        bridge.write("hello").await.unwrap();
        assert_eq!(lines.recv().await.as_deref(), Some("hello"));

        bridge.stop(Duration::from_secs(5)).await.unwrap();
        assert!(!bridge.is_alive());
        assert_eq!(lines.recv().await, None);
    }

    #[tokio::test]
    async fn test_forward_skips_cancelled_info() {
        let bridge = ProcessBridge::new(ProcessConfig::new("cat"));
        let mut lines = bridge.start().await.unwrap();

        let dropped = Info::new(1, InfoSource::Console, "first".into(), ParsedFields::default());
        dropped.cancel();
        let kept = Info::new(2, InfoSource::Console, "second".into(), ParsedFields::default());

        assert!(!bridge.forward(&dropped).await.unwrap());
        assert!(bridge.forward(&kept).await.unwrap());
        assert_eq!(lines.recv().await.as_deref(), Some("second"));

        bridge.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_combined_output_and_exit_code() {
        let bridge = sh("echo out; echo err 1>&2; printf 'bad \\377 byte\\n'; exit 3");
        let mut lines = bridge.start().await.unwrap();

        let mut seen = HashSet::new();
        while let Some(line) = lines.recv().await {
            seen.insert(line);
        }
        assert!(seen.contains("out"));
        assert!(seen.contains("err"));
        assert!(seen.contains("bad \u{FFFD} byte"));

        let exit = bridge.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!bridge.is_alive());
    }

    #[tokio::test]
    async fn test_start_errors() {
        let missing = ProcessBridge::new(ProcessConfig::new("/definitely/not/a/server"));
        assert!(matches!(
            missing.start().await,
            Err(ProcessError::BinaryNotFound { .. })
        ));

        let bad_dir = ProcessBridge::new(ProcessConfig::new("cat").working_dir("/no/such/dir"));
        assert!(matches!(
            bad_dir.start().await,
            Err(ProcessError::StartFailed { .. })
        ));

        let bridge = ProcessBridge::new(ProcessConfig::new("cat"));
        let _lines = bridge.start().await.unwrap();
        assert!(matches!(bridge.start().await, Err(ProcessError::AlreadyRunning)));
        bridge.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let bridge = sh("trap '' TERM; exec sleep 30");
        let _lines = bridge.start().await.unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let exit = bridge.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(exit.code, None);
        assert!(!bridge.is_alive());
    }

    #[tokio::test]
    async fn test_wait_stopped() {
        let bridge = sh("read -r _; exit 0");
        tokio::time::timeout(Duration::from_millis(100), bridge.wait_stopped())
            .await
            .expect("no process to wait for");

        let _lines = bridge.start().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(100), bridge.wait_stopped()).await;
        assert!(waiting.is_err());

        bridge.write("go").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), bridge.wait_stopped())
            .await
            .expect("process did not exit");
        assert!(!bridge.is_alive());
    }

    #[test]
    fn test_signal_target_never_addresses_a_group() {
        assert_eq!(signal_target(Some(4242)), Some(4242));
        assert_eq!(signal_target(None), None);
        assert_eq!(signal_target(Some(0)), None);
        assert_eq!(signal_target(Some(u32::MAX)), None);
    }

    #[tokio::test]
    async fn test_terminate_without_pid_falls_back_to_kill() {
        let kill = Notify::new();
        terminate(None, &kill);
        terminate(Some(0), &kill);
        // The stored permit is what the monitor task turns into `start_kill`.
        tokio::time::timeout(Duration::from_millis(100), kill.notified())
            .await
            .expect("kill path was not taken");
    }

    #[tokio::test]
    async fn test_operations_without_process() {
        let bridge = ProcessBridge::new(ProcessConfig::new("cat"));
        assert!(matches!(bridge.write("x").await, Err(ProcessError::NotRunning)));
        assert!(matches!(
            bridge.stop(Duration::from_millis(10)).await,
            Err(ProcessError::NotRunning)
        ));
        assert!(bridge.wait_for_exit(Duration::from_millis(10)).await.is_none());
    }
}
