//! PTY session management.
//!
//! A [`PtySession`] launches a helper process that owns the real PTY and
//! execs the shell inside it. The session talks to the helper over piped
//! stdin/stdout/stderr plus a Unix socket installed as fd 3, which carries
//! [`ResizeMessage`] records.
//!
//! Every stream gets its own tokio task. A supervisor task owns the child
//! process, waits for it to exit (or for a kill request), lets the output pump
//! drain, and then fires the exit callback exactly once.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{self, Signal};
use nix::unistd::{dup2, Pid};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::control::ResizeMessage;
use crate::decoder::Utf8Decoder;
use crate::env::{build_environment, EnvOverrides, HostEnv};
use crate::error::PtyError;
use crate::shell::{resolve_cwd, resolve_shell};

/// Descriptor number of the control socket inside the helper.
pub const CONTROL_FD: RawFd = 3;

/// Read size for helper stdout.
const READ_BUF_SIZE: usize = 32 * 1024;

/// How long a helper gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// How long to wait for buffered output after the helper has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Program and leading arguments used to launch the PTY helper.
///
/// The resolved shell path is appended as the final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The built-in helper: this executable's `pty-helper` subcommand.
    pub fn current_exe() -> Result<Self, PtyError> {
        let exe = std::env::current_exe()
            .map_err(|e| PtyError::Spawn(format!("cannot locate current executable: {e}")))?;
        Ok(Self::new(exe).arg("pty-helper"))
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub helper: HelperCommand,
    /// Shell override; `$SHELL` or the platform fallback otherwise.
    pub shell: Option<PathBuf>,
    /// Working directory override; `$HOME` or the current directory otherwise.
    pub cwd: Option<PathBuf>,
    pub env: EnvOverrides,
    /// Environment snapshot to resolve against. Captured at start when unset.
    pub host_env: Option<HostEnv>,
}

impl SessionOptions {
    pub fn new(helper: HelperCommand) -> Self {
        Self {
            helper,
            shell: None,
            cwd: None,
            env: EnvOverrides::default(),
            host_env: None,
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn host_env(mut self, host_env: HostEnv) -> Self {
        self.host_env = Some(host_env);
        self
    }
}

/// Session output, for hosts that consume events from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded shell output, in arrival order.
    Data(String),
    /// Helper exit status. Always the last event.
    Exit(i32),
}

/// Lifecycle of a session. A session never goes back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Dead,
}

struct LiveProcess {
    pid: Option<u32>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    control: mpsc::UnboundedSender<ResizeMessage>,
    kill: oneshot::Sender<()>,
    exited: Arc<AtomicBool>,
}

enum Slot {
    Idle,
    Running(LiveProcess),
    Dead,
}

/// One shell running under a PTY helper.
pub struct PtySession {
    id: Uuid,
    options: SessionOptions,
    shell: Option<PathBuf>,
    cwd: Option<PathBuf>,
    environment: BTreeMap<String, String>,
    slot: Slot,
}

impl PtySession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            shell: None,
            cwd: None,
            environment: BTreeMap::new(),
            slot: Slot::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        match &self.slot {
            Slot::Idle => SessionState::Idle,
            Slot::Running(live) if live.exited.load(Ordering::SeqCst) => SessionState::Dead,
            Slot::Running(_) => SessionState::Running,
            Slot::Dead => SessionState::Dead,
        }
    }

    /// True while the helper is running and has not been killed.
    pub fn is_alive(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Resolved shell, available once started.
    pub fn shell(&self) -> Option<&Path> {
        self.shell.as_deref()
    }

    /// Resolved working directory, available once started.
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Environment the helper was launched with.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.slot {
            Slot::Running(live) => live.pid,
            _ => None,
        }
    }

    /// Spawn the helper and start streaming.
    ///
    /// `on_data` receives decoded output chunks in order. `on_exit` runs once
    /// with the exit status after the last `on_data` call. Both run on tokio
    /// tasks, so this must be called from within a runtime.
    pub fn start<D, E>(&mut self, on_data: D, on_exit: E) -> Result<(), PtyError>
    where
        D: FnMut(String) + Send + 'static,
        E: FnOnce(i32) + Send + 'static,
    {
        if !matches!(self.slot, Slot::Idle) {
            return Err(PtyError::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PtyError::Spawn(format!("no tokio runtime: {e}")))?;

        let host = match &self.options.host_env {
            Some(host) => host.clone(),
            None => HostEnv::capture(),
        };
        let shell = resolve_shell(self.options.shell.as_deref(), &host);
        let cwd = resolve_cwd(self.options.cwd.as_deref(), &host);
        let environment = build_environment(&host, &shell, &self.options.env);

        let spawned = spawn_helper(&self.options.helper, &shell, &cwd, &environment)?;
        let pid = spawned.child.id();

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));

        let id = self.id;
        runtime.spawn(write_input(id, spawned.stdin, input_rx));
        runtime.spawn(write_control(id, spawned.control, control_rx));
        runtime.spawn(drain_stderr(id, spawned.stderr));
        let pump = runtime.spawn(pump_output(id, spawned.stdout, on_data));
        runtime.spawn(supervise(
            id,
            spawned.child,
            pump,
            kill_rx,
            Arc::clone(&exited),
            on_exit,
        ));

        tracing::info!(
            session = %id,
            pid = ?pid,
            shell = %shell.display(),
            cwd = %cwd.display(),
            "PTY session started"
        );

        self.shell = Some(shell);
        self.cwd = Some(cwd);
        self.environment = environment;
        self.slot = Slot::Running(LiveProcess {
            pid,
            input: input_tx,
            control: control_tx,
            kill: kill_tx,
            exited,
        });
        Ok(())
    }

    /// Start and deliver output and exit as [`SessionEvent`]s on a channel.
    pub fn start_channel(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, PtyError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let exit_tx = tx.clone();
        self.start(
            move |text| {
                let _ = tx.send(SessionEvent::Data(text));
            },
            move |code| {
                let _ = exit_tx.send(SessionEvent::Exit(code));
            },
        )?;
        Ok(rx)
    }

    /// Send text to the shell. Ignored unless the session is running.
    pub fn write(&self, text: &str) {
        if let Slot::Running(live) = &self.slot {
            if live.input.send(text.as_bytes().to_vec()).is_err() {
                tracing::trace!(session = %self.id, "Input dropped: helper stdin closed");
            }
        }
    }

    /// Send a window size to the helper.
    ///
    /// Sizes outside `1..=65535` are rejected even when the session is not
    /// running. Delivery is best effort: a record sent while the control
    /// channel is closing is lost.
    pub fn resize(&self, cols: u32, rows: u32) -> Result<(), PtyError> {
        let msg = ResizeMessage::checked(cols, rows)?;
        if let Slot::Running(live) = &self.slot {
            if live.control.send(msg).is_err() {
                tracing::debug!(session = %self.id, "Resize dropped: control channel closed");
            }
        }
        Ok(())
    }

    /// Terminate the helper without waiting for it. Idempotent.
    ///
    /// The exit callback still fires once the process is reaped. Later
    /// `write` and `resize` calls do nothing.
    pub fn kill(&mut self) {
        if let Slot::Running(live) = std::mem::replace(&mut self.slot, Slot::Dead) {
            let _ = live.kill.send(());
            tracing::info!(session = %self.id, pid = ?live.pid, "PTY session killed");
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("shell", &self.shell)
            .field("pid", &self.pid())
            .finish()
    }
}

struct Spawned {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    control: UnixStream,
}

/// Launch `<helper> <args..> <shell>` with the control socket on fd 3.
///
/// Any failure after the process exists kills it before returning.
fn spawn_helper(
    helper: &HelperCommand,
    shell: &Path,
    cwd: &Path,
    environment: &BTreeMap<String, String>,
) -> Result<Spawned, PtyError> {
    let (parent_end, child_end) = std::os::unix::net::UnixStream::pair()
        .map_err(|e| PtyError::Spawn(format!("failed to create control socket: {e}")))?;
    let child_fd = child_end.as_raw_fd();

    let mut cmd = Command::new(&helper.program);
    cmd.args(&helper.args)
        .arg(shell)
        .current_dir(cwd)
        .env_clear()
        .envs(environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: runs between fork and exec; dup2 and fcntl are async-signal-safe
    // and the closure allocates nothing.
    unsafe {
        cmd.pre_exec(move || install_control_fd(child_fd));
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| PtyError::Spawn(format!("{}: {e}", helper.program.display())))?;
    drop(child_end);

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        abandon(&mut child);
        return Err(PtyError::Spawn(
            "helper stdio handles unavailable after spawn".into(),
        ));
    };

    let control = match parent_end
        .set_nonblocking(true)
        .and_then(|()| UnixStream::from_std(parent_end))
    {
        Ok(control) => control,
        Err(e) => {
            abandon(&mut child);
            return Err(PtyError::Spawn(format!(
                "failed to register control socket: {e}"
            )));
        }
    };

    Ok(Spawned {
        child,
        stdin,
        stdout,
        stderr,
        control,
    })
}

/// Put the inherited socket at fd 3 without close-on-exec.
fn install_control_fd(fd: RawFd) -> io::Result<()> {
    if fd == CONTROL_FD {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(fd, CONTROL_FD)?;
    }
    Ok(())
}

// Only reachable when tokio cannot register a freshly created socket or the
// stdio pipes vanish after spawn, neither of which a test can provoke.
fn abandon(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill half-started helper");
    }
}

/// Exit code, or `128 + signal` for a signalled process, or 0.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(0)
}

async fn pump_output<D>(session: Uuid, mut stdout: ChildStdout, mut on_data: D)
where
    D: FnMut(String),
{
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    on_data(text);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Helper output read failed");
                break;
            }
        }
    }
    if decoder.has_pending() {
        tracing::debug!(session = %session, "Output ended inside a UTF-8 sequence");
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        on_data(tail);
    }
}

async fn write_input(
    session: Uuid,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        let result = match stdin.write_all(&bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log_stream_error(session, "stdin", &e);
            break;
        }
    }
}

async fn write_control(
    session: Uuid,
    mut control: UnixStream,
    mut rx: mpsc::UnboundedReceiver<ResizeMessage>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = control.write_all(&msg.encode()).await {
            log_stream_error(session, "control", &e);
            break;
        }
        tracing::debug!(session = %session, cols = msg.cols, rows = msg.rows, "Resize sent");
    }
}

async fn drain_stderr(session: Uuid, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                tracing::debug!(session = %session, "helper: {}", text.trim_end());
            }
            Err(e) => {
                tracing::debug!(session = %session, error = %e, "Helper stderr closed");
                break;
            }
        }
    }
}

fn log_stream_error(session: Uuid, stream: &str, err: &io::Error) {
    if err.kind() == io::ErrorKind::BrokenPipe {
        tracing::debug!(session = %session, stream, "Helper closed {stream}");
    } else {
        tracing::warn!(session = %session, stream, error = %err, "Write to helper failed");
    }
}

async fn supervise<E>(
    session: Uuid,
    mut child: Child,
    mut pump: JoinHandle<()>,
    kill_rx: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
    on_exit: E,
) where
    E: FnOnce(i32),
{
    // A dropped kill sender means the session itself is gone.
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let status = match waited {
        Some(status) => status,
        None => terminate(session, &mut child).await,
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(session = %session, error = %e, "Failed to reap helper");
            0
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
        tracing::debug!(session = %session, "Output still open after exit, discarding");
        pump.abort();
        let _ = pump.await;
    }

    exited.store(true, Ordering::SeqCst);
    tracing::info!(session = %session, code, "PTY session exited");
    on_exit(code);
}

async fn terminate(session: Uuid, child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(session = %session, pid, error = %e, "SIGTERM failed");
        }
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(session = %session, "Helper ignored SIGTERM, sending SIGKILL");
            child.kill().await?;
            child.wait().await
        }
    }
}
