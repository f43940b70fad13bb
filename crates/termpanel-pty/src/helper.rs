//! The PTY helper process.
//!
//! Runs as `termpanel pty-helper <shell>` with stdin/stdout piped to the
//! session and the control socket on fd 3. It opens a real PTY, execs the
//! shell as an interactive login shell inside it, and shuttles bytes:
//!
//! - PTY output → stdout
//! - stdin → PTY input (EOF kills the shell)
//! - 8-byte records on fd 3 → PTY window size
//!
//! PTY reads block, so each direction gets an OS thread.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::control::ResizeMessage;
use crate::env::PATH_PREFIX;
use crate::error::PtyError;
use crate::session::CONTROL_FD;

const SHELL_ARGS: &[&str] = &["-l", "-i"];
const BUF_SIZE: usize = 32 * 1024;

/// How long to keep forwarding output after the shell has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

const INITIAL_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Run the helper until the shell exits. Returns the shell's exit code.
pub fn run(shell: &Path) -> Result<i32, PtyError> {
    // Claim fd 3 before anything else can be allocated there.
    let control = claim_control_fd(CONTROL_FD);
    serve(shell, io::stdin(), io::stdout(), control)
}

/// Run `shell` in a fresh PTY wired to `input`, `output` and `control`.
fn serve<I, O, C>(shell: &Path, input: I, output: O, control: Option<C>) -> Result<i32, PtyError>
where
    I: Read + Send + 'static,
    O: Write + Send + 'static,
    C: Read + Send + 'static,
{
    let pair = native_pty_system()
        .openpty(INITIAL_SIZE)
        .map_err(|e| PtyError::Spawn(format!("failed to open PTY: {e}")))?;

    let mut cmd = CommandBuilder::new(shell);
    cmd.args(SHELL_ARGS);
    cmd.cwd(std::env::current_dir()?);
    cmd.env("TERM", "xterm-256color");
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", merge_path(&path));
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn(format!("failed to spawn {}: {e}", shell.display())))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Spawn(format!("failed to clone PTY reader: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Spawn(format!("failed to take PTY writer: {e}")))?;
    let master: SharedMaster = Arc::new(Mutex::new(pair.master));

    tracing::debug!(shell = %shell.display(), pid = ?child.process_id(), "Shell started");

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        copy_output(reader, output);
        let _ = done_tx.send(());
    });

    let reaped = Arc::new(AtomicBool::new(false));
    let mut killer = child.clone_killer();
    {
        let reaped = Arc::clone(&reaped);
        thread::spawn(move || {
            copy_input(input, writer);
            if reaped.load(Ordering::SeqCst) {
                return;
            }
            tracing::debug!("Input closed, stopping shell");
            if let Err(e) = killer.kill() {
                tracing::debug!(error = %e, "Shell already gone");
            }
        });
    }

    if let Some(control) = control {
        let master = Arc::clone(&master);
        thread::spawn(move || apply_resizes(control, &master));
    }

    let code = wait_for_shell(child.as_mut())?;
    reaped.store(true, Ordering::SeqCst);
    let _ = done_rx.recv_timeout(OUTPUT_DRAIN);
    tracing::debug!(code, "Shell exited");
    Ok(code)
}

/// Reap the shell. A signal death maps to `128 + signal`.
fn wait_for_shell(child: &mut (dyn Child + Send + Sync)) -> Result<i32, PtyError> {
    let Some(pid) = child.process_id() else {
        let status = child.wait()?;
        return Ok(i32::try_from(status.exit_code()).unwrap_or(1));
    };
    let pid = Pid::from_raw(pid as i32);
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = wait_status_code(status) {
                    return Ok(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e).into()),
        }
    }
}

fn wait_status_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
        _ => None,
    }
}

/// Take ownership of `fd` if the parent provided it, hiding it from the shell.
fn claim_control_fd(fd: RawFd) -> Option<File> {
    match fcntl(fd, FcntlArg::F_GETFD) {
        Ok(_) => {
            if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
                tracing::debug!(error = %e, "Could not mark control fd close-on-exec");
            }
            // SAFETY: `fd` is open and nothing else in this process refers to it.
            Some(unsafe { File::from_raw_fd(fd) })
        }
        Err(_) => {
            tracing::debug!(fd, "No control channel, resizes disabled");
            None
        }
    }
}

/// Required directories first, then inherited entries, without duplicates.
pub fn merge_path(existing: &str) -> String {
    let mut seen = HashSet::new();
    PATH_PREFIX
        .iter()
        .copied()
        .chain(existing.split(':'))
        .filter(|dir| !dir.is_empty() && seen.insert(*dir))
        .collect::<Vec<_>>()
        .join(":")
}

fn copy_output<R: Read, W: Write>(mut pty: R, mut out: W) {
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match pty.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if out.write_all(&buf[..n]).and_then(|()| out.flush()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EIO once the slave side is gone.
            Err(_) => break,
        }
    }
}

fn copy_input<R: Read, W: Write>(mut input: R, mut pty: W) {
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if pty.write_all(&buf[..n]).and_then(|()| pty.flush()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Apply window-size records until the control channel closes.
///
/// A trailing partial record is dropped.
fn apply_resizes<R: Read>(mut control: R, master: &Mutex<Box<dyn MasterPty + Send>>) {
    let mut buf = [0u8; ResizeMessage::LEN];
    loop {
        if let Err(e) = control.read_exact(&mut buf) {
            if e.kind() != io::ErrorKind::UnexpectedEof {
                tracing::debug!(error = %e, "Control channel failed");
            }
            break;
        }
        let msg = ResizeMessage::decode(&buf);
        let size = PtySize {
            rows: msg.rows,
            cols: msg.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let master = master.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match master.resize(size) {
            Ok(()) => tracing::debug!(cols = msg.cols, rows = msg.rows, "PTY resized"),
            Err(e) => tracing::warn!(error = %e, "PTY resize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use std::os::fd::IntoRawFd;
    use std::os::unix::net::UnixStream;

    /// Output sink the test can read while the helper threads write to it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_serve_runs_login_shell_and_reports_exit_code() {
        let (mut control_tx, control_rx) = UnixStream::pair().unwrap();
        control_tx
            .write_all(&ResizeMessage::new(132, 43).encode())
            .unwrap();
        drop(control_tx);

        // Typed after the resize has landed; the stream stays open so EOF
        // cannot hang up the shell before `exit 7` runs.
        let (mut input_tx, input_rx) = UnixStream::pair().unwrap();
        let typist = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            input_tx
                .write_all(b"case $- in *i*) echo I=$((1+1));; esac\n")
                .unwrap();
            input_tx
                .write_all(b"tr '\\0' ' ' < /proc/$$/cmdline; echo\n")
                .unwrap();
            input_tx.write_all(b"stty size\nexit 7\n").unwrap();
            input_tx
        });

        let output = SharedBuf::default();
        let code = serve(Path::new("/bin/sh"), input_rx, output.clone(), Some(control_rx)).unwrap();
        drop(typist.join().unwrap());

        assert_eq!(code, 7);
        let text = output.text();
        assert!(text.contains("I=2"), "shell not interactive: {text:?}");
        assert!(text.contains("43 132"), "resize not applied: {text:?}");
        if cfg!(target_os = "linux") {
            assert!(text.contains("/bin/sh -l -i"), "unexpected argv: {text:?}");
        }
    }

    #[test]
    fn test_input_eof_hangs_up_shell() {
        let code = serve(
            Path::new("/bin/sh"),
            io::empty(),
            SharedBuf::default(),
            None::<File>,
        )
        .unwrap();
        assert_eq!(code, 128 + Signal::SIGHUP as i32);
    }

    #[test]
    fn test_shell_killed_by_signal_reports_128_plus_signal() {
        let (mut input_tx, input_rx) = UnixStream::pair().unwrap();
        input_tx.write_all(b"kill -9 $$\n").unwrap();

        let code = serve(
            Path::new("/bin/sh"),
            input_rx,
            SharedBuf::default(),
            None::<File>,
        )
        .unwrap();
        drop(input_tx);
        assert_eq!(code, 128 + 9);
    }

    #[test]
    fn test_wait_status_code() {
        let pid = Pid::from_raw(1);
        assert_eq!(wait_status_code(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            wait_status_code(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some(128 + 15)
        );
        assert_eq!(
            wait_status_code(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            None
        );
    }

    #[test]
    fn test_claim_control_fd_sets_cloexec() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let fd = rx.into_raw_fd();
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).unwrap();

        let mut control = claim_control_fd(fd).unwrap();
        let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
        assert!(flags.contains(FdFlag::FD_CLOEXEC));

        tx.write_all(b"x").unwrap();
        let mut byte = [0u8; 1];
        control.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"x");
    }

    #[test]
    fn test_claim_control_fd_missing() {
        assert!(claim_control_fd(-1).is_none());
    }

    #[test]
    fn test_merge_path_prefix_first_and_deduplicated() {
        let merged = merge_path("/home/u/bin:/usr/bin::/bin:/home/u/bin");
        assert_eq!(
            merged,
            "/usr/local/bin:/opt/homebrew/bin:/usr/bin:/bin:/usr/sbin:/sbin:/home/u/bin"
        );
    }

    #[test]
    fn test_copy_output_forwards_until_eof() {
        let mut out = Vec::new();
        copy_output(&b"prompt$ ls\r\n"[..], &mut out);
        assert_eq!(out, b"prompt$ ls\r\n");
    }

    #[test]
    fn test_control_records_resize_pty() {
        let pair = native_pty_system().openpty(INITIAL_SIZE).unwrap();
        let master = Mutex::new(pair.master);

        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(&ResizeMessage::new(100, 30).encode()).unwrap();
        tx.write_all(&ResizeMessage::new(132, 43).encode()).unwrap();
        // Trailing partial record is ignored.
        tx.write_all(&[1, 0, 1]).unwrap();
        drop(tx);

        apply_resizes(rx, &master);

        let size = master.lock().unwrap().get_size().unwrap();
        assert_eq!((size.cols, size.rows), (132, 43));
    }
}
