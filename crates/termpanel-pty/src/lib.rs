//! PTY session management for termpanel.
//!
//! A session runs the user's shell under a PTY-allocating helper process and
//! talks to it over four streams: stdin, stdout, stderr, and a duplex control
//! socket on fd 3 that carries window-size records.
//!
//! Unix only.

pub mod capture;
pub mod control;
pub mod decoder;
pub mod env;
pub mod error;
pub mod helper;
pub mod session;
pub mod shell;

pub use capture::CaptureEvent;
pub use control::ResizeMessage;
pub use decoder::Utf8Decoder;
pub use env::{build_environment, EnvOverrides, HostEnv};
pub use error::PtyError;
pub use session::{HelperCommand, PtySession, SessionEvent, SessionOptions, SessionState};
pub use shell::{default_shell, detect_available_shells, resolve_cwd, resolve_shell, ShellInfo};
