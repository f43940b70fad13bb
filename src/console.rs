//! Attach the controlling terminal to a session.
//!
//! The real terminal plays the emulator widget: shell output is written to
//! stdout untouched, raw stdin bytes are forwarded as input, and SIGWINCH
//! becomes a resize.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use termpanel_core::{AppConfig, HostEvent, TerminalHost, TerminalWidget, TranscriptWriter};
use termpanel_pty::Utf8Decoder;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Renders by writing straight to this process's stdout.
struct ConsoleWidget {
    out: std::io::Stdout,
}

impl TerminalWidget for ConsoleWidget {
    fn write(&mut self, text: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(error = %e, "Failed to write to terminal");
        }
    }
}

/// Raw mode for the lifetime of the guard, when stdin is a terminal.
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn enable() -> Result<Self> {
        if !std::io::stdin().is_terminal() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { enabled: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

fn terminal_size(config: &AppConfig) -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => (config.terminal.cols, config.terminal.rows),
    }
}

/// Forward stdin on a channel so reads never race the select loop.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "stdin closed");
                    break;
                }
            }
        }
    });
    rx
}

/// Run one session on this terminal. Returns the shell's exit code.
pub async fn run(config: AppConfig, record: Option<PathBuf>) -> Result<i32> {
    let options = config.session_options()?;
    let mut host = TerminalHost::new(
        options,
        ConsoleWidget {
            out: std::io::stdout(),
        },
    );
    if let Some(path) = record {
        host = host.with_transcript(TranscriptWriter::create(path)?);
    }

    let _raw = RawModeGuard::enable()?;
    host.open()?;
    let (cols, rows) = terminal_size(&config);
    host.handle_resize(cols, rows)?;

    let mut input = spawn_stdin_reader();
    let mut input_open = true;
    let mut decoder = Utf8Decoder::new();
    let mut winch = signal(SignalKind::window_change())?;

    let mut initial_command = config.terminal.initial_command.clone();
    let delay = tokio::time::sleep(Duration::from_millis(
        config.terminal.initial_command_delay_ms,
    ));
    tokio::pin!(delay);

    loop {
        tokio::select! {
            event = host.next_event() => match event {
                Some(HostEvent::Output) => {}
                Some(HostEvent::Exited(code)) => return Ok(code),
                None => return Ok(0),
            },
            bytes = input.recv(), if input_open => match bytes {
                Some(bytes) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        host.handle_input(&text);
                    }
                }
                None => {
                    tracing::info!("Input closed, stopping session");
                    input_open = false;
                    host.close();
                }
            },
            _ = winch.recv() => {
                let (cols, rows) = terminal_size(&config);
                if let Err(e) = host.handle_resize(cols, rows) {
                    tracing::warn!(error = %e, "Resize rejected");
                }
            },
            () = &mut delay, if initial_command.is_some() => {
                if let Some(command) = initial_command.take() {
                    tracing::debug!(command = %command, "Sending initial command");
                    host.execute_command(&command);
                }
            },
        }
    }
}
