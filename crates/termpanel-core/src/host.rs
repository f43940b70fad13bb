//! Terminal host adapter.
//!
//! Glue between a terminal-emulation widget and a [`PtySession`]. The widget
//! is a black box: it renders text handed to [`TerminalWidget::write`] and
//! reports user input and size changes, which the host forwards to the
//! session. Session output is consumed from a channel so the whole adapter
//! runs on the host's own loop.

use termpanel_pty::{CaptureEvent, PtySession, SessionEvent, SessionOptions};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::transcript::TranscriptWriter;

/// Render sink of a terminal emulator.
pub trait TerminalWidget {
    /// Feed raw terminal output (including escape sequences) to the emulator.
    fn write(&mut self, text: &str);
}

/// What [`TerminalHost::next_event`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Output was rendered.
    Output,
    /// The shell exited and the notice was rendered.
    Exited(i32),
}

/// Notice rendered after the shell exits.
pub fn exit_notice(code: i32) -> String {
    format!("\r\n\x1b[1;31mProcess exited with code {code}\x1b[0m\r\n")
}

/// One terminal panel: a widget wired to a PTY session.
pub struct TerminalHost<W: TerminalWidget> {
    session: PtySession,
    widget: W,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    size: Option<(u16, u16)>,
    transcript: Option<TranscriptWriter>,
}

impl<W: TerminalWidget> TerminalHost<W> {
    pub fn new(options: SessionOptions, widget: W) -> Self {
        Self {
            session: PtySession::new(options),
            widget,
            events: None,
            size: None,
            transcript: None,
        }
    }

    /// Record session activity to `transcript`.
    pub fn with_transcript(mut self, transcript: TranscriptWriter) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn session(&self) -> &PtySession {
        &self.session
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    /// Start the shell.
    pub fn open(&mut self) -> Result<()> {
        let events = self.session.start_channel()?;
        self.events = Some(events);

        let id = self.session.id();
        let shell = self.session.shell().map(|p| p.to_path_buf()).unwrap_or_default();
        let cwd = self.session.cwd().map(|p| p.to_path_buf()).unwrap_or_default();
        self.record(CaptureEvent::session_start(id, shell, cwd));
        Ok(())
    }

    /// Forward user input from the widget.
    pub fn handle_input(&mut self, text: &str) {
        self.session.write(text);
        let id = self.session.id();
        self.record(CaptureEvent::input(id, text));
    }

    /// Forward a widget size change. Repeats of the current size are dropped.
    pub fn handle_resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        if self.size == Some((cols, rows)) {
            return Ok(());
        }
        self.session.resize(u32::from(cols), u32::from(rows))?;
        self.size = Some((cols, rows));

        let id = self.session.id();
        self.record(CaptureEvent::resize(id, cols, rows));
        Ok(())
    }

    /// Type `command` into the shell and press enter.
    pub fn execute_command(&mut self, command: &str) {
        self.handle_input(&format!("{command}\r"));
    }

    /// Wait for the next session event and render it.
    ///
    /// Returns `None` once the session has exited or was never opened.
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        let events = self.events.as_mut()?;
        let event = events.recv().await;
        let id = self.session.id();
        match event {
            Some(SessionEvent::Data(text)) => {
                self.widget.write(&text);
                self.record(CaptureEvent::output(id, text));
                Some(HostEvent::Output)
            }
            Some(SessionEvent::Exit(code)) => {
                self.widget.write(&exit_notice(code));
                self.record(CaptureEvent::session_end(id, code));
                self.events = None;
                Some(HostEvent::Exited(code))
            }
            None => {
                self.events = None;
                None
            }
        }
    }

    /// Kill the shell. The exit notice still arrives through `next_event`.
    pub fn close(&mut self) {
        self.session.kill();
    }

    fn record(&mut self, event: CaptureEvent) {
        let Some(transcript) = self.transcript.as_mut() else {
            return;
        };
        if let Err(e) = transcript.record(&event) {
            tracing::warn!(
                path = %transcript.path().display(),
                error = %e,
                "Transcript write failed, recording disabled"
            );
            self.transcript = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_notice_format() {
        assert_eq!(
            exit_notice(0),
            "\r\n\x1b[1;31mProcess exited with code 0\x1b[0m\r\n"
        );
        assert!(exit_notice(130).contains("code 130"));
    }
}
