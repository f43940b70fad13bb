//! Capture events for PTY session activity.
//!
//! A flat record of what happened in a session: start, decoded output, user
//! input, resizes, and exit. Hosts can persist these as a transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Event recorded during PTY session activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// The helper process was spawned.
    SessionStart {
        session_id: Uuid,
        shell: PathBuf,
        working_directory: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// Decoded text received from the shell.
    Output {
        session_id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// Text forwarded to the shell.
    Input {
        session_id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A resize record was sent on the control channel.
    Resize {
        session_id: Uuid,
        cols: u16,
        rows: u16,
        timestamp: DateTime<Utc>,
    },

    /// The helper process exited.
    SessionEnd {
        session_id: Uuid,
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
}

impl CaptureEvent {
    pub fn session_start(
        session_id: Uuid,
        shell: impl Into<PathBuf>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self::SessionStart {
            session_id,
            shell: shell.into(),
            working_directory: working_directory.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn output(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::Output {
            session_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn input(session_id: Uuid, text: impl Into<String>) -> Self {
        Self::Input {
            session_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn resize(session_id: Uuid, cols: u16, rows: u16) -> Self {
        Self::Resize {
            session_id,
            cols,
            rows,
            timestamp: Utc::now(),
        }
    }

    pub fn session_end(session_id: Uuid, exit_code: i32) -> Self {
        Self::SessionEnd {
            session_id,
            exit_code,
            timestamp: Utc::now(),
        }
    }

    /// Get the session ID from any event variant.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::Output { session_id, .. }
            | Self::Input { session_id, .. }
            | Self::Resize { session_id, .. }
            | Self::SessionEnd { session_id, .. } => *session_id,
        }
    }

    /// Get the timestamp from any event variant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionStart { timestamp, .. }
            | Self::Output { timestamp, .. }
            | Self::Input { timestamp, .. }
            | Self::Resize { timestamp, .. }
            | Self::SessionEnd { timestamp, .. } => *timestamp,
        }
    }
}
