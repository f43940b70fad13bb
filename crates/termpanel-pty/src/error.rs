use thiserror::Error;

/// Errors that can occur while driving a PTY session.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to spawn PTY helper: {0}")]
    Spawn(String),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Invalid terminal size {cols}x{rows}: both must be within 1..=65535")]
    InvalidSize { cols: u32, rows: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_error_display() {
        let err = PtyError::Spawn("no such file".to_string());
        assert_eq!(err.to_string(), "Failed to spawn PTY helper: no such file");

        let err = PtyError::AlreadyStarted;
        assert_eq!(err.to_string(), "Session already started");

        let err = PtyError::InvalidSize { cols: 70000, rows: 24 };
        assert_eq!(
            err.to_string(),
            "Invalid terminal size 70000x24: both must be within 1..=65535"
        );
    }
}
