use termpanel_pty::PtyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_error_converts() {
        let err: HostError = PtyError::AlreadyStarted.into();
        assert!(matches!(err, HostError::Pty(PtyError::AlreadyStarted)));
        assert_eq!(err.to_string(), "PTY error: Session already started");
    }
}
