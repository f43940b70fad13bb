pub mod config;
pub mod error;
pub mod host;
pub mod transcript;

pub use config::AppConfig;
pub use error::HostError;
pub use host::{exit_notice, HostEvent, TerminalHost, TerminalWidget};
pub use transcript::TranscriptWriter;
