use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use termpanel_pty::{EnvOverrides, HelperCommand, SessionOptions};

use crate::error::{HostError, Result};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub shell: ShellConfig,
    pub helper: HelperConfig,
    pub environment: EnvironmentConfig,
    pub terminal: TerminalConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from default path (~/.config/termpanel/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termpanel")
            .join("config.toml")
    }

    /// Data directory for logs and transcripts.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termpanel")
    }

    /// Log file used while the terminal is in raw mode.
    pub fn log_file(&self) -> PathBuf {
        self.logging
            .file
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("termpanel.log"))
    }

    /// Build session options, falling back to the built-in helper.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let helper = match &self.helper.program {
            Some(program) => HelperCommand {
                program: program.clone(),
                args: self.helper.args.clone(),
            },
            None if self.helper.args.is_empty() => HelperCommand::current_exe()?,
            None => {
                return Err(HostError::Config(
                    "helper.args is set but helper.program is not".into(),
                ))
            }
        };

        let mut options = SessionOptions::new(helper).env(EnvOverrides {
            term_program: self.environment.term_program.clone(),
            extra_paths: self.environment.extra_paths.clone(),
            vars: self.environment.vars.clone(),
        });
        options.shell = self.shell.program.clone();
        options.cwd = self.shell.cwd.clone();
        Ok(options)
    }
}

/// Which shell to run, and where.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell executable. Defaults to `$SHELL`.
    pub program: Option<PathBuf>,
    /// Starting directory. Defaults to `$HOME`.
    pub cwd: Option<PathBuf>,
}

/// PTY helper invocation. The shell path is appended to `args`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Helper program, e.g. `python3`. Unset means the built-in helper.
    pub program: Option<PathBuf>,
    /// Arguments before the shell path, e.g. a helper script.
    pub args: Vec<String>,
}

/// Child environment tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Value of `TERM_PROGRAM` in the shell.
    pub term_program: String,
    /// Extra `PATH` directories, searched before the inherited `PATH`.
    pub extra_paths: Vec<String>,
    /// Variables set last, overriding everything else.
    pub vars: BTreeMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        let defaults = EnvOverrides::default();
        Self {
            term_program: defaults.term_program,
            extra_paths: defaults.extra_paths,
            vars: defaults.vars,
        }
    }
}

/// Terminal behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Size assumed when the real terminal size is unknown.
    pub cols: u16,
    pub rows: u16,
    /// Command typed into the shell once it has had time to start.
    pub initial_command: Option<String>,
    pub initial_command_delay_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            initial_command: None,
            initial_command_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file path. Defaults to `<data_dir>/termpanel/termpanel.log`.
    pub file: Option<PathBuf>,
}
