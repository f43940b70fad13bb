//! Child environment construction.
//!
//! The helper never inherits the host environment directly. Each start builds
//! a fresh map from a [`HostEnv`] snapshot: inherited variables first, then a
//! rebuilt `PATH`, then the terminal overrides, which always win.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directories placed ahead of the inherited `PATH`.
pub const PATH_PREFIX: &[&str] = &[
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Per-user tool directories, relative to `HOME`.
pub const HOME_PATH_DIRS: &[&str] = &[".npm-global/bin", ".yarn/bin"];

const DEFAULT_LOCALE: &str = "en_US.UTF-8";

/// Variables copied from the host only when present there.
const PASSTHROUGH: &[&str] = &["HOME", "USER", "LOGNAME"];

/// Snapshot of the host process environment.
///
/// Only defined, non-empty, UTF-8 variables are kept.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    vars: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl HostEnv {
    /// Capture the environment and working directory of this process.
    pub fn capture() -> Self {
        let mut vars = BTreeMap::new();
        for (key, value) in std::env::vars_os() {
            match (key.into_string(), value.into_string()) {
                (Ok(k), Ok(v)) if !v.is_empty() => {
                    vars.insert(k, v);
                }
                (Ok(_), Ok(_)) => {}
                (key, _) => {
                    tracing::debug!(key = ?key, "Skipping non UTF-8 environment variable");
                }
            }
        }
        Self {
            vars,
            current_dir: std::env::current_dir().ok(),
        }
    }

    /// Build a snapshot from explicit pairs. Empty values are dropped.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v): &(String, String)| !v.is_empty())
            .collect();
        Self {
            vars,
            current_dir: None,
        }
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }
}

/// Caller-tunable parts of the child environment.
#[derive(Debug, Clone)]
pub struct EnvOverrides {
    /// Value for `TERM_PROGRAM`.
    pub term_program: String,
    /// Directories inserted after the fixed prefix and before the inherited `PATH`.
    pub extra_paths: Vec<String>,
    /// Variables applied after everything else.
    pub vars: BTreeMap<String, String>,
}

impl Default for EnvOverrides {
    fn default() -> Self {
        Self {
            term_program: "termpanel".into(),
            extra_paths: Vec::new(),
            vars: BTreeMap::new(),
        }
    }
}

/// Rebuild `PATH`, or `None` when the host has no `PATH` at all.
pub fn build_path(host: &HostEnv, extra: &[String]) -> Option<String> {
    let inherited = host.get("PATH")?;

    let mut parts: Vec<String> = PATH_PREFIX.iter().map(|p| p.to_string()).collect();
    if let Some(home) = host.get("HOME") {
        let home = home.trim_end_matches('/');
        parts.extend(HOME_PATH_DIRS.iter().map(|dir| format!("{home}/{dir}")));
    }
    parts.extend(extra.iter().filter(|p| !p.is_empty()).cloned());
    parts.push(inherited.to_string());

    Some(parts.join(":"))
}

/// Compute the full environment for a helper that will run `shell`.
pub fn build_environment(
    host: &HostEnv,
    shell: &Path,
    overrides: &EnvOverrides,
) -> BTreeMap<String, String> {
    let mut env = host.vars().clone();

    if let Some(path) = build_path(host, &overrides.extra_paths) {
        env.insert("PATH".into(), path);
    }

    let locale = |key: &str| host.get(key).unwrap_or(DEFAULT_LOCALE).to_string();
    let forced = [
        ("TERM", "xterm-256color".to_string()),
        ("TERM_PROGRAM", overrides.term_program.clone()),
        ("COLORTERM", "truecolor".to_string()),
        ("SHELL", shell.to_string_lossy().into_owned()),
        ("LANG", locale("LANG")),
        ("LC_ALL", locale("LC_ALL")),
        ("LC_CTYPE", DEFAULT_LOCALE.to_string()),
        ("NCURSES_NO_UTF8_ACS", "1".to_string()),
        ("FORCE_COLOR", "3".to_string()),
    ];
    for (key, value) in forced {
        env.insert(key.to_string(), value);
    }

    for key in PASSTHROUGH {
        if let Some(value) = host.get(key) {
            env.insert((*key).to_string(), value.to_string());
        }
    }

    for (key, value) in &overrides.vars {
        env.insert(key.clone(), value.clone());
    }

    env
}
