//! Shell and working-directory resolution.
//!
//! Resolution runs against a [`HostEnv`] snapshot rather than the live process
//! environment, so the order of precedence can be tested directly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::env::HostEnv;

/// Shell used when neither an override nor `$SHELL` is available.
#[cfg(target_os = "macos")]
pub const FALLBACK_SHELL: &str = "/bin/zsh";
#[cfg(not(target_os = "macos"))]
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Information about an available shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellInfo {
    /// Unique identifier (e.g., "bash", "zsh").
    pub id: String,
    /// Display name (e.g., "Bash", "Zsh").
    pub name: String,
    /// Full path to the shell executable.
    pub path: PathBuf,
}

impl ShellInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
        }
    }

    /// Derive id and display name from the executable's file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sh")
            .to_string();
        let mut chars = id.chars();
        let name = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => id.clone(),
        };
        Self { id, name, path }
    }
}

/// Pick the shell: explicit override, else `$SHELL`, else [`FALLBACK_SHELL`].
pub fn resolve_shell(explicit: Option<&Path>, host: &HostEnv) -> PathBuf {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| host.get("SHELL").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
}

/// Pick the working directory: explicit override, else `$HOME`, else the
/// snapshot's current directory, else `.`.
pub fn resolve_cwd(explicit: Option<&Path>, host: &HostEnv) -> PathBuf {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| host.get("HOME").map(PathBuf::from))
        .or_else(|| host.current_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Detect the shells installed at well-known locations.
pub fn detect_available_shells() -> Vec<ShellInfo> {
    let known = [
        ("bash", "Bash", "/bin/bash"),
        ("zsh", "Zsh", "/bin/zsh"),
        ("fish", "Fish", "/usr/bin/fish"),
        ("sh", "Shell", "/bin/sh"),
        ("bash-homebrew", "Bash (Homebrew)", "/opt/homebrew/bin/bash"),
        ("zsh-homebrew", "Zsh (Homebrew)", "/opt/homebrew/bin/zsh"),
        ("fish-homebrew", "Fish (Homebrew)", "/opt/homebrew/bin/fish"),
        ("bash-local", "Bash (local)", "/usr/local/bin/bash"),
        ("zsh-local", "Zsh (local)", "/usr/local/bin/zsh"),
        ("fish-local", "Fish (local)", "/usr/local/bin/fish"),
    ];

    let mut shells: Vec<ShellInfo> = Vec::new();
    for (id, name, path) in known {
        let path = PathBuf::from(path);
        if path.exists() && !shells.iter().any(|s| s.path == path) {
            shells.push(ShellInfo::new(id, name, path));
        }
    }
    shells
}

/// The shell a session started right now would use, if it exists on disk.
pub fn default_shell() -> Option<ShellInfo> {
    let path = resolve_shell(None, &HostEnv::capture());
    if path.exists() {
        return Some(ShellInfo::from_path(path));
    }
    detect_available_shells().into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_from_environment() {
        let host = HostEnv::from_vars([("SHELL", "/bin/bash"), ("HOME", "/home/u")]);
        assert_eq!(resolve_shell(None, &host), PathBuf::from("/bin/bash"));
        assert_eq!(resolve_cwd(None, &host), PathBuf::from("/home/u"));
    }

    #[test]
    fn test_explicit_overrides_win() {
        let host = HostEnv::from_vars([("SHELL", "/bin/bash"), ("HOME", "/home/u")]);
        assert_eq!(
            resolve_shell(Some(Path::new("/usr/bin/fish")), &host),
            PathBuf::from("/usr/bin/fish")
        );
        assert_eq!(
            resolve_cwd(Some(Path::new("/srv/project")), &host),
            PathBuf::from("/srv/project")
        );
    }

    #[test]
    fn test_empty_override_ignored() {
        let host = HostEnv::from_vars([("SHELL", "/bin/bash")]);
        assert_eq!(
            resolve_shell(Some(Path::new("")), &host),
            PathBuf::from("/bin/bash")
        );
    }

    #[test]
    fn test_fallbacks() {
        let host = HostEnv::from_vars([("SHELL", ""), ("HOME", "")]).with_current_dir("/tmp/work");
        assert_eq!(resolve_shell(None, &host), PathBuf::from(FALLBACK_SHELL));
        assert_eq!(resolve_cwd(None, &host), PathBuf::from("/tmp/work"));

        let bare = HostEnv::default();
        assert_eq!(resolve_cwd(None, &bare), PathBuf::from("."));
    }

    #[test]
    fn test_detect_shells() {
        let shells = detect_available_shells();
        assert!(!shells.is_empty(), "Should detect at least one shell");
        for shell in &shells {
            assert!(!shell.id.is_empty());
            assert!(shell.path.exists(), "Shell path should exist: {:?}", shell.path);
        }
    }

    #[test]
    fn test_shell_info_from_path() {
        let info = ShellInfo::from_path("/usr/local/bin/zsh");
        assert_eq!(info.id, "zsh");
        assert_eq!(info.name, "Zsh");
        assert_eq!(info.path, PathBuf::from("/usr/local/bin/zsh"));
    }

    #[test]
    fn test_shell_info_serialization() {
        let info = ShellInfo::new("bash", "Bash", "/bin/bash");
        let json = serde_json::to_string(&info).unwrap();
        let parsed: ShellInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "bash");
        assert_eq!(parsed.path, PathBuf::from("/bin/bash"));
    }
}
