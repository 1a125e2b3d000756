//! Cross-platform pipe names and configuration paths
//!
//! Unix/macOS: two FIFOs under /tmp suffixed with the direction and the uid
//! Windows: two fixed named pipes, `\\.\pipe\ToSrvPipe` and `\\.\pipe\FromSrvPipe`

use std::path::PathBuf;

/// Name used for the configuration and data directories
const APP_NAME: &str = "script-pipe";

/// Common prefix of the FIFOs the host creates
#[cfg(unix)]
const PIPE_BASE: &str = "/tmp/audacity_script_pipe.";

/// Line terminator appended to every outgoing command
#[cfg(windows)]
pub const EOL: &str = "\r\n\0";

#[cfg(not(windows))]
pub const EOL: &str = "\n";

/// The pair of channels making up one host connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNames {
    /// Client -> host
    pub write: PathBuf,
    /// Host -> client
    pub read: PathBuf,
}

impl Default for PipeNames {
    fn default() -> Self {
        Self {
            write: write_pipe_path(),
            read: read_pipe_path(),
        }
    }
}

/// Get the path of the pipe commands are written to
///
/// Platform-specific:
/// - Unix: `/tmp/audacity_script_pipe.to.<uid>`
/// - Windows: `\\.\pipe\ToSrvPipe`
#[cfg(unix)]
pub fn write_pipe_path() -> PathBuf {
    PathBuf::from(format!("{}to.{}", PIPE_BASE, current_uid()))
}

#[cfg(windows)]
pub fn write_pipe_path() -> PathBuf {
    PathBuf::from(r"\\.\pipe\ToSrvPipe")
}

/// Get the path of the pipe replies are read from
///
/// Platform-specific:
/// - Unix: `/tmp/audacity_script_pipe.from.<uid>`
/// - Windows: `\\.\pipe\FromSrvPipe`
#[cfg(unix)]
pub fn read_pipe_path() -> PathBuf {
    PathBuf::from(format!("{}from.{}", PIPE_BASE, current_uid()))
}

#[cfg(windows)]
pub fn read_pipe_path() -> PathBuf {
    PathBuf::from(r"\\.\pipe\FromSrvPipe")
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/script-pipe/`
/// - macOS: `~/Library/Application Support/script-pipe/`
/// - Windows: `%APPDATA%\script-pipe\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
