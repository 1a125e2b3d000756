//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, PipeNames};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Pipe name overrides
    #[serde(default)]
    pub pipes: PipesConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Failure handling
    #[serde(default)]
    pub behavior: Behavior,
}

/// Optional overrides for the platform pipe names
#[derive(Debug, Deserialize, Default)]
pub struct PipesConfig {
    /// Path of the pipe commands are written to
    pub write: Option<PathBuf>,

    /// Path of the pipe replies are read from
    pub read: Option<PathBuf>,
}

/// Timeout settings in seconds. Absent means wait forever.
#[derive(Debug, Deserialize, Default)]
pub struct Timeouts {
    /// Upper bound for opening both pipes
    pub connect_secs: Option<u64>,

    /// Upper bound for a single command's reply
    pub reply_secs: Option<u64>,
}

impl Timeouts {
    pub fn connect(&self) -> Option<Duration> {
        self.connect_secs.map(Duration::from_secs)
    }

    pub fn reply(&self) -> Option<Duration> {
        self.reply_secs.map(Duration::from_secs)
    }
}

/// How the client reacts to unrecoverable transport failures
#[derive(Debug, Deserialize)]
pub struct Behavior {
    /// Terminate the process when the write pipe reports a broken pipe
    #[serde(default = "default_exit_on_broken_pipe")]
    pub exit_on_broken_pipe: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            exit_on_broken_pipe: default_exit_on_broken_pipe(),
        }
    }
}

fn default_exit_on_broken_pipe() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Pipe names with any configured overrides applied
    pub fn pipe_names(&self) -> PipeNames {
        let defaults = PipeNames::default();
        PipeNames {
            write: self.pipes.write.clone().unwrap_or(defaults.write),
            read: self.pipes.read.clone().unwrap_or(defaults.read),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.pipe_names(), PipeNames::default());
        assert!(config.timeouts.connect().is_none());
        assert!(config.timeouts.reply().is_none());
        assert!(config.behavior.exit_on_broken_pipe);
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
            [pipes]
            write = "/tmp/custom.to"

            [timeouts]
            reply_secs = 30

            [behavior]
            exit_on_broken_pipe = false
            "#,
        )
        .unwrap();

        let names = config.pipe_names();
        assert_eq!(names.write, PathBuf::from("/tmp/custom.to"));
        assert_eq!(names.read, PipeNames::default().read);
        assert_eq!(config.timeouts.reply(), Some(Duration::from_secs(30)));
        assert!(!config.behavior.exit_on_broken_pipe);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = Config::parse("[timeouts]\nreply_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }
}
