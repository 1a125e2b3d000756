//! Error types for the pipe client
//!
//! Messages are meant to be shown to a person at a terminal, so the
//! connection errors carry a hint on how to recover.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipe client
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Host is not running. Start the host and reconnect")]
    HostNotRunning,

    #[error("Not connected to the host. Connect first and send the command again")]
    NotConnected,

    #[error("Already connected to the host. Close the current session before reconnecting")]
    AlreadyConnected,

    #[error("Host disconnected before the reply was complete")]
    Disconnected,

    // === Write Path Errors ===
    #[error("Write pipe is broken, the host has gone away")]
    BrokenPipe,

    #[error("No reply from host after {0:?}")]
    Timeout(Duration),

    #[error("Command was cancelled while waiting for the reply")]
    Cancelled,

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Whether the error means the session is unusable until the next connect
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::HostNotRunning | Error::NotConnected | Error::Disconnected
        )
    }
}

/// Render an I/O error the way the pipe logs show it: `CODE => message`
pub fn describe_os_error(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("{} => {}", code, err),
        None => format!("{:?} => {}", err.kind(), err),
    }
}
