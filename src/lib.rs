//! Scripting pipe client
//!
//! Drives a long-running host application over its pair of named pipes:
//! one command at a time, each answered by a sentinel-terminated reply.

pub mod cli;
pub mod commands;
pub mod common;
pub mod pipe;

// Re-export commonly used types
pub use common::{Error, Result};
pub use pipe::{ConnectionState, PipeClient, Reply, WriteOptions};
