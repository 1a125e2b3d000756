//! CLI command definitions
//!
//! Defines the clap commands for the pipe client.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Send one or more commands, printing each reply
    Send {
        /// Commands to send, in order
        #[arg(required = true)]
        commands: Vec<String>,

        /// Report how long each command took
        #[arg(long, short)]
        timer: bool,
    },

    /// Read commands from stdin, one per line, printing each reply
    Shell {
        /// Report how long each command took
        #[arg(long, short)]
        timer: bool,
    },

    /// Check whether the host pipes can be opened
    Status,
}
