//! Scripting pipe client CLI
//!
//! Sends commands to a running host over its named pipes and prints the
//! replies.

use clap::Parser;
use script_pipe::{cli, commands::Commands, common::logging};

#[derive(Parser)]
#[command(name = "script-pipe", about = "Send commands to a scripting host over named pipes")]
#[command(version, long_about = None)]
struct Cli {
    /// Log every line read from the host
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_verbose();
    } else {
        logging::init_cli();
    }

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
