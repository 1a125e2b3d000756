//! CLI command handling
//!
//! Connects to the host, dispatches commands and prints replies.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::Commands;
use crate::common::{config::Config, Result};
use crate::pipe::{PipeClient, Reply, WriteOptions};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    let config = Config::load()?;
    let client = PipeClient::from_config(&config);

    match command {
        Commands::Send { commands, timer } => {
            client.connect().await?;
            let result = send_all(&client, &commands, timer).await;
            client.close();
            result
        }

        Commands::Shell { timer } => {
            client.connect().await?;
            let result = shell(&client, timer).await;
            client.close();
            result
        }

        Commands::Status => {
            let names = &client.settings().names;
            println!("Write pipe: {}", names.write.display());
            println!("Read pipe:  {}", names.read.display());
            match client.connect().await {
                Ok(()) => {
                    println!("Host is running");
                    client.close();
                    Ok(())
                }
                Err(e) => {
                    println!("{}", e);
                    Ok(())
                }
            }
        }
    }
}

async fn send_all(client: &PipeClient, commands: &[String], timer: bool) -> Result<()> {
    for command in commands {
        let reply = client.write_with(command, options(timer)).await?;
        print_reply(&reply);
    }
    Ok(())
}

async fn shell(client: &PipeClient, timer: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        match client.write_with(command, options(timer)).await {
            Ok(reply) => print_reply(&reply),
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

fn options(timer: bool) -> WriteOptions {
    WriteOptions {
        timer,
        ..Default::default()
    }
}

fn print_reply(reply: &Reply) {
    print!("{}", reply);
    if reply.elapsed.is_some() {
        println!();
    }
}
