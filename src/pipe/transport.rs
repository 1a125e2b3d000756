//! Transport opener for the two host pipes
//!
//! Opening a FIFO blocks until the other side opens its end, so each pipe
//! is opened on its own detached thread and the two attempts never wait on
//! each other. A timed-out attempt leaves its thread behind without holding
//! up runtime shutdown. Individual failures are only logged; the caller
//! learns about them from the missing handle.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::common::error::describe_os_error;
use crate::common::paths::PipeNames;
use crate::common::{Error, Result};

/// Read side of a connection (host -> client)
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write side of a connection (client -> host)
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open both pipes concurrently
///
/// Succeeds only when both ends are open. Anything else, including an
/// expired `timeout`, is reported as [`Error::HostNotRunning`].
pub async fn open(names: &PipeNames, timeout: Option<Duration>) -> Result<(PipeReader, PipeWriter)> {
    let write_rx = spawn_open("write_pipe_open", names.write.clone(), open_write_end);
    let read_rx = spawn_open("read_pipe_open", names.read.clone(), open_read_end);
    let both = async { tokio::join!(write_rx, read_rx) };

    let (write, read) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, both).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("Timed out after {:?} waiting for the host pipes", limit);
                return Err(Error::HostNotRunning);
            }
        },
        None => both.await,
    };

    let writer = settle("write", &names.write, write).and_then(|file| {
        into_writer(file)
            .map_err(|e| log_open_error("write", &names.write, &e))
            .ok()
    });
    let reader = settle("read", &names.read, read).and_then(|file| {
        into_reader(file)
            .map_err(|e| log_open_error("read", &names.read, &e))
            .ok()
    });

    match (reader, writer) {
        (Some(reader), Some(writer)) => Ok((reader, writer)),
        _ => Err(Error::HostNotRunning),
    }
}

/// Run one open on a named, detached thread and hand back its result
fn spawn_open(
    thread_name: &str,
    path: PathBuf,
    open_end: fn(&Path) -> io::Result<File>,
) -> oneshot::Receiver<io::Result<File>> {
    let (result_tx, result_rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            // Nobody is listening any more after a timeout
            let _ = result_tx.send(open_end(&path));
        });
    if let Err(e) = spawned {
        // The sender went down with the closure, so the receiver reports it
        tracing::warn!("Cannot start {} thread: {}", thread_name, e);
    }
    result_rx
}

fn settle(
    direction: &str,
    path: &Path,
    joined: std::result::Result<io::Result<File>, oneshot::error::RecvError>,
) -> Option<File> {
    match joined {
        Ok(Ok(file)) => Some(file),
        Ok(Err(e)) => {
            log_open_error(direction, path, &e);
            None
        }
        Err(_) => {
            tracing::warn!("Opening the {} pipe stopped without a result", direction);
            None
        }
    }
}

fn log_open_error(direction: &str, path: &Path, err: &io::Error) {
    tracing::warn!(
        "Cannot open {} pipe {}: {}",
        direction,
        path.display(),
        describe_os_error(err)
    );
}

fn open_write_end(path: &Path) -> io::Result<File> {
    std::fs::OpenOptions::new().write(true).open(path)
}

fn open_read_end(path: &Path) -> io::Result<File> {
    std::fs::OpenOptions::new().read(true).open(path)
}

#[cfg(unix)]
fn into_reader(file: File) -> io::Result<PipeReader> {
    Ok(Box::new(tokio::net::unix::pipe::Receiver::from_file(file)?))
}

#[cfg(unix)]
fn into_writer(file: File) -> io::Result<PipeWriter> {
    Ok(Box::new(tokio::net::unix::pipe::Sender::from_file(file)?))
}

#[cfg(not(unix))]
fn into_reader(file: File) -> io::Result<PipeReader> {
    Ok(Box::new(tokio::fs::File::from_std(file)))
}

#[cfg(not(unix))]
fn into_writer(file: File) -> io::Result<PipeWriter> {
    Ok(Box::new(tokio::fs::File::from_std(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_pipes_mean_host_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let names = PipeNames {
            write: dir.path().join("missing.to"),
            read: dir.path().join("missing.from"),
        };

        let result = open(&names, None).await;
        assert!(matches!(result, Err(Error::HostNotRunning)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_partial_open_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file opens fine but is not a FIFO
        let write: PathBuf = dir.path().join("plain.to");
        std::fs::write(&write, b"").unwrap();
        let names = PipeNames {
            write,
            read: dir.path().join("missing.from"),
        };

        let result = open(&names, Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(Error::HostNotRunning)));
    }
}
