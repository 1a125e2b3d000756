//! Pipe client: connection lifecycle and command/reply correlation
//!
//! Every clone of a [`PipeClient`] shares one session. Only one command is
//! ever in flight; callers queue on the command gate in arrival order and
//! each holds it from sending its command until the sentinel line of the
//! reply has been read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::common::config::Config;
use crate::common::error::describe_os_error;
use crate::common::paths::{PipeNames, EOL};
use crate::common::{Error, Result};

use super::monitor::{self, CallbackRegistry, ConnectionState};
use super::reply::{Reply, ReplySlot};
use super::transport::{self, PipeReader, PipeWriter};

/// Settings a client is created with
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Pipes to open on `connect`
    pub names: PipeNames,
    /// Upper bound for opening both pipes; `None` waits forever
    pub connect_timeout: Option<Duration>,
    /// Default upper bound for a reply; `None` waits forever
    pub reply_timeout: Option<Duration>,
    /// Terminate the process on a broken write pipe instead of returning an error
    pub exit_on_broken_pipe: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            names: config.pipe_names(),
            connect_timeout: config.timeouts.connect(),
            reply_timeout: config.timeouts.reply(),
            exit_on_broken_pipe: config.behavior.exit_on_broken_pipe,
        }
    }
}

/// Per-command options for [`PipeClient::write_with`]
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Measure the time until the reply's sentinel line
    pub timer: bool,
    /// Overrides the client's reply timeout
    pub timeout: Option<Duration>,
    /// Stop waiting for the reply once cancelled
    pub cancel: Option<CancellationToken>,
}

impl WriteOptions {
    pub fn timed(mut self) -> Self {
        self.timer = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Write end tagged with the session that opened it
struct SessionWriter {
    session: u64,
    writer: PipeWriter,
}

struct Inner {
    settings: ClientSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    /// The command gate; holds the write end while a session is open
    gate: tokio::sync::Mutex<Option<SessionWriter>>,
    slot: Mutex<ReplySlot>,
    callbacks: CallbackRegistry,
    /// Cancels the current session's read loop
    session: Mutex<Option<CancellationToken>>,
    next_session: AtomicU64,
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, ReplySlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }
}

/// Puts the state back to `Disconnected` if a connect is abandoned midway
struct ConnectingGuard {
    state: Arc<watch::Sender<ConnectionState>>,
    armed: bool,
}

impl ConnectingGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

/// Client for a host reachable over a write pipe and a read pipe
#[derive(Clone)]
pub struct PipeClient {
    inner: Arc<Inner>,
}

static SHARED: OnceLock<PipeClient> = OnceLock::new();

impl Default for PipeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeClient {
    /// Create a client with the platform default pipes
    pub fn new() -> Self {
        Self::with_settings(ClientSettings::default())
    }

    /// Create a client from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_settings(ClientSettings::from(config))
    }

    pub fn with_settings(settings: ClientSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                state: Arc::new(state),
                gate: tokio::sync::Mutex::new(None),
                slot: Mutex::new(ReplySlot::default()),
                callbacks: CallbackRegistry::default(),
                session: Mutex::new(None),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// The process-wide client
    ///
    /// Initialised on first use from the configuration file, falling back to
    /// defaults when it cannot be loaded. All callers share one session.
    pub fn shared() -> PipeClient {
        SHARED
            .get_or_init(|| {
                let config = Config::load().unwrap_or_else(|e| {
                    tracing::warn!("Ignoring configuration: {}", e);
                    Config::default()
                });
                PipeClient::from_config(&config)
            })
            .clone()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Whether both pipes are open and the read loop is running
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Register the handler run once per successful connect
    ///
    /// Handlers run on the monitor task and should return quickly.
    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.set_connected(Arc::new(callback));
    }

    /// Register the handler run once when a session's read side goes away
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.set_disconnected(Arc::new(callback));
    }

    /// Open both host pipes and start the session
    ///
    /// Returns once the pipes are open and `on_connected` has run.
    pub async fn connect(&self) -> Result<()> {
        let connecting = self.begin_connecting()?;

        let settings = &self.inner.settings;
        let (reader, writer) = transport::open(&settings.names, settings.connect_timeout).await?;
        self.start_session(connecting, reader, writer).await;
        Ok(())
    }

    /// Start a session over already opened streams
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let connecting = self.begin_connecting()?;
        self.start_session(connecting, Box::new(reader), Box::new(writer))
            .await;
        Ok(())
    }

    fn begin_connecting(&self) -> Result<ConnectingGuard> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if claimed {
            Ok(ConnectingGuard {
                state: self.inner.state.clone(),
                armed: true,
            })
        } else {
            Err(Error::AlreadyConnected)
        }
    }

    async fn start_session(
        &self,
        mut connecting: ConnectingGuard,
        reader: PipeReader,
        writer: PipeWriter,
    ) {
        let inner = self.inner.clone();
        let session = inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        *inner.gate.lock().await = Some(SessionWriter { session, writer });
        *inner.lock_session() = Some(cancel.clone());
        *inner.lock_slot() = ReplySlot::default();

        // From here on the session comes up even if the caller goes away
        connecting.disarm();
        let monitor = monitor::spawn(inner.state.clone(), inner.callbacks.clone());
        let started = tokio::spawn(async move {
            let disconnected_tx = monitor.connected().await;
            tokio::spawn(read_loop(inner, session, reader, cancel, disconnected_tx));
        });
        if let Err(e) = started.await {
            tracing::warn!("Session start failed: {}", e);
        }
    }

    /// Release both pipe handles
    ///
    /// The state change and `on_disconnected` follow asynchronously, once
    /// the read loop has stopped.
    pub fn close(&self) {
        if let Some(cancel) = self.inner.lock_session().take() {
            cancel.cancel();
        }
        // A command in flight keeps the write end until it is released
        if let Ok(mut gate) = self.inner.gate.try_lock() {
            if gate.take().is_some() {
                tracing::debug!("Write pipe closed");
            }
        }
    }

    /// Send a command and wait for its reply
    pub async fn write(&self, command: &str, timer: bool) -> Result<Reply> {
        self.write_with(
            command,
            WriteOptions {
                timer,
                ..Default::default()
            },
        )
        .await
    }

    /// Send a command and wait for its reply, with per-command options
    pub async fn write_with(&self, command: &str, options: WriteOptions) -> Result<Reply> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        // Wait for the previous command's reply
        let mut gate = self.inner.gate.lock().await;
        let Some(session) = gate.as_mut() else {
            return Err(Error::NotConnected);
        };

        let reply_rx = {
            let mut slot = self.inner.lock_slot();
            if !self.inner.is_connected() {
                return Err(Error::NotConnected);
            }
            slot.begin(options.timer)
        };

        tracing::info!("Sending command: {}", command);
        if let Err(e) = send_line(&mut session.writer, command).await {
            self.inner.lock_slot().abandon();
            return Err(self.write_failed(e));
        }
        self.inner.lock_slot().mark_sent();

        let result = self.await_reply(reply_rx, &options).await;
        if matches!(result, Err(Error::Timeout(_)) | Err(Error::Cancelled)) {
            self.inner.lock_slot().abandon();
        }
        result
    }

    async fn await_reply(
        &self,
        reply_rx: oneshot::Receiver<Reply>,
        options: &WriteOptions,
    ) -> Result<Reply> {
        let timeout = options.timeout.or(self.inner.settings.reply_timeout);
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);

        let reply = async {
            let received = async { reply_rx.await.map_err(|_| Error::Disconnected) };
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, received).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(limit)),
                },
                None => received.await,
            }
        };

        tokio::select! {
            result = reply => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    fn write_failed(&self, err: std::io::Error) -> Error {
        tracing::error!("Write pipe error: {}", describe_os_error(&err));
        if err.kind() != std::io::ErrorKind::BrokenPipe {
            return Error::Io(err);
        }
        if self.inner.settings.exit_on_broken_pipe {
            eprintln!("PipeClient: Write-pipe error.");
            std::process::exit(1);
        }
        Error::BrokenPipe
    }

    /// The last complete reply, without waiting
    ///
    /// `None` while a command is in flight or before any reply arrived.
    /// Does not consume the reply.
    pub fn read(&self) -> Option<Reply> {
        self.inner.lock_slot().latest()
    }
}

async fn send_line(writer: &mut PipeWriter, command: &str) -> std::io::Result<()> {
    let line = format!("{}{}", command, EOL);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Reply assembler loop, one per session
async fn read_loop(
    inner: Arc<Inner>,
    session: u64,
    reader: PipeReader,
    cancel: CancellationToken,
    disconnected_tx: oneshot::Sender<()>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Read pipe closed by client");
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Read pipe reached end of stream");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::trace!("<<< {}", line.trim_end());
                if inner.lock_slot().accept(&line) {
                    tracing::debug!("Reply complete: {}", line.trim_end());
                }
            }
            Err(e) => {
                tracing::warn!("Read pipe error: {}", describe_os_error(&e));
                break;
            }
        }
    }

    {
        let mut slot = inner.lock_slot();
        inner.state.send_replace(ConnectionState::Disconnected);
        slot.disconnect();
    }
    let _ = disconnected_tx.send(());

    let mut gate = inner.gate.lock().await;
    if gate.as_ref().is_some_and(|w| w.session == session) {
        gate.take();
    }
    tracing::debug!("Pipe session {} ended", session);
}
