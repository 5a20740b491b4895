//! Listening side of the control socket
//!
//! Lifecycle: `Closed -> open() -> Open -> run() -> Listening -> Closed`.
//! `run()` serves one connection at a time and one request at a time on it.
//! A client that stays silent for longer than the request timeout is
//! dropped so it cannot hold up everybody else. A stop request is only
//! honoured between exchanges: a request that has been read is always
//! processed and answered first.

use super::{MessageProcessor, Response};
use crate::config::ServerConfig;
use nix::unistd::{chown, Group, Uid};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// rw for owner and the authorized group
const SOCKET_MODE: u32 = 0o660;

/// Longest request line accepted, newline excluded
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Another gpvpn server is already listening on {0}")]
    AlreadyRunning(PathBuf),
    #[error("Group '{0}' does not exist, refusing to serve an unsecured socket")]
    GroupNotFound(String),
    #[error("Failed to bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
    #[error("Failed to set permissions on {path}: {source}")]
    Permissions { path: PathBuf, source: io::Error },
    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
    #[error("Server is {actual:?}, expected {expected:?}")]
    InvalidState {
        actual: ServerState,
        expected: ServerState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Closed,
    Open,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
    Stopping,
}

/// Cloneable handle that asks a running server loop to finish
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<LoopState>>,
}

impl StopHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(LoopState::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Request the listening loop to stop after the current exchange
    ///
    /// Stopping a loop that is not running is a logged no-op.
    pub fn stop(&self) {
        let mut observed = LoopState::Idle;
        let requested = self.tx.send_if_modified(|state| {
            observed = *state;
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
                true
            } else {
                false
            }
        });

        if requested {
            debug!("Stopping listening loop...");
        } else if observed == LoopState::Stopping {
            warn!("Trying to stop listening loop that is already stopping");
        } else {
            warn!("Trying to stop listening loop that is not running");
        }
    }
}

/// One request as read off the wire
enum Incoming {
    Line(String),
    NotUtf8,
    TooLong,
    Closed,
}

pub struct IpcServer<P> {
    socket_path: PathBuf,
    group: String,
    request_timeout: Duration,
    processor: P,
    listener: Option<UnixListener>,
    state: ServerState,
    stop: StopHandle,
}

impl<P> IpcServer<P> {
    pub fn new(config: &ServerConfig, processor: P) -> Self {
        Self {
            socket_path: config.socket_path(),
            group: config.group.clone(),
            request_timeout: config.request_timeout(),
            processor,
            listener: None,
            state: ServerState::Closed,
            stop: StopHandle::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Bind the socket, replacing a stale socket file if one is left over
    ///
    /// A socket that still accepts connections belongs to a live server and
    /// is left alone.
    ///
    /// When running as root the socket is handed to the configured group
    /// with mode 0660; a missing group is fatal. Must be called from within
    /// a Tokio runtime.
    pub fn open(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Closed {
            return Err(ServerError::InvalidState {
                actual: self.state,
                expected: ServerState::Closed,
            });
        }

        let bind_error = |source| ServerError::Bind {
            path: self.socket_path.clone(),
            source,
        };
        if self.socket_path.exists() {
            if StdUnixStream::connect(&self.socket_path).is_ok() {
                return Err(ServerError::AlreadyRunning(self.socket_path.clone()));
            }
            debug!("Removing stale socket {}", self.socket_path.display());
            fs::remove_file(&self.socket_path).map_err(bind_error)?;
        }
        let listener = UnixListener::bind(&self.socket_path).map_err(bind_error)?;

        self.listener = Some(listener);
        self.state = ServerState::Open;

        if Uid::effective().is_root() {
            if let Err(e) = self.grant_group_access() {
                self.close();
                return Err(e);
            }
        }

        info!("Opened control socket {}", self.socket_path.display());
        Ok(())
    }

    fn grant_group_access(&self) -> Result<(), ServerError> {
        let group = Group::from_name(&self.group)?
            .ok_or_else(|| ServerError::GroupNotFound(self.group.clone()))?;

        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(
            |source| ServerError::Permissions {
                path: self.socket_path.clone(),
                source,
            },
        )?;
        chown(&self.socket_path, None, Some(group.gid))?;

        info!(
            "Socket {} is accessible to group {} (GID {})",
            self.socket_path.display(),
            group.name,
            group.gid
        );
        Ok(())
    }

    /// Release the socket. Closing a closed server does nothing.
    pub fn close(&mut self) {
        if self.state == ServerState::Closed {
            return;
        }

        self.listener = None;
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove socket {}: {}",
                    self.socket_path.display(),
                    e
                );
            }
        }
        self.state = ServerState::Closed;
        debug!("Closed control socket {}", self.socket_path.display());
    }
}

impl<P: MessageProcessor + Send> IpcServer<P> {
    /// Serve requests until stopped, then close the socket
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let Some(listener) = self.listener.take() else {
            return Err(ServerError::InvalidState {
                actual: self.state,
                expected: ServerState::Open,
            });
        };

        self.state = ServerState::Listening;
        let mut stop_rx = self.stop.tx.subscribe();
        self.stop.tx.send_replace(LoopState::Running);
        info!("Listening on {}", self.socket_path.display());

        loop {
            let stream = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            debug!("Client connected");
            self.serve_connection(stream, &mut stop_rx).await;
        }

        self.stop.tx.send_replace(LoopState::Idle);
        drop(listener);
        self.close();
        info!("Stopped listening");
        Ok(())
    }

    async fn serve_connection(
        &mut self,
        stream: UnixStream,
        stop_rx: &mut watch::Receiver<LoopState>,
    ) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = stop_requested(stop_rx) => {
                    debug!("Dropping client connection, server is stopping");
                    return;
                }
                read = tokio::time::timeout(
                    self.request_timeout,
                    read_request(&mut reader, &mut buffer),
                ) => read,
            };

            let (response, keep_open) = match read {
                Err(_) => {
                    debug!(
                        "Client silent for {:?}, dropping connection",
                        self.request_timeout
                    );
                    return;
                }
                Ok(Err(e)) => {
                    warn!("Failed to read request: {}", e);
                    return;
                }
                Ok(Ok(Incoming::Closed)) => {
                    debug!("Client disconnected");
                    return;
                }
                Ok(Ok(Incoming::TooLong)) => {
                    warn!("Request exceeds {} bytes, rejecting it", MAX_REQUEST_BYTES);
                    (self.processor.malformed(), false)
                }
                Ok(Ok(Incoming::NotUtf8)) => {
                    warn!("Request is not valid UTF-8, rejecting it");
                    (self.processor.malformed(), true)
                }
                Ok(Ok(Incoming::Line(message))) => {
                    debug!("Received request ({} bytes)", message.len());
                    (self.processor.process(&message).await, true)
                }
            };
            let Response { payload, shutdown } = response;

            let mut reply = payload.into_bytes();
            reply.push(b'\n');
            if let Err(e) = writer.write_all(&reply).await {
                warn!("Failed to send reply: {}", e);
                return;
            }
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush reply: {}", e);
                return;
            }

            if shutdown {
                info!("Shutdown requested by client");
                self.stop.stop();
            }
            if !keep_open {
                // The rest of an oversized line cannot be framed
                return;
            }
        }
    }
}

/// Read one newline-terminated request of at most [`MAX_REQUEST_BYTES`]
async fn read_request<R>(reader: &mut R, buffer: &mut Vec<u8>) -> io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    if reader.take(limit).read_until(b'\n', buffer).await? == 0 {
        return Ok(Incoming::Closed);
    }

    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    } else if buffer.len() > MAX_REQUEST_BYTES {
        return Ok(Incoming::TooLong);
    }

    match String::from_utf8(std::mem::take(buffer)) {
        Ok(line) => Ok(Incoming::Line(line)),
        Err(_) => Ok(Incoming::NotUtf8),
    }
}

impl<P> Drop for IpcServer<P> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn stop_requested(rx: &mut watch::Receiver<LoopState>) {
    // A closed channel counts as a stop request too
    let _ = rx.wait_for(|state| *state == LoopState::Stopping).await;
}
