//! Connecting side of the control socket
//!
//! A client sends one request and then waits for its reply before it may
//! send the next. It never retries. Anything slow, such as the interactive
//! login, is done before connecting.

use crate::auth::{authorize_current_user, AuthHelper, AuthHelperError, AuthorizationError};
use crate::config::Config;
use crate::protocol::codec::{self, DecodeError, EncodeError};
use crate::protocol::{Command, Reply, Request};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not authorized: {0}")]
    Unauthorized(#[from] AuthorizationError),
    #[error("gpvpn server is not running (no socket at {0})")]
    ServerNotRunning(PathBuf),
    #[error("Failed to connect to {path}: {source}")]
    Connect { path: PathBuf, source: io::Error },
    #[error("No authentication helper configured")]
    NoAuthHelper,
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthHelperError),
    #[error("Messages must be a single line")]
    MultilineMessage,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("Unreadable reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("Server closed the connection before replying")]
    ConnectionClosed,
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub socket_path: PathBuf,
    /// Checked before connecting when set
    pub authorization_group: Option<String>,
    /// Needed for `Command::Open` only
    pub auth_helper: Option<AuthHelper>,
}

impl ClientOptions {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            authorization_group: None,
            auth_helper: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut options = Self::new(config.server.socket_path())
            .with_auth_helper(AuthHelper::new(config.auth.command.clone()));
        if config.client.check_group {
            options = options.with_authorization_group(config.server.group.clone());
        }
        options
    }

    pub fn with_authorization_group(mut self, group: impl Into<String>) -> Self {
        self.authorization_group = Some(group.into());
        self
    }

    pub fn with_auth_helper(mut self, helper: AuthHelper) -> Self {
        self.auth_helper = Some(helper);
        self
    }

    /// Build the request for `command`
    ///
    /// For `Open` the authentication helper runs here and its output
    /// becomes the login code. This happens before any connection exists,
    /// so a slow interactive login never holds the daemon up.
    pub async fn prepare_request(&self, command: Command) -> Result<Request, ClientError> {
        match command {
            Command::Open => {
                let helper = self.auth_helper.as_ref().ok_or(ClientError::NoAuthHelper)?;
                Ok(Request::open(helper.login_code().await?))
            }
            other => Ok(Request::new(other)),
        }
    }

    fn authorize(&self) -> Result<(), ClientError> {
        if let Some(group) = &self.authorization_group {
            authorize_current_user(group)?;
        }
        Ok(())
    }
}

pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    /// Authorize, authenticate if needed, then send `command` on a fresh
    /// connection and return the reply
    pub async fn send_request(
        options: &ClientOptions,
        command: Command,
    ) -> Result<Reply, ClientError> {
        options.authorize()?;
        let request = options.prepare_request(command).await?;

        let mut client = Self::connect(&options.socket_path).await?;
        let reply = client.send(&request).await;
        client.close().await;
        reply
    }

    /// Authorize the caller (if configured) and connect to the daemon
    pub async fn open(options: &ClientOptions) -> Result<Self, ClientError> {
        options.authorize()?;
        Self::connect(&options.socket_path).await
    }

    async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                ClientError::ServerNotRunning(path.to_path_buf())
            }
            _ => ClientError::Connect {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        debug!("Connected to {}", path.display());

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one line of text and wait for the one-line reply
    pub async fn send_raw(&mut self, message: &str) -> Result<String, ClientError> {
        if message.contains('\n') {
            return Err(ClientError::MultilineMessage);
        }

        let mut buffer = Vec::with_capacity(message.len() + 1);
        buffer.extend_from_slice(message.as_bytes());
        buffer.push(b'\n');
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(reply.trim_end_matches(['\n', '\r']).to_string())
    }

    /// Send `request` and decode the reply
    pub async fn send(&mut self, request: &Request) -> Result<Reply, ClientError> {
        let message = codec::encode_request(request)?;
        let reply = self.send_raw(&message).await?;
        Ok(codec::decode_reply(&reply)?)
    }

    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Error while closing connection: {}", e);
        }
    }
}
