//! Local request/reply transport over a Unix domain socket
//!
//! Every message is one line of text. The server handles exactly one
//! request at a time and always answers it before reading the next one, so
//! whatever sits behind [`MessageProcessor`] never sees concurrent calls.

pub mod client;
pub mod server;

pub use client::{ClientError, ClientOptions, IpcClient};
pub use server::{IpcServer, ServerError, ServerState, StopHandle};

use std::future::Future;

/// The reply to one request, plus whether the server should stop afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: String,
    pub shutdown: bool,
}

impl Response {
    pub fn reply(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            shutdown: false,
        }
    }

    pub fn reply_then_shutdown(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            shutdown: true,
        }
    }
}

/// Turns one raw request into one response
pub trait MessageProcessor {
    fn process(&mut self, message: &str) -> impl Future<Output = Response> + Send;

    /// Answer to a request that could not be read as a line of text
    fn malformed(&mut self) -> Response;
}
