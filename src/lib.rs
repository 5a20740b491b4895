//! gpvpn - Control daemon for the GlobalProtect gpclient VPN
//!
//! A privileged daemon supervises `gpclient` on behalf of unprivileged
//! users. Clients talk to it over a local Unix socket with a tiny JSON
//! request/reply protocol; the daemon starts and stops the VPN client and
//! reports its state from the lock file gpclient maintains.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML)
//! - `protocol`: Commands, return codes and their JSON encoding
//! - `vpn`: Session state machine and VPN client process handling
//! - `dispatch`: Maps decoded requests onto session operations
//! - `ipc`: Unix socket server and client
//! - `auth`: Group membership check and the login-code helper
//!
//! # Usage
//!
//! ```bash
//! sudo gpvpn server &
//! gpvpn connect
//! gpvpn status
//! gpvpn disconnect
//! ```

#[cfg(not(unix))]
compile_error!("gpvpn talks to its daemon over Unix domain sockets and only builds on Unix");

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod ipc;
pub mod protocol;
pub mod vpn;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use dispatch::VpnDispatcher;
pub use ipc::{ClientOptions, IpcClient, IpcServer};
pub use protocol::{Command, Reply, Request, ReturnCode};
pub use vpn::SessionController;
