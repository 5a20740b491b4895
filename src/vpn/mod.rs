//! Supervision of the external VPN client
//!
//! - `session`: connect/disconnect/status state machine over the lock file
//! - `process`: spawning, feeding and terminating the client program

pub mod process;
pub mod session;

pub use session::{SessionController, SessionError};
