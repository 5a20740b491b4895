//! Request/reply data model shared by the daemon and the client
//!
//! Commands and return codes travel as small integers inside a JSON
//! object. Decoding is strict: any integer outside the known set is
//! rejected rather than mapped to a fallback.

pub mod codec;

pub use codec::{DecodeError, EncodeError};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown command code: {0}")]
pub struct UnknownCommand(pub u8);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown return code: {0}")]
pub struct UnknownReturnCode(pub u8);

/// Request kinds understood by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Command {
    Status,
    Open,
    Close,
    Quit,
}

impl TryFrom<u8> for Command {
    type Error = UnknownCommand;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Status),
            2 => Ok(Command::Open),
            3 => Ok(Command::Close),
            4 => Ok(Command::Quit),
            other => Err(UnknownCommand(other)),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Status => 1,
            Command::Open => 2,
            Command::Close => 3,
            Command::Quit => 4,
        }
    }
}

impl Command {
    pub const ALL: [Command; 4] = [Command::Status, Command::Open, Command::Close, Command::Quit];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Status => "status",
            Command::Open => "connect",
            Command::Close => "disconnect",
            Command::Quit => "stop_server",
        };
        f.write_str(name)
    }
}

/// Outcome of a command as reported back to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReturnCode {
    Active,
    Inactive,
    AlreadyConnected,
    AlreadyDisconnected,
    RunningWithoutSubprocess,
    Success,
    Failed,
    QuitApplication,
    CommandNotUnderstood,
}

impl TryFrom<u8> for ReturnCode {
    type Error = UnknownReturnCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ReturnCode::Active),
            2 => Ok(ReturnCode::Inactive),
            3 => Ok(ReturnCode::AlreadyConnected),
            4 => Ok(ReturnCode::AlreadyDisconnected),
            5 => Ok(ReturnCode::RunningWithoutSubprocess),
            6 => Ok(ReturnCode::Success),
            7 => Ok(ReturnCode::Failed),
            8 => Ok(ReturnCode::QuitApplication),
            9 => Ok(ReturnCode::CommandNotUnderstood),
            other => Err(UnknownReturnCode(other)),
        }
    }
}

impl From<ReturnCode> for u8 {
    fn from(code: ReturnCode) -> Self {
        match code {
            ReturnCode::Active => 1,
            ReturnCode::Inactive => 2,
            ReturnCode::AlreadyConnected => 3,
            ReturnCode::AlreadyDisconnected => 4,
            ReturnCode::RunningWithoutSubprocess => 5,
            ReturnCode::Success => 6,
            ReturnCode::Failed => 7,
            ReturnCode::QuitApplication => 8,
            ReturnCode::CommandNotUnderstood => 9,
        }
    }
}

impl ReturnCode {
    pub const ALL: [ReturnCode; 9] = [
        ReturnCode::Active,
        ReturnCode::Inactive,
        ReturnCode::AlreadyConnected,
        ReturnCode::AlreadyDisconnected,
        ReturnCode::RunningWithoutSubprocess,
        ReturnCode::Success,
        ReturnCode::Failed,
        ReturnCode::QuitApplication,
        ReturnCode::CommandNotUnderstood,
    ];

    /// One line of text for the user who issued `command`
    pub fn describe(self, command: Command) -> String {
        let text = match (self, command) {
            (ReturnCode::Active, _) => "VPN connection is active",
            (ReturnCode::Inactive, _) => "VPN connection is inactive",
            (ReturnCode::AlreadyConnected, _) => "VPN connection is already active",
            (ReturnCode::AlreadyDisconnected, _) => "VPN connection is already inactive",
            (ReturnCode::RunningWithoutSubprocess, _) => {
                "VPN connection is active but was not started by the gpvpn server"
            }
            (ReturnCode::Success, Command::Open) => "VPN connection successfully activated",
            (ReturnCode::Success, Command::Close) => "VPN connection successfully deactivated",
            (ReturnCode::Success, _) => "Request completed",
            (ReturnCode::Failed, Command::Close) => "VPN connection could not be deactivated",
            (ReturnCode::Failed, _) => "VPN connection could not be activated",
            (ReturnCode::QuitApplication, _) => "gpvpn server killed",
            (ReturnCode::CommandNotUnderstood, _) => {
                return format!("Command {} was not understood. Try --help...", command);
            }
        };
        text.to_string()
    }
}

/// Printed when the daemon answers with something we cannot decode
pub const UNKNOWN_REPLY_MESSAGE: &str = "Received unknown return code from server";

/// A client request. `login_code` accompanies `Open` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub command: Command,
    #[serde(
        default,
        deserialize_with = "present_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub login_code: Option<String>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            login_code: None,
        }
    }

    pub fn open(login_code: impl Into<String>) -> Self {
        Self {
            command: Command::Open,
            login_code: Some(login_code.into()),
        }
    }
}

/// A missing key means `None`; an explicit `null` is rejected
fn present_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reply {
    pub return_code: ReturnCode,
}

impl Reply {
    pub fn new(return_code: ReturnCode) -> Self {
        Self { return_code }
    }
}
