//! External authentication helper
//!
//! The helper (gpauth) performs the interactive login and prints the login
//! code on stdout. Its output is passed on verbatim; we never look inside.

use std::io;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AuthHelperError {
    #[error("Authentication helper command is empty")]
    EmptyCommand,
    #[error("Failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Authentication helper exited with {0}")]
    Failed(ExitStatus),
    #[error("Authentication helper printed invalid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHelper {
    command: Vec<String>,
}

impl AuthHelper {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// Run the helper to completion and return everything it printed
    pub async fn login_code(&self) -> Result<String, AuthHelperError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(AuthHelperError::EmptyCommand)?;

        info!("Running authentication helper {}", program);
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|source| AuthHelperError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AuthHelperError::Failed(output.status));
        }

        let code = String::from_utf8(output.stdout).map_err(|_| AuthHelperError::InvalidUtf8)?;
        debug!("Authentication helper produced {} bytes", code.len());
        Ok(code)
    }
}
