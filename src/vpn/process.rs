//! Launching and terminating the external VPN client

use super::session::SessionError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A VPN client started by this daemon
pub struct VpnProcess {
    child: Child,
}

/// Start `command` in its own process group with stdin piped and both
/// output streams going to `logfile` (truncated).
pub fn launch(command: &[String], logfile: &Path) -> Result<VpnProcess, SessionError> {
    let (program, args) = command.split_first().ok_or(SessionError::EmptyCommand)?;

    let log_error = |source| SessionError::LogFile {
        path: logfile.to_path_buf(),
        source,
    };
    let stdout = File::create(logfile).map_err(log_error)?;
    let stderr = stdout.try_clone().map_err(log_error)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .process_group(0)
        .spawn()
        .map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;

    info!(
        "Started VPN client {} with PID {:?}, logging to {}",
        program,
        child.id(),
        logfile.display()
    );
    Ok(VpnProcess { child })
}

impl VpnProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write the login code to the client's stdin and close it
    ///
    /// The client reads until end of input, so stdin is always dropped here.
    /// Write failures are logged and otherwise ignored: the lock file check
    /// decides whether the connection came up.
    pub async fn submit_login_code(&mut self, login_code: &str) {
        let Some(mut stdin) = self.child.stdin.take() else {
            warn!("VPN client stdin already closed, login code not sent");
            return;
        };

        if let Err(e) = stdin.write_all(login_code.as_bytes()).await {
            warn!("Failed to write login code to VPN client: {}", e);
        } else if let Err(e) = stdin.flush().await {
            warn!("Failed to flush login code to VPN client: {}", e);
        } else {
            debug!("Login code submitted ({} bytes)", login_code.len());
        }
    }

    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("VPN client {:?} exited earlier with {}", self.id(), status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Could not query VPN client state: {}", e);
                false
            }
        }
    }

    /// Send SIGTERM and wait for the client to exit
    ///
    /// After `timeout` the client is killed outright.
    pub async fn terminate(&mut self, timeout: Duration) -> Result<ExitStatus, SessionError> {
        if let Some(status) = self.child.try_wait().map_err(SessionError::Wait)? {
            debug!("VPN client already exited with {}", status);
            return Ok(status);
        }

        if let Some(pid) = self.child.id() {
            debug!("Sending SIGTERM to VPN client {}", pid);
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map_err(SessionError::Wait),
            Err(_) => {
                warn!(
                    "VPN client did not exit within {:?} of SIGTERM, killing it",
                    timeout
                );
                self.child.kill().await.map_err(SessionError::Wait)?;
                self.child.wait().await.map_err(SessionError::Wait)
            }
        }
    }
}
