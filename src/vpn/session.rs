//! VPN session state machine
//!
//! The lock file written by the VPN client is the only source of truth for
//! "connected". The controller additionally remembers the client it launched
//! itself, but the two are allowed to disagree: a client may have been
//! started by hand (lock file present, no handle) or may still be
//! authenticating (handle present, no lock file yet).
//!
//! Requests are served one at a time by the IPC server, so the controller
//! needs no locking of its own.

use super::process::{self, VpnProcess};
use crate::config::VpnConfig;
use crate::protocol::ReturnCode;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("VPN command is empty")]
    EmptyCommand,
    #[error("Failed to open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("Failed to launch {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to signal VPN client: {0}")]
    Signal(#[from] nix::errno::Errno),
    #[error("Failed to wait for VPN client: {0}")]
    Wait(#[source] io::Error),
}

pub struct SessionController {
    command: Vec<String>,
    lockfile: PathBuf,
    logfile: PathBuf,
    grace: Duration,
    terminate_timeout: Duration,
    subprocess: Option<VpnProcess>,
}

impl SessionController {
    pub fn new(config: &VpnConfig) -> Self {
        Self {
            command: config.command.clone(),
            lockfile: config.lockfile.clone(),
            logfile: config.logfile.clone(),
            grace: config.grace(),
            terminate_timeout: config.terminate_timeout(),
            subprocess: None,
        }
    }

    pub fn lockfile(&self) -> &Path {
        &self.lockfile
    }

    /// Whether this controller holds a handle to a client it launched
    pub fn has_subprocess(&self) -> bool {
        self.subprocess.is_some()
    }

    pub fn subprocess_id(&self) -> Option<u32> {
        self.subprocess.as_ref().and_then(VpnProcess::id)
    }

    fn is_connected(&self) -> bool {
        self.lockfile.exists()
    }

    pub fn check_status(&self) -> ReturnCode {
        let code = if self.is_connected() {
            ReturnCode::Active
        } else {
            ReturnCode::Inactive
        };
        debug!("Status of {}: {:?}", self.lockfile.display(), code);
        code
    }

    /// Launch the VPN client and hand it `login_code`
    ///
    /// Waits one grace interval (no polling) and then reports whether the
    /// lock file appeared. The handle is kept even on `Failed` so a later
    /// disconnect can still reach a client that is slow to come up.
    pub async fn connect(&mut self, login_code: &str) -> Result<ReturnCode, SessionError> {
        if self.is_connected() {
            info!(
                "Lock file {} exists, not launching another VPN client",
                self.lockfile.display()
            );
            return Ok(ReturnCode::AlreadyConnected);
        }

        self.release_previous().await?;

        debug!("Launching VPN command {:?}", self.command);
        let vpn = self
            .subprocess
            .insert(process::launch(&self.command, &self.logfile)?);
        vpn.submit_login_code(login_code).await;

        tokio::time::sleep(self.grace).await;

        if self.is_connected() {
            info!("VPN connection established");
            Ok(ReturnCode::Success)
        } else {
            warn!(
                "No lock file at {} after {:?}, see {} for details",
                self.lockfile.display(),
                self.grace,
                self.logfile.display()
            );
            Ok(ReturnCode::Failed)
        }
    }

    /// Terminate the client this controller launched
    ///
    /// A client started elsewhere is never touched: we have no reliable way
    /// to tell which process owns the lock file.
    pub async fn disconnect(&mut self) -> Result<ReturnCode, SessionError> {
        if !self.is_connected() {
            debug!("No lock file, nothing to disconnect");
            return Ok(ReturnCode::AlreadyDisconnected);
        }

        let Some(vpn) = self.subprocess.as_mut() else {
            warn!(
                "Lock file {} exists but the VPN client was not started by this server",
                self.lockfile.display()
            );
            return Ok(ReturnCode::RunningWithoutSubprocess);
        };

        let status = vpn.terminate(self.terminate_timeout).await?;
        info!("VPN client exited with {}", status);
        self.subprocess = None;
        Ok(ReturnCode::Success)
    }

    pub fn quit(&self) -> ReturnCode {
        ReturnCode::QuitApplication
    }

    /// Reap or terminate a client left over from an earlier failed connect
    async fn release_previous(&mut self) -> Result<(), SessionError> {
        let Some(previous) = self.subprocess.as_mut() else {
            return Ok(());
        };
        if !previous.has_exited() {
            warn!(
                "Previous VPN client {:?} still running without a lock file, terminating it",
                previous.id()
            );
            let status = previous.terminate(self.terminate_timeout).await?;
            debug!("Previous VPN client exited with {}", status);
        }
        self.subprocess = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LOGIN_CODE, Sandbox};
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    const LONG_LIVED: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let sandbox = Sandbox::new();
        let controller = sandbox.mock_controller(LONG_LIVED);

        for _ in 0..5 {
            assert_eq!(controller.check_status(), ReturnCode::Inactive);
        }

        sandbox.create_foreign_lockfile();
        for _ in 0..5 {
            assert_eq!(controller.check_status(), ReturnCode::Active);
        }
        assert!(!controller.has_subprocess());
    }

    #[tokio::test]
    async fn test_connect_status_disconnect() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(LONG_LIVED);

        assert_eq!(controller.check_status(), ReturnCode::Inactive);
        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Success
        );
        assert!(controller.has_subprocess());
        assert_eq!(controller.check_status(), ReturnCode::Active);

        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::Success
        );
        assert!(!controller.has_subprocess());
        assert_eq!(controller.check_status(), ReturnCode::Inactive);
    }

    #[tokio::test]
    async fn test_login_code_reaches_vpn_client() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(LONG_LIVED);

        controller.connect(LOGIN_CODE).await.unwrap();
        controller.disconnect().await.unwrap();

        let log = std::fs::read_to_string(sandbox.logfile()).unwrap();
        assert!(log.contains(LOGIN_CODE));
    }

    #[tokio::test]
    async fn test_duplicate_connect() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(LONG_LIVED);

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Success
        );
        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::AlreadyConnected
        );
        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::Success
        );
    }

    #[tokio::test]
    async fn test_vpn_client_expires_on_its_own() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(Duration::from_secs(2));

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Success
        );
        assert_eq!(controller.check_status(), ReturnCode::Active);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(controller.check_status(), ReturnCode::Inactive);
        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::AlreadyDisconnected
        );
    }

    #[tokio::test]
    async fn test_connect_with_existing_lockfile_spawns_nothing() {
        let sandbox = Sandbox::new();
        let script = r#"touch "$1.spawned"; cat > /dev/null"#;
        let mut controller = SessionController::new(&sandbox.vpn_config(script, &[]));
        sandbox.create_foreign_lockfile();

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::AlreadyConnected
        );
        assert!(!controller.has_subprocess());
        assert!(!sandbox.path("gpclient.lock.spawned").exists());
        assert!(!sandbox.logfile().exists());
    }

    #[tokio::test]
    async fn test_connect_without_lockfile_fails_but_keeps_handle() {
        let sandbox = Sandbox::new();
        let mut controller = SessionController::new(&sandbox.vpn_config("cat > /dev/null", &[]));

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Failed
        );
        assert!(controller.has_subprocess());

        // No lock file means nothing to disconnect, whatever handle we hold
        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::AlreadyDisconnected
        );
        assert!(controller.has_subprocess());
    }

    #[tokio::test]
    async fn test_reconnect_terminates_client_that_never_came_up() {
        let sandbox = Sandbox::new();
        let script = "cat > /dev/null; exec sleep 30";
        let mut controller = SessionController::new(&sandbox.vpn_config(script, &[]));

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Failed
        );
        let first = controller.subprocess_id().unwrap();

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Failed
        );
        let second = controller.subprocess_id().unwrap();
        assert_ne!(first, second);

        // The first client has been terminated and reaped
        let liveness = kill(Pid::from_raw(first as i32), None);
        assert_eq!(liveness, Err(Errno::ESRCH));

        // Leave nothing behind
        kill(Pid::from_raw(second as i32), Signal::SIGKILL).unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_foreign_client_leaves_it_alone() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(LONG_LIVED);
        sandbox.create_foreign_lockfile();

        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::RunningWithoutSubprocess
        );
        assert!(sandbox.lockfile().exists());
        assert_eq!(controller.check_status(), ReturnCode::Active);
    }

    #[tokio::test]
    async fn test_disconnect_kills_client_ignoring_sigterm() {
        let sandbox = Sandbox::new();
        let script = r#"trap '' TERM; cat > /dev/null; echo $$ > "$1"; while :; do sleep 0.1; done"#;
        let mut config = sandbox.vpn_config(script, &[]);
        config.terminate_timeout_secs = 1;
        let mut controller = SessionController::new(&config);

        assert_eq!(
            controller.connect(LOGIN_CODE).await.unwrap(),
            ReturnCode::Success
        );
        assert_eq!(
            controller.disconnect().await.unwrap(),
            ReturnCode::Success
        );
        assert!(!controller.has_subprocess());
    }

    #[tokio::test]
    async fn test_quit_has_no_side_effects() {
        let sandbox = Sandbox::new();
        let mut controller = sandbox.mock_controller(LONG_LIVED);

        assert_eq!(controller.quit(), ReturnCode::QuitApplication);
        assert_eq!(controller.check_status(), ReturnCode::Inactive);

        controller.connect(LOGIN_CODE).await.unwrap();
        assert_eq!(controller.quit(), ReturnCode::QuitApplication);
        assert!(controller.has_subprocess());
        assert_eq!(controller.check_status(), ReturnCode::Active);

        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.vpn_config("", &[]);
        config.command = vec!["/nonexistent/gpclient".to_string()];
        let mut controller = SessionController::new(&config);

        let result = controller.connect(LOGIN_CODE).await;
        assert!(matches!(result.unwrap_err(), SessionError::Spawn { .. }));
        assert!(!controller.has_subprocess());
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.vpn_config("", &[]);
        config.command.clear();
        let mut controller = SessionController::new(&config);

        let result = controller.connect(LOGIN_CODE).await;
        assert!(matches!(result.unwrap_err(), SessionError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_unwritable_logfile_is_an_error() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.vpn_config("cat > /dev/null", &[]);
        config.logfile = sandbox.path("missing-dir/gpclient.log");
        let mut controller = SessionController::new(&config);

        let result = controller.connect(LOGIN_CODE).await;
        assert!(matches!(result.unwrap_err(), SessionError::LogFile { .. }));
    }
}
