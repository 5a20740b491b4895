//! Shared fixtures for unit tests

use crate::config::VpnConfig;
use crate::vpn::SessionController;
use nix::unistd::{Gid, Group};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Stand-in for gpclient: copies the login code to its log until EOF,
/// creates the lock file 200 ms later and removes it again on SIGTERM or
/// after `$2` ticks of 100 ms.
const MOCK_VPN_CLIENT: &str = r#"
lock="$1"
ticks="$2"
trap 'rm -f "$lock"; exit 0' TERM
cat
sleep 0.2
echo $$ > "$lock"
i=0
while [ "$i" -lt "$ticks" ]; do
    sleep 0.1
    i=$((i + 1))
done
rm -f "$lock"
"#;

pub const LOGIN_CODE: &str = r#"{"success":{"portalUserauthcookie":"","preloginCookie":"HyiL+E5lbwtah/vkSYDaJ0AZfAk+GLJIEjmjrXvnfNn3v1eDS+cgDY7NbjvwZjb28WQQeQ==","token":null,"username":"someone@example.org"}}"#;

pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn lockfile(&self) -> PathBuf {
        self.dir.path().join("gpclient.lock")
    }

    pub fn logfile(&self) -> PathBuf {
        self.dir.path().join("gpclient.log")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Config running `sh -c <script>` with the sandbox lock file as `$1`
    pub fn vpn_config(&self, script: &str, extra_args: &[&str]) -> VpnConfig {
        let mut command = vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "mock-gpclient".to_string(),
            self.lockfile().to_string_lossy().to_string(),
        ];
        command.extend(extra_args.iter().map(|arg| arg.to_string()));
        VpnConfig {
            command,
            lockfile: self.lockfile(),
            logfile: self.logfile(),
            grace_secs: 1,
            terminate_timeout_secs: 5,
        }
    }

    /// Controller driving the mock client, which lives for `lifetime` once connected
    pub fn mock_controller(&self, lifetime: Duration) -> SessionController {
        let ticks = (lifetime.as_millis() / 100).to_string();
        SessionController::new(&self.vpn_config(MOCK_VPN_CLIENT, &[&ticks]))
    }

    /// Pretend a VPN client was started by hand
    pub fn create_foreign_lockfile(&self) {
        std::fs::write(self.lockfile(), "4242\n").unwrap();
    }
}

/// Name of the calling process's primary group, which it is always a member of
pub fn current_group_name() -> String {
    Group::from_gid(Gid::current())
        .unwrap()
        .expect("primary group has no name")
        .name
}
