//! Configuration handling for gpvpn
//!
//! Both the daemon and the client read the same TOML file. The daemon cares
//! about `[server]` and `[vpn]`, the client about `[server]`, `[client]` and
//! `[auth]`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "gpvpn.toml";

const SYSTEM_CONFIG_FILE: &str = "/etc/gpvpn/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub vpn: VpnConfig,
    pub auth: AuthConfig,
}

/// Location of the control socket and the group allowed to use it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_dir: PathBuf,
    pub socket_name: String,
    pub group: String,
    /// Seconds a connected client may stay silent before it is dropped
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp"),
            socket_name: "gpvpn.sock".to_string(),
            group: "gpvpn".to_string(),
            request_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_name)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Refuse to talk to the daemon unless the user is in `server.group`
    pub check_group: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { check_group: true }
    }
}

/// The supervised VPN client program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub command: Vec<String>,
    pub lockfile: PathBuf,
    pub logfile: PathBuf,
    /// Seconds to wait after launching before looking for the lock file
    pub grace_secs: u64,
    /// Seconds to wait for a terminated client before killing it
    pub terminate_timeout_secs: u64,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            command: [
                "/usr/bin/gpclient",
                "--fix-openssl",
                "connect",
                "--browser",
                "default",
                "vpn.hereon.de",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            lockfile: PathBuf::from("/var/run/gpclient.lock"),
            logfile: PathBuf::from("gpclient.log"),
            grace_secs: 5,
            terminate_timeout_secs: 10,
        }
    }
}

impl VpnConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// The helper that produces a login code on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub command: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            command: [
                "/usr/bin/gpauth",
                "--fix-openssl",
                "vpn.hereon.de",
                "--browser",
                "default",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load config from an explicit path or the default locations
    ///
    /// An explicit path must exist. Otherwise the first existing file of
    /// `./gpvpn.toml`, the user config dir and `/etc/gpvpn/config.toml` wins,
    /// falling back to built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::load(path);
        }

        for candidate in default_locations() {
            if candidate.exists() {
                info!("Loading config from {}", candidate.display());
                return Self::load(&candidate);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("gpvpn").join("config.toml"));
    }
    locations.push(PathBuf::from(SYSTEM_CONFIG_FILE));
    locations
}
