//! Hallway configuration
//!
//! One hallway is one independent knocking configuration: the shared
//! knock parameters plus the server's action commands or the client's
//! target host. Hallways live as TOML files in a hallway directory,
//! one file per hallway, named after the file stem.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Knock parameters shared between server and client.
///
/// Both sides must agree on every field here or the derived sequences
/// will not match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnockProfile {
    /// Shared secret; base64 text is decoded, anything else is used
    /// as a passphrase
    pub key: String,

    /// Period length in seconds
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Number of knocks in a sequence
    #[serde(default = "default_length")]
    pub length: u16,

    /// Seconds allowed to complete a sequence after the doorbell
    #[serde(default = "default_timeout")]
    pub timeout: u32,

    /// The doorbell port; should be otherwise unused
    #[serde(default = "default_doorbell")]
    pub doorbell: u16,
}

impl KnockProfile {
    /// Resolve the textual key into the raw secret bytes.
    pub fn normalized_key(&self) -> Vec<u8> {
        dm_protocol::normalize_key(&self.key)
    }

    /// Validate the shared parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::Invalid("key must not be empty".into()));
        }
        if self.interval < 30 {
            return Err(ConfigError::Invalid(format!(
                "interval must be at least 30 seconds, got {}",
                self.interval
            )));
        }
        if self.length == 0 {
            return Err(ConfigError::Invalid("length must be at least 1".into()));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1".into()));
        }
        if self.doorbell == 0 {
            return Err(ConfigError::Invalid("doorbell port must not be 0".into()));
        }
        Ok(())
    }
}

/// Server-side hallway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHallway {
    /// Shared knock parameters
    #[serde(flatten)]
    pub profile: KnockProfile,

    /// Command run when a guest completes the sequence; `%IP%` is
    /// replaced with the source address
    pub open_command: String,

    /// Command run `close_delay` seconds after a successful open
    #[serde(default)]
    pub close_command: Option<String>,

    /// Delay in seconds before `close_command` runs
    #[serde(default)]
    pub close_delay: Option<u32>,

    /// Command run when a guest fails, times out, or rings with a
    /// stale period
    #[serde(default)]
    pub banish_command: Option<String>,

    /// Consume a mismatched knock and keep the session alive instead
    /// of failing immediately
    #[serde(default)]
    pub advance_on_failure: bool,

    /// Dry-run mode: log outcomes instead of running commands, accept
    /// the ADVANCE_/ENDKNOCK wire commands, stretch the timeout
    #[serde(default)]
    pub debug: bool,

    /// Accept a doorbell whose claimed period is exactly one off from
    /// the server's
    #[serde(default)]
    pub allow_period_skew: bool,
}

impl ServerHallway {
    /// Validate the full server-side configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile.validate()?;
        if self.open_command.is_empty() {
            return Err(ConfigError::Invalid("open_command must not be empty".into()));
        }
        if self.close_command.is_some() != self.close_delay.is_some() {
            return Err(ConfigError::Invalid(
                "close_command and close_delay must be set together".into(),
            ));
        }
        Ok(())
    }
}

/// Client-side hallway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHallway {
    /// Shared knock parameters
    #[serde(flatten)]
    pub profile: KnockProfile,

    /// Server address or DNS name
    pub hostname: String,

    /// Milliseconds to wait between knocks
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl ClientHallway {
    /// Validate the full client-side configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile.validate()?;
        if self.hostname.is_empty() {
            return Err(ConfigError::Invalid("hostname must not be empty".into()));
        }
        Ok(())
    }
}

fn default_interval() -> u32 {
    86_400
}

fn default_length() -> u16 {
    32
}

fn default_timeout() -> u32 {
    10
}

fn default_doorbell() -> u16 {
    12_345
}

fn default_pause_ms() -> u64 {
    100
}

/// Get the default server hallway directory.
pub fn default_server_hallway_dir() -> PathBuf {
    PathBuf::from("/etc/doorman/hallways")
}

/// Get the default client hallway directory.
pub fn default_client_hallway_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hallways")
}

/// Load a hallway configuration from a TOML file.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save a hallway configuration to a TOML file.
pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Load every valid server hallway from a directory.
///
/// Scans for `*.toml` files; a file that fails to parse or validate
/// is logged and skipped so one broken hallway cannot keep its
/// siblings from starting.
pub fn load_server_hallways(dir: &Path) -> Result<Vec<(String, ServerHallway)>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::NotFound(dir.to_path_buf()));
    }

    let mut hallways = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        let name = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let hallway: ServerHallway = match load_config(&path) {
            Ok(hallway) => hallway,
            Err(e) => {
                tracing::warn!("Skipping hallway file {:?}: {}", path, e);
                continue;
            }
        };
        if let Err(e) = hallway.validate() {
            tracing::warn!("Skipping hallway {}: {}", name, e);
            continue;
        }

        hallways.push((name, hallway));
    }

    hallways.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(hallways)
}
