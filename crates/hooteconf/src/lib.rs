//! Minimal configuration loading for the remote job worker.
//!
//! A job process takes exactly two required values on its command line
//! (worker address, master address) and otherwise runs from compiled
//! defaults. Everything in [`JobConfig`] is an operational knob an operator
//! might reasonably want to tune without a rebuild: heartbeat timeouts, the
//! retry policy used when announcing a reset to the master, and the root
//! directory new sessions unpack their code bundle into.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/remote-job/config.toml` (system)
//! 2. `~/.config/remote-job/config.toml` (user)
//! 3. `./remote-job.toml` (local override)
//! 4. Environment variables (`REMOTE_JOB_*`)
//!
//! # Example Config
//!
//! ```toml
//! [heartbeat]
//! client_timeout_ms = 5000
//! worker_timeout_ms = 30000
//!
//! [reset]
//! ack_retries = 3
//! ack_backoff_base_ms = 200
//! ack_backoff_max_ms = 5000
//!
//! [scratch]
//! root = "/var/tmp/remote-job"
//! ```

pub mod loader;

pub use loader::{ConfigSources, discover_config_files_with_override};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Heartbeat timeouts, one per endpoint that tracks liveness.
///
/// The ping endpoint has no timeout of its own -- it answers immediately and
/// carries no notion of a missed beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How long the client heartbeat endpoint waits for a beat before
    /// declaring the client dead and ending the session.
    #[serde(default = "HeartbeatConfig::default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    /// How long the worker heartbeat endpoint waits for a beat before
    /// declaring the worker dead and exiting the process.
    #[serde(default = "HeartbeatConfig::default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
}

impl HeartbeatConfig {
    fn default_client_timeout_ms() -> u64 {
        5_000
    }

    fn default_worker_timeout_ms() -> u64 {
        30_000
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            client_timeout_ms: Self::default_client_timeout_ms(),
            worker_timeout_ms: Self::default_worker_timeout_ms(),
        }
    }
}

/// Retry policy for the reset announcement sent to the master.
///
/// The master can be briefly unreachable (restart, network blip) without the
/// job giving up its slot; this bounds how long it waits before exiting
/// rather than spinning forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Maximum attempts to deliver the reset announcement before exiting.
    #[serde(default = "ResetConfig::default_ack_retries")]
    pub ack_retries: u32,

    /// Initial backoff between reset-announcement attempts.
    #[serde(default = "ResetConfig::default_ack_backoff_base_ms")]
    pub ack_backoff_base_ms: u64,

    /// Backoff cap, reached after repeated doubling.
    #[serde(default = "ResetConfig::default_ack_backoff_max_ms")]
    pub ack_backoff_max_ms: u64,
}

impl ResetConfig {
    fn default_ack_retries() -> u32 {
        3
    }

    fn default_ack_backoff_base_ms() -> u64 {
        200
    }

    fn default_ack_backoff_max_ms() -> u64 {
        5_000
    }

    pub fn ack_backoff_base(&self) -> Duration {
        Duration::from_millis(self.ack_backoff_base_ms)
    }

    pub fn ack_backoff_max(&self) -> Duration {
        Duration::from_millis(self.ack_backoff_max_ms)
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            ack_retries: Self::default_ack_retries(),
            ack_backoff_base_ms: Self::default_ack_backoff_base_ms(),
            ack_backoff_max_ms: Self::default_ack_backoff_max_ms(),
        }
    }
}

/// Where a session unpacks the code bundle it receives before constructing
/// the user object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Parent directory for per-session scratch directories. Each session
    /// gets its own uniquely-named subdirectory underneath.
    #[serde(default = "ScratchConfig::default_root")]
    pub root: PathBuf,
}

impl ScratchConfig {
    fn default_root() -> PathBuf {
        std::env::temp_dir()
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
        }
    }
}

/// Complete job configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reset: ResetConfig,
    #[serde(default)]
    pub scratch: ScratchConfig,
}

impl JobConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/remote-job/config.toml`
    /// 3. `~/.config/remote-job/config.toml`
    /// 4. `./remote-job.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about which sources contributed.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from an optional path and return source information.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = JobConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}
