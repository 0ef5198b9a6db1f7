//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HeartbeatConfig, JobConfig, ResetConfig, ScratchConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order).
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values.
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI-supplied override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/remote-job/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("remote-job/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("remote-job.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<JobConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<JobConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut config = JobConfig::default();

    if let Some(heartbeat) = table.get("heartbeat").and_then(|v| v.as_table()) {
        if let Some(v) = heartbeat.get("client_timeout_ms").and_then(|v| v.as_integer()) {
            config.heartbeat.client_timeout_ms = v as u64;
        }
        if let Some(v) = heartbeat.get("worker_timeout_ms").and_then(|v| v.as_integer()) {
            config.heartbeat.worker_timeout_ms = v as u64;
        }
    }

    if let Some(reset) = table.get("reset").and_then(|v| v.as_table()) {
        if let Some(v) = reset.get("ack_retries").and_then(|v| v.as_integer()) {
            config.reset.ack_retries = v as u32;
        }
        if let Some(v) = reset.get("ack_backoff_base_ms").and_then(|v| v.as_integer()) {
            config.reset.ack_backoff_base_ms = v as u64;
        }
        if let Some(v) = reset.get("ack_backoff_max_ms").and_then(|v| v.as_integer()) {
            config.reset.ack_backoff_max_ms = v as u64;
        }
    }

    if let Some(scratch) = table.get("scratch").and_then(|v| v.as_table()) {
        if let Some(v) = scratch.get("root").and_then(|v| v.as_str()) {
            config.scratch.root = expand_path(v);
        }
    }

    Ok(config)
}

/// Merge two configs field-by-field, with `overlay` taking precedence
/// wherever it differs from the compiled default.
pub fn merge_configs(base: JobConfig, overlay: JobConfig) -> JobConfig {
    let default_heartbeat = HeartbeatConfig::default();
    let default_reset = ResetConfig::default();
    let default_scratch = ScratchConfig::default();

    JobConfig {
        heartbeat: HeartbeatConfig {
            client_timeout_ms: if overlay.heartbeat.client_timeout_ms != default_heartbeat.client_timeout_ms {
                overlay.heartbeat.client_timeout_ms
            } else {
                base.heartbeat.client_timeout_ms
            },
            worker_timeout_ms: if overlay.heartbeat.worker_timeout_ms != default_heartbeat.worker_timeout_ms {
                overlay.heartbeat.worker_timeout_ms
            } else {
                base.heartbeat.worker_timeout_ms
            },
        },
        reset: ResetConfig {
            ack_retries: if overlay.reset.ack_retries != default_reset.ack_retries {
                overlay.reset.ack_retries
            } else {
                base.reset.ack_retries
            },
            ack_backoff_base_ms: if overlay.reset.ack_backoff_base_ms != default_reset.ack_backoff_base_ms {
                overlay.reset.ack_backoff_base_ms
            } else {
                base.reset.ack_backoff_base_ms
            },
            ack_backoff_max_ms: if overlay.reset.ack_backoff_max_ms != default_reset.ack_backoff_max_ms {
                overlay.reset.ack_backoff_max_ms
            } else {
                base.reset.ack_backoff_max_ms
            },
        },
        scratch: ScratchConfig {
            root: if overlay.scratch.root != default_scratch.root {
                overlay.scratch.root
            } else {
                base.scratch.root
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut JobConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("REMOTE_JOB_CLIENT_HEARTBEAT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.heartbeat.client_timeout_ms = ms;
            sources
                .env_overrides
                .push("REMOTE_JOB_CLIENT_HEARTBEAT_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("REMOTE_JOB_WORKER_HEARTBEAT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.heartbeat.worker_timeout_ms = ms;
            sources
                .env_overrides
                .push("REMOTE_JOB_WORKER_HEARTBEAT_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("REMOTE_JOB_RESET_ACK_RETRIES") {
        if let Ok(n) = v.parse() {
            config.reset.ack_retries = n;
            sources
                .env_overrides
                .push("REMOTE_JOB_RESET_ACK_RETRIES".to_string());
        }
    }
    if let Ok(v) = env::var("REMOTE_JOB_RESET_ACK_BACKOFF_BASE_MS") {
        if let Ok(ms) = v.parse() {
            config.reset.ack_backoff_base_ms = ms;
            sources
                .env_overrides
                .push("REMOTE_JOB_RESET_ACK_BACKOFF_BASE_MS".to_string());
        }
    }
    if let Ok(v) = env::var("REMOTE_JOB_RESET_ACK_BACKOFF_MAX_MS") {
        if let Ok(ms) = v.parse() {
            config.reset.ack_backoff_max_ms = ms;
            sources
                .env_overrides
                .push("REMOTE_JOB_RESET_ACK_BACKOFF_MAX_MS".to_string());
        }
    }
    if let Ok(v) = env::var("REMOTE_JOB_SCRATCH_ROOT") {
        config.scratch.root = expand_path(&v);
        sources.env_overrides.push("REMOTE_JOB_SCRATCH_ROOT".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        // Logging is configured directly from RUST_LOG by the binary; record
        // it here only so `load_with_sources` reports it was present.
        let _ = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand `~` and a single leading `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                return PathBuf::from(var_value).join(&stripped[slash_pos + 1..]);
            }
        } else if let Ok(var_value) = env::var(stripped) {
            return PathBuf::from(var_value);
        }
        return PathBuf::from(path);
    }

    PathBuf::from(path)
}
