//! Runtime configuration for the agent runtime.
//!
//! Intentionally minimal: no TOML/YAML parsing dependency is introduced
//! (matching the upstream toolkit's config struct, which is hand
//! constructed rather than file-parsed). Callers build a [`RuntimeConfig`]
//! directly or via [`RuntimeConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

/// Name of the environment variable that overrides the log directory.
pub const LOG_DIR_ENV_VAR: &str = "COOKAREQ_LOG_DIR";

/// Global configuration for the agent runtime's ambient services.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory the rotating log file (`agentctl.log`, plus numbered
    /// backups) is written under. Consumed by
    /// [`crate::logging::init_with_config`].
    pub log_dir: PathBuf,
    /// Maximum agent turn engine steps per run before `max_steps` abort.
    pub max_steps: usize,
    /// Maximum bounded retries on a recoverable LLM validation error.
    pub max_retries: usize,
    /// Per-request timeout for LLM calls.
    pub llm_timeout: Duration,
    /// Per-request timeout for MCP tool calls (and readiness probes).
    pub mcp_timeout: Duration,
    /// Size threshold in bytes that triggers log rotation.
    pub log_rotation_bytes: u64,
    /// Number of rotated log backups to retain.
    pub log_backup_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            max_steps: 32,
            max_retries: 2,
            llm_timeout: Duration::from_secs(300),
            mcp_timeout: Duration::from_secs(5),
            log_rotation_bytes: 2 * 1024 * 1024,
            log_backup_count: 5,
        }
    }
}

impl RuntimeConfig {
    /// Build a config from defaults, honoring `COOKAREQ_LOG_DIR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(LOG_DIR_ENV_VAR) {
            if !dir.is_empty() {
                config.log_dir = PathBuf::from(dir);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_dir_is_relative_logs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.max_steps, 32);
        assert_eq!(config.max_retries, 2);
    }
}
