//! Structured logging helpers shared by the MCP server and the agent turn
//! engine.
//!
//! The runtime logs through the standard `log` facade (matching the rest
//! of the toolkit's `log::info!`/`log::warn!` call sites); this module
//! adds the two pieces of behavior the specification requires on top of
//! that facade: sensitive-header redaction and key=value structured
//! records, rather than a bespoke logging backend.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

/// Header/field names whose values are redacted before logging.
const SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "token",
    "secret",
    "password",
    "api_key",
    "cookie",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

/// Redact sensitive keys in a flat string map, replacing values with
/// `"***"`. Used for HTTP headers and for sanitizing tool arguments before
/// they hit a log record.
pub fn redact_map(fields: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(k, v)| {
            if is_sensitive_key(k) {
                (k.clone(), "***".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// Redact sensitive keys anywhere they appear as object keys in a JSON
/// value, recursively. Used to sanitize tool call arguments before they
/// are written to the structured tool-event log.
pub fn redact_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), serde_json::Value::String("***".to_string()));
                } else {
                    out.insert(k.clone(), redact_json(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_json).collect())
        }
        other => other.clone(),
    }
}

/// A structured HTTP request log record, emitted once per request after
/// the handler completes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RequestLogRecord {
    pub timestamp: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub client: Option<String>,
    pub status: u16,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestLogRecord {
    /// Build a record from raw header values, redacting sensitive ones
    /// before they're ever stored on the record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        headers: BTreeMap<String, String>,
        client: Option<String>,
        status: u16,
        duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            query,
            headers: redact_map(&headers),
            client,
            status,
            duration_ms,
            error,
        }
    }

    pub fn log(&self) {
        log::info!(
            "request_id={} method={} path={} status={} duration_ms={}{}",
            self.request_id,
            self.method,
            self.path,
            self.status,
            self.duration_ms,
            self.error
                .as_ref()
                .map(|e| format!(" error={}", e))
                .unwrap_or_default()
        );
    }
}

/// A structured tool invocation log record, emitted once per `/mcp` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolEventRecord {
    pub timestamp: String,
    pub tool: String,
    pub outcome: &'static str,
    pub arguments: serde_json::Value,
    pub request_id: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolEventRecord {
    pub fn log(&self) {
        log::info!(
            "request_id={} tool={} outcome={} duration_ms={}{}",
            self.request_id,
            self.tool,
            self.outcome,
            self.duration_ms,
            self.error
                .as_ref()
                .map(|e| format!(" error={}", e))
                .unwrap_or_default()
        );
    }
}

/// A size-triggered rotating file sink.
///
/// Once the current file exceeds `max_bytes`, it is renamed to `<name>.1`
/// (existing numbered backups shift up one slot, the oldest beyond
/// `max_backups` is dropped) and a fresh file takes its place. Plugged
/// into `env_logger` as a [`env_logger::Target::Pipe`], so filtering and
/// record formatting still go through the same facade as the rest of the
/// toolkit — only the sink the formatted line lands on is custom.
struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    max_backups: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    fn open(path: PathBuf, max_bytes: u64, max_backups: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            max_backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let base = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("agentctl.log")
            .to_string();
        let mut backup = self.path.clone();
        backup.set_file_name(format!("{}.{}", base, index));
        backup
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.max_backups == 0 {
            self.file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
            self.written = 0;
            return Ok(());
        }
        for index in (1..self.max_backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                let _ = std::fs::rename(&from, self.backup_path(index + 1));
            }
        }
        let _ = std::fs::rename(&self.path, self.backup_path(1));
        self.file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= self.max_bytes {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Initialize the process-wide `env_logger` backend with stderr only.
/// Idempotent: safe to call more than once (subsequent calls are no-ops).
/// Prefer [`init_with_config`] in production binaries, which adds the
/// rotating file sink; this is for tests and embedders with no
/// filesystem to write to.
pub fn init() {
    let _ = env_logger::try_init();
}

/// Initialize logging with a rotating file sink under `config.log_dir`.
/// Idempotent: safe to call more than once (subsequent calls are no-ops).
/// Falls back to stderr-only logging (via [`init`]) if the log directory
/// or file cannot be opened, rather than failing startup over a logging
/// sink.
pub fn init_with_config(config: &crate::config::RuntimeConfig) {
    if let Err(err) = std::fs::create_dir_all(&config.log_dir) {
        log::warn!("could not create log directory {:?}: {}", config.log_dir, err);
        init();
        return;
    }

    let path = config.log_dir.join("agentctl.log");
    let writer = match RotatingFileWriter::open(path.clone(), config.log_rotation_bytes, config.log_backup_count) {
        Ok(writer) => writer,
        Err(err) => {
            log::warn!("could not open log file {:?}: {}", path, err);
            init();
            return;
        }
    };

    let _ = env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_json_masks_sensitive_keys_recursively() {
        let value = serde_json::json!({
            "rid": "DEMO1",
            "nested": {"api_key": "sk-secret", "field": "statement"}
        });
        let redacted = redact_json(&value);
        assert_eq!(redacted["rid"], "DEMO1");
        assert_eq!(redacted["nested"]["api_key"], "***");
        assert_eq!(redacted["nested"]["field"], "statement");
    }

    #[test]
    fn is_sensitive_key_matches_known_names() {
        assert!(is_sensitive_key("Authorization"));
        assert!(is_sensitive_key("X-Api-Key"));
        assert!(!is_sensitive_key("rid"));
    }

    #[test]
    fn request_log_record_redacts_sensitive_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer secret".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let record = RequestLogRecord::new("req-1", "GET", "/health", None, headers, None, 200, 3, None);
        assert_eq!(record.headers["authorization"], "***");
        assert_eq!(record.headers["content-type"], "application/json");
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agentctl-logging-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rotating_writer_rotates_once_max_bytes_is_exceeded() {
        let dir = scratch_dir("rotate");
        let path = dir.join("agentctl.log");
        let mut writer = RotatingFileWriter::open(path.clone(), 8, 2).unwrap();

        writer.write_all(b"12345678").unwrap();
        assert!(!dir.join("agentctl.log.1").exists());

        writer.write_all(b"rotated").unwrap();
        assert!(dir.join("agentctl.log.1").exists());
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rotating_writer_keeps_only_max_backups() {
        let dir = scratch_dir("backups");
        let path = dir.join("agentctl.log");
        let mut writer = RotatingFileWriter::open(path.clone(), 4, 2).unwrap();

        for _ in 0..5 {
            writer.write_all(b"xxxxx").unwrap();
        }

        assert!(dir.join("agentctl.log.1").exists());
        assert!(dir.join("agentctl.log.2").exists());
        assert!(!dir.join("agentctl.log.3").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
