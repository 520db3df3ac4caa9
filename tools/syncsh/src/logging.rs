use crate::errors::SyncshError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Append-only JSONL event trail shared by every wrapper process of a build.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

#[derive(Serialize)]
struct LogLine<'a> {
    pid: u32,
    level: &'a str,
    event_type: &'a str,
    payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), SyncshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncshError::io("create log dir", e))?;
        }
        let mut line = serde_json::to_string(&LogLine {
            pid: std::process::id(),
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| SyncshError::io("encode log event", e.into()))?;
        line.push('\n');

        // One write per line keeps concurrent appenders from splitting records.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SyncshError::io("open event log", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| SyncshError::io("write event log", e))
    }
}

/// Optional event log; a wrapper without `SYNCSH_LOG` records nothing.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    logger: Option<JsonlLogger>,
}

impl EventLog {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            logger: path.map(JsonlLogger::new),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn info(&self, event_type: &str, payload: Value) {
        self.record("info", event_type, payload);
    }

    pub fn warn(&self, event_type: &str, payload: Value) {
        self.record("warn", event_type, payload);
    }

    fn record(&self, level: &str, event_type: &str, payload: Value) {
        let Some(logger) = &self.logger else {
            return;
        };
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{EventLog, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/syncsh.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "child_exit",
                payload: json!({"recipe": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"child_exit\""));
        assert!(text.contains(&format!("\"pid\":{}", std::process::id())));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("syncsh.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 8;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "block_emitted",
                payload: json!("ééééééééé"),
            })
            .expect("append");

        let line = std::fs::read_to_string(&path).expect("read");
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
        assert!(parsed["payload"].as_str().expect("string").ends_with("..."));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        EventLog::disabled().info("passthrough", json!({}));
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    #[test]
    fn events_append_one_line_each() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("syncsh.jsonl");
        let log = EventLog::new(Some(path.as_path()));

        log.info("lock_acquired", json!({"offset": 0}));
        log.warn("warning", json!({"message": "tee unavailable"}));

        let text = std::fs::read_to_string(&path).expect("read");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"level\":\"warn\""));
    }
}
