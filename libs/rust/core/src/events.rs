//! Append-only JSON-lines event log.
//!
//! One object per line: `ts` (float epoch seconds), `event`, then
//! event-specific fields. Writes are best-effort; a failed write must never
//! fail the request that produced it.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct EventLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl EventLog {
    /// Opens (or creates) the dated log file under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("api-{}.log", Utc::now().format("%Y%m%d")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event line. `fields` must be a JSON object; its entries
    /// are merged after `ts` and `event`.
    pub fn append(&self, event: &str, fields: Value) {
        let mut line = json!({ "ts": epoch_secs(), "event": event });
        if let (Some(obj), Value::Object(extra)) = (line.as_object_mut(), fields) {
            for (k, v) in extra {
                obj.insert(k, v);
            }
        }
        let mut f = self.file.lock();
        if let Err(e) = writeln!(f, "{line}") {
            tracing::warn!(error = %e, "event log write failed");
        }
    }
}

fn epoch_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append("startup", json!({ "model": "m.json", "exists": false }));
        log.append("request", json!({ "path": "/health", "status": 200 }));

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "startup");
        assert_eq!(first["model"], "m.json");
        assert!(first["ts"].as_f64().unwrap() > 0.0);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], 200);
    }

    #[test]
    fn clones_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let clone = log.clone();
        log.append("a", json!({}));
        clone.append("b", json!({}));
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
