use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of machine authentication activity
pub struct ActivityLog {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

/// Short, non-reversible identifier for a product key
pub fn key_fingerprint(product_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_key.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..12].to_string()
}

impl ActivityLog {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open activity log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    /// Outcome of reading the cached session at startup: found, corrupt or absent
    pub fn restore(&mut self, outcome: &str) -> Result<()> {
        self.log("restore", serde_json::json!({ "outcome": outcome }))
    }

    pub fn auth_attempt(
        &mut self,
        venue_id: &str,
        product_key: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(
            "auth_attempt",
            serde_json::json!({
                "venue_id": venue_id,
                "key_fingerprint": key_fingerprint(product_key),
                "success": success,
                "error": error,
            }),
        )
    }

    pub fn logout(&mut self, venue_id: Option<&str>) -> Result<()> {
        self.log("logout", serde_json::json!({ "venue_id": venue_id }))
    }

    pub fn backend_error(&mut self, operation: &str, message: &str) -> Result<()> {
        self.log(
            "backend_error",
            serde_json::json!({
                "operation": operation,
                "message": message,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_events(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = key_fingerprint("VRX001-ADMIN-KEY");
        assert_eq!(a.len(), 12);
        assert_eq!(a, key_fingerprint("VRX001-ADMIN-KEY"));
        assert_ne!(a, key_fingerprint("VRX002-ADMIN-KEY"));
    }

    #[test]
    fn test_auth_attempt_never_writes_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("activity.jsonl");
        let mut log = ActivityLog::open(&path, "run-1").unwrap();
        log.auth_attempt("venue-1", "SECRET-KEY", false, Some("Invalid credentials"))
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("SECRET-KEY"));

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "auth_attempt");
        assert_eq!(events[0]["run_id"], "run-1");
        assert_eq!(events[0]["venue_id"], "venue-1");
        assert_eq!(events[0]["success"], false);
        assert_eq!(events[0]["error"], "Invalid credentials");
    }

    #[test]
    fn test_log_appends_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.jsonl");
        {
            let mut log = ActivityLog::open(&path, "a").unwrap();
            log.restore("absent").unwrap();
        }
        let mut log = ActivityLog::open(&path, "b").unwrap();
        log.logout(Some("venue-1")).unwrap();
        log.backend_error("active_venues", "timeout").unwrap();

        let events = read_events(&path);
        let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["restore", "logout", "backend_error"]);
        assert_eq!(events[0]["outcome"], "absent");
        assert_eq!(events[1]["run_id"], "b");
    }

    #[test]
    fn test_open_reports_unusable_directory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("state");
        std::fs::write(&blocker, "not a directory").unwrap();

        let Err(err) = ActivityLog::open(&blocker.join("activity.jsonl"), "run") else {
            panic!("opening under a file should fail");
        };
        assert!(err.to_string().contains("Failed to create"));
        assert!(err.to_string().contains("state"));
    }
}
