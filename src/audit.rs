//! Append-only JSONL audit trail.
//!
//! One line per event. A failed write is logged and swallowed: the audit
//! trail never stops order flow.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Signal,
    Order,
    Fill,
    Rejection,
    KillSwitch,
    ManualApprovalMode,
}

#[derive(Serialize)]
struct AuditRecord<'a, T: Serialize> {
    event: AuditKind,
    logged_at: DateTime<Utc>,
    data: &'a T,
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!("📝 Audit trail: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record<T: Serialize>(&self, event: AuditKind, data: &T) {
        let record = AuditRecord {
            event,
            logged_at: Utc::now(),
            data,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(?event, "audit serialization failed: {}", e);
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!(?event, path = %self.path.display(), "audit write failed: {}", e);
        }
    }
}
