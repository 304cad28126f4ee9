//! Append-only JSONL audit log.
//!
//! Every mutating intent lands here as one JSON line. Rows are never
//! rewritten; reads scan the file, which stays cheap at control-plane
//! volumes.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use rk_domain::audit::AuditEntry;
use rk_domain::error::{Error, Result};

/// Append-only audit log backed by `audit.jsonl`.
pub struct AuditLog {
    path: PathBuf,
    /// Serialises appends so concurrent handlers never interleave lines.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        Ok(Self {
            path: state_path.join("audit.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one row.
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).map_err(Error::Json)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;
        Ok(())
    }

    /// The `n` most recent rows, oldest of those first.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let rows = self.read_all()?;
        let skip = rows.len().saturating_sub(n);
        Ok(rows.into_iter().skip(skip).collect())
    }

    /// Every row carrying the given trace ID, in append order.
    pub fn find_by_trace(&self, trace_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.trace_id == trace_id)
            .collect())
    }

    fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
        // Skip unparseable lines rather than failing the whole read.
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
