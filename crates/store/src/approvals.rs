//! Durable approvals with TTL expiry and at-most-once resolution.
//!
//! The store is mechanical: it owns persistence, expiry flips, and the
//! conditional `Pending → terminal` transition. The four-eyes policy and
//! re-dispatch live in the gateway's approval gate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use rk_domain::approval::{Approval, ApprovalStatus};
use rk_domain::error::{Error, Result};
use rk_domain::trace::TraceEvent;

/// JSON-file-backed approval store, keyed by approval ID.
pub struct ApprovalStore {
    path: PathBuf,
    approvals: RwLock<HashMap<String, Approval>>,
}

impl ApprovalStore {
    /// Load or create the store at `state_path/approvals.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("approvals.json");

        let approvals = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            approvals = approvals.len(),
            path = %path.display(),
            "approval store loaded"
        );

        Ok(Self {
            path,
            approvals: RwLock::new(approvals),
        })
    }

    pub fn insert(&self, approval: Approval) -> Result<()> {
        let mut approvals = self.approvals.write();
        approvals.insert(approval.id.clone(), approval);
        self.persist(&approvals)
    }

    pub fn get(&self, id: &str) -> Option<Approval> {
        self.approvals.read().get(id).cloned()
    }

    /// All approvals, newest first.
    pub fn list(&self) -> Vec<Approval> {
        let mut all: Vec<Approval> = self.approvals.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn list_pending(&self) -> Vec<Approval> {
        self.list()
            .into_iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .collect()
    }

    /// Flip every pending approval past its TTL to `Expired`. Returns
    /// how many rows changed. Called before any list/show/decision.
    pub fn check_expiry(&self) -> Result<usize> {
        let now = Utc::now();
        let mut approvals = self.approvals.write();
        let mut flipped = 0;
        for approval in approvals.values_mut() {
            if approval.status == ApprovalStatus::Pending && approval.is_expired(now) {
                approval.status = ApprovalStatus::Expired;
                approval.resolved_at = Some(now);
                approval.resolve_reason = Some("approval TTL elapsed".into());
                flipped += 1;
            }
        }
        if flipped > 0 {
            self.persist(&approvals)?;
            tracing::info!(flipped, "expired stale approvals");
        }
        Ok(flipped)
    }

    /// Conditionally transition a pending approval to a terminal status.
    ///
    /// At-most-once: when the row is no longer `Pending`, the call fails
    /// with `Conflict` carrying the current status, and nothing changes.
    pub fn resolve(
        &self,
        id: &str,
        to: ApprovalStatus,
        resolved_by: &str,
        reason: Option<String>,
    ) -> Result<Approval> {
        debug_assert!(to.is_terminal());
        let mut approvals = self.approvals.write();
        let approval = approvals
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("approval {id:?}")))?;

        if approval.status != ApprovalStatus::Pending {
            return Err(Error::Conflict(format!(
                "approval {id} already {}",
                approval.status
            )));
        }

        approval.status = to;
        approval.resolved_at = Some(Utc::now());
        approval.resolved_by = Some(resolved_by.to_owned());
        approval.resolve_reason = reason;
        let snapshot = approval.clone();
        self.persist(&approvals)?;

        TraceEvent::ApprovalResolved {
            approval_id: id.to_owned(),
            action: snapshot.action.clone(),
            status: to.to_string(),
            resolved_by: resolved_by.to_owned(),
        }
        .emit();

        Ok(snapshot)
    }

    fn persist(&self, approvals: &HashMap<String, Approval>) -> Result<()> {
        let json = serde_json::to_string_pretty(approvals).map_err(Error::Json)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
