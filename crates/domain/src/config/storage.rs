use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the durable state files.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Config versions retained per agent; older versions are pruned.
    #[serde(default = "d_retained_versions")]
    pub retained_versions: usize,
    /// Inputs longer than this many lines get a summary instead of a diff.
    #[serde(default = "d_max_diff_lines")]
    pub max_diff_lines: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            retained_versions: d_retained_versions(),
            max_diff_lines: d_max_diff_lines(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_retained_versions() -> usize {
    20
}
fn d_max_diff_lines() -> usize {
    2000
}
