use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Command prefix recognised at the start of an operator line.
    #[serde(default = "d_prefix")]
    pub prefix: String,
    /// Rooms whose members may issue commands. Empty = any room the
    /// connector delivers from.
    #[serde(default)]
    pub operator_rooms: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prefix: d_prefix(),
            operator_rooms: Vec::new(),
        }
    }
}

fn d_prefix() -> String {
    "/ruriko".into()
}
