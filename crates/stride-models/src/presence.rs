use serde::{Deserialize, Serialize};

/// Authenticated identity attached to a live transport session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub display_name: String,
    /// Out-of-band contact address (email) used for escalation fallback.
    pub contact: String,
}

/// Snapshot entry for presence UIs: who is reachable right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSummary {
    pub user_id: i64,
    pub display_name: String,
    pub contact: String,
    pub session_count: usize,
}
