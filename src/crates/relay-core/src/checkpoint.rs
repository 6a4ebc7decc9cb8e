//! Graph execution checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted snapshot of graph state after a node completes
///
/// `seq` starts at 1 and strictly increases per run with no gaps; the pair
/// `(run_id, seq)` is unique and inserting a duplicate fails with a conflict
/// error, which resume paths rely on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub seq: u64,
    /// Node whose successful execution produced this snapshot
    pub node_id: String,
    /// Complete graph state snapshot, JSON-encoded
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        seq: u64,
        node_id: impl Into<String>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            seq,
            node_id: node_id.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let cp = Checkpoint::new("r1", 3, "prepare", serde_json::json!({"k": 1}));
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 3);
        assert_eq!(back.node_id, "prepare");
        assert_eq!(back.state["k"], 1);
    }
}
