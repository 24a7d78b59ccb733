//! Persisted reward records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    PendingStored,
    Settled,
    SettlementFailed,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingStored => "pending_stored",
            Self::Settled => "settled",
            Self::SettlementFailed => "settlement_failed",
        }
    }
}

/// Terminal record of one contribution's reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub community_id: Uuid,
    pub contributor: String,
    pub wallet_address: Option<String>,
    pub reward_id: String,
    /// Clamped to the community's points range.
    pub points: i64,
    pub points_token_address: String,
    pub community_address: String,
    /// Content hash of the uploaded artifact.
    pub ipfs_hash: String,
    pub is_auto_reward: bool,
    pub no_wallet_address: bool,
    pub status: RewardStatus,
    #[serde(default)]
    pub tx_hash: Option<String>,
    /// Relayer handle of a mint whose confirmation wait ran out.
    #[serde(default)]
    pub tx_queue_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// See [`dedupe_key`].
    pub dedupe_key: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Idempotency key of a contribution's reward.
///
/// Identical contributor, reward id and evidence within a community always
/// map to the same record. The artifact hash is left out: the artifact also
/// carries per-run context such as the auto-reward switch.
pub fn dedupe_key(
    community_id: Uuid,
    contributor: &str,
    reward_id: &str,
    evidence: &[String],
) -> String {
    let mut hasher = Sha256::new();
    for part in [community_id.to_string().as_str(), contributor, reward_id] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    for id in evidence {
        hasher.update(id.as_bytes());
        hasher.update(b",");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_is_stable_and_field_sensitive() {
        let community = Uuid::new_v4();
        let m1 = vec!["m1".to_string()];
        let a = dedupe_key(community, "alice", "bug-fix", &m1);
        assert_eq!(a, dedupe_key(community, "alice", "bug-fix", &m1));
        assert_ne!(a, dedupe_key(community, "alice", "bug-fix", &["m2".to_string()]));
        assert_ne!(a, dedupe_key(Uuid::new_v4(), "alice", "bug-fix", &m1));
        assert_ne!(
            dedupe_key(community, "ab", "c", &m1),
            dedupe_key(community, "a", "bc", &m1)
        );
        assert_ne!(
            dedupe_key(community, "a", "b", &["m1".to_string(), "m2".to_string()]),
            dedupe_key(community, "a", "b", &["m1m2".to_string()])
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RewardStatus::PendingStored).unwrap(),
            serde_json::json!("pending_stored")
        );
        assert_eq!(RewardStatus::Settled.as_str(), "settled");
    }
}
