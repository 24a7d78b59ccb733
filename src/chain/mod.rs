//! Reward ledger and token/badge registry boundary.
//!
//! The ledger is the community's reward contract. Calls are addressed to the
//! community contract; the contract mints or transfers on behalf of the
//! community.

mod engine;
mod registry;

pub use engine::EngineLedger;
pub use registry::SubgraphRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::types::TokensAndBadges;

/// Activity type recorded with every reward mint.
pub const ACTIVITY_MISSION: &str = "MISSION";

/// Decimals of the community points token.
pub const TOKEN_DECIMALS: u32 = 18;

/// Confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// Last known state of a queued ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Mined { tx_hash: String },
    /// Reverted, errored or cancelled; it will never be mined.
    Failed { reason: String },
    /// Queued or sent but not mined yet, or the relayer cannot tell.
    Pending,
}

/// Arguments of a fungible reward mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MintRequest {
    /// Community reward contract.
    pub contract: String,
    pub token: String,
    pub receiver: String,
    /// Fixed-point amount as a decimal string.
    pub amount: String,
    /// `bytes32` hex.
    pub activity_id: String,
    /// `bytes32` hex.
    pub activity_type: String,
    pub metadata_uri: String,
}

impl MintRequest {
    /// Build a mission reward mint for `points` whole points.
    pub fn mission(
        contract: &str,
        token: &str,
        receiver: &str,
        reward_id: &str,
        points: u64,
        metadata_uri: &str,
    ) -> PipelineResult<Self> {
        Ok(Self {
            contract: contract.to_string(),
            token: token.to_string(),
            receiver: receiver.to_string(),
            amount: to_fixed_point(points),
            activity_id: to_bytes32_hex(reward_id)?,
            activity_type: to_bytes32_hex(ACTIVITY_MISSION)?,
            metadata_uri: metadata_uri.to_string(),
        })
    }
}

/// On-chain reward ledger.
///
/// Mints and transfers are not idempotent; implementations must not retry
/// them and must bound their own confirmation wait. A write that is queued
/// but not confirmed in time fails with
/// [`PipelineError::SettlementUnconfirmed`] carrying its queue id.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn mint_fungible(&self, request: &MintRequest) -> PipelineResult<TxReceipt>;

    /// Current state of a write queued earlier.
    async fn transaction_state(&self, queue_id: &str) -> PipelineResult<TxState>;

    async fn mint_badge(
        &self,
        contract: &str,
        badge: &str,
        receiver: &str,
        activity_id: &str,
        activity_type: &str,
        metadata_uri: &str,
    ) -> PipelineResult<TxReceipt>;

    async fn transfer_fungible(
        &self,
        contract: &str,
        token: &str,
        receiver: &str,
        amount: &str,
    ) -> PipelineResult<TxReceipt>;

    async fn transfer_badge(
        &self,
        contract: &str,
        badge: &str,
        receiver: &str,
        token_id: &str,
    ) -> PipelineResult<TxReceipt>;

    async fn owner(&self, contract: &str) -> PipelineResult<String>;

    async fn transfer_ownership(&self, contract: &str, new_owner: &str)
        -> PipelineResult<TxReceipt>;

    async fn accept_ownership(&self, contract: &str) -> PipelineResult<TxReceipt>;
}

/// Tokens and badges registered for a community.
#[async_trait]
pub trait TokenRegistry: Send + Sync {
    /// Unknown communities yield empty lists, not an error.
    async fn tokens_and_badges(&self, community_address: &str) -> PipelineResult<TokensAndBadges>;
}

/// Whole points to an 18-decimal fixed-point integer string.
pub fn to_fixed_point(points: u64) -> String {
    (points as u128 * 10u128.pow(TOKEN_DECIMALS)).to_string()
}

/// UTF-8 bytes right-padded with zeros to 32 bytes, as `0x` hex.
pub fn to_bytes32_hex(value: &str) -> PipelineResult<String> {
    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        return Err(PipelineError::SettlementFailure(format!(
            "'{}' does not fit in bytes32 ({} bytes)",
            value,
            bytes.len()
        )));
    }
    let mut padded = [0u8; 32];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(format!("0x{}", hex::encode(padded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_amounts() {
        assert_eq!(to_fixed_point(0), "0");
        assert_eq!(to_fixed_point(1), "1000000000000000000");
        assert_eq!(to_fixed_point(120), "120000000000000000000");
    }

    #[test]
    fn test_bytes32_padding() {
        let mission = to_bytes32_hex(ACTIVITY_MISSION).unwrap();
        assert_eq!(mission.len(), 66);
        assert!(mission.starts_with("0x4d495353494f4e00"));
        assert!(mission.ends_with(&"0".repeat(50)));
        assert!(to_bytes32_hex(&"x".repeat(32)).is_ok());
        assert!(to_bytes32_hex(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_mission_request() {
        let req = MintRequest::mission("0xc", "0xt", "0xr", "bug-fix", 50, "ipfs://cid").unwrap();
        assert_eq!(req.amount, "50000000000000000000");
        assert_eq!(req.activity_type, to_bytes32_hex("MISSION").unwrap());
        assert!(req.activity_id.starts_with("0x6275672d666978"));
    }
}
