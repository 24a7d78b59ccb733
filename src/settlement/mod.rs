//! Reward settlement state machine.
//!
//! ```text
//!               ┌──────────┐  no wallet        ┌───────────────┐
//!               │          │──────────────────▶│               │
//!               │          │  auto disabled    │ PendingStored │
//!  Evaluated ──▶│ decide() │──────────────────▶│               │
//!               │          │                   └───────────────┘
//!               │          │  ready   ┌──────┐  receipt   ┌─────────┐
//!               │          │─────────▶│ mint │───────────▶│ Settled │
//!               └──────────┘          └──────┘            └─────────┘
//!                                        │ revert / timeout / unreachable
//!                                        ▼
//!                                  SettlementFailed
//! ```
//!
//! Every branch uploads the same artifact first and clamps points before
//! anything is persisted. Mints are never retried: a Settled record is never
//! replaced, and a mint whose confirmation wait ran out is looked up by its
//! queue id before another one is issued.

mod record;

pub use record::{dedupe_key, RewardRecord, RewardStatus};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::artifact::{ArtifactStore, ContentHash};
use crate::chain::{Ledger, MintRequest, TxState};
use crate::error::PipelineError;
use crate::retry::{retry_idempotent, RetryPolicy};
use crate::store::RewardStore;
use crate::tasks::scoring::clamp;
use crate::types::{CommunityProfile, Contribution, Platform};
use crate::wallet::{MissingWallet, WalletLookup};

/// Branch taken by an evaluated contribution before it reaches a terminal
/// [`RewardStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementState {
    NoWallet { reason: MissingWallet },
    ManualApprovalRequired { wallet: String },
    ReadyToSettle { wallet: String },
}

/// Pick the branch for a contribution. Wallet is checked before the
/// community's auto-reward setting.
pub fn decide(wallet: &WalletLookup, auto_rewards_enabled: bool) -> SettlementState {
    match wallet {
        WalletLookup::Missing { reason } => SettlementState::NoWallet { reason: *reason },
        WalletLookup::Found { address } if !auto_rewards_enabled => {
            SettlementState::ManualApprovalRequired {
                wallet: address.clone(),
            }
        }
        WalletLookup::Found { address } => SettlementState::ReadyToSettle {
            wallet: address.clone(),
        },
    }
}

/// Round and clamp suggested points into the community's range.
pub fn clamp_points(points: f64, (min, max): (i64, i64)) -> i64 {
    if !points.is_finite() {
        return min;
    }
    clamp(points.round() as i64, min, max)
}

/// Per-contribution result reported by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    Settled,
    PendingStored,
    SettlementFailed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionOutcome {
    pub contributor: String,
    pub reward_id: String,
    pub status: OutcomeStatus,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
}

impl ContributionOutcome {
    fn error(contribution: &Contribution, points: i64, error: &PipelineError) -> Self {
        Self {
            contributor: contribution.contributor.clone(),
            reward_id: contribution.reward_id.clone(),
            status: OutcomeStatus::Error,
            points,
            wallet_address: None,
            artifact: None,
            tx_hash: None,
            error: Some(error.to_string()),
            summary: format!("Error processing reward: {}", error),
        }
    }

    fn from_record(record: &RewardRecord, summary: String) -> Self {
        let status = match record.status {
            RewardStatus::PendingStored => OutcomeStatus::PendingStored,
            RewardStatus::Settled => OutcomeStatus::Settled,
            RewardStatus::SettlementFailed => OutcomeStatus::SettlementFailed,
        };
        Self {
            contributor: record.contributor.clone(),
            reward_id: record.reward_id.clone(),
            status,
            points: record.points,
            wallet_address: record.wallet_address.clone(),
            artifact: Some(record.ipfs_hash.clone()),
            tx_hash: record.tx_hash.clone(),
            error: record.error.clone(),
            summary,
        }
    }
}

/// Community-level inputs shared by every contribution of a run.
pub struct SettlementTarget<'a> {
    pub profile: &'a CommunityProfile,
    pub platform: Platform,
    pub points_token: &'a str,
}

/// Drives contributions through the settlement state machine.
pub struct RewardSettler {
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn Ledger>,
    rewards: Arc<dyn RewardStore>,
    retry: RetryPolicy,
}

impl RewardSettler {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn Ledger>,
        rewards: Arc<dyn RewardStore>,
    ) -> Self {
        Self {
            artifacts,
            ledger,
            rewards,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The immutable artifact describing a contribution.
    pub fn artifact(
        contribution: &Contribution,
        platform: Platform,
        auto_rewards: bool,
    ) -> Value {
        json!({
            "contributor": contribution.contributor,
            "rewardId": contribution.reward_id,
            "messageIds": contribution.evidence,
            "description": contribution.description,
            "impact": contribution.impact,
            "reasoning": contribution.suggested_reward.reasoning,
            "platform": platform,
            "auto_rewards": auto_rewards,
        })
    }

    /// Settle or defer one contribution. Always yields exactly one outcome.
    pub async fn settle(
        &self,
        target: &SettlementTarget<'_>,
        contribution: &Contribution,
        wallet: &WalletLookup,
    ) -> ContributionOutcome {
        let profile = target.profile;
        let points = clamp_points(contribution.suggested_reward.points, profile.points_range());

        let document = Self::artifact(contribution, target.platform, profile.auto_rewards_enabled);
        let artifact = match self.artifacts.upload(&document).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(
                    "Artifact upload for {} ({}) failed: {}",
                    contribution.contributor,
                    contribution.reward_id,
                    e
                );
                return ContributionOutcome::error(contribution, points, &e);
            }
        };

        let key = dedupe_key(
            profile.id,
            &contribution.contributor,
            &contribution.reward_id,
            &contribution.evidence,
        );

        match self.rewards.reward_by_dedupe_key(&key).await {
            Ok(Some(existing)) => {
                if let Some(outcome) = self.reconcile(existing, contribution).await {
                    return outcome;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    "Could not check prior settlement for {}: {}",
                    contribution.contributor,
                    e
                );
                return ContributionOutcome::error(contribution, points, &e);
            }
        }

        let mut record = RewardRecord {
            id: None,
            community_id: profile.id,
            contributor: contribution.contributor.clone(),
            wallet_address: wallet.address().map(str::to_string),
            reward_id: contribution.reward_id.clone(),
            points,
            points_token_address: target.points_token.to_string(),
            community_address: profile.community_address.clone(),
            ipfs_hash: artifact,
            is_auto_reward: profile.auto_rewards_enabled,
            no_wallet_address: false,
            status: RewardStatus::PendingStored,
            tx_hash: None,
            tx_queue_id: None,
            error: None,
            dedupe_key: key,
            created_at: Utc::now(),
        };

        let state = decide(wallet, profile.auto_rewards_enabled);
        tracing::debug!("{} -> {:?}", contribution.reward_id, state);
        match state {
            SettlementState::NoWallet { reason } => {
                record.no_wallet_address = true;
                if reason == MissingWallet::LookupFailed {
                    record.error = Some(reason.to_string());
                }
                let summary = format!(
                    "Stored pending reward for {} (no wallet address)",
                    record.contributor
                );
                self.store_pending(record, contribution, summary).await
            }
            SettlementState::ManualApprovalRequired { .. } => {
                record.is_auto_reward = false;
                let summary = format!(
                    "Stored pending reward for {} (manual approval required)",
                    record.contributor
                );
                self.store_pending(record, contribution, summary).await
            }
            SettlementState::ReadyToSettle { wallet } => {
                self.mint(target, record, contribution, &wallet).await
            }
        }
    }

    /// Resolve a record left by an earlier run of the same contribution.
    ///
    /// Returns the outcome to report when the record must not be replaced:
    /// it is Settled, its unconfirmed mint turned out to be mined, or that
    /// mint's fate is still unknown. `None` lets the contribution go through
    /// `decide()` again.
    async fn reconcile(
        &self,
        mut existing: RewardRecord,
        contribution: &Contribution,
    ) -> Option<ContributionOutcome> {
        if existing.status == RewardStatus::Settled {
            tracing::info!(
                "Reward {} for {} already settled, skipping",
                existing.reward_id,
                existing.contributor
            );
            let summary = format!(
                "{} was already awarded {} points - {}",
                existing.contributor,
                existing.points,
                existing.tx_hash.as_deref().unwrap_or_default()
            );
            return Some(ContributionOutcome::from_record(&existing, summary));
        }

        let queue_id = match (&existing.status, &existing.tx_queue_id) {
            (RewardStatus::SettlementFailed, Some(queue_id)) => queue_id.clone(),
            _ => return None,
        };

        match self.ledger.transaction_state(&queue_id).await {
            Ok(TxState::Mined { tx_hash }) => {
                tracing::info!(
                    "Earlier mint for {} (queue {}) was mined: {}",
                    existing.contributor,
                    queue_id,
                    tx_hash
                );
                existing.status = RewardStatus::Settled;
                existing.tx_hash = Some(tx_hash);
                existing.error = None;
                let summary = format!(
                    "{} was awarded {} points - {}",
                    existing.contributor,
                    existing.points,
                    existing.tx_hash.as_deref().unwrap_or_default()
                );
                Some(match self.upsert(&existing).await {
                    Ok(stored) => ContributionOutcome::from_record(&stored, summary),
                    Err(e) => {
                        tracing::error!(
                            "Recording confirmed mint for {} failed: {}",
                            existing.contributor,
                            e
                        );
                        ContributionOutcome::from_record(&existing, summary)
                    }
                })
            }
            Ok(TxState::Failed { reason }) => {
                tracing::info!(
                    "Earlier mint for {} (queue {}) failed ({}), settling again",
                    existing.contributor,
                    queue_id,
                    reason
                );
                None
            }
            Ok(TxState::Pending) | Err(_) => {
                tracing::warn!(
                    "Earlier mint for {} (queue {}) is still unconfirmed, not minting again",
                    existing.contributor,
                    queue_id
                );
                let summary = format!(
                    "Reward for {} awaits confirmation of queued mint {}",
                    contribution.contributor, queue_id
                );
                Some(ContributionOutcome::from_record(&existing, summary))
            }
        }
    }

    async fn store_pending(
        &self,
        record: RewardRecord,
        contribution: &Contribution,
        summary: String,
    ) -> ContributionOutcome {
        match self.upsert(&record).await {
            Ok(stored) => {
                tracing::info!("{}", summary);
                ContributionOutcome::from_record(&stored, summary)
            }
            Err(e) => {
                tracing::error!("Storing pending reward for {} failed: {}", record.contributor, e);
                ContributionOutcome::error(contribution, record.points, &e)
            }
        }
    }

    async fn mint(
        &self,
        target: &SettlementTarget<'_>,
        mut record: RewardRecord,
        contribution: &Contribution,
        wallet: &str,
    ) -> ContributionOutcome {
        let request = match MintRequest::mission(
            &target.profile.community_address,
            target.points_token,
            wallet,
            &record.reward_id,
            record.points.max(0) as u64,
            &record.ipfs_hash,
        ) {
            Ok(request) => request,
            Err(e) => return ContributionOutcome::error(contribution, record.points, &e),
        };

        let summary = match self.ledger.mint_fungible(&request).await {
            Ok(receipt) => {
                record.status = RewardStatus::Settled;
                record.tx_hash = Some(receipt.tx_hash);
                format!(
                    "{} was awarded {} points - {}",
                    record.contributor,
                    record.points,
                    record.tx_hash.as_deref().unwrap_or_default()
                )
            }
            Err(e) => {
                record.status = RewardStatus::SettlementFailed;
                record.error = Some(e.to_string());
                if let PipelineError::SettlementUnconfirmed { queue_id, .. } = &e {
                    record.tx_queue_id = Some(queue_id.clone());
                }
                format!("Failed to reward {}: {}", record.contributor, e)
            }
        };

        match self.upsert(&record).await {
            Ok(stored) => {
                tracing::info!("{}", summary);
                ContributionOutcome::from_record(&stored, summary)
            }
            Err(e) => {
                // The ledger call already happened; report it even though the
                // record could not be written.
                tracing::error!(
                    "Recording {} reward for {} failed: {}",
                    record.status.as_str(),
                    record.contributor,
                    e
                );
                ContributionOutcome::from_record(&record, summary)
            }
        }
    }

    async fn upsert(&self, record: &RewardRecord) -> Result<RewardRecord, PipelineError> {
        retry_idempotent(&self.retry, "reward upsert", || {
            self.rewards.upsert_reward(record)
        })
        .await
    }
}

/// Sum up outcomes for logs and reports.
pub fn summarize(outcomes: &[ContributionOutcome]) -> String {
    if outcomes.is_empty() {
        return "No contribution to reward".to_string();
    }
    outcomes
        .iter()
        .map(|o| o.summary.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
