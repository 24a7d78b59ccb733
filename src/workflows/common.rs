//! Steps shared by several workflows.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::{
    Contributions, ContributorWallet, PlatformTrigger, RewardOutcomes, WalletAssignments,
    FETCH_MESSAGES, GET_COMMUNITY_PROFILE, GET_TOKENS_AND_BADGES,
};
use crate::chain::TokenRegistry;
use crate::error::{PipelineError, PipelineResult};
use crate::settlement::{summarize, RewardSettler, SettlementTarget};
use crate::store::{CommunityStore, MessageStore};
use crate::transcript;
use crate::types::{CommunityProfile, TokensAndBadges, Transcript, WindowTrigger, UNKNOWN_USER};
use crate::wallet::{MissingWallet, WalletLookup, WalletResolver};
use crate::workflow::{Step, StepContext, StepId};

/// Loads the profile named by a window trigger.
pub(crate) struct GetCommunityProfile {
    pub communities: Arc<dyn CommunityStore>,
}

#[async_trait]
impl Step<WindowTrigger> for GetCommunityProfile {
    type Output = CommunityProfile;

    fn id(&self) -> StepId {
        GET_COMMUNITY_PROFILE
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<CommunityProfile> {
        let id = ctx.trigger().community_id;
        self.communities
            .profile(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("community profile", id.to_string()))
    }
}

/// Renders the trigger window of the community's server as a transcript.
pub(crate) struct FetchMessages {
    pub messages: Arc<dyn MessageStore>,
}

#[async_trait]
impl Step<WindowTrigger> for FetchMessages {
    type Output = Transcript;

    fn id(&self) -> StepId {
        FETCH_MESSAGES
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<Transcript> {
        let trigger = ctx.trigger();
        let profile: &CommunityProfile = ctx.require(GET_COMMUNITY_PROFILE)?;
        let server_id = profile.server_id(trigger.platform).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "community '{}' has no {} server configured",
                profile.name, trigger.platform
            ))
        })?;

        let messages = self
            .messages
            .messages_between(trigger.platform, server_id, trigger.start_date, trigger.end_date)
            .await?;
        tracing::info!(
            "Fetched {} {} messages for '{}' between {} and {}",
            messages.len(),
            trigger.platform,
            profile.name,
            trigger.start_date,
            trigger.end_date
        );
        Ok(transcript::build(&messages, trigger.platform))
    }
}

/// Looks up the community's registered reward tokens and badges.
pub(crate) struct GetTokensAndBadges {
    pub registry: Arc<dyn TokenRegistry>,
}

#[async_trait]
impl<T: PlatformTrigger> Step<T> for GetTokensAndBadges {
    type Output = TokensAndBadges;

    fn id(&self) -> StepId {
        GET_TOKENS_AND_BADGES
    }

    async fn execute(&self, ctx: &StepContext<'_, T>) -> PipelineResult<TokensAndBadges> {
        let profile: &CommunityProfile = ctx.require(GET_COMMUNITY_PROFILE)?;
        if profile.community_address.is_empty() {
            tracing::warn!("Community '{}' has no on-chain address", profile.name);
            return Ok(TokensAndBadges::default());
        }
        self.registry
            .tokens_and_badges(&profile.community_address)
            .await
    }
}

/// Resolves a wallet for every distinct contributor. Lookup errors become
/// [`MissingWallet::LookupFailed`] so that the reward is still stored.
pub(crate) struct ResolveWallets {
    pub id: StepId,
    pub contributions_from: StepId,
    pub wallets: Arc<dyn WalletResolver>,
}

impl ResolveWallets {
    async fn lookup(&self, contributor: &str, trigger: &impl PlatformTrigger) -> WalletLookup {
        if contributor == UNKNOWN_USER {
            return WalletLookup::Missing {
                reason: MissingWallet::NoLinkedIdentity,
            };
        }
        match self.wallets.resolve(contributor, trigger.platform()).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Wallet lookup for {} failed: {}", contributor, e);
                WalletLookup::Missing {
                    reason: MissingWallet::LookupFailed,
                }
            }
        }
    }
}

#[async_trait]
impl<T: PlatformTrigger> Step<T> for ResolveWallets {
    type Output = WalletAssignments;

    fn id(&self) -> StepId {
        self.id
    }

    async fn execute(&self, ctx: &StepContext<'_, T>) -> PipelineResult<WalletAssignments> {
        let contributions: &Contributions = ctx.require(self.contributions_from)?;
        let mut seen = HashSet::new();
        let contributors: Vec<&str> = contributions
            .0
            .iter()
            .map(|c| c.contributor.as_str())
            .filter(|c| seen.insert(*c))
            .collect();

        let trigger = ctx.trigger();
        let lookups = join_all(contributors.iter().map(|c| self.lookup(c, trigger))).await;

        Ok(WalletAssignments(
            contributors
                .into_iter()
                .zip(lookups)
                .map(|(contributor, wallet)| {
                    if let WalletLookup::Missing { reason } = &wallet {
                        tracing::info!("No wallet for {}: {}", contributor, reason);
                    }
                    ContributorWallet {
                        contributor: contributor.to_string(),
                        wallet,
                    }
                })
                .collect(),
        ))
    }
}

/// Drives each contribution through the settlement state machine. Mints are
/// never interrupted by the orchestrator timeout.
pub(crate) struct SettleRewards {
    pub id: StepId,
    pub contributions_from: StepId,
    pub wallets_from: StepId,
    pub settler: RewardSettler,
}

#[async_trait]
impl<T: PlatformTrigger> Step<T> for SettleRewards {
    type Output = RewardOutcomes;

    fn id(&self) -> StepId {
        self.id
    }

    fn timeout_exempt(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &StepContext<'_, T>) -> PipelineResult<RewardOutcomes> {
        let contributions: &Contributions = ctx.require(self.contributions_from)?;
        if contributions.0.is_empty() {
            return Ok(RewardOutcomes {
                outcomes: Vec::new(),
                summary: summarize(&[]),
            });
        }

        let profile: &CommunityProfile = ctx.require(GET_COMMUNITY_PROFILE)?;
        let registry: &TokensAndBadges = ctx.require(GET_TOKENS_AND_BADGES)?;
        let wallets: &WalletAssignments = ctx.require(self.wallets_from)?;
        let points_token = registry.points_token().ok_or_else(|| {
            PipelineError::not_found("points token", profile.community_address.clone())
        })?;

        let target = SettlementTarget {
            profile,
            platform: ctx.trigger().platform(),
            points_token,
        };

        // Sequential: one relayer write at a time per run.
        let mut outcomes = Vec::with_capacity(contributions.0.len());
        for contribution in &contributions.0 {
            let wallet = wallets
                .lookup(&contribution.contributor)
                .cloned()
                .unwrap_or(WalletLookup::Missing {
                    reason: MissingWallet::NoLinkedIdentity,
                });
            outcomes.push(self.settler.settle(&target, contribution, &wallet).await);
        }

        let summary = summarize(&outcomes);
        Ok(RewardOutcomes { outcomes, summary })
    }
}
