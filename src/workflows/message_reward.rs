//! Reward a single chat message.
//!
//! ```text
//! fetchMessage ─▶ getCommunityProfile ─┬─▶ getTokensAndBadges ──────────────┐
//!                                      └─▶ evaluateMessage ─▶ getWalletAddress ─▶ processReward
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::common::{GetTokensAndBadges, ResolveWallets, SettleRewards};
use super::{
    Collaborators, Contributions, EVALUATE_MESSAGE, FETCH_MESSAGE, GET_COMMUNITY_PROFILE,
    GET_TOKENS_AND_BADGES, GET_WALLET_ADDRESS, PROCESS_REWARD,
};
use crate::error::{PipelineError, PipelineResult};
use crate::evaluator::ContributionEvaluator;
use crate::settlement::RewardSettler;
use crate::store::{CommunityStore, MessageStore};
use crate::types::{ChatMessage, CommunityProfile, MessageRewardTrigger};
use crate::workflow::{Criticality, Step, StepContext, StepId, Workflow};

pub const NAME: &str = "message-reward";

struct FetchMessage {
    messages: Arc<dyn MessageStore>,
}

#[async_trait]
impl Step<MessageRewardTrigger> for FetchMessage {
    type Output = ChatMessage;

    fn id(&self) -> StepId {
        FETCH_MESSAGE
    }

    async fn execute(&self, ctx: &StepContext<'_, MessageRewardTrigger>) -> PipelineResult<ChatMessage> {
        let id = ctx.trigger().message_id;
        let message = self
            .messages
            .message(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("message", id.to_string()))?;
        tracing::debug!("Fetched message {} by {}", message.id, message.display_name());
        Ok(message)
    }
}

/// Finds the community owning the message's server.
struct ProfileForMessage {
    communities: Arc<dyn CommunityStore>,
}

#[async_trait]
impl Step<MessageRewardTrigger> for ProfileForMessage {
    type Output = CommunityProfile;

    fn id(&self) -> StepId {
        GET_COMMUNITY_PROFILE
    }

    async fn execute(
        &self,
        ctx: &StepContext<'_, MessageRewardTrigger>,
    ) -> PipelineResult<CommunityProfile> {
        let platform = ctx.trigger().platform;
        let message: &ChatMessage = ctx.require(FETCH_MESSAGE)?;
        let server_id = message.content.server_id.as_deref().ok_or_else(|| {
            PipelineError::not_found("server id for message", message.id.to_string())
        })?;
        self.communities
            .profile_by_server(platform, server_id)
            .await?
            .ok_or_else(|| {
                PipelineError::not_found("community profile", format!("{}:{}", platform, server_id))
            })
    }
}

struct EvaluateMessage {
    evaluator: Arc<dyn ContributionEvaluator>,
}

#[async_trait]
impl Step<MessageRewardTrigger> for EvaluateMessage {
    type Output = Contributions;

    fn id(&self) -> StepId {
        EVALUATE_MESSAGE
    }

    async fn execute(
        &self,
        ctx: &StepContext<'_, MessageRewardTrigger>,
    ) -> PipelineResult<Contributions> {
        let message: &ChatMessage = ctx.require(FETCH_MESSAGE)?;
        let profile: &CommunityProfile = ctx.require(GET_COMMUNITY_PROFILE)?;

        if message.content.text.trim().is_empty() {
            return Ok(Contributions::default());
        }

        let found = self
            .evaluator
            .evaluate_message(&message.content.text, profile.points_range())
            .await?;
        tracing::info!("Message {} yielded {} contributions", message.id, found.len());
        Ok(Contributions(
            found
                .into_iter()
                .map(|c| c.into_contribution(message.display_name(), message.id))
                .collect(),
        ))
    }
}

pub fn build(collab: &Collaborators) -> PipelineResult<Workflow<MessageRewardTrigger>> {
    let mut wf = Workflow::new(NAME);
    wf.register(
        FetchMessage {
            messages: collab.messages.clone(),
        },
        &[],
        Criticality::Required,
    )?
    .register(
        ProfileForMessage {
            communities: collab.communities.clone(),
        },
        &[FETCH_MESSAGE],
        Criticality::Required,
    )?
    .register(
        GetTokensAndBadges {
            registry: collab.registry.clone(),
        },
        &[GET_COMMUNITY_PROFILE],
        Criticality::Required,
    )?
    .register(
        EvaluateMessage {
            evaluator: collab.evaluator.clone(),
        },
        &[FETCH_MESSAGE, GET_COMMUNITY_PROFILE],
        Criticality::Required,
    )?
    .register(
        ResolveWallets {
            id: GET_WALLET_ADDRESS,
            contributions_from: EVALUATE_MESSAGE,
            wallets: collab.wallets.clone(),
        },
        &[EVALUATE_MESSAGE],
        Criticality::Required,
    )?
    .register(
        SettleRewards {
            id: PROCESS_REWARD,
            contributions_from: EVALUATE_MESSAGE,
            wallets_from: GET_WALLET_ADDRESS,
            settler: RewardSettler::new(
                collab.artifacts.clone(),
                collab.ledger.clone(),
                collab.rewards.clone(),
            ),
        },
        &[GET_COMMUNITY_PROFILE, GET_TOKENS_AND_BADGES, EVALUATE_MESSAGE, GET_WALLET_ADDRESS],
        Criticality::Required,
    )?;
    wf.validate()?;
    Ok(wf)
}
