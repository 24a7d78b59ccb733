//! Reward the contributions found in a community's message window.

use std::sync::Arc;

use async_trait::async_trait;

use super::common::{FetchMessages, GetCommunityProfile, GetTokensAndBadges, ResolveWallets, SettleRewards};
use super::{
    Collaborators, Contributions, FETCH_MESSAGES, GET_COMMUNITY_PROFILE, GET_TOKENS_AND_BADGES,
    GET_WALLET_ADDRESSES, IDENTIFY_REWARDS, SETTLE_REWARDS,
};
use crate::error::PipelineResult;
use crate::evaluator::ContributionEvaluator;
use crate::settlement::RewardSettler;
use crate::types::{Transcript, WindowTrigger};
use crate::workflow::{Criticality, Step, StepContext, StepId, Workflow};

pub const NAME: &str = "community-rewards";

struct IdentifyRewards {
    evaluator: Arc<dyn ContributionEvaluator>,
}

#[async_trait]
impl Step<WindowTrigger> for IdentifyRewards {
    type Output = Contributions;

    fn id(&self) -> StepId {
        IDENTIFY_REWARDS
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<Contributions> {
        let transcript: &Transcript = ctx.require(FETCH_MESSAGES)?;
        if transcript.message_count == 0 {
            tracing::info!("Empty window, nothing to evaluate");
            return Ok(Contributions::default());
        }
        let found = self
            .evaluator
            .identify_contributions(&transcript.transcript)
            .await?;
        Ok(Contributions(found))
    }
}

pub fn build(collab: &Collaborators) -> PipelineResult<Workflow<WindowTrigger>> {
    let mut wf = Workflow::new(NAME);
    wf.register(
        GetCommunityProfile {
            communities: collab.communities.clone(),
        },
        &[],
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
        FetchMessages {
            messages: collab.messages.clone(),
        },
        &[GET_COMMUNITY_PROFILE],
        Criticality::Required,
    )?
    .register(
        IdentifyRewards {
            evaluator: collab.evaluator.clone(),
        },
        &[FETCH_MESSAGES],
        Criticality::Required,
    )?
    .register(
        ResolveWallets {
            id: GET_WALLET_ADDRESSES,
            contributions_from: IDENTIFY_REWARDS,
            wallets: collab.wallets.clone(),
        },
        &[IDENTIFY_REWARDS],
        Criticality::Required,
    )?
    .register(
        SettleRewards {
            id: SETTLE_REWARDS,
            contributions_from: IDENTIFY_REWARDS,
            wallets_from: GET_WALLET_ADDRESSES,
            settler: RewardSettler::new(
                collab.artifacts.clone(),
                collab.ledger.clone(),
                collab.rewards.clone(),
            ),
        },
        &[GET_COMMUNITY_PROFILE, GET_TOKENS_AND_BADGES, IDENTIFY_REWARDS, GET_WALLET_ADDRESSES],
        Criticality::Required,
    )?;
    wf.validate()?;
    Ok(wf)
}
