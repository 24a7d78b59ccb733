//! Summarize a community's activity window and store the summary.

use std::sync::Arc;

use async_trait::async_trait;

use super::common::{FetchMessages, GetCommunityProfile};
use super::{
    Collaborators, GeneratedSummary, SavedSummary, FETCH_MESSAGES, GENERATE_SUMMARY,
    GET_COMMUNITY_PROFILE, SAVE_SUMMARY,
};
use crate::error::PipelineResult;
use crate::evaluator::Summarizer;
use crate::store::SummaryStore;
use crate::types::{CommunityProfile, CommunitySummary, Transcript, WindowTrigger};
use crate::workflow::{Criticality, Step, StepContext, StepId, Workflow};

pub const NAME: &str = "community-summary";

const QUIET_WINDOW: &str = "No community activity in this period.";

struct GenerateSummary {
    summarizer: Arc<dyn Summarizer>,
}

#[async_trait]
impl Step<WindowTrigger> for GenerateSummary {
    type Output = GeneratedSummary;

    fn id(&self) -> StepId {
        GENERATE_SUMMARY
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<GeneratedSummary> {
        let transcript: &Transcript = ctx.require(FETCH_MESSAGES)?;
        if transcript.message_count == 0 {
            return Ok(GeneratedSummary {
                summary: QUIET_WINDOW.to_string(),
            });
        }
        let summary = self.summarizer.summarize(&transcript.transcript).await?;
        Ok(GeneratedSummary { summary })
    }
}

struct SaveSummary {
    summaries: Arc<dyn SummaryStore>,
}

#[async_trait]
impl Step<WindowTrigger> for SaveSummary {
    type Output = SavedSummary;

    fn id(&self) -> StepId {
        SAVE_SUMMARY
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<SavedSummary> {
        let trigger = ctx.trigger();
        let profile: &CommunityProfile = ctx.require(GET_COMMUNITY_PROFILE)?;
        let transcript: &Transcript = ctx.require(FETCH_MESSAGES)?;
        let generated: &GeneratedSummary = ctx.require(GENERATE_SUMMARY)?;

        let summary_id = self
            .summaries
            .save_summary(&CommunitySummary {
                community_id: profile.id,
                summary: generated.summary.clone(),
                start_date: trigger.start_date,
                end_date: trigger.end_date,
                platform: trigger.platform,
                message_count: transcript.message_count,
                unique_user_count: transcript.unique_user_count,
                active_periods_count: transcript.active_periods_count,
            })
            .await?;
        tracing::info!("Saved summary {} for '{}'", summary_id, profile.name);
        Ok(SavedSummary { summary_id })
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
        FetchMessages {
            messages: collab.messages.clone(),
        },
        &[GET_COMMUNITY_PROFILE],
        Criticality::Required,
    )?
    .register(
        GenerateSummary {
            summarizer: collab.summarizer.clone(),
        },
        &[FETCH_MESSAGES],
        Criticality::Required,
    )?
    .register(
        SaveSummary {
            summaries: collab.summaries.clone(),
        },
        &[GET_COMMUNITY_PROFILE, FETCH_MESSAGES, GENERATE_SUMMARY],
        Criticality::Optional,
    )?;
    wf.validate()?;
    Ok(wf)
}
