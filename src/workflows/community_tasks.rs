//! Turn a community's discussion window into tasks.
//!
//! Existing tasks are load-bearing: without them update candidates cannot be
//! matched, so a failed read ends the run. Example tasks are optional context.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::common::{FetchMessages, GetCommunityProfile};
use super::{
    Collaborators, ExampleTasks, ExistingTasks, TaskCandidates, TaskOutcomes, FETCH_EXAMPLE_TASKS,
    FETCH_MESSAGES, FETCH_TASKS, GET_COMMUNITY_PROFILE, IDENTIFY_TASKS, PERSIST_TASKS,
};
use crate::error::PipelineResult;
use crate::evaluator::TaskMatcher;
use crate::store::TaskStore;
use crate::tasks::TaskEngine;
use crate::types::{Transcript, WindowTrigger};
use crate::workflow::{Criticality, Step, StepContext, StepId, Workflow};

pub const NAME: &str = "community-tasks";

struct FetchTasks {
    tasks: Arc<dyn TaskStore>,
}

#[async_trait]
impl Step<WindowTrigger> for FetchTasks {
    type Output = ExistingTasks;

    fn id(&self) -> StepId {
        FETCH_TASKS
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<ExistingTasks> {
        let tasks = self.tasks.list_tasks(ctx.trigger().community_id).await?;
        tracing::debug!("Loaded {} existing tasks", tasks.len());
        Ok(ExistingTasks(tasks))
    }
}

struct FetchExampleTasks {
    tasks: Arc<dyn TaskStore>,
}

#[async_trait]
impl Step<WindowTrigger> for FetchExampleTasks {
    type Output = ExampleTasks;

    fn id(&self) -> StepId {
        FETCH_EXAMPLE_TASKS
    }

    async fn execute(&self, _ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<ExampleTasks> {
        Ok(ExampleTasks(self.tasks.example_tasks().await?))
    }
}

struct IdentifyTasks {
    matcher: Arc<dyn TaskMatcher>,
}

#[async_trait]
impl Step<WindowTrigger> for IdentifyTasks {
    type Output = TaskCandidates;

    fn id(&self) -> StepId {
        IDENTIFY_TASKS
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<TaskCandidates> {
        let transcript: &Transcript = ctx.require(FETCH_MESSAGES)?;
        if transcript.message_count == 0 {
            return Ok(TaskCandidates::default());
        }
        let existing: &ExistingTasks = ctx.require(FETCH_TASKS)?;
        let examples: ExampleTasks = ctx.output_or_default(FETCH_EXAMPLE_TASKS);
        let candidates = self
            .matcher
            .identify_tasks(&transcript.transcript, &existing.0, &examples.0)
            .await?;
        Ok(TaskCandidates(candidates))
    }
}

struct PersistTasks {
    engine: TaskEngine,
}

#[async_trait]
impl Step<WindowTrigger> for PersistTasks {
    type Output = TaskOutcomes;

    fn id(&self) -> StepId {
        PERSIST_TASKS
    }

    async fn execute(&self, ctx: &StepContext<'_, WindowTrigger>) -> PipelineResult<TaskOutcomes> {
        let candidates: &TaskCandidates = ctx.require(IDENTIFY_TASKS)?;
        let existing: &ExistingTasks = ctx.require(FETCH_TASKS)?;
        let outcomes = self
            .engine
            .apply_all(ctx.trigger().community_id, &candidates.0, &existing.0, Utc::now())
            .await;
        Ok(TaskOutcomes(outcomes))
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
        FetchTasks {
            tasks: collab.tasks.clone(),
        },
        &[GET_COMMUNITY_PROFILE],
        Criticality::Required,
    )?
    .register(
        FetchExampleTasks {
            tasks: collab.tasks.clone(),
        },
        &[],
        Criticality::Optional,
    )?
    .register(
        IdentifyTasks {
            matcher: collab.matcher.clone(),
        },
        &[FETCH_MESSAGES, FETCH_TASKS, FETCH_EXAMPLE_TASKS],
        Criticality::Required,
    )?
    .register(
        PersistTasks {
            engine: TaskEngine::new(collab.tasks.clone()),
        },
        &[IDENTIFY_TASKS, FETCH_TASKS],
        Criticality::Required,
    )?;
    wf.validate()?;
    Ok(wf)
}
