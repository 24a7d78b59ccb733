//! Concrete pipelines built on the step orchestrator.
//!
//! - `message-reward`: one message → evaluation → wallet → settlement.
//! - `community-rewards`: a window of messages → contributions → settlement.
//! - `community-tasks`: a window of messages → task candidates → task engine.
//! - `community-summary`: a window of messages → summary → summary store.

mod common;
pub mod community_rewards;
pub mod community_summary;
pub mod community_tasks;
pub mod message_reward;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::artifact::{ArtifactStore, PinningArtifactStore};
use crate::chain::{EngineLedger, Ledger, SubgraphRegistry, TokenRegistry};
use crate::config::Config;
use crate::error::PipelineResult;
use crate::evaluator::{ContributionEvaluator, LlmEvaluator, Summarizer, TaskMatcher};
use crate::llm::OpenRouterClient;
use crate::settlement::ContributionOutcome;
use crate::store::supabase::{SupabaseClient, SupabaseCommunityStore, SupabaseMessageStore};
use crate::store::{CommunityStore, MessageStore, RewardStore, SummaryStore, TaskStore};
use crate::tasks::{ExampleTask, Task, TaskCandidate, TaskOutcome};
use crate::types::{
    ChatMessage, CommunityProfile, Contribution, MessageRewardTrigger, Platform, TokensAndBadges,
    Transcript, WindowTrigger,
};
use crate::wallet::{PrivyWalletResolver, WalletLookup, WalletResolver};
use crate::workflow::{StepId, StepOutput, Workflow};

pub const FETCH_MESSAGE: StepId = "fetchMessage";
pub const FETCH_MESSAGES: StepId = "fetchMessages";
pub const GET_COMMUNITY_PROFILE: StepId = "getCommunityProfile";
pub const GET_TOKENS_AND_BADGES: StepId = "getTokensAndBadges";
pub const EVALUATE_MESSAGE: StepId = "evaluateMessage";
pub const IDENTIFY_REWARDS: StepId = "identifyRewards";
pub const GET_WALLET_ADDRESS: StepId = "getWalletAddress";
pub const GET_WALLET_ADDRESSES: StepId = "getWalletAddresses";
pub const PROCESS_REWARD: StepId = "processReward";
pub const SETTLE_REWARDS: StepId = "settleRewards";
pub const FETCH_TASKS: StepId = "fetchTasks";
pub const FETCH_EXAMPLE_TASKS: StepId = "fetchExampleTasks";
pub const IDENTIFY_TASKS: StepId = "identifyTasks";
pub const PERSIST_TASKS: StepId = "persistTasks";
pub const GENERATE_SUMMARY: StepId = "generateSummary";
pub const SAVE_SUMMARY: StepId = "saveSummary";

/// Every external dependency of the pipelines.
#[derive(Clone)]
pub struct Collaborators {
    pub messages: Arc<dyn MessageStore>,
    pub communities: Arc<dyn CommunityStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub rewards: Arc<dyn RewardStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub evaluator: Arc<dyn ContributionEvaluator>,
    pub matcher: Arc<dyn TaskMatcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub wallets: Arc<dyn WalletResolver>,
    pub registry: Arc<dyn TokenRegistry>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub ledger: Arc<dyn Ledger>,
}

impl Collaborators {
    /// Production adapters.
    pub fn from_config(config: &Config) -> Self {
        let messages = Arc::new(SupabaseMessageStore::new(SupabaseClient::new(
            &config.messages_db.url,
            &config.messages_db.service_role_key,
        )));
        let community = Arc::new(SupabaseCommunityStore::new(SupabaseClient::new(
            &config.community_db.url,
            &config.community_db.service_role_key,
        )));
        let llm = Arc::new(OpenRouterClient::new(config.openrouter_api_key.clone()));
        let evaluator = Arc::new(LlmEvaluator::new(llm, config.evaluator_model.clone()));

        Self {
            messages,
            communities: community.clone(),
            tasks: community.clone(),
            rewards: community.clone(),
            summaries: community,
            evaluator: evaluator.clone(),
            matcher: evaluator.clone(),
            summarizer: evaluator,
            wallets: Arc::new(PrivyWalletResolver::new(
                &config.privy_app_id,
                &config.privy_app_secret,
            )),
            registry: Arc::new(SubgraphRegistry::new(
                &config.subgraph_url,
                &config.ipfs_gateway_url,
            )),
            artifacts: Arc::new(PinningArtifactStore::new(
                &config.pinning_api_url,
                &config.pinning_api_key,
            )),
            ledger: Arc::new(EngineLedger::new(
                &config.ledger.engine_url,
                &config.ledger.access_token,
                &config.ledger.chain,
                &config.ledger.backend_wallet,
                config.ledger.confirm_timeout,
            )),
        }
    }
}

/// The four committed workflows.
pub struct Pipelines {
    pub message_reward: Workflow<MessageRewardTrigger>,
    pub community_rewards: Workflow<WindowTrigger>,
    pub community_tasks: Workflow<WindowTrigger>,
    pub community_summary: Workflow<WindowTrigger>,
}

impl Pipelines {
    pub fn build(collab: &Collaborators, step_timeout: Option<Duration>) -> PipelineResult<Self> {
        Ok(Self {
            message_reward: message_reward::build(collab)?.with_step_timeout(step_timeout),
            community_rewards: community_rewards::build(collab)?.with_step_timeout(step_timeout),
            community_tasks: community_tasks::build(collab)?.with_step_timeout(step_timeout),
            community_summary: community_summary::build(collab)?.with_step_timeout(step_timeout),
        })
    }
}

/// Triggers that name the chat platform they concern.
pub trait PlatformTrigger: Send + Sync + 'static {
    fn platform(&self) -> Platform;
}

impl PlatformTrigger for MessageRewardTrigger {
    fn platform(&self) -> Platform {
        self.platform
    }
}

impl PlatformTrigger for WindowTrigger {
    fn platform(&self) -> Platform {
        self.platform
    }
}

impl StepOutput for ChatMessage {
    fn validate(&self) -> Result<(), String> {
        if self.user_id.is_empty() {
            return Err(format!("message {} has no author", self.id));
        }
        Ok(())
    }
}

impl StepOutput for CommunityProfile {
    fn validate(&self) -> Result<(), String> {
        if self.minimum_reward_points > self.maximum_reward_points {
            return Err(format!(
                "minimum_reward_points {} exceeds maximum_reward_points {}",
                self.minimum_reward_points, self.maximum_reward_points
            ));
        }
        Ok(())
    }
}

impl StepOutput for TokensAndBadges {}

impl StepOutput for Transcript {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Contributions(pub Vec<Contribution>);

impl StepOutput for Contributions {
    fn validate(&self) -> Result<(), String> {
        self.0.iter().try_for_each(Contribution::validate)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorWallet {
    pub contributor: String,
    #[serde(flatten)]
    pub wallet: WalletLookup,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct WalletAssignments(pub Vec<ContributorWallet>);

impl WalletAssignments {
    pub fn lookup(&self, contributor: &str) -> Option<&WalletLookup> {
        self.0
            .iter()
            .find(|w| w.contributor == contributor)
            .map(|w| &w.wallet)
    }
}

impl StepOutput for WalletAssignments {}

#[derive(Debug, Clone, Serialize)]
pub struct RewardOutcomes {
    pub outcomes: Vec<ContributionOutcome>,
    pub summary: String,
}

impl StepOutput for RewardOutcomes {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExistingTasks(pub Vec<Task>);

impl StepOutput for ExistingTasks {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExampleTasks(pub Vec<ExampleTask>);

impl StepOutput for ExampleTasks {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct TaskCandidates(pub Vec<TaskCandidate>);

impl StepOutput for TaskCandidates {
    fn validate(&self) -> Result<(), String> {
        self.0.iter().try_for_each(TaskCandidate::validate)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TaskOutcomes(pub Vec<TaskOutcome>);

impl StepOutput for TaskOutcomes {}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSummary {
    pub summary: String,
}

impl StepOutput for GeneratedSummary {
    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSummary {
    pub summary_id: Uuid,
}

impl StepOutput for SavedSummary {}
