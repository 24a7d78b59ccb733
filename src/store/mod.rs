//! Persistence boundaries: messages, community profiles, tasks, rewards and
//! summaries.
//!
//! Implementations are injected as `Arc<dyn …>`; [`memory::InMemoryStore`]
//! backs every trait for tests and local runs, [`supabase`] talks PostgREST.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::settlement::{RewardRecord, RewardStatus};
use crate::tasks::{ExampleTask, Task};
use crate::types::{ChatMessage, CommunityProfile, CommunitySummary, Platform};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// A single message with its author's username resolved.
    async fn message(&self, id: Uuid) -> PipelineResult<Option<ChatMessage>>;

    /// Messages of one server in `[start, end]`, oldest first.
    async fn messages_between(
        &self,
        platform: Platform,
        server_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PipelineResult<Vec<ChatMessage>>;
}

#[async_trait]
pub trait CommunityStore: Send + Sync {
    async fn profile(&self, id: Uuid) -> PipelineResult<Option<CommunityProfile>>;

    async fn profile_by_server(
        &self,
        platform: Platform,
        server_id: &str,
    ) -> PipelineResult<Option<CommunityProfile>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_tasks(&self, community_id: Uuid) -> PipelineResult<Vec<Task>>;

    async fn get_task(&self, id: Uuid) -> PipelineResult<Option<Task>>;

    async fn insert_task(&self, task: &Task) -> PipelineResult<Task>;

    /// Write `task` only if the stored row still carries
    /// `expected_updated_at`; otherwise fail with `StoreConflict`.
    async fn update_task(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
    ) -> PipelineResult<Task>;

    async fn example_tasks(&self) -> PipelineResult<Vec<ExampleTask>>;
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    /// Insert or replace the record with the same `dedupe_key`.
    async fn upsert_reward(&self, record: &RewardRecord) -> PipelineResult<RewardRecord>;

    async fn reward_by_dedupe_key(&self, dedupe_key: &str) -> PipelineResult<Option<RewardRecord>>;

    async fn list_rewards(
        &self,
        community_id: Uuid,
        status: Option<RewardStatus>,
    ) -> PipelineResult<Vec<RewardRecord>>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn save_summary(&self, summary: &CommunitySummary) -> PipelineResult<Uuid>;
}
