//! In-memory implementation of every store trait.
//!
//! Used by tests and for local runs without a database. Seed data is loaded
//! through the `insert_*` helpers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CommunityStore, MessageStore, RewardStore, SummaryStore, TaskStore};
use crate::error::{PipelineError, PipelineResult};
use crate::settlement::{RewardRecord, RewardStatus};
use crate::tasks::{ExampleTask, Task};
use crate::types::{ChatMessage, CommunityProfile, CommunitySummary, Platform};

#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
    profiles: RwLock<HashMap<Uuid, CommunityProfile>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    example_tasks: RwLock<Vec<ExampleTask>>,
    /// Keyed by dedupe key.
    rewards: RwLock<HashMap<String, RewardRecord>>,
    summaries: RwLock<Vec<(Uuid, CommunitySummary)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_message(&self, message: ChatMessage) {
        self.messages.write().await.push(message);
    }

    pub async fn insert_profile(&self, profile: CommunityProfile) {
        self.profiles.write().await.insert(profile.id, profile);
    }

    pub async fn insert_example_task(&self, example: ExampleTask) {
        self.example_tasks.write().await.push(example);
    }

    pub async fn rewards(&self) -> Vec<RewardRecord> {
        self.rewards.read().await.values().cloned().collect()
    }

    pub async fn summaries(&self) -> Vec<CommunitySummary> {
        self.summaries
            .read()
            .await
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }
}

fn message_server(message: &ChatMessage) -> Option<String> {
    message.content.clone().with_location().server_id
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn message(&self, id: Uuid) -> PipelineResult<Option<ChatMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned().map(|mut m| {
            m.content = m.content.with_location();
            m
        }))
    }

    async fn messages_between(
        &self,
        platform: Platform,
        server_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PipelineResult<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        let mut found: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.content.source == Some(platform))
            .filter(|m| message_server(m).as_deref() == Some(server_id))
            .filter(|m| m.created_at >= start && m.created_at <= end)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}

#[async_trait]
impl CommunityStore for InMemoryStore {
    async fn profile(&self, id: Uuid) -> PipelineResult<Option<CommunityProfile>> {
        Ok(self.profiles.read().await.get(&id).cloned())
    }

    async fn profile_by_server(
        &self,
        platform: Platform,
        server_id: &str,
    ) -> PipelineResult<Option<CommunityProfile>> {
        Ok(self
            .profiles
            .read()
            .await
            .values()
            .find(|p| p.server_id(platform) == Some(server_id))
            .cloned())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn list_tasks(&self, community_id: Uuid) -> PipelineResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.community_id == community_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn get_task(&self, id: Uuid) -> PipelineResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn insert_task(&self, task: &Task) -> PipelineResult<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(PipelineError::StoreConflict {
                id: task.id.to_string(),
            });
        }
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn update_task(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
    ) -> PipelineResult<Task> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| PipelineError::not_found("task", task.id.to_string()))?;
        if stored.updated_at != expected_updated_at {
            return Err(PipelineError::StoreConflict {
                id: task.id.to_string(),
            });
        }
        let mut updated = task.clone();
        updated.created_at = stored.created_at;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn example_tasks(&self) -> PipelineResult<Vec<ExampleTask>> {
        Ok(self.example_tasks.read().await.clone())
    }
}

#[async_trait]
impl RewardStore for InMemoryStore {
    async fn upsert_reward(&self, record: &RewardRecord) -> PipelineResult<RewardRecord> {
        let mut rewards = self.rewards.write().await;
        let mut stored = record.clone();
        stored.id = rewards
            .get(&record.dedupe_key)
            .and_then(|r| r.id)
            .or(record.id)
            .or_else(|| Some(Uuid::new_v4()));
        rewards.insert(record.dedupe_key.clone(), stored.clone());
        Ok(stored)
    }

    async fn reward_by_dedupe_key(&self, dedupe_key: &str) -> PipelineResult<Option<RewardRecord>> {
        Ok(self.rewards.read().await.get(dedupe_key).cloned())
    }

    async fn list_rewards(
        &self,
        community_id: Uuid,
        status: Option<RewardStatus>,
    ) -> PipelineResult<Vec<RewardRecord>> {
        let mut rewards: Vec<RewardRecord> = self
            .rewards
            .read()
            .await
            .values()
            .filter(|r| r.community_id == community_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        rewards.sort_by_key(|r| r.created_at);
        Ok(rewards)
    }
}

#[async_trait]
impl SummaryStore for InMemoryStore {
    async fn save_summary(&self, summary: &CommunitySummary) -> PipelineResult<Uuid> {
        let id = Uuid::new_v4();
        self.summaries.write().await.push((id, summary.clone()));
        Ok(id)
    }
}
