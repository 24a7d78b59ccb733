//! Supabase (PostgREST) backed stores.
//!
//! Chat messages live in one project (`memories`, `accounts`); community
//! data lives in another (`community_profiles`, `tasks`, `example_tasks`,
//! `pending_rewards`, `community_summaries`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CommunityStore, MessageStore, RewardStore, SummaryStore, TaskStore};
use crate::error::{PipelineError, PipelineResult};
use crate::settlement::{RewardRecord, RewardStatus};
use crate::tasks::{ExampleTask, Task};
use crate::types::{ChatMessage, CommunityProfile, CommunitySummary, MessageContent, Platform};

const SERVICE: &str = "supabase";

/// Columns an update may touch; identity and creation fields are excluded.
const MUTABLE_TASK_COLUMNS: &[&str] = &[
    "description",
    "urgency_score",
    "impact_score",
    "priority_score",
    "evidence",
    "required_skills",
    "role",
    "access_level",
    "experience_level",
    "updated_at",
];

fn external(e: anyhow::Error) -> PipelineError {
    PipelineError::external(SERVICE, format!("{:#}", e))
}

fn timestamp(at: DateTime<Utc>) -> String {
    urlencoding::encode(&at.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

/// Thin PostgREST client.
pub struct SupabaseClient {
    client: Client,
    url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn request(&self, method: reqwest::Method, path_and_query: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url(), path_and_query))
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    /// `GET /{table}?{query}`
    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> anyhow::Result<Vec<T>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("{}?{}", table, query))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to read {}: {} - {}", table, status, text);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Write rows and return the representation PostgREST sends back.
    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        prefer: &str,
        body: &B,
    ) -> anyhow::Result<Vec<T>> {
        let resp = self
            .request(method, path_and_query)
            .header("Content-Type", "application/json")
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("Failed to write {}: {} - {}", path_and_query, status, text);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryRow {
    id: Uuid,
    content: MessageContent,
    created_at: DateTime<Utc>,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

/// Message store over the chat memory tables.
pub struct SupabaseMessageStore {
    db: SupabaseClient,
}

impl SupabaseMessageStore {
    pub fn new(db: SupabaseClient) -> Self {
        Self { db }
    }

    async fn usernames(&self, user_ids: &[&str]) -> anyhow::Result<HashMap<String, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let list = user_ids
            .iter()
            .map(|id| urlencoding::encode(id).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let rows: Vec<AccountRow> = self
            .db
            .select("accounts", &format!("select=id,username&id=in.({})", list))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.username.map(|u| (r.id, u)))
            .collect())
    }

    fn into_message(row: MemoryRow, usernames: &HashMap<String, String>) -> ChatMessage {
        ChatMessage {
            id: row.id,
            content: row.content.with_location(),
            created_at: row.created_at,
            username: usernames.get(&row.user_id).cloned(),
            user_id: row.user_id,
        }
    }
}

#[async_trait]
impl MessageStore for SupabaseMessageStore {
    async fn message(&self, id: Uuid) -> PipelineResult<Option<ChatMessage>> {
        let rows: Vec<MemoryRow> = self
            .db
            .select("memories", &format!("select=*&type=eq.messages&id=eq.{}", id))
            .await
            .map_err(external)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        // A missing account only costs the display name.
        let usernames = match self.usernames(&[row.user_id.as_str()]).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Failed to fetch account {}: {}", row.user_id, e);
                HashMap::new()
            }
        };
        Ok(Some(Self::into_message(row, &usernames)))
    }

    async fn messages_between(
        &self,
        platform: Platform,
        server_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PipelineResult<Vec<ChatMessage>> {
        let server = urlencoding::encode(server_id);
        let location = match platform {
            Platform::Discord => format!("content->>url=like.*/channels/{}/*", server),
            Platform::Telegram => format!("content->>server_id=eq.{}", server),
        };
        let query = format!(
            "select=*&type=eq.messages&content->>source=eq.{}&{}&createdAt=gte.{}&createdAt=lte.{}&order=createdAt.asc",
            platform,
            location,
            timestamp(start),
            timestamp(end)
        );
        let rows: Vec<MemoryRow> = self.db.select("memories", &query).await.map_err(external)?;

        let mut user_ids: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let usernames = self.usernames(&user_ids).await.map_err(external)?;

        Ok(rows
            .into_iter()
            .map(|row| Self::into_message(row, &usernames))
            .collect())
    }
}

/// Community profile, task, reward and summary tables.
pub struct SupabaseCommunityStore {
    db: SupabaseClient,
}

impl SupabaseCommunityStore {
    pub fn new(db: SupabaseClient) -> Self {
        Self { db }
    }

    async fn single_profile(&self, filter: &str) -> PipelineResult<Option<CommunityProfile>> {
        let rows: Vec<CommunityProfile> = self
            .db
            .select("community_profiles", &format!("select=*&{}&limit=1", filter))
            .await
            .map_err(external)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl CommunityStore for SupabaseCommunityStore {
    async fn profile(&self, id: Uuid) -> PipelineResult<Option<CommunityProfile>> {
        self.single_profile(&format!("id=eq.{}", id)).await
    }

    async fn profile_by_server(
        &self,
        platform: Platform,
        server_id: &str,
    ) -> PipelineResult<Option<CommunityProfile>> {
        let column = match platform {
            Platform::Discord => "discord_server_id",
            Platform::Telegram => "telegram_server_id",
        };
        self.single_profile(&format!("{}=eq.{}", column, urlencoding::encode(server_id)))
            .await
    }
}

#[async_trait]
impl TaskStore for SupabaseCommunityStore {
    async fn list_tasks(&self, community_id: Uuid) -> PipelineResult<Vec<Task>> {
        self.db
            .select(
                "tasks",
                &format!("select=*&community_id=eq.{}&order=created_at.asc", community_id),
            )
            .await
            .map_err(external)
    }

    async fn get_task(&self, id: Uuid) -> PipelineResult<Option<Task>> {
        let rows: Vec<Task> = self
            .db
            .select("tasks", &format!("select=*&id=eq.{}", id))
            .await
            .map_err(external)?;
        Ok(rows.into_iter().next())
    }

    async fn insert_task(&self, task: &Task) -> PipelineResult<Task> {
        let rows: Vec<Task> = self
            .db
            .write(reqwest::Method::POST, "tasks", "return=representation", task)
            .await
            .map_err(external)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| PipelineError::external(SERVICE, "no task returned from insert"))
    }

    async fn update_task(
        &self,
        task: &Task,
        expected_updated_at: DateTime<Utc>,
    ) -> PipelineResult<Task> {
        let mut body = serde_json::to_value(task)
            .map_err(|e| PipelineError::external(SERVICE, e))?;
        if let Some(fields) = body.as_object_mut() {
            fields.retain(|key, _| MUTABLE_TASK_COLUMNS.contains(&key.as_str()));
        }

        let path = format!(
            "tasks?id=eq.{}&updated_at=eq.{}",
            task.id,
            timestamp(expected_updated_at)
        );
        let rows: Vec<Task> = self
            .db
            .write(reqwest::Method::PATCH, &path, "return=representation", &body)
            .await
            .map_err(external)?;

        match rows.into_iter().next() {
            Some(updated) => Ok(updated),
            None if self.get_task(task.id).await?.is_some() => Err(PipelineError::StoreConflict {
                id: task.id.to_string(),
            }),
            None => Err(PipelineError::not_found("task", task.id.to_string())),
        }
    }

    async fn example_tasks(&self) -> PipelineResult<Vec<ExampleTask>> {
        self.db
            .select("example_tasks", "select=*")
            .await
            .map_err(external)
    }
}

#[async_trait]
impl RewardStore for SupabaseCommunityStore {
    async fn upsert_reward(&self, record: &RewardRecord) -> PipelineResult<RewardRecord> {
        let rows: Vec<RewardRecord> = self
            .db
            .write(
                reqwest::Method::POST,
                "pending_rewards?on_conflict=dedupe_key",
                "resolution=merge-duplicates,return=representation",
                &[record],
            )
            .await
            .map_err(external)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| PipelineError::external(SERVICE, "no reward returned from upsert"))
    }

    async fn reward_by_dedupe_key(&self, dedupe_key: &str) -> PipelineResult<Option<RewardRecord>> {
        let rows: Vec<RewardRecord> = self
            .db
            .select(
                "pending_rewards",
                &format!("select=*&dedupe_key=eq.{}", urlencoding::encode(dedupe_key)),
            )
            .await
            .map_err(external)?;
        Ok(rows.into_iter().next())
    }

    async fn list_rewards(
        &self,
        community_id: Uuid,
        status: Option<RewardStatus>,
    ) -> PipelineResult<Vec<RewardRecord>> {
        let mut query = format!(
            "select=*&community_id=eq.{}&order=created_at.asc",
            community_id
        );
        if let Some(status) = status {
            query.push_str(&format!("&status=eq.{}", status.as_str()));
        }
        self.db
            .select("pending_rewards", &query)
            .await
            .map_err(external)
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[async_trait]
impl SummaryStore for SupabaseCommunityStore {
    async fn save_summary(&self, summary: &CommunitySummary) -> PipelineResult<Uuid> {
        let rows: Vec<IdRow> = self
            .db
            .write(
                reqwest::Method::POST,
                "community_summaries?select=id",
                "return=representation",
                summary,
            )
            .await
            .map_err(external)?;
        rows.into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| PipelineError::external(SERVICE, "no summary id returned"))
    }
}
