//! Task deduplication and priority engine.
//!
//! The task matcher decides whether a candidate is new or updates an existing
//! task; the engine validates that decision, derives and clamps scores,
//! merges evidence, applies staleness decay on update, and persists the
//! result with an optimistic `updated_at` check.

pub mod scoring;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::store::TaskStore;
use crate::types::dedup_ordered;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Feature,
    Documentation,
    Support,
    Infrastructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskScope {
    #[default]
    Community,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Completed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRole {
    Team,
    Builder,
    Ambassador,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Internal,
    Trusted,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Who may pick up a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub role: TaskRole,
    pub access_level: AccessLevel,
    pub experience_level: ExperienceLevel,
}

impl Default for TaskRequirements {
    fn default() -> Self {
        Self {
            role: TaskRole::Member,
            access_level: AccessLevel::Public,
            experience_level: ExperienceLevel::Beginner,
        }
    }
}

/// A persisted task. `id` and `created_at` never change after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub community_id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub scope: TaskScope,
    pub urgency_score: u8,
    pub impact_score: u8,
    pub priority_score: u8,
    #[serde(default)]
    pub reward_points: i64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(flatten)]
    pub requirements: TaskRequirements,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only reference task used to calibrate score magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleTask {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub urgency_score: u8,
    pub impact_score: u8,
    pub priority_score: u8,
}

fn default_mentions() -> u32 {
    1
}

/// A task proposed by the matcher, not yet reconciled with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub scope: TaskScope,
    pub urgency_score: f64,
    pub impact_score: f64,
    #[serde(default)]
    pub priority_score: Option<f64>,
    #[serde(default)]
    pub reward_points: Option<f64>,
    #[serde(default = "default_mentions")]
    pub mention_count: u32,
    #[serde(default, deserialize_with = "crate::types::one_or_many")]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub requirements: TaskRequirements,
    #[serde(rename = "isNewTask", default = "default_is_new")]
    pub is_new_task: bool,
    #[serde(rename = "taskToUpdateId", default)]
    pub task_to_update_id: Option<Uuid>,
}

fn default_is_new() -> bool {
    true
}

impl TaskCandidate {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task candidate has an empty name".to_string());
        }
        let scores = [Some(self.urgency_score), Some(self.impact_score), self.priority_score];
        if scores.iter().flatten().any(|s| !s.is_finite()) {
            return Err(format!("task '{}' has a non-finite score", self.name));
        }
        Ok(())
    }

    /// Supplied priority (clamped), or one derived from urgency and impact.
    pub fn resolved_priority(&self) -> u8 {
        match self.priority_score {
            Some(p) => scoring::clamp_score(p),
            None => scoring::derived_priority(
                scoring::clamp_score(self.urgency_score),
                scoring::clamp_score(self.impact_score),
                self.mention_count,
                dedup_ordered(self.evidence.iter().cloned()).len(),
            ),
        }
    }
}

/// What the engine did with a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskChange {
    Inserted { task: Task },
    Updated { task: Task, decay_points: u8 },
}

impl TaskChange {
    pub fn task(&self) -> &Task {
        match self {
            Self::Inserted { task } | Self::Updated { task, .. } => task,
        }
    }
}

/// Pick the task a candidate updates, validating the matcher's decision.
pub fn resolve_target<'a>(candidate: &TaskCandidate, existing: &'a [Task]) -> Option<&'a Task> {
    if candidate.is_new_task {
        return None;
    }
    let target = candidate
        .task_to_update_id
        .and_then(|id| existing.iter().find(|t| t.id == id));
    if target.is_none() {
        tracing::warn!(
            "Task '{}' flagged as update of {:?}, which does not exist; inserting as new",
            candidate.name,
            candidate.task_to_update_id
        );
    }
    target
}

/// Build a new task from a candidate. No decay on insert.
pub fn plan_insert(community_id: Uuid, candidate: &TaskCandidate, now: DateTime<Utc>) -> Task {
    Task {
        id: Uuid::new_v4(),
        community_id,
        name: candidate.name.trim().to_string(),
        description: candidate.description.clone(),
        task_type: candidate.task_type,
        scope: candidate.scope,
        urgency_score: scoring::clamp_score(candidate.urgency_score),
        impact_score: scoring::clamp_score(candidate.impact_score),
        priority_score: candidate.resolved_priority(),
        reward_points: candidate
            .reward_points
            .filter(|p| p.is_finite())
            .map(|p| p.round().max(0.0) as i64)
            .unwrap_or(0),
        evidence: dedup_ordered(candidate.evidence.iter().cloned()),
        status: TaskStatus::Open,
        required_skills: candidate.required_skills.clone(),
        requirements: candidate.requirements.clone(),
        created_at: now,
        updated_at: now,
    }
}

/// Apply a candidate to an existing task.
///
/// Decay uses the existing record's staleness against the incoming priority.
pub fn plan_update(existing: &Task, candidate: &TaskCandidate, now: DateTime<Utc>) -> (Task, u8) {
    let days = scoring::days_between(existing.updated_at, now);
    let incoming = candidate.resolved_priority();
    let stored = scoring::decay(incoming, days);

    let mut task = existing.clone();
    task.description = candidate.description.clone();
    task.urgency_score = scoring::clamp_score(candidate.urgency_score);
    task.impact_score = scoring::clamp_score(candidate.impact_score);
    task.priority_score = stored;
    task.evidence = dedup_ordered(existing.evidence.iter().chain(candidate.evidence.iter()).cloned());
    task.required_skills = candidate.required_skills.clone();
    task.requirements = candidate.requirements.clone();
    task.updated_at = now;

    (task, incoming.saturating_sub(stored))
}

/// Outcome of reconciling one candidate.
#[derive(Debug, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    #[serde(flatten)]
    pub change: Option<TaskChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persists reconciled candidates through a [`TaskStore`].
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    max_attempts: u32,
}

impl TaskEngine {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            max_attempts: 3,
        }
    }

    /// Reconcile one candidate against `existing` and persist it.
    ///
    /// Updates carry the `updated_at` that was read; on a concurrent write the
    /// task is re-read and the merge re-planned.
    pub async fn apply(
        &self,
        community_id: Uuid,
        candidate: &TaskCandidate,
        existing: &[Task],
        now: DateTime<Utc>,
    ) -> PipelineResult<TaskChange> {
        candidate
            .validate()
            .map_err(|reason| PipelineError::schema("identifyTasks", reason))?;

        let Some(target) = resolve_target(candidate, existing) else {
            let task = plan_insert(community_id, candidate, now);
            let task = self.store.insert_task(&task).await?;
            tracing::info!("Inserted task '{}' ({})", task.name, task.id);
            return Ok(TaskChange::Inserted { task });
        };

        let mut current = target.clone();
        let mut attempt = 1;
        loop {
            let (planned, decay_points) = plan_update(&current, candidate, now);
            match self.store.update_task(&planned, current.updated_at).await {
                Ok(task) => {
                    tracing::info!(
                        "Updated task '{}' ({}): priority {} after {} decay points",
                        task.name,
                        task.id,
                        task.priority_score,
                        decay_points
                    );
                    return Ok(TaskChange::Updated { task, decay_points });
                }
                Err(PipelineError::StoreConflict { id }) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "Concurrent update on task {}, re-reading (attempt {})",
                        id,
                        attempt
                    );
                    current = self
                        .store
                        .get_task(current.id)
                        .await?
                        .ok_or_else(|| PipelineError::not_found("task", current.id.to_string()))?;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Reconcile candidates in order; later candidates see earlier changes.
    pub async fn apply_all(
        &self,
        community_id: Uuid,
        candidates: &[TaskCandidate],
        existing: &[Task],
        now: DateTime<Utc>,
    ) -> Vec<TaskOutcome> {
        let mut working: Vec<Task> = existing.to_vec();
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.apply(community_id, candidate, &working, now).await {
                Ok(change) => {
                    let task = change.task().clone();
                    match working.iter_mut().find(|t| t.id == task.id) {
                        Some(slot) => *slot = task,
                        None => working.push(task),
                    }
                    outcomes.push(TaskOutcome {
                        name: candidate.name.clone(),
                        change: Some(change),
                        error: None,
                    });
                }
                Err(error) => {
                    tracing::error!("Failed to persist task '{}': {}", candidate.name, error);
                    outcomes.push(TaskOutcome {
                        name: candidate.name.clone(),
                        change: None,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        outcomes
    }
}
