//! Text evaluation: contributions, tasks and summaries.
//!
//! The pipeline depends only on the capability traits; [`LlmEvaluator`]
//! implements all of them over any [`LlmClient`]. Model output is untrusted:
//! code fences are stripped and every record is validated before it leaves
//! this module.

mod prompts;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::tasks::{ExampleTask, Task, TaskCandidate};
use crate::types::{Contribution, SuggestedReward};

const SERVICE: &str = "evaluator";

/// A contribution found in a single message; the author is known from the
/// message itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContribution {
    pub description: String,
    pub impact: String,
    #[serde(rename = "rewardId")]
    pub reward_id: String,
    pub suggested_reward: SuggestedReward,
}

impl MessageContribution {
    pub fn into_contribution(self, contributor: &str, message_id: Uuid) -> Contribution {
        Contribution {
            contributor: contributor.to_string(),
            description: self.description,
            impact: self.impact,
            evidence: vec![message_id.to_string()],
            reward_id: self.reward_id,
            suggested_reward: self.suggested_reward,
        }
    }
}

#[async_trait]
pub trait ContributionEvaluator: Send + Sync {
    /// Contributions in a window transcript.
    async fn identify_contributions(&self, transcript: &str) -> PipelineResult<Vec<Contribution>>;

    /// Contributions in one message, with points suggested inside `range`.
    async fn evaluate_message(
        &self,
        text: &str,
        range: (i64, i64),
    ) -> PipelineResult<Vec<MessageContribution>>;
}

/// Proposes task candidates and decides whether each is new.
#[async_trait]
pub trait TaskMatcher: Send + Sync {
    async fn identify_tasks(
        &self,
        transcript: &str,
        existing: &[Task],
        examples: &[ExampleTask],
    ) -> PipelineResult<Vec<TaskCandidate>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> PipelineResult<String>;
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*").expect("static regex"))
}

/// Remove markdown code fences around model output.
pub fn strip_code_fences(raw: &str) -> String {
    code_fence().replace_all(raw, "").trim().to_string()
}

#[derive(Debug, Deserialize)]
struct ContributionsEnvelope<T> {
    #[serde(default = "Vec::new")]
    contributions: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TasksEnvelope {
    #[serde(default)]
    tasks: Vec<TaskCandidate>,
}

fn parse_json<T: DeserializeOwned>(operation: &str, raw: &str) -> PipelineResult<T> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|e| {
        tracing::debug!("Unparseable {} output: {}", operation, cleaned);
        PipelineError::schema(operation, format!("model output is not valid JSON: {}", e))
    })
}

fn validate_message_contribution(c: &MessageContribution) -> Result<(), String> {
    Contribution {
        contributor: "-".to_string(),
        description: c.description.clone(),
        impact: c.impact.clone(),
        evidence: Vec::new(),
        reward_id: c.reward_id.clone(),
        suggested_reward: c.suggested_reward.clone(),
    }
    .validate()
}

/// Parse and validate a window evaluation.
pub fn parse_contributions(raw: &str) -> PipelineResult<Vec<Contribution>> {
    let envelope: ContributionsEnvelope<Contribution> = parse_json("identifyRewards", raw)?;
    for c in &envelope.contributions {
        c.validate()
            .map_err(|reason| PipelineError::schema("identifyRewards", reason))?;
    }
    Ok(envelope
        .contributions
        .into_iter()
        .map(|mut c| {
            c.evidence = crate::types::dedup_ordered(c.evidence);
            c
        })
        .collect())
}

/// Parse and validate a single-message evaluation.
pub fn parse_message_contributions(raw: &str) -> PipelineResult<Vec<MessageContribution>> {
    let envelope: ContributionsEnvelope<MessageContribution> = parse_json("evaluateMessage", raw)?;
    for c in &envelope.contributions {
        validate_message_contribution(c)
            .map_err(|reason| PipelineError::schema("evaluateMessage", reason))?;
    }
    Ok(envelope.contributions)
}

/// Parse and validate task candidates.
pub fn parse_tasks(raw: &str) -> PipelineResult<Vec<TaskCandidate>> {
    let envelope: TasksEnvelope = parse_json("identifyTasks", raw)?;
    for t in &envelope.tasks {
        t.validate()
            .map_err(|reason| PipelineError::schema("identifyTasks", reason))?;
    }
    Ok(envelope.tasks)
}

/// Evaluator backed by a chat-completion model.
pub struct LlmEvaluator {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    async fn complete(&self, system: &str, prompt: String, json: bool) -> PipelineResult<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        let options = ChatOptions {
            temperature: Some(0.2),
            max_tokens: Some(4000),
            json_response: json,
        };
        let response = self
            .llm
            .chat_completion(&self.model, &messages, options)
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                "Evaluator used {} tokens ({} prompt)",
                usage.total_tokens,
                usage.prompt_tokens
            );
        }
        response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::external(SERVICE, "model returned no content"))
    }
}

#[async_trait]
impl ContributionEvaluator for LlmEvaluator {
    async fn identify_contributions(&self, transcript: &str) -> PipelineResult<Vec<Contribution>> {
        let raw = self
            .complete(
                prompts::REWARDS_SYSTEM,
                prompts::identify_contributions(transcript),
                true,
            )
            .await?;
        let contributions = parse_contributions(&raw)?;
        tracing::info!("Identified {} contributions", contributions.len());
        Ok(contributions)
    }

    async fn evaluate_message(
        &self,
        text: &str,
        (min, max): (i64, i64),
    ) -> PipelineResult<Vec<MessageContribution>> {
        let raw = self
            .complete(
                prompts::REWARDS_SYSTEM,
                prompts::evaluate_message(text, min, max),
                true,
            )
            .await?;
        parse_message_contributions(&raw)
    }
}

#[async_trait]
impl TaskMatcher for LlmEvaluator {
    async fn identify_tasks(
        &self,
        transcript: &str,
        existing: &[Task],
        examples: &[ExampleTask],
    ) -> PipelineResult<Vec<TaskCandidate>> {
        let raw = self
            .complete(
                prompts::TASKS_SYSTEM,
                prompts::identify_tasks(transcript, existing, examples),
                true,
            )
            .await?;
        let tasks = parse_tasks(&raw)?;
        tracing::info!("Identified {} task candidates", tasks.len());
        Ok(tasks)
    }
}

#[async_trait]
impl Summarizer for LlmEvaluator {
    async fn summarize(&self, transcript: &str) -> PipelineResult<String> {
        let raw = self
            .complete(prompts::SUMMARY_SYSTEM, prompts::summarize(transcript), false)
            .await?;
        Ok(raw.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_contributions_dedups_evidence() {
        let raw = r#"```json
{"contributions": [{
  "contributor": "alice",
  "description": "Wrote the setup guide",
  "impact": "New members onboard faster",
  "evidence": ["m1", "m2", "m1"],
  "rewardId": "setup-guide",
  "suggested_reward": {"points": 150, "reasoning": "thorough"}
}]}
```"#;
        let parsed = parse_contributions(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].evidence, vec!["m1", "m2"]);
    }

    #[test]
    fn test_single_string_evidence_is_accepted() {
        let raw = r#"{"contributions": [{
  "contributor": "bob", "description": "d", "impact": "i",
  "evidence": "m7", "rewardId": "bug-report",
  "suggested_reward": {"points": 20, "reasoning": "r"}
}]}"#;
        assert_eq!(parse_contributions(raw).unwrap()[0].evidence, vec!["m7"]);
    }

    #[test]
    fn test_malformed_output_is_schema_violation() {
        let err = parse_contributions("I could not find any contributions.").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));

        let bad_id = r#"{"contributions": [{
  "contributor": "bob", "description": "d", "impact": "i",
  "rewardId": "Not Kebab", "suggested_reward": {"points": 20, "reasoning": "r"}
}]}"#;
        assert!(matches!(
            parse_contributions(bad_id).unwrap_err(),
            PipelineError::SchemaViolation { .. }
        ));
    }

    #[test]
    fn test_parse_tasks_defaults() {
        let raw = r#"{"tasks": [{
  "name": "Docs refresh", "description": "Update the docs", "type": "Documentation",
  "urgency_score": 40, "impact_score": 60, "evidence": "m3"
}]}"#;
        let tasks = parse_tasks(raw).unwrap();
        assert!(tasks[0].is_new_task);
        assert_eq!(tasks[0].mention_count, 1);
        assert_eq!(tasks[0].evidence, vec!["m3"]);
        assert_eq!(tasks[0].task_to_update_id, None);
    }

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> anyhow::Result<ChatResponse> {
            assert_eq!(messages.len(), 2);
            Ok(ChatResponse {
                content: Some(self.0.to_string()),
                finish_reason: Some("stop".into()),
                usage: None,
                model: None,
            })
        }
    }

    #[tokio::test]
    async fn test_message_contribution_gets_author_and_evidence() {
        let evaluator = LlmEvaluator::new(
            Arc::new(CannedLlm(
                r#"{"contributions":[{"description":"Fixed bug in X","impact":"unblocked","rewardId":"bug-fix-x","suggested_reward":{"points":120,"reasoning":"solid"}}]}"#,
            )),
            "test-model",
        );
        let found = evaluator
            .evaluate_message("I fixed the bug in X", (10, 1000))
            .await
            .unwrap();
        let message_id = Uuid::new_v4();
        let contribution = found[0].clone().into_contribution("alice", message_id);
        assert_eq!(contribution.evidence, vec![message_id.to_string()]);
        assert_eq!(contribution.suggested_reward.points, 120.0);
    }

    #[tokio::test]
    async fn test_empty_completion_is_external_error() {
        let evaluator = LlmEvaluator::new(Arc::new(CannedLlm("   ")), "test-model");
        let err = evaluator.summarize("transcript").await.unwrap_err();
        assert!(err.is_transient());
    }
}
