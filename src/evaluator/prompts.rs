//! Prompt templates for the evaluator model.

use crate::tasks::{ExampleTask, Task};

pub const REWARDS_SYSTEM: &str = "You are a community rewards analyzer that identifies valuable \
contributions and suggests appropriate rewards.

When analyzing transcripts, focus on:
1. Technical contributions (code, documentation, tools)
2. Community support (helping others, answering questions)
3. Content creation (guides, tutorials, explanations)
4. Community building (organizing events, fostering discussions)
5. Bug reports and feedback

For each contribution, clearly identify the contributor, describe the contribution, explain \
its impact and collect all relevant message ids as evidence.";

pub const TASKS_SYSTEM: &str = "You are a task identification agent that analyzes community \
discussions to identify potential tasks and improvements: feature requests, documentation needs, \
support requirements, infrastructure improvements and community tooling.";

pub const SUMMARY_SYSTEM: &str = "You are a community summarizer that creates concise, informative \
summaries of community discussions. Each line should convey a distinct and meaningful insight.";

pub fn identify_contributions(transcript: &str) -> String {
    format!(
        r#"Analyze this chat transcript and identify valuable community contributions that deserve recognition and rewards.

For each meaningful contribution, provide:
1. Who made the contribution (their username as shown in the transcript)
2. What they contributed
3. The impact on the community
4. Evidence: an array of message ids that prove this contribution
5. A short kebab-case rewardId that describes the contribution (max 32 chars)
6. Suggested reward points (10-1000) based on value, effort, community benefit and complexity

Return only JSON in this exact format:
{{
  "contributions": [
    {{
      "contributor": "username",
      "description": "Clear description of contribution",
      "impact": "Specific impact on community",
      "evidence": ["messageId1", "messageId2"],
      "rewardId": "technical-documentation-update",
      "suggested_reward": {{
        "points": 100,
        "reasoning": "Detailed explanation of reward suggestion"
      }}
    }}
  ]
}}

Chat transcript:
{transcript}"#
    )
}

pub fn evaluate_message(text: &str, min_points: i64, max_points: i64) -> String {
    format!(
        r#"Evaluate this single community message. If it is a valuable contribution (help, code, documentation, feedback, content), describe it and suggest reward points between {min_points} and {max_points}. If it is not, return an empty list.

Return only JSON in this exact format:
{{
  "contributions": [
    {{
      "description": "Clear description of contribution",
      "impact": "Specific impact on community",
      "rewardId": "short-kebab-case-id",
      "suggested_reward": {{
        "points": {min_points},
        "reasoning": "Why this amount"
      }}
    }}
  ]
}}

rewardId must be lowercase kebab-case and at most 32 characters.

Message:
{text}"#
    )
}

pub fn identify_tasks(transcript: &str, existing: &[Task], examples: &[ExampleTask]) -> String {
    let existing_block = if existing.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = existing
            .iter()
            .map(|t| {
                format!(
                    "- id={} name={} (priority {}): {}",
                    t.id, t.name, t.priority_score, t.description
                )
            })
            .collect();
        format!(
            "\nExisting tasks (do not recreate these; if one is mentioned again, return it with isNewTask=false and taskToUpdateId set to its id):\n{}\n",
            lines.join("\n")
        )
    };

    let examples_block = if examples.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = examples
            .iter()
            .map(|e| {
                format!(
                    "- {} [{:?}] urgency={} impact={} priority={}: {}",
                    e.name, e.task_type, e.urgency_score, e.impact_score, e.priority_score, e.description
                )
            })
            .collect();
        format!(
            "\nReference tasks for calibrating scores:\n{}\n",
            lines.join("\n")
        )
    };

    format!(
        r#"Analyze this chat transcript and identify potential tasks that could help the community.
{existing_block}{examples_block}
For each task, provide:
1. A clear name (max 20 chars)
2. A concise description
3. Required skills
4. Evidence: the message ids that support this task
5. Task type (Feature/Documentation/Support/Infrastructure) and scope (community/internal)
6. urgency_score and impact_score from 0 to 100, and how many times it was mentioned
7. Requirements: role (team, builder, ambassador, member), access_level (internal, trusted, public), experience_level (beginner, intermediate, advanced)

Return only JSON in this exact format:
{{
  "tasks": [
    {{
      "name": "Short Task Name",
      "description": "Task description",
      "type": "Feature",
      "scope": "community",
      "required_skills": ["skill1"],
      "evidence": ["messageId1"],
      "urgency_score": 40,
      "impact_score": 60,
      "mention_count": 1,
      "requirements": {{
        "role": "member",
        "access_level": "public",
        "experience_level": "beginner"
      }},
      "isNewTask": true,
      "taskToUpdateId": null
    }}
  ]
}}

Chat transcript:
{transcript}"#
    )
}

pub fn summarize(transcript: &str) -> String {
    format!(
        r#"Analyze this conversation transcript and provide a concise and informative 6-10 line summary of the key community activities and discussions.

Focus on:
1. Main topics of discussion
2. Important decisions or conclusions reached
3. Notable community interactions or events

Chat transcript:
{transcript}"#
    )
}
