//! Shared domain types: triggers, community data, contributions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat platform a community lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Telegram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Telegram => "telegram",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trigger for evaluating a single message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRewardTrigger {
    pub message_id: Uuid,
    pub platform: Platform,
}

/// Trigger for evaluating a community's activity over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowTrigger {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub community_id: Uuid,
    pub platform: Platform,
}

/// Content of a stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageContent {
    pub text: String,
    #[serde(default)]
    pub source: Option<Platform>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// A single chat message as held by the message store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl MessageContent {
    /// Guild and channel ids from a Discord message link
    /// (`https://discord.com/channels/<guild>/<channel>/<message>`).
    pub fn discord_location(&self) -> Option<(&str, &str)> {
        let url = self.url.as_deref()?;
        let mut parts = url.split('/').skip(4);
        match (parts.next(), parts.next()) {
            (Some(guild), Some(channel)) if !guild.is_empty() && !channel.is_empty() => {
                Some((guild, channel))
            }
            _ => None,
        }
    }

    /// Fill `server_id`/`channel_id` from the message link where the
    /// platform encodes them there.
    pub fn with_location(mut self) -> Self {
        if self.source == Some(Platform::Discord) {
            if let Some((guild, channel)) = self.discord_location() {
                let (guild, channel) = (guild.to_string(), channel.to_string());
                self.server_id = Some(guild);
                self.channel_id = Some(channel);
            }
        }
        self
    }
}

impl ChatMessage {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(UNKNOWN_USER)
    }
}

pub const UNKNOWN_USER: &str = "Unknown User";

/// Rendered transcript of a message window plus activity statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub transcript: String,
    pub message_count: usize,
    pub unique_user_count: usize,
    pub active_periods_count: usize,
}

/// Reward action configured by a community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub points: f64,
}

fn default_min_points() -> i64 {
    10
}

fn default_max_points() -> i64 {
    1000
}

/// Community profile as held by the profile store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityProfile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub discord_server_id: Option<String>,
    #[serde(default)]
    pub telegram_server_id: Option<String>,
    #[serde(default)]
    pub github_repos: Vec<String>,
    #[serde(default)]
    pub auto_rewards_enabled: bool,
    #[serde(default)]
    pub community_address: String,
    #[serde(default)]
    pub reward_actions: Vec<RewardAction>,
    #[serde(default = "default_min_points")]
    pub minimum_reward_points: i64,
    #[serde(default = "default_max_points")]
    pub maximum_reward_points: i64,
}

impl CommunityProfile {
    pub fn server_id(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Discord => self.discord_server_id.as_deref(),
            Platform::Telegram => self.telegram_server_id.as_deref(),
        }
    }

    /// Inclusive points range, normalised so that `min <= max`.
    pub fn points_range(&self) -> (i64, i64) {
        let min = self.minimum_reward_points.max(0);
        (min, self.maximum_reward_points.max(min))
    }
}

/// A reward token registered for a community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardToken {
    pub id: String,
    pub name: String,
}

/// A badge registered for a community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    pub total_awarded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokensAndBadges {
    pub tokens: Vec<RewardToken>,
    pub badges: Vec<Badge>,
}

impl TokensAndBadges {
    /// Address of the token used for point rewards.
    pub fn points_token(&self) -> Option<&str> {
        self.tokens.first().map(|t| t.id.as_str())
    }
}

/// Suggested reward attached to a contribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedReward {
    pub points: f64,
    pub reasoning: String,
}

/// A single identified valuable community action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contribution {
    pub contributor: String,
    pub description: String,
    pub impact: String,
    /// Message ids backing the contribution, deduplicated in first-seen order.
    #[serde(default, deserialize_with = "one_or_many")]
    pub evidence: Vec<String>,
    #[serde(rename = "rewardId")]
    pub reward_id: String,
    pub suggested_reward: SuggestedReward,
}

/// Longest reward identifier that still fits a `bytes32` activity id.
pub const MAX_REWARD_ID_LEN: usize = 32;

impl Contribution {
    pub fn validate(&self) -> Result<(), String> {
        if self.contributor.trim().is_empty() {
            return Err("contribution has an empty contributor".to_string());
        }
        if self.reward_id.is_empty() || self.reward_id.len() > MAX_REWARD_ID_LEN {
            return Err(format!(
                "rewardId '{}' must be 1..={} bytes",
                self.reward_id, MAX_REWARD_ID_LEN
            ));
        }
        if !self
            .reward_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!("rewardId '{}' is not kebab-case", self.reward_id));
        }
        if !self.suggested_reward.points.is_finite() {
            return Err("suggested points are not a finite number".to_string());
        }
        Ok(())
    }
}

/// Generated summary of a community's activity over a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunitySummary {
    pub community_id: Uuid,
    pub summary: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub platform: Platform,
    pub message_count: usize,
    pub unique_user_count: usize,
    pub active_periods_count: usize,
}

/// Accept either a single string or a list of strings; model output uses both.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(items)) => items,
    })
}

/// Deduplicate preserving first-seen order.
pub fn dedup_ordered<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(reward_id: &str) -> Contribution {
        Contribution {
            contributor: "alice".to_string(),
            description: "fixed the bug in X".to_string(),
            impact: "unblocked releases".to_string(),
            evidence: vec![],
            reward_id: reward_id.to_string(),
            suggested_reward: SuggestedReward {
                points: 120.0,
                reasoning: "solid fix".to_string(),
            },
        }
    }

    #[test]
    fn test_reward_id_rules() {
        assert!(contribution("bug-fix-x").validate().is_ok());
        assert!(contribution("Bug Fix").validate().is_err());
        assert!(contribution("").validate().is_err());
        assert!(contribution(&"a".repeat(33)).validate().is_err());
    }

    #[test]
    fn test_dedup_ordered_keeps_first_position() {
        assert_eq!(dedup_ordered(["m2", "m1", "m2", "m3", "m1"]), vec!["m2", "m1", "m3"]);
    }

    #[test]
    fn test_profile_defaults_and_server_id() {
        let profile: CommunityProfile = serde_json::from_value(serde_json::json!({
            "id": "6f1c1a56-3c8e-4f43-9d4c-1b2a4f1b2c3d",
            "name": "Open Builders",
            "discord_server_id": "123",
            "telegram_server_id": null
        }))
        .unwrap();
        assert_eq!(profile.points_range(), (10, 1000));
        assert_eq!(profile.server_id(Platform::Discord), Some("123"));
        assert_eq!(profile.server_id(Platform::Telegram), None);
        assert!(!profile.auto_rewards_enabled);
    }

    #[test]
    fn test_discord_location_from_link() {
        let content = MessageContent {
            text: "hi".into(),
            source: Some(Platform::Discord),
            url: Some("https://discord.com/channels/111/222/333".into()),
            ..Default::default()
        }
        .with_location();
        assert_eq!(content.server_id.as_deref(), Some("111"));
        assert_eq!(content.channel_id.as_deref(), Some("222"));

        let telegram = MessageContent {
            text: "hi".into(),
            source: Some(Platform::Telegram),
            server_id: Some("-100".into()),
            ..Default::default()
        }
        .with_location();
        assert_eq!(telegram.server_id.as_deref(), Some("-100"));
    }

    #[test]
    fn test_trigger_wire_format() {
        let trigger: MessageRewardTrigger = serde_json::from_value(serde_json::json!({
            "messageId": "6f1c1a56-3c8e-4f43-9d4c-1b2a4f1b2c3d",
            "platform": "discord"
        }))
        .unwrap();
        assert_eq!(trigger.platform, Platform::Discord);
    }
}
