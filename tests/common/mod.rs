#![allow(dead_code)]

mod stubs;

pub use stubs::*;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use community_pipeline::types::{
    ChatMessage, CommunityProfile, Contribution, MessageContent, Platform, RewardToken,
    SuggestedReward, TokensAndBadges,
};

pub const SERVER_ID: &str = "111";
pub const POINTS_TOKEN: &str = "0x00000000000000000000000000000000000000aa";
pub const COMMUNITY_ADDRESS: &str = "0x00000000000000000000000000000000000000cc";

pub fn profile(auto_rewards_enabled: bool) -> CommunityProfile {
    CommunityProfile {
        id: Uuid::new_v4(),
        name: "Open Builders".to_string(),
        description: "Builders of open tools".to_string(),
        goals: vec!["ship docs".to_string()],
        discord_server_id: Some(SERVER_ID.to_string()),
        telegram_server_id: None,
        github_repos: vec![],
        auto_rewards_enabled,
        community_address: COMMUNITY_ADDRESS.to_string(),
        reward_actions: vec![],
        minimum_reward_points: 10,
        maximum_reward_points: 1000,
    }
}

pub fn registry() -> TokensAndBadges {
    TokensAndBadges {
        tokens: vec![RewardToken {
            id: POINTS_TOKEN.to_string(),
            name: "Builder Points".to_string(),
        }],
        badges: vec![],
    }
}

pub fn discord_message(username: &str, text: &str, at: DateTime<Utc>) -> ChatMessage {
    let id = Uuid::new_v4();
    ChatMessage {
        id,
        content: MessageContent {
            text: text.to_string(),
            source: Some(Platform::Discord),
            url: Some(format!("https://discord.com/channels/{}/222/{}", SERVER_ID, id)),
            ..Default::default()
        },
        created_at: at,
        user_id: format!("user-{}", username),
        username: Some(username.to_string()),
    }
}

pub fn contribution(contributor: &str, reward_id: &str, points: f64) -> Contribution {
    Contribution {
        contributor: contributor.to_string(),
        description: format!("{} helped out", contributor),
        impact: "members unblocked".to_string(),
        evidence: vec!["m1".to_string()],
        reward_id: reward_id.to_string(),
        suggested_reward: SuggestedReward {
            points,
            reasoning: "useful".to_string(),
        },
    }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}
