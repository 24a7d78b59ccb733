//! Token and badge lookup through the rewards subgraph.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::TokenRegistry;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{Badge, RewardToken, TokensAndBadges};

const SERVICE: &str = "subgraph";

const APP_QUERY: &str = r#"
query CommunityRewards($communityAddress: ID!) {
  apps(where: {id: $communityAddress}) {
    badges { id name metadataURI totalAwarded }
    tokens { token { id name } }
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Option<GraphData>,
    #[serde(default)]
    errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    #[serde(default)]
    apps: Vec<AppRow>,
}

#[derive(Debug, Deserialize)]
struct AppRow {
    #[serde(default)]
    badges: Vec<BadgeRow>,
    #[serde(default)]
    tokens: Vec<TokenRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BadgeRow {
    id: String,
    name: String,
    #[serde(rename = "metadataURI", default)]
    metadata_uri: Option<String>,
    total_awarded: String,
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    token: RewardToken,
}

#[derive(Debug, Deserialize)]
struct BadgeMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub struct SubgraphRegistry {
    client: Client,
    subgraph_url: String,
    gateway_url: String,
}

impl SubgraphRegistry {
    pub fn new(subgraph_url: &str, gateway_url: &str) -> Self {
        Self {
            client: Client::new(),
            subgraph_url: subgraph_url.to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve `ipfs://cid` (or a bare cid) through the gateway.
    fn gateway_link(&self, uri: &str) -> String {
        format!("{}/{}", self.gateway_url, uri.trim_start_matches("ipfs://"))
    }

    async fn metadata(&self, uri: &str) -> anyhow::Result<BadgeMetadata> {
        let resp = self.client.get(self.gateway_link(uri)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("gateway returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    /// Badge names and descriptions live in pinned metadata; fall back to the
    /// on-chain name when it cannot be fetched.
    async fn badge(&self, row: BadgeRow) -> Badge {
        let metadata = match row.metadata_uri.as_deref() {
            Some(uri) if !uri.is_empty() => match self.metadata(uri).await {
                Ok(m) => Some(m),
                Err(e) => {
                    tracing::warn!("Metadata for badge {} unavailable: {}", row.id, e);
                    None
                }
            },
            _ => None,
        };
        let (name, description) = match metadata {
            Some(m) => (m.name.unwrap_or(row.name), m.description.unwrap_or_default()),
            None => (row.name, String::new()),
        };
        Badge {
            id: row.id,
            name,
            description,
            total_awarded: row.total_awarded,
        }
    }
}

#[async_trait]
impl TokenRegistry for SubgraphRegistry {
    async fn tokens_and_badges(&self, community_address: &str) -> PipelineResult<TokensAndBadges> {
        let body = json!({
            "query": APP_QUERY,
            "variables": { "communityAddress": community_address.to_lowercase() },
        });

        let resp = self
            .client
            .post(&self.subgraph_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                SERVICE,
                format!("{} - {}", status, text),
            ));
        }

        let parsed: GraphResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;
        if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(PipelineError::external(SERVICE, messages.join("; ")));
        }

        let Some(app) = parsed.data.and_then(|d| d.apps.into_iter().next()) else {
            tracing::info!("No rewards app registered for {}", community_address);
            return Ok(TokensAndBadges::default());
        };

        let badges = futures::future::join_all(app.badges.into_iter().map(|b| self.badge(b))).await;
        Ok(TokensAndBadges {
            tokens: app.tokens.into_iter().map(|t| t.token).collect(),
            badges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_response() {
        let raw = json!({
            "data": { "apps": [{
                "badges": [{ "id": "0xb", "name": "Helper", "metadataURI": "ipfs://abc", "totalAwarded": "3" }],
                "tokens": [{ "token": { "id": "0xt", "name": "Points" } }]
            }]}
        });
        let parsed: GraphResponse = serde_json::from_value(raw).unwrap();
        let app = parsed.data.unwrap().apps.into_iter().next().unwrap();
        assert_eq!(app.tokens[0].token.id, "0xt");
        assert_eq!(app.badges[0].metadata_uri.as_deref(), Some("ipfs://abc"));
    }

    #[test]
    fn test_unknown_community_parses_to_no_app() {
        let parsed: GraphResponse = serde_json::from_value(json!({ "data": { "apps": [] } })).unwrap();
        assert!(parsed.data.unwrap().apps.is_empty());
    }

    #[test]
    fn test_gateway_link() {
        let registry = SubgraphRegistry::new("http://graph", "https://gw.example/ipfs/");
        assert_eq!(registry.gateway_link("ipfs://cid1"), "https://gw.example/ipfs/cid1");
        assert_eq!(registry.gateway_link("cid2"), "https://gw.example/ipfs/cid2");
    }
}
