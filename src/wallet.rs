//! Contributor wallet resolution.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{PipelineError, PipelineResult};
use crate::retry::{retry_idempotent, RetryPolicy};
use crate::types::Platform;

const SERVICE: &str = "wallet resolver";
const PRIVY_API_URL: &str = "https://auth.privy.io/api/v1";

/// Why no wallet was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingWallet {
    /// No identity is linked to this chat account.
    NoLinkedIdentity,
    /// An identity exists but has no wallet attached.
    NoWalletAttached,
    /// The resolver could not be reached.
    LookupFailed,
}

impl std::fmt::Display for MissingWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLinkedIdentity => write!(f, "no linked identity"),
            Self::NoWalletAttached => write!(f, "no wallet attached"),
            Self::LookupFailed => write!(f, "wallet lookup failed"),
        }
    }
}

/// Outcome of a wallet lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WalletLookup {
    Found { address: String },
    Missing { reason: MissingWallet },
}

impl WalletLookup {
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Found { address } => Some(address),
            Self::Missing { .. } => None,
        }
    }
}

#[async_trait]
pub trait WalletResolver: Send + Sync {
    async fn resolve(&self, username: &str, platform: Platform) -> PipelineResult<WalletLookup>;
}

#[derive(Debug, Deserialize)]
struct PrivyUser {
    #[serde(default)]
    linked_accounts: Vec<LinkedAccount>,
}

#[derive(Debug, Deserialize)]
struct LinkedAccount {
    #[serde(rename = "type")]
    account_type: String,
    #[serde(default)]
    address: Option<String>,
}

impl PrivyUser {
    fn wallet(self) -> WalletLookup {
        let address = self
            .linked_accounts
            .into_iter()
            .find(|a| a.account_type == "wallet")
            .and_then(|a| a.address)
            .filter(|a| !a.is_empty());
        match address {
            Some(address) => WalletLookup::Found { address },
            None => WalletLookup::Missing {
                reason: MissingWallet::NoWalletAttached,
            },
        }
    }
}

/// Looks users up by their Discord or Telegram username in Privy.
pub struct PrivyWalletResolver {
    client: Client,
    api_url: String,
    app_id: String,
    app_secret: String,
    retry: RetryPolicy,
}

impl PrivyWalletResolver {
    pub fn new(app_id: &str, app_secret: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: PRIVY_API_URL.to_string(),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn lookup(&self, username: &str, platform: Platform) -> PipelineResult<WalletLookup> {
        let resp = self
            .client
            .post(format!("{}/users/{}/username", self.api_url, platform))
            .basic_auth(&self.app_id, Some(&self.app_secret))
            .header("privy-app-id", &self.app_id)
            .json(&json!({ "username": username }))
            .send()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(WalletLookup::Missing {
                reason: MissingWallet::NoLinkedIdentity,
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                SERVICE,
                format!("{} - {}", status, text),
            ));
        }

        let user: PrivyUser = resp
            .json()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;
        Ok(user.wallet())
    }
}

#[async_trait]
impl WalletResolver for PrivyWalletResolver {
    async fn resolve(&self, username: &str, platform: Platform) -> PipelineResult<WalletLookup> {
        if username.trim().is_empty() {
            return Ok(WalletLookup::Missing {
                reason: MissingWallet::NoLinkedIdentity,
            });
        }
        let lookup =
            retry_idempotent(&self.retry, "wallet lookup", || self.lookup(username, platform))
                .await?;
        if let WalletLookup::Missing { reason } = &lookup {
            tracing::info!("No wallet for {} user {}: {}", platform, username, reason);
        }
        Ok(lookup)
    }
}
