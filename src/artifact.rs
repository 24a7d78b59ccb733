//! Content-addressed storage of reward artifacts.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{PipelineError, PipelineResult};
use crate::retry::{retry_idempotent, RetryPolicy};

const SERVICE: &str = "artifact store";

/// Immutable reference to stored content, e.g. `ipfs://<cid>`.
pub type ContentHash = String;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a JSON document. Identical content yields the same hash.
    async fn upload(&self, document: &Value) -> PipelineResult<ContentHash>;
}

/// SHA-256 of the canonical serialization (object keys sorted).
pub fn canonical_digest(document: &Value) -> String {
    // serde_json maps are ordered by key, so `to_vec` is canonical.
    let bytes = serde_json::to_vec(document).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pins JSON documents through a `pinJSONToIPFS`-style pinning API.
pub struct PinningArtifactStore {
    client: Client,
    api_url: String,
    api_key: String,
    retry: RetryPolicy,
    /// digest -> content hash of documents pinned by this process
    pinned: RwLock<HashMap<String, ContentHash>>,
}

impl PinningArtifactStore {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry: RetryPolicy::default(),
            pinned: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn pin(&self, document: &Value) -> PipelineResult<ContentHash> {
        let resp = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "pinataContent": document }))
            .send()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;
        if !status.is_success() {
            return Err(PipelineError::external(
                SERVICE,
                format!("pin failed: {} - {}", status, text),
            ));
        }

        let parsed: PinResponse =
            serde_json::from_str(&text).map_err(|e| PipelineError::external(SERVICE, e))?;
        Ok(format!("ipfs://{}", parsed.ipfs_hash))
    }
}

#[async_trait]
impl ArtifactStore for PinningArtifactStore {
    async fn upload(&self, document: &Value) -> PipelineResult<ContentHash> {
        let digest = canonical_digest(document);
        if let Some(hash) = self.pinned.read().await.get(&digest) {
            tracing::debug!("Artifact {} already pinned as {}", digest, hash);
            return Ok(hash.clone());
        }

        let hash = retry_idempotent(&self.retry, "artifact upload", || self.pin(document)).await?;
        tracing::info!("Pinned artifact {}", hash);
        self.pinned.write().await.insert(digest, hash.clone());
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": [1, 2], "b": 1}"#).unwrap();
        assert_eq!(canonical_digest(&a), canonical_digest(&b));
        assert_ne!(canonical_digest(&a), canonical_digest(&json!({"a": [2, 1], "b": 1})));
        assert_eq!(canonical_digest(&a).len(), 64);
    }

    #[tokio::test]
    async fn test_cached_digest_skips_network() {
        let store = PinningArtifactStore::new("http://127.0.0.1:9", "key").with_retry(RetryPolicy::none());
        let doc = json!({"messageId": "m-1"});
        store
            .pinned
            .write()
            .await
            .insert(canonical_digest(&doc), "ipfs://cached".to_string());
        assert_eq!(store.upload(&doc).await.unwrap(), "ipfs://cached");
    }
}
