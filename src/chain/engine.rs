//! Ledger backed by a transaction-relayer engine.
//!
//! Writes are queued with `POST /contract/{chain}/{contract}/write` and then
//! polled through `GET /transaction/status/{queueId}` until mined, errored, or
//! the confirmation timeout elapses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Ledger, MintRequest, TxReceipt, TxState};
use crate::error::{PipelineError, PipelineResult};

const SERVICE: &str = "ledger";

pub struct EngineLedger {
    client: Client,
    url: String,
    access_token: String,
    chain: String,
    backend_wallet: String,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuedWrite {
    queue_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxStatus {
    status: String,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl TxStatus {
    fn into_state(self) -> TxState {
        match (self.status.as_str(), self.transaction_hash) {
            ("mined", Some(tx_hash)) => TxState::Mined { tx_hash },
            ("errored" | "cancelled", _) => TxState::Failed {
                reason: format!(
                    "{}: {}",
                    self.status,
                    self.error_message
                        .unwrap_or_else(|| "no reason given".to_string())
                ),
            },
            // A mined status without a hash cannot be recorded yet.
            _ => TxState::Pending,
        }
    }
}

impl EngineLedger {
    pub fn new(
        url: &str,
        access_token: &str,
        chain: &str,
        backend_wallet: &str,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            chain: chain.to_string(),
            backend_wallet: backend_wallet.to_string(),
            confirm_timeout,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn contract_url(&self, contract: &str) -> String {
        format!("{}/contract/{}/{}", self.url, self.chain, contract)
    }

    /// Queue a contract write and wait for its receipt.
    async fn write(&self, contract: &str, function: &str, args: Value) -> PipelineResult<TxReceipt> {
        let body = json!({
            "functionName": function,
            "args": args,
        });

        tracing::debug!("Queueing {} on {}", function, contract);
        let resp = self
            .client
            .post(format!("{}/write", self.contract_url(contract)))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("x-backend-wallet-address", &self.backend_wallet)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::SettlementFailure(format!("ledger unreachable: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::SettlementFailure(e.to_string()))?;
        if !status.is_success() {
            return Err(PipelineError::SettlementFailure(format!(
                "{} rejected: {} - {}",
                function, status, text
            )));
        }

        let queued: Envelope<QueuedWrite> = serde_json::from_str(&text)
            .map_err(|e| PipelineError::SettlementFailure(format!("bad write response: {}", e)))?;

        self.wait_for_receipt(function, &queued.result.queue_id).await
    }

    async fn wait_for_receipt(&self, function: &str, queue_id: &str) -> PipelineResult<TxReceipt> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;

        loop {
            match self.status(queue_id).await {
                Ok(tx) => match tx.into_state() {
                    TxState::Mined { tx_hash } => {
                        tracing::info!("{} confirmed: {}", function, tx_hash);
                        return Ok(TxReceipt { tx_hash });
                    }
                    TxState::Failed { reason } => {
                        return Err(PipelineError::SettlementFailure(format!(
                            "{} {}",
                            function, reason
                        )));
                    }
                    TxState::Pending => tracing::debug!("{} queue {} pending", function, queue_id),
                },
                // The write is already queued; a failed poll is not a failed mint.
                Err(e) => tracing::warn!("Status poll for {} failed: {}", queue_id, e),
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(PipelineError::SettlementUnconfirmed {
                    queue_id: queue_id.to_string(),
                    message: format!("{} not confirmed within {:?}", function, self.confirm_timeout),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn status(&self, queue_id: &str) -> anyhow::Result<TxStatus> {
        let resp = self
            .client
            .get(format!("{}/transaction/status/{}", self.url, queue_id))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("status {} - {}", status, text);
        }
        let parsed: Envelope<TxStatus> = serde_json::from_str(&text)?;
        Ok(parsed.result)
    }
}

#[async_trait]
impl Ledger for EngineLedger {
    async fn mint_fungible(&self, request: &MintRequest) -> PipelineResult<TxReceipt> {
        self.write(
            &request.contract,
            "mintERC20",
            json!([
                request.token,
                request.receiver,
                request.amount,
                request.activity_id,
                request.activity_type,
                request.metadata_uri,
            ]),
        )
        .await
    }

    async fn transaction_state(&self, queue_id: &str) -> PipelineResult<TxState> {
        let tx = self
            .status(queue_id)
            .await
            .map_err(|e| PipelineError::external(SERVICE, e))?;
        Ok(tx.into_state())
    }

    async fn mint_badge(
        &self,
        contract: &str,
        badge: &str,
        receiver: &str,
        activity_id: &str,
        activity_type: &str,
        metadata_uri: &str,
    ) -> PipelineResult<TxReceipt> {
        let data = format!("0x{}", hex::encode(metadata_uri.as_bytes()));
        self.write(
            contract,
            "mintBadge",
            json!([badge, receiver, activity_id, activity_type, data]),
        )
        .await
    }

    async fn transfer_fungible(
        &self,
        contract: &str,
        token: &str,
        receiver: &str,
        amount: &str,
    ) -> PipelineResult<TxReceipt> {
        let activity_type = super::to_bytes32_hex(super::ACTIVITY_MISSION)?;
        let activity_id = super::to_bytes32_hex("transfer")?;
        self.write(
            contract,
            "transferERC20",
            json!([token, receiver, amount, activity_id, activity_type, ""]),
        )
        .await
    }

    async fn transfer_badge(
        &self,
        contract: &str,
        badge: &str,
        receiver: &str,
        token_id: &str,
    ) -> PipelineResult<TxReceipt> {
        let activity_type = super::to_bytes32_hex(super::ACTIVITY_MISSION)?;
        let activity_id = super::to_bytes32_hex("transfer")?;
        self.write(
            contract,
            "transferERC721",
            json!([badge, receiver, token_id, activity_id, activity_type, ""]),
        )
        .await
    }

    async fn owner(&self, contract: &str) -> PipelineResult<String> {
        let resp = self
            .client
            .get(format!(
                "{}/read?functionName=owner",
                self.contract_url(contract)
            ))
            .header("Authorization", format!("Bearer {}", self.access_token))
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
                format!("owner() failed: {} - {}", status, text),
            ));
        }
        let parsed: Envelope<String> =
            serde_json::from_str(&text).map_err(|e| PipelineError::external(SERVICE, e))?;
        Ok(parsed.result.to_lowercase())
    }

    async fn transfer_ownership(
        &self,
        contract: &str,
        new_owner: &str,
    ) -> PipelineResult<TxReceipt> {
        self.write(contract, "transferOwnership", json!([new_owner]))
            .await
    }

    async fn accept_ownership(&self, contract: &str) -> PipelineResult<TxReceipt> {
        self.write(contract, "acceptOwnership", json!([])).await
    }
}
