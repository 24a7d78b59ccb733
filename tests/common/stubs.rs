//! Deterministic collaborators for the scenario tests.
//!
//! Each stub counts its calls so scenarios can assert on side effects
//! (uploads performed, mints issued).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use community_pipeline::artifact::{canonical_digest, ArtifactStore, ContentHash};
use community_pipeline::chain::{Ledger, MintRequest, TokenRegistry, TxReceipt, TxState};
use community_pipeline::error::{PipelineError, PipelineResult};
use community_pipeline::evaluator::{ContributionEvaluator, MessageContribution, Summarizer, TaskMatcher};
use community_pipeline::store::memory::InMemoryStore;
use community_pipeline::tasks::{ExampleTask, Task, TaskCandidate};
use community_pipeline::types::{Contribution, Platform, TokensAndBadges};
use community_pipeline::wallet::{MissingWallet, WalletLookup, WalletResolver};
use community_pipeline::workflows::Collaborators;

/// Returns canned evaluations.
#[derive(Default)]
pub struct StubEvaluator {
    pub contributions: Vec<Contribution>,
    pub message_contributions: Vec<MessageContribution>,
    pub tasks: Vec<TaskCandidate>,
    pub summary: String,
    pub calls: AtomicUsize,
}

impl StubEvaluator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContributionEvaluator for StubEvaluator {
    async fn identify_contributions(&self, _transcript: &str) -> PipelineResult<Vec<Contribution>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contributions.clone())
    }

    async fn evaluate_message(
        &self,
        _text: &str,
        _range: (i64, i64),
    ) -> PipelineResult<Vec<MessageContribution>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.message_contributions.clone())
    }
}

#[async_trait]
impl TaskMatcher for StubEvaluator {
    async fn identify_tasks(
        &self,
        _transcript: &str,
        _existing: &[Task],
        _examples: &[ExampleTask],
    ) -> PipelineResult<Vec<TaskCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tasks.clone())
    }
}

#[async_trait]
impl Summarizer for StubEvaluator {
    async fn summarize(&self, _transcript: &str) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }
}

/// Wallets by username; anyone else has no linked identity. While
/// `unavailable` is set every lookup errors.
#[derive(Default)]
pub struct StubWallets {
    pub wallets: HashMap<String, String>,
    pub unavailable: AtomicBool,
    pub calls: AtomicUsize,
}

impl StubWallets {
    pub fn with_wallet(mut self, username: &str, address: &str) -> Self {
        self.wallets.insert(username.to_string(), address.to_string());
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletResolver for StubWallets {
    async fn resolve(&self, username: &str, _platform: Platform) -> PipelineResult<WalletLookup> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::external("wallets", "503 Service Unavailable"));
        }
        Ok(match self.wallets.get(username) {
            Some(address) => WalletLookup::Found {
                address: address.clone(),
            },
            None => WalletLookup::Missing {
                reason: MissingWallet::NoLinkedIdentity,
            },
        })
    }
}

/// Content-addressed in memory.
#[derive(Default)]
pub struct CountingArtifactStore {
    pub uploads: AtomicUsize,
}

impl CountingArtifactStore {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for CountingArtifactStore {
    async fn upload(&self, document: &Value) -> PipelineResult<ContentHash> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ipfs://{}", &canonical_digest(document)[..46]))
    }
}

/// How [`RecordingLedger`] answers writes.
#[derive(Debug, Clone, Default)]
pub enum LedgerMode {
    #[default]
    Confirm,
    Revert(String),
    /// Queue the write and give up waiting for it.
    Unconfirmed,
}

/// Records mints and answers them according to its [`LedgerMode`].
#[derive(Default)]
pub struct RecordingLedger {
    pub mode: Mutex<LedgerMode>,
    pub mints: Mutex<Vec<MintRequest>>,
    /// Queued writes by queue id.
    pub queue: Mutex<HashMap<String, TxState>>,
}

impl RecordingLedger {
    pub fn reverting(reason: &str) -> Self {
        Self::with_mode(LedgerMode::Revert(reason.to_string()))
    }

    pub fn with_mode(mode: LedgerMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            ..Self::default()
        }
    }

    pub fn set_mode(&self, mode: LedgerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn mints(&self) -> Vec<MintRequest> {
        self.mints.lock().unwrap().clone()
    }

    /// Settle a queued write as the relayer would after the fact.
    pub fn resolve_queued(&self, queue_id: &str, state: TxState) {
        self.queue.lock().unwrap().insert(queue_id.to_string(), state);
    }

    fn write(&self) -> PipelineResult<TxReceipt> {
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            LedgerMode::Confirm => Ok(TxReceipt {
                tx_hash: format!("0x{:064x}", self.mints().len()),
            }),
            LedgerMode::Revert(reason) => Err(PipelineError::SettlementFailure(reason)),
            LedgerMode::Unconfirmed => {
                let mut queue = self.queue.lock().unwrap();
                let queue_id = format!("queue-{}", queue.len() + 1);
                queue.insert(queue_id.clone(), TxState::Pending);
                Err(PipelineError::SettlementUnconfirmed {
                    queue_id,
                    message: "mintERC20 not confirmed within 60s".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn mint_fungible(&self, request: &MintRequest) -> PipelineResult<TxReceipt> {
        self.mints.lock().unwrap().push(request.clone());
        self.write()
    }

    async fn transaction_state(&self, queue_id: &str) -> PipelineResult<TxState> {
        self.queue
            .lock()
            .unwrap()
            .get(queue_id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("queued transaction", queue_id))
    }

    async fn mint_badge(
        &self,
        _contract: &str,
        _badge: &str,
        _receiver: &str,
        _activity_id: &str,
        _activity_type: &str,
        _metadata_uri: &str,
    ) -> PipelineResult<TxReceipt> {
        self.write()
    }

    async fn transfer_fungible(
        &self,
        _contract: &str,
        _token: &str,
        _receiver: &str,
        _amount: &str,
    ) -> PipelineResult<TxReceipt> {
        self.write()
    }

    async fn transfer_badge(
        &self,
        _contract: &str,
        _badge: &str,
        _receiver: &str,
        _token_id: &str,
    ) -> PipelineResult<TxReceipt> {
        self.write()
    }

    async fn owner(&self, _contract: &str) -> PipelineResult<String> {
        Ok("0x0000000000000000000000000000000000000000".to_string())
    }

    async fn transfer_ownership(&self, _contract: &str, _new_owner: &str) -> PipelineResult<TxReceipt> {
        self.write()
    }

    async fn accept_ownership(&self, _contract: &str) -> PipelineResult<TxReceipt> {
        self.write()
    }
}

/// Same tokens and badges for every community.
#[derive(Default)]
pub struct StubRegistry(pub TokensAndBadges);

#[async_trait]
impl TokenRegistry for StubRegistry {
    async fn tokens_and_badges(&self, _community_address: &str) -> PipelineResult<TokensAndBadges> {
        Ok(self.0.clone())
    }
}

/// Stubs wired around one [`InMemoryStore`].
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub evaluator: Arc<StubEvaluator>,
    pub wallets: Arc<StubWallets>,
    pub artifacts: Arc<CountingArtifactStore>,
    pub ledger: Arc<RecordingLedger>,
    pub registry: Arc<StubRegistry>,
}

impl TestHarness {
    pub fn new(evaluator: StubEvaluator, wallets: StubWallets, registry: TokensAndBadges) -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            evaluator: Arc::new(evaluator),
            wallets: Arc::new(wallets),
            artifacts: Arc::new(CountingArtifactStore::default()),
            ledger: Arc::new(RecordingLedger::default()),
            registry: Arc::new(StubRegistry(registry)),
        }
    }

    pub fn with_ledger(mut self, ledger: RecordingLedger) -> Self {
        self.ledger = Arc::new(ledger);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            messages: self.store.clone(),
            communities: self.store.clone(),
            tasks: self.store.clone(),
            rewards: self.store.clone(),
            summaries: self.store.clone(),
            evaluator: self.evaluator.clone(),
            matcher: self.evaluator.clone(),
            summarizer: self.evaluator.clone(),
            wallets: self.wallets.clone(),
            registry: self.registry.clone(),
            artifacts: self.artifacts.clone(),
            ledger: self.ledger.clone(),
        }
    }
}
