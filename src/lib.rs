//! # Community Pipeline
//!
//! Turns chat activity into on-chain rewards and a prioritized task backlog.
//!
//! ## Architecture
//!
//! ```text
//!   trigger (HTTP)
//!        │
//!        ▼
//!  ┌───────────────┐   steps   ┌────────────────────────────────────────┐
//!  │   Workflow    │──────────▶│ stores · evaluator · wallets · registry │
//!  │ (orchestrator)│           └────────────────────────────────────────┘
//!  └──────┬────────┘
//!         ├──▶ RewardSettler ──▶ artifact store ──▶ ledger ──▶ reward store
//!         └──▶ TaskEngine ────▶ task store
//! ```
//!
//! ## Modules
//! - `workflow`: typed step orchestrator (dependency waves, criticality, timeouts)
//! - `workflows`: the four committed pipelines and their collaborators
//! - `settlement`: reward settlement state machine
//! - `tasks`: task deduplication, priority scoring and decay
//! - `evaluator` / `llm`: model-backed contribution, task and summary extraction
//! - `store`, `chain`, `wallet`, `artifact`: external collaborators
//! - `api`: HTTP trigger surface

pub mod api;
pub mod artifact;
pub mod chain;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod retry;
pub mod settlement;
pub mod store;
pub mod tasks;
pub mod transcript;
pub mod types;
pub mod wallet;
pub mod workflow;
pub mod workflows;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};
pub use workflows::{Collaborators, Pipelines};
