mod common;

use community_pipeline::chain::TxState;
use community_pipeline::error::PipelineError;
use community_pipeline::evaluator::MessageContribution;
use community_pipeline::settlement::{OutcomeStatus, RewardStatus};
use community_pipeline::store::CommunityStore;
use community_pipeline::types::{MessageRewardTrigger, Platform, SuggestedReward, TokensAndBadges};
use community_pipeline::workflow::StepStatus;
use community_pipeline::workflows::{message_reward, RewardOutcomes, PROCESS_REWARD};
use uuid::Uuid;

use common::*;

fn bug_fix(points: f64) -> MessageContribution {
    MessageContribution {
        description: "Fixed bug in X".to_string(),
        impact: "Unblocked the release".to_string(),
        reward_id: "bug-fix-x".to_string(),
        suggested_reward: SuggestedReward {
            points,
            reasoning: "solid fix".to_string(),
        },
    }
}

fn evaluator(points: f64) -> StubEvaluator {
    StubEvaluator {
        message_contributions: vec![bug_fix(points)],
        ..Default::default()
    }
}

/// Seeds one profile and one message by alice; returns the trigger.
async fn seed(harness: &TestHarness, auto_rewards: bool) -> MessageRewardTrigger {
    harness.store.insert_profile(profile(auto_rewards)).await;
    let message = discord_message("alice", "I fixed the bug in X", hours_ago(1));
    let trigger = MessageRewardTrigger {
        message_id: message.id,
        platform: Platform::Discord,
    };
    harness.store.insert_message(message).await;
    trigger
}

#[tokio::test]
async fn test_no_wallet_stores_pending_reward() {
    let harness = TestHarness::new(evaluator(120.0), StubWallets::default(), registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::PendingStored);
    assert_eq!(outcome.points, 120);
    assert_eq!(outcome.contributor, "alice");
    assert!(result.summary.contains("no wallet address"));

    let records = harness.store.rewards().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].no_wallet_address);
    assert_eq!(records[0].status, RewardStatus::PendingStored);
    assert_eq!(records[0].points, 120);
    assert!(harness.ledger.mints().is_empty());
    assert_eq!(harness.artifacts.uploads(), 1);
}

#[tokio::test]
async fn test_auto_rewards_disabled_never_mints() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry());
    let trigger = seed(&harness, false).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes[0].status, OutcomeStatus::PendingStored);
    assert!(result.summary.contains("manual approval required"));
    let records = harness.store.rewards().await;
    assert_eq!(records[0].wallet_address.as_deref(), Some("0xa11ce"));
    assert!(!records[0].is_auto_reward);
    assert!(!records[0].no_wallet_address);
    assert!(harness.ledger.mints().is_empty());
}

#[tokio::test]
async fn test_happy_path_settles_with_one_upload() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::Settled);
    assert!(outcome.tx_hash.is_some());
    assert_eq!(harness.artifacts.uploads(), 1);

    let mints = harness.ledger.mints();
    assert_eq!(mints.len(), 1);
    assert_eq!(mints[0].receiver, "0xa11ce");
    assert_eq!(mints[0].token, POINTS_TOKEN);
    assert_eq!(mints[0].amount, "120000000000000000000");
    assert_eq!(Some(&mints[0].metadata_uri), outcome.artifact.as_ref());

    let records = harness.store.rewards().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RewardStatus::Settled);
    assert_eq!(records[0].tx_hash, outcome.tx_hash);
}

#[tokio::test]
async fn test_rerun_of_settled_reward_does_not_mint_again() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    wf.run(trigger.clone()).await.unwrap();
    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes[0].status, OutcomeStatus::Settled);
    assert_eq!(harness.ledger.mints().len(), 1);
    assert_eq!(harness.store.rewards().await.len(), 1);
}

#[tokio::test]
async fn test_settled_reward_survives_rerun_with_failed_wallet_lookup() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    wf.run(trigger.clone()).await.unwrap();
    let settled = harness.store.rewards().await[0].clone();
    assert_eq!(settled.status, RewardStatus::Settled);

    harness.wallets.set_unavailable(true);
    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes[0].status, OutcomeStatus::Settled);
    assert_eq!(result.outcomes[0].tx_hash, settled.tx_hash);
    let records = harness.store.rewards().await;
    assert_eq!(records, vec![settled]);
    assert_eq!(harness.ledger.mints().len(), 1);
}

#[tokio::test]
async fn test_settled_reward_survives_disabling_auto_rewards() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();
    wf.run(trigger.clone()).await.unwrap();

    let mut profile = harness
        .store
        .profile_by_server(Platform::Discord, SERVER_ID)
        .await
        .unwrap()
        .unwrap();
    profile.auto_rewards_enabled = false;
    harness.store.insert_profile(profile).await;

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert_eq!(result.outcomes[0].status, OutcomeStatus::Settled);

    let records = harness.store.rewards().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RewardStatus::Settled);
    assert!(records[0].is_auto_reward);
    assert_eq!(harness.ledger.mints().len(), 1);
}

#[tokio::test]
async fn test_unconfirmed_mint_is_not_reissued_until_resolved() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry())
        .with_ledger(RecordingLedger::with_mode(LedgerMode::Unconfirmed));
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger.clone()).await.unwrap();
    let first = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert_eq!(first.outcomes[0].status, OutcomeStatus::SettlementFailed);
    let records = harness.store.rewards().await;
    assert_eq!(records[0].status, RewardStatus::SettlementFailed);
    assert_eq!(records[0].tx_queue_id.as_deref(), Some("queue-1"));

    // Still queued: the rerun must not mint.
    let report = wf.run(trigger.clone()).await.unwrap();
    let second = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert_eq!(second.outcomes[0].status, OutcomeStatus::SettlementFailed);
    assert!(second.summary.contains("awaits confirmation"));
    assert_eq!(harness.ledger.mints().len(), 1);

    harness.ledger.resolve_queued(
        "queue-1",
        TxState::Mined {
            tx_hash: "0xfeed".to_string(),
        },
    );
    let report = wf.run(trigger).await.unwrap();
    let third = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert_eq!(third.outcomes[0].status, OutcomeStatus::Settled);
    assert_eq!(third.outcomes[0].tx_hash.as_deref(), Some("0xfeed"));

    let records = harness.store.rewards().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RewardStatus::Settled);
    assert_eq!(records[0].tx_hash.as_deref(), Some("0xfeed"));
    assert_eq!(harness.ledger.mints().len(), 1);
}

#[tokio::test]
async fn test_queued_mint_that_failed_is_settled_again() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry())
        .with_ledger(RecordingLedger::with_mode(LedgerMode::Unconfirmed));
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();
    wf.run(trigger.clone()).await.unwrap();

    harness.ledger.resolve_queued(
        "queue-1",
        TxState::Failed {
            reason: "errored: nonce too low".to_string(),
        },
    );
    harness.ledger.set_mode(LedgerMode::Confirm);
    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes[0].status, OutcomeStatus::Settled);
    assert_eq!(harness.ledger.mints().len(), 2);
    let records = harness.store.rewards().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RewardStatus::Settled);
    assert_eq!(records[0].tx_queue_id, None);
}

#[tokio::test]
async fn test_reverted_mint_is_recorded_as_failed() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, registry())
        .with_ledger(RecordingLedger::reverting("execution reverted"));
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();

    assert_eq!(result.outcomes[0].status, OutcomeStatus::SettlementFailed);
    assert!(result.summary.starts_with("Failed to reward alice"));
    let records = harness.store.rewards().await;
    assert_eq!(records[0].status, RewardStatus::SettlementFailed);
    assert!(records[0].error.as_deref().unwrap().contains("execution reverted"));
}

#[tokio::test]
async fn test_suggested_points_are_clamped() {
    let harness = TestHarness::new(evaluator(5000.0), StubWallets::default(), registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert_eq!(result.outcomes[0].points, 1000);
    assert_eq!(harness.store.rewards().await[0].points, 1000);
}

#[tokio::test]
async fn test_no_contribution_skips_settlement() {
    let harness = TestHarness::new(StubEvaluator::default(), StubWallets::default(), registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    let result = report.output::<RewardOutcomes>(PROCESS_REWARD).unwrap();
    assert!(result.outcomes.is_empty());
    assert_eq!(result.summary, "No contribution to reward");
    assert_eq!(harness.artifacts.uploads(), 0);
    assert!(harness.store.rewards().await.is_empty());
}

#[tokio::test]
async fn test_unknown_message_fails_first_step() {
    let harness = TestHarness::new(evaluator(120.0), StubWallets::default(), registry());
    seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let err = wf
        .run(MessageRewardTrigger {
            message_id: Uuid::new_v4(),
            platform: Platform::Discord,
        })
        .await
        .err()
        .unwrap();
    assert_eq!(err.failed_step(), Some("fetchMessage"));
    assert!(matches!(err.root(), PipelineError::NotFound { .. }));
    assert_eq!(harness.evaluator.calls(), 0);
}

#[tokio::test]
async fn test_missing_points_token_fails_settlement_step() {
    let wallets = StubWallets::default().with_wallet("alice", "0xa11ce");
    let harness = TestHarness::new(evaluator(120.0), wallets, TokensAndBadges::default());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let err = wf.run(trigger).await.err().unwrap();
    assert_eq!(err.failed_step(), Some(PROCESS_REWARD));
    assert!(harness.ledger.mints().is_empty());
}

#[tokio::test]
async fn test_report_marks_every_step_successful() {
    let harness = TestHarness::new(evaluator(120.0), StubWallets::default(), registry());
    let trigger = seed(&harness, true).await;
    let wf = message_reward::build(&harness.collaborators()).unwrap();

    let report = wf.run(trigger).await.unwrap();
    assert_eq!(report.statuses.len(), 6);
    assert!(report
        .statuses
        .iter()
        .all(|(_, status)| *status == StepStatus::Success));
    let json = report.to_json();
    assert_eq!(json["workflow"], "message-reward");
    assert_eq!(
        json["steps"]["getWalletAddress"]["output"][0]["reason"],
        "noLinkedIdentity"
    );
}
