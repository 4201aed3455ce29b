use super::common::*;
use crate::adapter::MockOutcome;
use crate::message::MessageStatus;

#[tokio::test]
async fn exhausted_retries_dead_letter_with_the_attempt_count() {
    let pipeline = TestPipeline::start().await;
    pipeline
        .whatsapp
        .set_outcome_for("+551199", MockOutcome::Timeout);

    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;

    wait_until("dead letter after exhaustion", || {
        !pipeline.dead_letters().is_empty()
    })
    .await;

    let entries = pipeline.dead_letters();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts_made, 3);
    assert_eq!(entries[0].message.message_id, event.message_id);
    assert_eq!(
        pipeline.whatsapp.sent_count(),
        3,
        "exactly max_attempts sends, no more"
    );

    // No further delivery after dead-lettering.
    settle().await;
    assert_eq!(pipeline.whatsapp.sent_count(), 3);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn non_retryable_rejection_spends_a_single_attempt() {
    let pipeline = TestPipeline::start().await;
    pipeline
        .whatsapp
        .set_outcome_for("+551199", MockOutcome::Rejected);

    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;

    wait_until("dead letter", || !pipeline.dead_letters().is_empty()).await;
    assert_eq!(pipeline.whatsapp.sent_count(), 1);
    assert_eq!(pipeline.dead_letters()[0].attempts_made, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn failed_routing_emits_a_failed_status_with_the_reason() {
    let pipeline = TestPipeline::start().await;
    pipeline
        .whatsapp
        .set_outcome_for("+551199", MockOutcome::Unavailable);

    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;

    wait_until("failed status", || {
        pipeline
            .status_updates()
            .iter()
            .any(|u| u.message_id == event.message_id && u.new_status == MessageStatus::Failed)
    })
    .await;

    let updates = pipeline.status_updates();
    let failed = updates
        .iter()
        .find(|u| u.new_status == MessageStatus::Failed)
        .unwrap();
    assert!(failed.error_message.is_some());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn validation_failure_dead_letters_without_touching_adapters() {
    let pipeline = TestPipeline::start().await;

    let mut event = test_event("conv-1", &["+551199"]);
    event.content = String::new();
    pipeline.publish(&event).await;

    wait_until("dead letter", || !pipeline.dead_letters().is_empty()).await;
    let entries = pipeline.dead_letters();
    assert!(entries[0].reason.contains("malformed"));
    assert_eq!(entries[0].attempts_made, 0);
    assert_eq!(pipeline.whatsapp.sent_count(), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn channel_without_an_adapter_dead_letters() {
    let pipeline = TestPipeline::start().await;

    // Instagram has no adapter registered in the test wiring.
    let mut event = test_event("conv-1", &["insta-user"]);
    event.channel = crate::message::ChannelType::Instagram;
    pipeline.publish(&event).await;

    wait_until("dead letter", || !pipeline.dead_letters().is_empty()).await;
    let entries = pipeline.dead_letters();
    assert!(entries[0].reason.contains("unknown channel"));
    assert_eq!(entries[0].attempts_made, 0);
    pipeline.shutdown().await;
}
