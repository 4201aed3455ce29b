use super::common::*;
use crate::EventLog;
use crate::message::MessageStatus;

#[tokio::test]
async fn pipeline_starts_and_shuts_down_cleanly() {
    let pipeline = TestPipeline::start().await;
    pipeline.shutdown().await;
}

#[tokio::test]
async fn in_flight_event_completes_before_shutdown() {
    let pipeline = TestPipeline::start().await;

    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;
    wait_until("delivery", || pipeline.whatsapp.sent_count() == 1).await;

    pipeline.shutdown().await;
}

#[tokio::test]
async fn successful_routing_records_message_state() {
    let pipeline = TestPipeline::start().await;

    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;

    wait_until("delivery", || pipeline.whatsapp.sent_count() == 1).await;

    // The Sent status flows through the consumer into persisted state.
    let state = pipeline.state.clone();
    let id = event.message_id;
    wait_until_async("state reaches Sent", || {
        let state = state.clone();
        async move {
            matches!(
                state.get(&id).await,
                Ok(Some(s)) if s.status == MessageStatus::Sent
            )
        }
    })
    .await;

    let persisted = pipeline.state.get(&event.message_id).await.unwrap().unwrap();
    assert_eq!(persisted.sender_id, "alice");
    assert_eq!(persisted.conversation_id, "conv-1");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn undecodable_payload_is_dropped_without_wedging_the_partition() {
    let pipeline = TestPipeline::start().await;

    pipeline
        .log
        .publish(
            crate::log::topics::MESSAGES,
            "conv-1",
            b"not json".to_vec(),
        )
        .await
        .unwrap();

    // A well-formed event behind the garbage must still be processed.
    let event = test_event("conv-1", &["+551199"]);
    pipeline.publish(&event).await;

    wait_until("delivery after garbage", || {
        pipeline.whatsapp.sent_count() == 1
    })
    .await;
    pipeline.shutdown().await;
}
