use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::PipelineContext;
use crate::error::{DeliveryError, ResolveError};
use crate::identity::{classify_recipient, RecipientKind};
use crate::message::{ChannelType, DeliveryAttempt, MessageEvent, MessageStatus, StatusUpdate};

/// Route one message event: resolve its true delivery targets, fan
/// deliveries out concurrently, and settle the overall outcome.
///
/// Deliberate failures (validation, no linked identity, exhausted
/// retries) are dead-lettered here and reported as `Ok` so the offset is
/// acknowledged. `Err` is reserved for transient pre-delivery conditions
/// (currently an unreachable identity directory) where event-log
/// redelivery is the retry mechanism.
pub(super) async fn route_event(
    ctx: &PipelineContext,
    event: &MessageEvent,
) -> Result<(), DeliveryError> {
    if let Err(e) = event.validate() {
        warn!(message_id = %event.message_id, error = %e, "event failed validation");
        fail_message(ctx, event, &e.to_string(), 0, "validation").await;
        return Ok(());
    }

    // Record the message for the status consumer before any status can
    // be emitted for it.
    if let Err(e) = ctx.state.insert(event).await {
        warn!(message_id = %event.message_id, error = %e, "message state insert failed");
    }

    let targets = resolve_targets(ctx, event).await?;
    if targets.is_empty() {
        fail_message(ctx, event, "no linked identity", 0, "no_linked_identity").await;
        return Ok(());
    }

    let attempts = deliver_fanout(ctx, event, targets).await;

    let successes = attempts.iter().filter(|a| a.outcome.is_ok()).count();
    let failures: Vec<&DeliveryAttempt> =
        attempts.iter().filter(|a| a.outcome.is_err()).collect();
    let attempts_made = attempts.iter().map(|a| a.attempt_number).max().unwrap_or(0);

    if successes > 0 {
        if !failures.is_empty() {
            // Reachability wins: one delivered identity makes the
            // message delivered, the rest is logged and counted.
            warn!(
                message_id = %event.message_id,
                delivered = successes,
                failed = failures.len(),
                "partial fan-out failure"
            );
            ctx.metrics.record_fanout_partial_failure();
        }
        info!(
            message_id = %event.message_id,
            conversation_id = %event.conversation_id,
            identities = attempts.len(),
            "message sent"
        );
        ctx.status
            .publish(StatusUpdate::pipeline(event.message_id, MessageStatus::Sent))
            .await;
    } else {
        let reason = failures
            .last()
            .and_then(|a| a.outcome.as_ref().err())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no delivery attempted".to_string());
        fail_message(ctx, event, &reason, attempts_made, "delivery_failed").await;
    }

    Ok(())
}

/// Expand recipient ids into `(platform, identity)` delivery targets.
///
/// Direct platform identities pass through on the event's channel;
/// internal user references are resolved to their linked identities. A
/// "not found" answer contributes zero identities; an unreachable
/// directory aborts routing for redelivery.
async fn resolve_targets(
    ctx: &PipelineContext,
    event: &MessageEvent,
) -> Result<Vec<(ChannelType, String)>, DeliveryError> {
    let mut targets = Vec::new();

    for recipient in &event.recipient_ids {
        match classify_recipient(recipient) {
            RecipientKind::Direct(identity) => {
                targets.push((event.channel, identity));
            }
            RecipientKind::InternalUser(user_id) => {
                match ctx.resolver.resolve(&user_id).await {
                    Ok(identities) => {
                        debug!(
                            message_id = %event.message_id,
                            %user_id,
                            identities = identities.len(),
                            "internal recipient resolved"
                        );
                        targets.extend(
                            identities
                                .into_iter()
                                .map(|i| (i.platform, i.platform_user_id)),
                        );
                    }
                    Err(ResolveError::NotFound(_)) => {
                        warn!(message_id = %event.message_id, %user_id, "recipient has no directory entry");
                    }
                    Err(ResolveError::Unavailable(e)) => {
                        return Err(DeliveryError::Unavailable(format!(
                            "identity resolver unavailable: {e}"
                        )));
                    }
                }
            }
        }
    }

    Ok(targets)
}

/// Deliver to every target concurrently, each wrapped by the retry
/// executor, and await all of them before deciding the overall outcome.
async fn deliver_fanout(
    ctx: &PipelineContext,
    event: &MessageEvent,
    targets: Vec<(ChannelType, String)>,
) -> Vec<DeliveryAttempt> {
    let shared_event = Arc::new(event.clone());
    let mut tasks: JoinSet<DeliveryAttempt> = JoinSet::new();
    let mut attempts = Vec::new();

    for (channel, target) in targets {
        let Some(adapter) = ctx.adapters.get(channel) else {
            warn!(
                message_id = %event.message_id,
                channel = channel.as_str(),
                "no adapter registered for channel"
            );
            attempts.push(DeliveryAttempt {
                channel,
                target_identity: target,
                attempt_number: 0,
                outcome: Err(DeliveryError::Malformed(format!(
                    "unknown channel {}",
                    channel.as_str()
                ))),
            });
            continue;
        };

        let retry = ctx.retry.clone();
        let event = Arc::clone(&shared_event);
        tasks.spawn(async move {
            let label = format!("send:{}", channel.as_str());
            let result = retry
                .execute(&label, |_| {
                    let adapter = Arc::clone(&adapter);
                    let event = Arc::clone(&event);
                    let target = target.clone();
                    async move { adapter.send(&event, &target).await }
                })
                .await;

            match result {
                Ok((outcome, attempt_number)) => DeliveryAttempt {
                    channel,
                    target_identity: target,
                    attempt_number,
                    outcome: Ok(outcome),
                },
                Err(retry_error) => DeliveryAttempt {
                    channel,
                    target_identity: target,
                    attempt_number: retry_error.attempts(),
                    outcome: Err(retry_error.source().clone()),
                },
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(attempt) => {
                ctx.metrics
                    .record_delivery_attempts(attempt.channel.as_str(), attempt.attempt_number);
                match &attempt.outcome {
                    Ok(outcome) => {
                        ctx.metrics.record_delivery_succeeded(attempt.channel.as_str());
                        debug!(
                            message_id = %event.message_id,
                            channel = attempt.channel.as_str(),
                            target = %attempt.target_identity,
                            attempts = attempt.attempt_number,
                            external_id = outcome.external_message_id.as_deref().unwrap_or("-"),
                            "delivery accepted"
                        );
                    }
                    Err(e) => {
                        warn!(
                            message_id = %event.message_id,
                            channel = attempt.channel.as_str(),
                            target = %attempt.target_identity,
                            attempts = attempt.attempt_number,
                            error = %e,
                            "delivery to identity failed"
                        );
                    }
                }
                attempts.push(attempt);
            }
            Err(e) => {
                error!(message_id = %event.message_id, error = %e, "delivery task failed to run");
            }
        }
    }

    attempts
}

async fn fail_message(
    ctx: &PipelineContext,
    event: &MessageEvent,
    reason: &str,
    attempts_made: u32,
    metric_reason: &'static str,
) {
    ctx.dlq.send_to_dlq(event.clone(), reason, attempts_made).await;
    ctx.metrics.record_dead_letter(metric_reason);
    ctx.status
        .publish(
            StatusUpdate::pipeline(event.message_id, MessageStatus::Failed).with_error(reason),
        )
        .await;
}
