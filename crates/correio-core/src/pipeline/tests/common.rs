#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, MockChannelAdapter};
use crate::config::DispatchConfig;
use crate::dedup::DedupStore;
use crate::dlq::DeadLetterHandler;
use crate::error::ResolveError;
use crate::identity::IdentityResolver;
use crate::log::{topics, EventLog, InMemoryEventLog};
use crate::message::{
    ChannelType, ContentType, DeadLetterEvent, ExternalIdentity, MessageEvent, MessageStatus,
    StatusUpdate,
};
use crate::metrics::Metrics;
use crate::notifier::LiveNotifier;
use crate::pipeline::{Dispatcher, DispatcherHandle, PipelineContext};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::status::{StatusConsumer, StatusConsumerHandle, StatusPublisher};
use crate::store::{InMemoryKvStore, KvStore, MessageStateStore};

/// Scripted identity directory for routing tests.
pub(super) struct StaticResolver {
    identities: Mutex<HashMap<Uuid, Vec<ExternalIdentity>>>,
    unavailable: AtomicBool,
    calls: AtomicU32,
}

impl StaticResolver {
    pub(super) fn new() -> Self {
        Self {
            identities: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub(super) fn link(&self, user_id: Uuid, identities: Vec<ExternalIdentity>) {
        self.identities.lock().unwrap().insert(user_id, identities);
    }

    pub(super) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, user_id: &Uuid) -> Result<Vec<ExternalIdentity>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResolveError::Unavailable("directory down".to_string()));
        }
        match self.identities.lock().unwrap().get(user_id) {
            Some(identities) => Ok(identities.clone()),
            None => Err(ResolveError::NotFound(user_id.to_string())),
        }
    }
}

pub(super) fn identity(platform: ChannelType, id: &str) -> ExternalIdentity {
    ExternalIdentity {
        platform,
        platform_user_id: id.to_string(),
        verified: true,
    }
}

/// A fully wired in-process pipeline over in-memory infrastructure.
pub(super) struct TestPipeline {
    pub log: Arc<InMemoryEventLog>,
    pub state: Arc<MessageStateStore>,
    pub notifier: Arc<LiveNotifier>,
    pub whatsapp: Arc<MockChannelAdapter>,
    pub telegram: Arc<MockChannelAdapter>,
    pub resolver: Arc<StaticResolver>,
    dispatcher: DispatcherHandle,
    status: StatusConsumerHandle,
    _spool_dir: tempfile::TempDir,
}

impl TestPipeline {
    pub(super) async fn start() -> Self {
        Self::start_with_dedup_kv(Arc::new(InMemoryKvStore::new())).await
    }

    /// Wire the dedup store over a caller-provided KV store (used to
    /// inject faults); everything else stays on healthy in-memory state.
    pub(super) async fn start_with_dedup_kv(dedup_kv: Arc<dyn KvStore>) -> Self {
        let log = Arc::new(InMemoryEventLog::new(4));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let state = Arc::new(MessageStateStore::new(kv));
        let notifier = Arc::new(LiveNotifier::new());
        let metrics = Arc::new(Metrics::new());
        let resolver = Arc::new(StaticResolver::new());
        let spool_dir = tempfile::tempdir().unwrap();

        let whatsapp = Arc::new(MockChannelAdapter::new(ChannelType::Whatsapp));
        let telegram = Arc::new(MockChannelAdapter::new(ChannelType::Telegram));
        let mut adapters = AdapterRegistry::new();
        adapters.insert(ChannelType::Whatsapp, whatsapp.clone());
        adapters.insert(ChannelType::Telegram, telegram.clone());

        // Millisecond backoff keeps exhaustion tests fast without
        // changing the attempt accounting.
        let retry = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(50),
        });

        let ctx = Arc::new(PipelineContext {
            dedup: DedupStore::new(dedup_kv, Duration::from_secs(3600)),
            resolver: resolver.clone(),
            adapters,
            retry,
            dlq: DeadLetterHandler::new(log.clone(), spool_dir.path().join("spool")),
            status: StatusPublisher::new(log.clone()),
            state: state.clone(),
            metrics: metrics.clone(),
        });

        let dispatch_config = DispatchConfig {
            partitions: 4,
            redeliver_pause_ms: 50,
        };
        let dispatcher = Dispatcher::start(log.clone(), ctx, &dispatch_config)
            .await
            .unwrap();
        let status = StatusConsumer::start(log.clone(), state.clone(), notifier.clone(), metrics)
            .await
            .unwrap();

        Self {
            log,
            state,
            notifier,
            whatsapp,
            telegram,
            resolver,
            dispatcher,
            status,
            _spool_dir: spool_dir,
        }
    }

    pub(super) async fn publish(&self, event: &MessageEvent) {
        self.log
            .publish(
                topics::MESSAGES,
                &event.conversation_id,
                serde_json::to_vec(event).unwrap(),
            )
            .await
            .unwrap();
    }

    pub(super) fn dead_letters(&self) -> Vec<DeadLetterEvent> {
        self.log
            .records(topics::DEAD_LETTER)
            .iter()
            .map(|r| serde_json::from_slice(&r.payload).unwrap())
            .collect()
    }

    pub(super) fn status_updates(&self) -> Vec<StatusUpdate> {
        self.log
            .records(topics::STATUS)
            .iter()
            .map(|r| serde_json::from_slice(&r.payload).unwrap())
            .collect()
    }

    pub(super) async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        self.status.shutdown().await;
    }
}

pub(super) fn test_event(conversation: &str, recipients: &[&str]) -> MessageEvent {
    MessageEvent {
        message_id: MessageEvent::new_id(),
        conversation_id: conversation.to_string(),
        sender_id: "alice".to_string(),
        recipient_ids: recipients.iter().map(|r| r.to_string()).collect(),
        channel: ChannelType::Whatsapp,
        content: "hello".to_string(),
        content_type: ContentType::Text,
        status: MessageStatus::Pending,
        timestamp: 1_700_000_000_000,
        metadata: HashMap::new(),
    }
}

/// Poll `condition` until it holds or a generous deadline passes.
pub(super) async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}

/// Poll an async `condition` until it holds or a generous deadline passes.
pub(super) async fn wait_until_async<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {description}");
}

/// Settle window for asserting that something did NOT happen.
pub(super) async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// The partition a key hashes to, mirroring the in-memory log's routing.
/// Lets tests pick conversation ids that provably share (or avoid) a
/// partition.
pub(super) fn partition_of(key: &str, partitions: usize) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % partitions
}
