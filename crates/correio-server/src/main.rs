mod error;
mod http;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use correio_core::adapter::{AdapterRegistry, ChannelAdapter};
use correio_core::config::PipelineConfig;
use correio_core::pipeline::PipelineContext;
use correio_core::{
    ChannelType, DeadLetterHandler, DedupStore, Dispatcher, EventLog, HttpChannelAdapter,
    HttpIdentityResolver, InMemoryEventLog, InMemoryKvStore, KvStore, LiveNotifier,
    MessageStateStore, Metrics, MockChannelAdapter, RateLimiter, RetryExecutor, RetryPolicy,
    SetupError, StatusConsumer, StatusPublisher,
};

use http::AppState;

fn load_config() -> PipelineConfig {
    let paths = ["correio.toml", "/etc/correio/correio.toml"];

    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        info!(path, "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        eprintln!("error parsing {path}: {e}");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("error reading {path}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("no config file found, using defaults");
    PipelineConfig::default()
}

/// One adapter per channel: an HTTP connector client where an endpoint
/// is configured, the scripted mock with a delayed delivery receipt
/// otherwise.
fn build_adapters(
    config: &PipelineConfig,
    status: &StatusPublisher,
    shutdown: &watch::Receiver<bool>,
) -> Result<AdapterRegistry, SetupError> {
    let mut registry = AdapterRegistry::new();
    for channel in [
        ChannelType::Whatsapp,
        ChannelType::Telegram,
        ChannelType::Instagram,
    ] {
        let adapter: Arc<dyn ChannelAdapter> =
            match config.adapters.endpoints.get(channel.as_str()) {
                Some(endpoint) => {
                    info!(channel = channel.as_str(), endpoint, "using HTTP connector");
                    Arc::new(HttpChannelAdapter::new(channel, endpoint, &config.adapters)?)
                }
                None => {
                    info!(channel = channel.as_str(), "no connector endpoint, using mock adapter");
                    Arc::new(
                        MockChannelAdapter::new(channel).with_delivery_receipt(
                            status.clone(),
                            Duration::from_millis(config.adapters.mock_receipt_delay_ms),
                            shutdown.clone(),
                        ),
                    )
                }
            };
        registry.insert(channel, adapter);
    }
    Ok(registry)
}

/// Startup check only: a channel with bad or unreachable credentials
/// still serves (sends will fail and retry), but the operator hears
/// about it immediately.
async fn validate_adapter_credentials(registry: &AdapterRegistry) {
    for channel in registry.channels() {
        let Some(adapter) = registry.get(channel) else {
            continue;
        };
        match adapter.validate_credentials().await {
            Ok(correio_core::adapter::ValidationResult::Valid) => {
                info!(channel = channel.as_str(), "connector credentials valid");
            }
            Ok(correio_core::adapter::ValidationResult::Invalid(reason)) => {
                tracing::warn!(channel = channel.as_str(), reason, "connector credentials invalid");
            }
            Err(e) => {
                tracing::warn!(channel = channel.as_str(), error = %e, "credential check failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    correio_core::telemetry::init_tracing();

    let config = load_config();
    let listen_addr = config.server.listen_addr.clone();

    let event_log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new(config.dispatch.partitions));
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let state_store = Arc::new(MessageStateStore::new(Arc::clone(&kv)));
    let notifier = Arc::new(LiveNotifier::new());
    let status_publisher = StatusPublisher::new(Arc::clone(&event_log));

    let adapters = build_adapters(&config, &status_publisher, &shutdown_rx)?;
    validate_adapter_credentials(&adapters).await;
    let resolver = Arc::new(HttpIdentityResolver::new(&config.resolver)?);

    let ctx = Arc::new(PipelineContext {
        dedup: DedupStore::new(
            Arc::clone(&kv),
            Duration::from_secs(config.dedup.ttl_secs),
        ),
        resolver,
        adapters,
        retry: RetryExecutor::new(RetryPolicy::from_config(&config.retry)),
        dlq: DeadLetterHandler::new(
            Arc::clone(&event_log),
            config.dead_letter.spool_path.clone(),
        ),
        status: status_publisher,
        state: Arc::clone(&state_store),
        metrics: Arc::clone(&metrics),
    });

    let dispatcher = Dispatcher::start(Arc::clone(&event_log), ctx, &config.dispatch).await?;
    let status_consumer = StatusConsumer::start(
        Arc::clone(&event_log),
        state_store,
        Arc::clone(&notifier),
        metrics,
    )
    .await?;

    let app_state = AppState {
        log: event_log,
        limiter: Arc::new(RateLimiter::new(kv, config.rate_limit.clone())),
        notifier,
    };

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(%listen_addr, "starting HTTP server");

    axum::serve(listener, http::router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down pipeline");
    let _ = shutdown_tx.send(true);
    dispatcher.shutdown().await;
    status_consumer.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to install CTRL+C handler");
    }

    info!("received shutdown signal");
}
