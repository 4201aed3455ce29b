use std::collections::HashMap;

use serde::Deserialize;

/// Top-level pipeline configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub dedup: DedupConfig,
    pub resolver: ResolverConfig,
    pub adapters: AdapterConfig,
    pub retry: RetryConfig,
    pub dead_letter: DeadLetterConfig,
    pub rate_limit: RateLimitConfig,
}

/// HTTP acceptance surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Event dispatcher: partition count and worker pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Partitions per topic; one worker task per partition.
    pub partitions: usize,
    /// Pause before re-reading an un-acked record after a routing failure.
    pub redeliver_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Marker TTL; must exceed the longest expected redelivery window.
    pub ttl_secs: u64,
}

/// Identity resolver HTTP client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Total attempts per lookup, distinguishing "not found" (final)
    /// from "resolver unavailable" (retried).
    pub attempts: u32,
    pub retry_pause_ms: u64,
}

/// Channel adapter clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub send_timeout_ms: u64,
    /// Connector base URL per channel, e.g. `whatsapp = "http://wa:9001"`.
    /// Channels without an endpoint get the scripted mock adapter.
    pub endpoints: HashMap<String, String>,
    /// Delay before the mock adapter reports a delivery receipt.
    pub mock_receipt_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Durable spool file used when the dead-letter topic is unreachable.
    pub spool_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_subject_limit: u64,
    pub global_limit: u64,
    /// Extra headroom applied to the global window.
    pub burst_allowance: u64,
    pub window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            redeliver_pause_ms: 1_000,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_secs: 21_600 }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9100".to_string(),
            timeout_ms: 10_000,
            attempts: 2,
            retry_pause_ms: 300,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
            endpoints: HashMap::new(),
            mock_receipt_delay_ms: 2_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            spool_path: "dead-letter.spool".to_string(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_subject_limit: 100,
            global_limit: 1_000,
            burst_allowance: 200,
            window_secs: 60,
        }
    }
}
