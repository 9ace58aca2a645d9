use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port for the HTTP surface (ingress + health + metrics)
const DEFAULT_PORT: u16 = 8080;

// Default delivery retry policy
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

// Default egress worker settings
const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

// Default outbound transport HTTP timeout
const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 10;

/// Maximum accepted message body size. Larger payloads (media) belong on a
/// CDN, not in the relay.
pub const MAX_MESSAGE_BODY_SIZE: usize = 64 * 1024; // 64 KB

// ============================================================================
// Configuration Structures
// ============================================================================

/// Delivery queue backend selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process queue with lease semantics. Single-instance deployments
    /// and tests.
    Memory,
    /// Redis-backed durable queue. Required when egress workers run as
    /// separate processes.
    Redis,
}

/// Delivery queue configuration.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis connection URL (only used with the Redis backend)
    pub redis_url: String,
    /// Prefix for all queue keys in Redis: "{prefix}pending", "{prefix}dead", ...
    pub key_prefix: String,
    /// Delivery attempts before an entry is dead-lettered
    pub max_delivery_attempts: u32,
    /// Lease window during which one worker exclusively owns an entry (seconds)
    pub visibility_timeout_secs: u64,
    /// Delay before a failed entry becomes visible again (milliseconds)
    pub retry_backoff_ms: u64,
}

/// Egress worker configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Number of concurrent egress workers
    pub count: usize,
    /// Maximum entries claimed per dequeue
    pub batch_size: usize,
    /// Idle sleep between polls when the queue is empty (milliseconds)
    pub poll_interval_ms: u64,
}

/// Outbound transport configuration.
///
/// When `graphql_url` is set, deliveries go out as `sendMessageToClient`
/// mutations over HTTP; otherwise the in-process subscription registry
/// handles fan-out directly.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub graphql_url: Option<String>,
    pub graphql_api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Logging privacy configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Log raw user identifiers instead of salted hashes
    pub enable_user_identifiers: bool,
    /// Salt for identifier hashing in logs
    pub hash_salt: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            queue: QueueConfig {
                backend: match std::env::var("QUEUE_BACKEND")
                    .unwrap_or_else(|_| "memory".to_string())
                    .to_lowercase()
                    .as_str()
                {
                    "redis" => QueueBackend::Redis,
                    "memory" => QueueBackend::Memory,
                    other => anyhow::bail!("Unknown QUEUE_BACKEND: {}", other),
                },
                redis_url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                    .unwrap_or_else(|_| "relay:".to_string()),
                max_delivery_attempts: std::env::var("MAX_DELIVERY_ATTEMPTS")
                    .ok()
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(DEFAULT_MAX_DELIVERY_ATTEMPTS),
                visibility_timeout_secs: std::env::var("VISIBILITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECS),
                retry_backoff_ms: std::env::var("RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            },
            worker: WorkerConfig {
                count: std::env::var("WORKER_COUNT")
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(DEFAULT_WORKER_COUNT),
                batch_size: std::env::var("WORKER_BATCH_SIZE")
                    .ok()
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(DEFAULT_BATCH_SIZE),
                poll_interval_ms: std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            },
            transport: TransportConfig {
                graphql_url: std::env::var("GRAPHQL_URL").ok(),
                graphql_api_key: std::env::var("GRAPHQL_API_KEY").ok(),
                timeout_secs: std::env::var("TRANSPORT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_SECS),
            },
            logging: LoggingConfig {
                enable_user_identifiers: std::env::var("LOG_USER_IDENTIFIERS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                hash_salt: {
                    let salt = std::env::var("LOG_HASH_SALT")
                        .unwrap_or_else(|_| "default-salt-please-change".to_string());
                    if salt == "default-salt-please-change" {
                        tracing::warn!(
                            "LOG_HASH_SALT is unset; identifier hashes in logs are guessable"
                        );
                    }
                    salt
                },
            },
        })
    }
}
