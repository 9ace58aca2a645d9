// ============================================================================
// Shared Test Utilities
// ============================================================================
//
// Transport fakes and queue constructors used across the integration tests.
// Included via `mod test_utils;` from each test file.
//
// ============================================================================

#![allow(dead_code)]

use async_trait::async_trait;
use chat_relay::error::{AppError, AppResult};
use chat_relay::message::Envelope;
use chat_relay::queue::InMemoryQueue;
use chat_relay::transport::OutboundTransport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Transport that fails the first `failures` calls, then delivers.
/// Delivered envelopes are recorded for assertions.
pub struct FlakyTransport {
    failures: AtomicU32,
    pub delivered: Mutex<Vec<Envelope>>,
}

impl FlakyTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundTransport for FlakyTransport {
    async fn send_to_client(&self, envelope: &Envelope) -> AppResult<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::transport("simulated push failure"));
        }
        self.delivered.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Transport that always fails.
pub struct FailingTransport;

#[async_trait]
impl OutboundTransport for FailingTransport {
    async fn send_to_client(&self, _envelope: &Envelope) -> AppResult<()> {
        Err(AppError::transport("simulated push failure"))
    }
}

/// In-memory queue with the default delivery policy: three attempts,
/// a 30 second lease and no retry backoff (failed entries are visible
/// again immediately, which keeps the tests single-pass).
pub fn test_queue() -> InMemoryQueue {
    InMemoryQueue::new(3, Duration::from_secs(30), Duration::ZERO)
}

pub fn test_logging_config() -> chat_relay::config::LoggingConfig {
    chat_relay::config::LoggingConfig {
        enable_user_identifiers: true,
        hash_salt: "test-salt".to_string(),
    }
}
