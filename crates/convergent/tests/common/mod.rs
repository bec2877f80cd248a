//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared counter standing in for a value rendered on the page
#[derive(Debug, Clone, Default)]
pub struct Shared(Arc<AtomicI64>);

impl Shared {
    pub fn new(value: i64) -> Self {
        Self(Arc::new(AtomicI64::new(value)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn bump(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store `value` once `delay` has elapsed on the (paused) clock
    pub fn set_after(&self, delay: Duration, value: i64) {
        let shared = self.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.set(value);
        });
    }
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
