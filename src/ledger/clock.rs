//! Adjusted wall clock.
//!
//! Message expiry is measured against the ledger's notion of time, which can
//! drift from the local system clock. The offset is applied to every reading.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// System clock with a settable offset in milliseconds.
#[derive(Debug, Default)]
pub struct Clock {
    offset_ms: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock already shifted by `offset_ms`.
    pub fn with_offset(offset_ms: i64) -> Self {
        Self {
            offset_ms: AtomicI64::new(offset_ms),
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    pub fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
    }

    /// Adjusted current time in unix milliseconds.
    pub fn now_ms(&self) -> u64 {
        let system_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        system_ms.saturating_add(self.offset_ms()).max(0) as u64
    }

    /// Adjusted current time in unix seconds.
    pub fn now_sec(&self) -> u32 {
        (self.now_ms() / 1000) as u32
    }
}
