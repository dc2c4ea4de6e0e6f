use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

use super::ActivityLedger;

/// Atomic sent/received counters, bumped by whoever moves application
/// messages for this process.
#[derive(Debug, Default)]
pub struct CallCounter {
    sent: AtomicU64,
    received: AtomicU64,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send(&self) {
        self.sent.fetch_add(1, SeqCst);
    }

    pub fn record_receive(&self) {
        self.received.fetch_add(1, SeqCst);
    }
}

impl ActivityLedger for CallCounter {
    fn calls_sent(&self) -> u64 {
        self.sent.load(SeqCst)
    }

    fn calls_received(&self) -> u64 {
        self.received.load(SeqCst)
    }
}
