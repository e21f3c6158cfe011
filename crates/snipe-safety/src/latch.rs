//! Emergency stop latch.
//!
//! Once triggered, the latch stays triggered until explicitly reset by
//! re-initialization. Auto-reset is prohibited: the engine must be
//! re-initialized by the operator after the cause is resolved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{error, info, warn};

/// Emergency stop latch. Thread-safe via `Arc<EmergencyLatch>`.
pub struct EmergencyLatch {
    triggered: AtomicBool,
    /// Unix milliseconds of the trigger; 0 when not triggered.
    triggered_at: AtomicU64,
    reason: RwLock<Option<String>>,
}

impl Default for EmergencyLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EmergencyLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            triggered_at: AtomicU64::new(0),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Trigger the latch. Idempotent: a second trigger keeps the original
    /// reason and timestamp.
    pub fn trigger(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            self.triggered_at.store(now, Ordering::SeqCst);
            *self.reason.write() = Some(reason.clone());
            error!(%reason, "EMERGENCY STOP TRIGGERED");
        } else {
            warn!(new_reason = %reason, "emergency latch already triggered, keeping original reason");
        }
    }

    /// Trigger reason, if triggered.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        if self.is_triggered() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    /// Unix-millisecond timestamp of the trigger, if triggered.
    #[must_use]
    pub fn triggered_at(&self) -> Option<u64> {
        if self.is_triggered() {
            let ts = self.triggered_at.load(Ordering::SeqCst);
            if ts > 0 {
                return Some(ts);
            }
        }
        None
    }

    /// Reset the latch. Only the re-initialization path calls this.
    pub fn reset(&self) {
        if self.is_triggered() {
            let previous = self.reason.read().clone();
            info!(previous_reason = ?previous, "emergency latch reset");
            self.triggered.store(false, Ordering::SeqCst);
            self.triggered_at.store(0, Ordering::SeqCst);
            *self.reason.write() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_idempotent() {
        let latch = EmergencyLatch::new();
        assert!(!latch.is_triggered());

        latch.trigger("first");
        assert!(latch.is_triggered());
        assert_eq!(latch.reason().as_deref(), Some("first"));
        let first_at = latch.triggered_at();

        // Second trigger keeps the original reason and timestamp
        latch.trigger("second");
        assert!(latch.is_triggered());
        assert_eq!(latch.reason().as_deref(), Some("first"));
        assert_eq!(latch.triggered_at(), first_at);
    }

    #[test]
    fn test_reset_clears_state() {
        let latch = EmergencyLatch::new();
        latch.trigger("halt");
        latch.reset();

        assert!(!latch.is_triggered());
        assert!(latch.reason().is_none());
        assert!(latch.triggered_at().is_none());
    }
}
