//! Connectivity and resilience mode
//!
//! A single process-wide operating mode, `Online` or `Offline`, owned by
//! an explicit state object injected into the gateway and orchestrator.
//!
//! The transition is one-directional: once a remote failure has been
//! classified as connectivity-related the session stays `Offline` for the
//! rest of the process. The host's network-presence signal is tracked
//! separately and only gates whether new subscriptions are attempted; it
//! never clears a failure-induced latch.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Online,
    Offline,
}

/// Injected connectivity state
#[derive(Debug)]
pub struct Connectivity {
    offline_latch: AtomicBool,
    network_present: AtomicBool,
}

impl Connectivity {
    /// Start in `Online` mode with network presumed present
    pub fn new() -> Self {
        Self {
            offline_latch: AtomicBool::new(false),
            network_present: AtomicBool::new(true),
        }
    }

    /// Start latched `Offline`, for known-offline environments
    pub fn offline() -> Self {
        Self {
            offline_latch: AtomicBool::new(true),
            network_present: AtomicBool::new(false),
        }
    }

    /// Current operating mode
    pub fn mode(&self) -> SyncMode {
        if self.offline_latch.load(Ordering::Acquire) {
            SyncMode::Offline
        } else {
            SyncMode::Online
        }
    }

    pub fn is_offline(&self) -> bool {
        self.mode() == SyncMode::Offline
    }

    /// Latch the session `Offline`. Idempotent; there is no way back.
    pub fn go_offline(&self, reason: &str) {
        if !self.offline_latch.swap(true, Ordering::AcqRel) {
            tracing::warn!(reason, "Session degraded to offline mode");
        }
    }

    /// Record the host's network-presence signal.
    ///
    /// Presence gates whether subscriptions are attempted; it does not
    /// clear an offline latch.
    pub fn set_network_presence(&self, present: bool) {
        let was = self.network_present.swap(present, Ordering::AcqRel);
        if was != present {
            tracing::info!(present, "Host network presence changed");
        }
    }

    pub fn network_present(&self) -> bool {
        self.network_present.load(Ordering::Acquire)
    }

    /// Whether establishing remote subscriptions should be attempted
    pub fn should_attempt_remote(&self) -> bool {
        !self.is_offline() && self.network_present()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_online() {
        let connectivity = Connectivity::new();
        assert_eq!(connectivity.mode(), SyncMode::Online);
        assert!(connectivity.should_attempt_remote());
    }

    #[test]
    fn test_offline_constructor() {
        let connectivity = Connectivity::offline();
        assert_eq!(connectivity.mode(), SyncMode::Offline);
        assert!(!connectivity.should_attempt_remote());
    }

    #[test]
    fn test_latch_is_one_way() {
        let connectivity = Connectivity::new();
        connectivity.go_offline("remote unreachable");
        connectivity.go_offline("again");
        assert_eq!(connectivity.mode(), SyncMode::Offline);

        // Restored network presence does not clear the latch.
        connectivity.set_network_presence(true);
        assert_eq!(connectivity.mode(), SyncMode::Offline);
        assert!(!connectivity.should_attempt_remote());
    }

    #[test]
    fn test_presence_gates_attempts_without_changing_mode() {
        let connectivity = Connectivity::new();
        connectivity.set_network_presence(false);
        assert_eq!(connectivity.mode(), SyncMode::Online);
        assert!(!connectivity.should_attempt_remote());

        connectivity.set_network_presence(true);
        assert!(connectivity.should_attempt_remote());
    }
}
