//! Shared connectivity state.
//!
//! Online/offline is a mode flag, not a separate code path: the evaluation
//! and append paths are identical either way. The flag stamps the evaluation
//! mode on ledger entries and gates the background worker's flush attempts.

use std::sync::atomic::{AtomicBool, Ordering};

use gatewarden_ledger::EvaluationMode;

/// Process-wide connectivity flag, shared between the access controller and
/// the sync worker.
#[derive(Debug)]
pub struct ConnectivityStatus {
    online: AtomicBool,
}

impl ConnectivityStatus {
    /// Devices start offline until the first successful probe.
    pub fn starting_offline() -> Self {
        Self {
            online: AtomicBool::new(false),
        }
    }

    pub fn starting_online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Mode to stamp on an evaluation happening right now.
    pub fn mode(&self) -> EvaluationMode {
        if self.is_online() {
            EvaluationMode::Online
        } else {
            EvaluationMode::Offline
        }
    }
}
