// Cooperative cancellation for a running sync

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked before each file is extracted.
///
/// Cloning shares the flag, so a Ctrl-C handler can hold one clone while the sync holds another.
#[derive(Debug, Clone, Default)]
pub struct SyncCancellation {
    cancelled: Arc<AtomicBool>,
}

impl SyncCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
