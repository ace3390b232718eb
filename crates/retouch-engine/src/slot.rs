use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot gate that keeps at most one edit in flight.
#[derive(Debug, Clone, Default)]
pub struct EditSlot {
    busy: Arc<AtomicBool>,
}

impl EditSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another guard is alive.
    pub fn try_acquire(&self) -> Option<EditSlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EditSlotGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct EditSlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for EditSlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
