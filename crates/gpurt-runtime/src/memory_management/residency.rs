use crate::memory_management::MAX_OS_CONTEXT_COUNT;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-engine-context residency and completion bookkeeping of one allocation.
///
/// Each context owns one slot. Writes to a slot must come from a single
/// thread at a time (the thread driving that context's submissions); reads
/// and writes to different slots may run concurrently.
pub struct ResidencyData {
    resident: [AtomicBool; MAX_OS_CONTEXT_COUNT],
    fence_values: [AtomicU64; MAX_OS_CONTEXT_COUNT],
}

impl ResidencyData {
    /// Create bookkeeping with all contexts non-resident at fence zero.
    pub fn new() -> Self {
        Self {
            resident: core::array::from_fn(|_| AtomicBool::new(false)),
            fence_values: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record the most recent fence value observed for `context_id`.
    ///
    /// Fence values are monotonically non-decreasing per context; callers
    /// must not regress them.
    pub fn update_completion_data(&self, fence_value: u64, context_id: u32) {
        let slot = &self.fence_values[context_index(context_id)];
        debug_assert!(
            fence_value >= slot.load(Ordering::Relaxed),
            "fence value regressed on context {context_id}"
        );
        slot.store(fence_value, Ordering::Release);
    }

    /// Last observed fence value for `context_id`.
    pub fn fence_value_for_context(&self, context_id: u32) -> u64 {
        self.fence_values[context_index(context_id)].load(Ordering::Acquire)
    }

    /// Mark the allocation resident or evicted on `context_id`.
    pub fn set_resident(&self, context_id: u32, resident: bool) {
        self.resident[context_index(context_id)].store(resident, Ordering::Relaxed);
    }

    /// Whether the allocation is currently resident on `context_id`.
    pub fn is_resident(&self, context_id: u32) -> bool {
        self.resident[context_index(context_id)].load(Ordering::Relaxed)
    }
}

impl Default for ResidencyData {
    fn default() -> Self {
        Self::new()
    }
}

fn context_index(context_id: u32) -> usize {
    let index = context_id as usize;
    debug_assert!(index < MAX_OS_CONTEXT_COUNT);
    index
}
