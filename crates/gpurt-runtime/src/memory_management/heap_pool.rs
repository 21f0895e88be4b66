use crate::command::HeapType;
use crate::memory_management::{
    AllocError, AllocationProperties, AllocationType, GraphicsAllocation, MemoryAllocator,
};
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Reuse pool for command-stream and indirect-heap backing allocations.
///
/// Heap growth and container resets hand allocations back here instead of
/// freeing them; later requests of the same category claim them again,
/// avoiding allocate/free churn on the encoding hot path. Shared between
/// containers, so the store is lock protected.
pub struct HeapAllocationPool {
    allocator: Arc<dyn MemoryAllocator>,
    reusable: spin::Mutex<HashMap<AllocationType, Vec<Arc<GraphicsAllocation>>>>,
}

/// Snapshot of what the pool currently holds.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolUsage {
    /// Number of allocations parked for reuse.
    pub parked_allocations: usize,
    /// Total bytes parked for reuse.
    pub parked_bytes: u64,
}

impl core::fmt::Display for PoolUsage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "heap pool: {} allocations parked ({} bytes)",
            self.parked_allocations, self.parked_bytes
        )
    }
}

impl HeapAllocationPool {
    /// Create a pool that falls back to `allocator` on reuse misses.
    pub fn new(allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self {
            allocator,
            reusable: spin::Mutex::new(HashMap::new()),
        }
    }

    /// The underlying allocator used on reuse misses.
    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    /// Obtain backing memory for a heap of the given type.
    ///
    /// Claims the first parked allocation of the matching category whose size
    /// fits, transferring ownership out of the pool; allocates fresh memory
    /// otherwise.
    pub fn get_heap_allocation(
        &self,
        heap_type: HeapType,
        size: u64,
        alignment: u64,
        root_device_index: u32,
    ) -> Result<Arc<GraphicsAllocation>, AllocError> {
        let allocation_type = heap_type.allocation_type();

        if let Some(allocation) = self.claim_reusable(allocation_type, size) {
            log::trace!("heap pool: reusing {allocation:?} for {heap_type:?}");
            return Ok(allocation);
        }

        self.allocator.allocate(&AllocationProperties::new(
            root_device_index,
            size,
            allocation_type,
            alignment,
            false,
            true,
            false,
        ))
    }

    /// Park an allocation for a future [`Self::get_heap_allocation`] call.
    pub fn store_heap_allocation(&self, allocation: Arc<GraphicsAllocation>) {
        let mut reusable = self.reusable.lock();
        reusable
            .entry(allocation.allocation_type())
            .or_default()
            .push(allocation);
    }

    /// What the pool currently holds.
    pub fn usage(&self) -> PoolUsage {
        let reusable = self.reusable.lock();
        let parked: Vec<&Arc<GraphicsAllocation>> = reusable.values().flatten().collect();
        PoolUsage::new(
            parked.len(),
            parked.iter().map(|allocation| allocation.size()).sum(),
        )
    }

    fn claim_reusable(
        &self,
        allocation_type: AllocationType,
        size: u64,
    ) -> Option<Arc<GraphicsAllocation>> {
        let mut reusable = self.reusable.lock();
        let parked = reusable.get_mut(&allocation_type)?;
        let position = parked
            .iter()
            .position(|allocation| allocation.size() >= size)?;
        Some(parked.swap_remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_management::BytesAllocator;

    fn pool() -> HeapAllocationPool {
        HeapAllocationPool::new(Arc::new(BytesAllocator::new()))
    }

    #[test]
    fn stored_allocation_is_reused() {
        let pool = pool();
        let allocation = pool
            .get_heap_allocation(HeapType::SurfaceState, 4096, 4096, 0)
            .unwrap();
        let id = allocation.id();

        pool.store_heap_allocation(allocation);
        let reused = pool
            .get_heap_allocation(HeapType::DynamicState, 1024, 4096, 0)
            .unwrap();

        assert_eq!(reused.id(), id);
        assert_eq!(pool.usage().parked_allocations, 0);
    }

    #[test]
    fn undersized_parked_allocation_is_not_reused() {
        let pool = pool();
        let small = pool
            .get_heap_allocation(HeapType::SurfaceState, 1024, 4096, 0)
            .unwrap();
        let id = small.id();
        pool.store_heap_allocation(small);

        let fresh = pool
            .get_heap_allocation(HeapType::SurfaceState, 8192, 4096, 0)
            .unwrap();
        assert_ne!(fresh.id(), id);
        assert_eq!(pool.usage().parked_allocations, 1);
    }

    #[test]
    fn allocation_type_classes_do_not_mix() {
        let pool = pool();
        // Indirect-object heaps live in a different placement class than the
        // state heaps, so a parked state heap must not satisfy them.
        let state_heap = pool
            .get_heap_allocation(HeapType::SurfaceState, 4096, 4096, 0)
            .unwrap();
        let id = state_heap.id();
        pool.store_heap_allocation(state_heap);

        let instruction_heap = pool
            .get_heap_allocation(HeapType::IndirectObject, 4096, 4096, 0)
            .unwrap();
        assert_ne!(instruction_heap.id(), id);
        assert_eq!(
            instruction_heap.allocation_type(),
            AllocationType::InternalHeap
        );
    }

    #[test]
    fn usage_reports_parked_bytes() {
        let pool = pool();
        let allocation = pool
            .get_heap_allocation(HeapType::DynamicState, 4096, 4096, 0)
            .unwrap();
        pool.store_heap_allocation(allocation);

        let usage = pool.usage();
        assert_eq!(usage.parked_allocations, 1);
        assert_eq!(usage.parked_bytes, 4096);
    }
}
