use crate::memory_management::{HeapAllocationPool, MemoryAllocator};
use alloc::sync::Arc;

/// Handle to one root device: identity, topology, and the memory services
/// command containers draw from.
pub struct Device {
    root_device_index: u32,
    sub_device_count: u32,
    instruction_heap_base_address: u64,
    allocator: Arc<dyn MemoryAllocator>,
    heap_pool: HeapAllocationPool,
}

impl Device {
    /// Create a device handle over the given allocator.
    pub fn new(
        root_device_index: u32,
        sub_device_count: u32,
        instruction_heap_base_address: u64,
        allocator: Arc<dyn MemoryAllocator>,
    ) -> Self {
        Self {
            root_device_index,
            sub_device_count,
            instruction_heap_base_address,
            heap_pool: HeapAllocationPool::new(allocator.clone()),
            allocator,
        }
    }

    /// Index of this root device.
    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }

    /// Number of sub-devices exposed by this device.
    pub fn sub_device_count(&self) -> u32 {
        self.sub_device_count
    }

    /// Whether allocations may be touched by several engine contexts at once.
    pub fn multi_os_context_capable(&self) -> bool {
        self.sub_device_count > 1
    }

    /// GPU base address of the internal instruction heap region.
    pub fn instruction_heap_base_address(&self) -> u64 {
        self.instruction_heap_base_address
    }

    /// The allocator backing this device.
    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    /// The heap reuse pool shared by this device's containers.
    pub fn heap_pool(&self) -> &HeapAllocationPool {
        &self.heap_pool
    }
}
