use crate::memory_management::{
    AllocError, AllocationProperties, GraphicsAllocation, HostBacking, MemoryAllocator, PAGE_SIZE,
};
use alloc::alloc::{alloc, alloc_zeroed, Layout};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// A [`MemoryAllocator`] backed by host heap memory.
///
/// GPU virtual addresses are simulated by a bump counter so that address
/// arithmetic (tag striding, heap base programming) behaves like a real
/// backend. Intended for tests and CPU-only bring-up.
pub struct BytesAllocator {
    next_gpu_address: AtomicU64,
}

impl BytesAllocator {
    /// Simulated base of the GPU virtual address space.
    const GPU_ADDRESS_BASE: u64 = 0x1000_0000;

    /// Create an allocator with an empty simulated address space.
    pub fn new() -> Self {
        Self {
            next_gpu_address: AtomicU64::new(Self::GPU_ADDRESS_BASE),
        }
    }

    fn assign_gpu_address(&self, size: u64, alignment: u64) -> u64 {
        // Reserve whole pages so neighbouring allocations never share one.
        let span = size.next_multiple_of(PAGE_SIZE).max(alignment);
        self.next_gpu_address.fetch_add(span, Ordering::Relaxed)
    }
}

impl Default for BytesAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAllocator for BytesAllocator {
    fn allocate(
        &self,
        properties: &AllocationProperties,
    ) -> Result<Arc<GraphicsAllocation>, AllocError> {
        let alignment = properties.alignment.max(1);
        if properties.size == 0 {
            return Err(AllocError::UnsupportedLayout {
                size: 0,
                alignment,
            });
        }
        let gpu_address = self.assign_gpu_address(properties.size, alignment);

        if !properties.allocate_memory {
            return Ok(Arc::new(GraphicsAllocation::new(
                properties.allocation_type,
                properties.root_device_index,
                gpu_address,
                core::ptr::null_mut(),
                properties.size,
            )));
        }

        let layout = Layout::from_size_align(properties.size as usize, alignment as usize)
            .map_err(|_| AllocError::UnsupportedLayout {
                size: properties.size,
                alignment,
            })?;

        let ptr = unsafe {
            if properties.zero_memory {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        if ptr.is_null() {
            return Err(AllocError::OutOfDeviceMemory {
                size: properties.size,
                allocation_type: properties.allocation_type,
            });
        }

        log::trace!(
            "bytes allocator: {:?} {} bytes at {gpu_address:#x}",
            properties.allocation_type,
            properties.size
        );

        let backing = unsafe { HostBacking::from_raw_parts(ptr, layout) };
        Ok(Arc::new(GraphicsAllocation::with_host_backing(
            properties.allocation_type,
            properties.root_device_index,
            gpu_address,
            properties.size,
            backing,
        )))
    }

    fn free(&self, allocation: Arc<GraphicsAllocation>) {
        log::trace!("bytes allocator: free {allocation:?}");
        drop(allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_management::AllocationType;

    fn properties(size: u64, alignment: u64) -> AllocationProperties {
        AllocationProperties::new(
            0,
            size,
            AllocationType::LinearStream,
            alignment,
            false,
            true,
            true,
        )
    }

    #[test]
    fn allocations_get_distinct_gpu_addresses() {
        let allocator = BytesAllocator::new();
        let first = allocator.allocate(&properties(64, 64)).unwrap();
        let second = allocator.allocate(&properties(64, 64)).unwrap();
        assert_ne!(first.gpu_address(), second.gpu_address());
    }

    #[test]
    fn zeroed_allocation_is_cpu_visible_and_zero() {
        let allocator = BytesAllocator::new();
        let allocation = allocator.allocate(&properties(256, 64)).unwrap();
        let ptr = allocation.cpu_ptr();
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 64, 0);
        let bytes = unsafe { core::slice::from_raw_parts(ptr, 256) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn unbacked_allocation_has_null_cpu_ptr() {
        let allocator = BytesAllocator::new();
        let mut props = properties(128, 64);
        props.allocate_memory = false;
        let allocation = allocator.allocate(&props).unwrap();
        assert!(allocation.cpu_ptr().is_null());
        assert_eq!(allocation.size(), 128);
    }
}
