use crate::memory_management::GraphicsAllocation;
use alloc::sync::Arc;
use bytemuck::NoUninit;

/// Write cursor over a command-buffer allocation.
///
/// Space accounting never fails; callers check available space (or go
/// through the container's growth path) before consuming it.
pub struct LinearStream {
    allocation: Arc<GraphicsAllocation>,
    used: u64,
}

/// A claimed range of a stream, ready to be written.
pub struct StreamSpace {
    /// CPU pointer to the start of the range; null if the allocation is not
    /// CPU mapped.
    pub cpu_ptr: *mut u8,
    /// GPU virtual address of the start of the range.
    pub gpu_address: u64,
    /// Offset of the range from the allocation base.
    pub offset: u64,
}

impl LinearStream {
    /// Create a stream at the base of `allocation`.
    pub fn new(allocation: Arc<GraphicsAllocation>) -> Self {
        Self {
            allocation,
            used: 0,
        }
    }

    /// The backing allocation.
    pub fn graphics_allocation(&self) -> &Arc<GraphicsAllocation> {
        &self.allocation
    }

    /// Bytes consumed so far.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Bytes left before the stream is full.
    pub fn available_space(&self) -> u64 {
        self.allocation.size() - self.used
    }

    /// Total capacity of the backing allocation.
    pub fn max_available_space(&self) -> u64 {
        self.allocation.size()
    }

    /// Claim `size` bytes at the cursor.
    pub fn get_space(&mut self, size: u64) -> StreamSpace {
        debug_assert!(size <= self.available_space());
        let offset = self.used;
        self.used += size;
        let cpu_ptr = self.allocation.cpu_ptr();
        StreamSpace {
            cpu_ptr: if cpu_ptr.is_null() {
                cpu_ptr
            } else {
                unsafe { cpu_ptr.add(offset as usize) }
            },
            gpu_address: self.allocation.gpu_address() + offset,
            offset,
        }
    }

    /// Advance the cursor to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: u64) {
        debug_assert!(alignment > 0);
        let aligned = self.used.next_multiple_of(alignment);
        debug_assert!(aligned <= self.max_available_space());
        self.used = aligned;
    }

    /// Copy `value` into the stream, returning the GPU address it landed at.
    pub fn write<T: NoUninit>(&mut self, value: T) -> u64 {
        let bytes = bytemuck::bytes_of(&value);
        let space = self.get_space(bytes.len() as u64);
        debug_assert!(!space.cpu_ptr.is_null());
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), space.cpu_ptr, bytes.len());
        }
        space.gpu_address
    }

    /// Point the stream at a new allocation, returning the old one with the
    /// cursor rewound.
    pub fn replace_allocation(
        &mut self,
        allocation: Arc<GraphicsAllocation>,
    ) -> Arc<GraphicsAllocation> {
        self.used = 0;
        core::mem::replace(&mut self.allocation, allocation)
    }

    /// Rewind the cursor to the allocation base.
    pub fn rewind(&mut self) {
        self.used = 0;
    }
}
