use crate::memory_management::{ResidencyData, MAX_OS_CONTEXT_COUNT};
use alloc::alloc::{dealloc, Layout};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

crate::unique_id_type!(AllocationId);

/// Sentinel task count of an allocation that was never used on a context.
pub const TASK_COUNT_NOT_READY: u32 = u32::MAX;

/// Category of a GPU-visible allocation.
///
/// The kernel-mode driver applies different placement and caching policies
/// per category, so the category must be decided at allocation time.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum AllocationType {
    /// Primary command-buffer memory consumed by the command processor.
    CommandBuffer,
    /// Instruction / indirect-object heap memory.
    InternalHeap,
    /// Generic linear-stream memory (dynamic-state and surface-state heaps).
    LinearStream,
    /// Bulk storage for GPU-written completion tags.
    TagBuffer,
}

/// Request descriptor passed to a [`MemoryAllocator`].
#[derive(new, Clone, Debug)]
pub struct AllocationProperties {
    /// Index of the root device the allocation belongs to.
    pub root_device_index: u32,
    /// Requested size in bytes.
    pub size: u64,
    /// Category of the allocation.
    pub allocation_type: AllocationType,
    /// Required alignment of the GPU virtual address, in bytes.
    pub alignment: u64,
    /// Whether the allocation may be referenced from several engine contexts.
    pub multi_os_context_capable: bool,
    /// Whether to back the allocation with memory now.
    pub allocate_memory: bool,
    /// Whether the backing memory must be zero-initialized.
    pub zero_memory: bool,
}

/// Error returned when the external allocator cannot satisfy a request.
///
/// Memory budgets are validated by the layers above, so callers typically
/// propagate this error upward rather than retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The allocator could not provide backing memory of the requested size.
    #[error("out of device memory: failed to allocate {size} bytes for {allocation_type:?}")]
    OutOfDeviceMemory {
        /// Requested size in bytes.
        size: u64,
        /// Category that was requested.
        allocation_type: AllocationType,
    },

    /// The requested size or alignment cannot be represented on this host.
    #[error("allocation of {size} bytes with alignment {alignment} is not supported")]
    UnsupportedLayout {
        /// Requested size in bytes.
        size: u64,
        /// Requested alignment in bytes.
        alignment: u64,
    },
}

/// Allocator of GPU-visible memory.
///
/// Implementations wrap whatever the kernel-mode driver offers; the core only
/// relies on the returned [`GraphicsAllocation`] attributes. Calls are
/// synchronous.
pub trait MemoryAllocator: Send + Sync {
    /// Allocate a new GPU-visible memory region.
    fn allocate(
        &self,
        properties: &AllocationProperties,
    ) -> Result<Arc<GraphicsAllocation>, AllocError>;

    /// Return an allocation to the allocator.
    ///
    /// The backing memory is reclaimed once the last reference drops; this
    /// call is the explicit hand-back for allocator-side bookkeeping.
    fn free(&self, allocation: Arc<GraphicsAllocation>);
}

/// Host-heap memory owned by an allocation and freed when it drops.
pub struct HostBacking {
    ptr: *mut u8,
    layout: Layout,
}

impl HostBacking {
    /// Take ownership of host memory previously allocated with `layout`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been obtained from the global allocator with exactly
    /// `layout`, and must not be freed elsewhere.
    pub unsafe fn from_raw_parts(ptr: *mut u8, layout: Layout) -> Self {
        Self { ptr, layout }
    }
}

impl Drop for HostBacking {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// A GPU-visible memory region.
///
/// Shared via [`Arc`]; the component that requested the allocation owns it
/// exclusively for mutation purposes, everything else (residency containers,
/// reuse pools) only reads its attributes or its per-context bookkeeping.
pub struct GraphicsAllocation {
    id: AllocationId,
    allocation_type: AllocationType,
    root_device_index: u32,
    gpu_address: u64,
    size: u64,
    cpu_ptr: *mut u8,
    task_counts: [AtomicU32; MAX_OS_CONTEXT_COUNT],
    residency: ResidencyData,
    _backing: Option<HostBacking>,
}

// The CPU pointer aliases GPU-written memory; single-writer discipline is the
// caller's contract (see the residency rules), the bookkeeping is atomic.
unsafe impl Send for GraphicsAllocation {}
unsafe impl Sync for GraphicsAllocation {}

impl GraphicsAllocation {
    /// Create an allocation record without host backing.
    ///
    /// `cpu_ptr` may be null for allocations that are not CPU-mapped.
    pub fn new(
        allocation_type: AllocationType,
        root_device_index: u32,
        gpu_address: u64,
        cpu_ptr: *mut u8,
        size: u64,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            allocation_type,
            root_device_index,
            gpu_address,
            size,
            cpu_ptr,
            task_counts: core::array::from_fn(|_| AtomicU32::new(TASK_COUNT_NOT_READY)),
            residency: ResidencyData::new(),
            _backing: None,
        }
    }

    /// Create an allocation record that owns host backing memory.
    pub fn with_host_backing(
        allocation_type: AllocationType,
        root_device_index: u32,
        gpu_address: u64,
        size: u64,
        backing: HostBacking,
    ) -> Self {
        let cpu_ptr = backing.ptr;
        let mut allocation = Self::new(allocation_type, root_device_index, gpu_address, cpu_ptr, size);
        allocation._backing = Some(backing);
        allocation
    }

    /// Process-unique identity of this allocation.
    pub fn id(&self) -> AllocationId {
        self.id
    }

    /// Category of this allocation.
    pub fn allocation_type(&self) -> AllocationType {
        self.allocation_type
    }

    /// Index of the owning root device.
    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }

    /// Starting GPU virtual address.
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// CPU-mapped pointer, or null if the region is not CPU-visible.
    pub fn cpu_ptr(&self) -> *mut u8 {
        self.cpu_ptr
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Per-context residency and fence bookkeeping.
    pub fn residency(&self) -> &ResidencyData {
        &self.residency
    }

    /// Record the task count of the last submission touching this allocation
    /// on `context_id`.
    pub fn update_task_count(&self, task_count: u32, context_id: u32) {
        self.task_counts[context_index(context_id)].store(task_count, Ordering::Relaxed);
    }

    /// Task count of the last submission on `context_id`, or
    /// [`TASK_COUNT_NOT_READY`] if never used there.
    pub fn task_count(&self, context_id: u32) -> u32 {
        self.task_counts[context_index(context_id)].load(Ordering::Relaxed)
    }

    /// Whether this allocation was ever submitted on `context_id`.
    pub fn is_used_by_context(&self, context_id: u32) -> bool {
        self.task_count(context_id) != TASK_COUNT_NOT_READY
    }

    /// Whether this allocation was ever submitted on any context.
    pub fn is_used_by_any_context(&self) -> bool {
        self.task_counts
            .iter()
            .any(|count| count.load(Ordering::Relaxed) != TASK_COUNT_NOT_READY)
    }
}

impl core::fmt::Debug for GraphicsAllocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphicsAllocation")
            .field("id", &self.id)
            .field("type", &self.allocation_type)
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address))
            .field("size", &self.size)
            .finish()
    }
}

fn context_index(context_id: u32) -> usize {
    let index = context_id as usize;
    debug_assert!(index < MAX_OS_CONTEXT_COUNT);
    index
}
