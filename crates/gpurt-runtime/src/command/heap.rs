use crate::command::{LinearStream, StreamSpace};
use crate::memory_management::{AllocationType, GraphicsAllocation};
use alloc::sync::Arc;

/// The fixed set of indirect heap kinds a command list carries.
///
/// Encoding code indexes container heaps by these; the set is a stable
/// contract with that layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Dynamic-state heap (sampler and interface descriptors).
    DynamicState,
    /// Indirect-object heap (kernel instructions and per-dispatch payloads).
    IndirectObject,
    /// Surface-state heap (surface descriptors).
    SurfaceState,
}

impl HeapType {
    /// Number of heap kinds.
    pub const COUNT: usize = 3;

    /// Every heap kind, in container index order.
    pub fn all() -> [HeapType; Self::COUNT] {
        [
            HeapType::DynamicState,
            HeapType::IndirectObject,
            HeapType::SurfaceState,
        ]
    }

    /// The allocation category backing this heap kind.
    ///
    /// The indirect-object heap holds instructions and gets the internal-heap
    /// placement policy; the state heaps are plain linear streams.
    pub fn allocation_type(self) -> AllocationType {
        match self {
            HeapType::IndirectObject => AllocationType::InternalHeap,
            _ => AllocationType::LinearStream,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A typed indirect heap: a stream of auxiliary per-dispatch state referenced
/// indirectly by the primary command buffer.
pub struct IndirectHeap {
    stream: LinearStream,
}

impl IndirectHeap {
    /// Create a heap at the base of `allocation`.
    pub fn new(allocation: Arc<GraphicsAllocation>) -> Self {
        Self {
            stream: LinearStream::new(allocation),
        }
    }

    /// The backing allocation.
    pub fn graphics_allocation(&self) -> &Arc<GraphicsAllocation> {
        self.stream.graphics_allocation()
    }

    /// GPU base address encoding code programs into state base-address
    /// commands.
    pub fn heap_gpu_base(&self) -> u64 {
        self.stream.graphics_allocation().gpu_address()
    }

    /// Bytes consumed so far.
    pub fn used(&self) -> u64 {
        self.stream.used()
    }

    /// Bytes left before the heap is full.
    pub fn available_space(&self) -> u64 {
        self.stream.available_space()
    }

    /// Total capacity of the backing allocation.
    pub fn max_available_space(&self) -> u64 {
        self.stream.max_available_space()
    }

    /// Claim `size` bytes at the cursor.
    pub fn get_space(&mut self, size: u64) -> StreamSpace {
        self.stream.get_space(size)
    }

    /// Advance the cursor to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: u64) {
        self.stream.align(alignment);
    }

    /// Rewind the cursor to the heap base.
    pub fn rewind(&mut self) {
        self.stream.rewind();
    }

    pub(crate) fn replace_allocation(
        &mut self,
        allocation: Arc<GraphicsAllocation>,
    ) -> Arc<GraphicsAllocation> {
        self.stream.replace_allocation(allocation)
    }

    pub(crate) fn into_allocation(self) -> Arc<GraphicsAllocation> {
        self.stream.graphics_allocation().clone()
    }
}
