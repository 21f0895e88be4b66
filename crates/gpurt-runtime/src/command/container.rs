use crate::command::{HeapType, IndirectHeap, LinearStream};
use crate::config::RuntimeConfig;
use crate::device::Device;
use crate::memory_management::{
    AllocError, AllocationProperties, AllocationType, GraphicsAllocation, PAGE_SIZE,
};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Sentinel for a shared-local-memory size that no dispatch has set yet.
pub const SLM_SIZE_NOT_SET: u32 = u32::MAX;

/// Allocations the next submission must make resident.
pub type ResidencyContainer = Vec<Arc<GraphicsAllocation>>;

/// Backing storage and bookkeeping of one encodable command list.
///
/// Owns a growable chain of command-buffer allocations (the last one is
/// live), one indirect heap per [`HeapType`], the residency and deallocation
/// containers for the next submission, and per-heap dirty flags. A container
/// is driven by a single encoding thread; it has no internal locking.
pub struct CommandContainer {
    device: Arc<Device>,
    cmd_buffer_allocations: Vec<Arc<GraphicsAllocation>>,
    command_stream: Option<LinearStream>,
    indirect_heaps: [Option<IndirectHeap>; HeapType::COUNT],
    dirty_heaps: u32,
    residency_container: ResidencyContainer,
    deallocation_container: Vec<Arc<GraphicsAllocation>>,
    slm_size: u32,
    instruction_heap_base_address: u64,
}

impl CommandContainer {
    /// Create an uninitialized container bound to `device`.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            cmd_buffer_allocations: Vec::new(),
            command_stream: None,
            indirect_heaps: [None, None, None],
            dirty_heaps: 0,
            residency_container: Vec::new(),
            deallocation_container: Vec::new(),
            slm_size: SLM_SIZE_NOT_SET,
            instruction_heap_base_address: 0,
        }
    }

    /// Allocate the first command buffer and every heap, seed the residency
    /// container and mark all heaps dirty.
    pub fn initialize(&mut self) -> Result<(), AllocError> {
        debug_assert!(
            self.cmd_buffer_allocations.is_empty(),
            "container already initialized"
        );
        let config = RuntimeConfig::get();

        let cmd_buffer = self.allocate_command_buffer(&config)?;
        self.command_stream = Some(LinearStream::new(cmd_buffer.clone()));
        self.cmd_buffer_allocations.push(cmd_buffer.clone());
        self.add_to_residency_container(Some(cmd_buffer));

        for heap_type in HeapType::all() {
            let allocation = self.device.heap_pool().get_heap_allocation(
                heap_type,
                config.container.heap_size,
                config.container.heap_alignment,
                self.device.root_device_index(),
            )?;
            self.add_to_residency_container(Some(allocation.clone()));
            self.indirect_heaps[heap_type.index()] = Some(IndirectHeap::new(allocation));
        }

        self.instruction_heap_base_address = self.device.instruction_heap_base_address();
        self.set_dirty_state_for_all_heaps(true);
        self.slm_size = SLM_SIZE_NOT_SET;
        Ok(())
    }

    /// The device this container is bound to.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The live command stream.
    pub fn command_stream(&mut self) -> &mut LinearStream {
        self.command_stream
            .as_mut()
            .expect("command container not initialized")
    }

    /// Every command-buffer allocation of the chain, oldest first.
    pub fn command_buffer_allocations(&self) -> &[Arc<GraphicsAllocation>] {
        &self.cmd_buffer_allocations
    }

    /// The heap of the given type.
    pub fn indirect_heap(&mut self, heap_type: HeapType) -> &mut IndirectHeap {
        self.indirect_heaps[heap_type.index()]
            .as_mut()
            .expect("command container not initialized")
    }

    /// The allocation backing the heap of the given type.
    pub fn indirect_heap_allocation(&self, heap_type: HeapType) -> &Arc<GraphicsAllocation> {
        self.indirect_heaps[heap_type.index()]
            .as_ref()
            .expect("command container not initialized")
            .graphics_allocation()
    }

    /// GPU base address of the instruction heap region, programmed once per
    /// device.
    pub fn instruction_heap_base_address(&self) -> u64 {
        self.instruction_heap_base_address
    }

    /// Whether the heap's base address must be re-emitted into the command
    /// stream before further references into it.
    pub fn is_heap_dirty(&self, heap_type: HeapType) -> bool {
        self.dirty_heaps & (1 << heap_type.index()) != 0
    }

    /// Whether any heap base address must be re-emitted.
    pub fn is_any_heap_dirty(&self) -> bool {
        self.dirty_heaps != 0
    }

    /// Mark one heap's base address as changed.
    pub fn set_heap_dirty(&mut self, heap_type: HeapType) {
        self.dirty_heaps |= 1 << heap_type.index();
    }

    /// Mark every heap dirty or clean at once.
    pub fn set_dirty_state_for_all_heaps(&mut self, dirty: bool) {
        self.dirty_heaps = if dirty { (1 << HeapType::COUNT) - 1 } else { 0 };
    }

    /// Shared-local-memory high-water mark of the encoded work, or
    /// [`SLM_SIZE_NOT_SET`].
    pub fn slm_size(&self) -> u32 {
        self.slm_size
    }

    /// Record the shared-local-memory size of a dispatch.
    pub fn set_slm_size(&mut self, slm_size: u32) {
        self.slm_size = slm_size;
    }

    /// A heap of the given type guaranteed to hold `size_required` bytes
    /// after alignment padding, growing it if needed.
    ///
    /// Growth swaps the heap to a fresh pool allocation sized to at least the
    /// consumption so far (rounded up to a page), parks the old allocation in
    /// the deallocation container (an in-flight submission may still
    /// reference it), adds the new one to the residency container and marks
    /// the heap dirty.
    pub fn get_heap_with_required_size_and_alignment(
        &mut self,
        heap_type: HeapType,
        size_required: u64,
        alignment: u64,
    ) -> Result<&mut IndirectHeap, AllocError> {
        let index = heap_type.index();
        let grow_to = {
            let heap = self.indirect_heaps[index]
                .as_ref()
                .expect("command container not initialized");
            let padding = if alignment > 0 {
                heap.used().next_multiple_of(alignment) - heap.used()
            } else {
                0
            };
            if heap.available_space() < size_required + padding {
                // Grow proportionally to consumption so far, never below what
                // this request needs.
                let consumed = heap.used() + size_required + padding;
                Some(
                    consumed
                        .max(heap.max_available_space())
                        .next_multiple_of(PAGE_SIZE),
                )
            } else {
                None
            }
        };

        if let Some(new_size) = grow_to {
            let new_allocation = self.device.heap_pool().get_heap_allocation(
                heap_type,
                new_size,
                PAGE_SIZE,
                self.device.root_device_index(),
            )?;
            log::trace!("command container: grew {heap_type:?} heap to {new_size} bytes");

            let heap = self.indirect_heaps[index]
                .as_mut()
                .expect("command container not initialized");
            let old_allocation = heap.replace_allocation(new_allocation.clone());
            self.deallocation_container.push(old_allocation);
            self.add_to_residency_container(Some(new_allocation));
            self.set_heap_dirty(heap_type);
        }

        let heap = self.indirect_heaps[index]
            .as_mut()
            .expect("command container not initialized");
        if alignment > 0 {
            heap.align(alignment);
        }
        debug_assert!(heap.available_space() >= size_required);
        Ok(heap)
    }

    /// Append a fresh command buffer to the chain and repoint the live stream
    /// at it. Used when the current buffer fills during encoding.
    pub fn allocate_next_command_buffer(&mut self) -> Result<(), AllocError> {
        let config = RuntimeConfig::get();
        let cmd_buffer = self.allocate_command_buffer(&config)?;
        log::trace!(
            "command container: chained command buffer {} ",
            self.cmd_buffer_allocations.len()
        );
        self.cmd_buffer_allocations.push(cmd_buffer.clone());
        self.add_to_residency_container(Some(cmd_buffer.clone()));
        self.command_stream = Some(LinearStream::new(cmd_buffer));
        Ok(())
    }

    /// Record an allocation the next submission must make resident.
    ///
    /// Duplicate pointers collapse to one entry; `None` is a no-op.
    pub fn add_to_residency_container(&mut self, allocation: Option<Arc<GraphicsAllocation>>) {
        let Some(allocation) = allocation else {
            return;
        };
        if self
            .residency_container
            .iter()
            .any(|entry| entry.id() == allocation.id())
        {
            return;
        }
        self.residency_container.push(allocation);
    }

    /// The allocations the next submission must make resident.
    pub fn residency_container(&self) -> &ResidencyContainer {
        &self.residency_container
    }

    /// Allocations superseded mid-encoding, to be recycled once the current
    /// submission retires.
    pub fn deallocation_container(&self) -> &[Arc<GraphicsAllocation>] {
        &self.deallocation_container
    }

    /// Shrink the chain back to the first command buffer, rewind every heap
    /// and reseed the bookkeeping, making the container encodable again.
    pub fn reset(&mut self) {
        debug_assert!(
            !self.cmd_buffer_allocations.is_empty(),
            "command container not initialized"
        );
        for allocation in self.cmd_buffer_allocations.drain(1..) {
            self.device.allocator().free(allocation);
        }
        let first = self
            .cmd_buffer_allocations
            .first()
            .cloned()
            .expect("command container not initialized");
        self.command_stream = Some(LinearStream::new(first.clone()));

        self.residency_container.clear();
        self.deallocation_container.clear();
        self.add_to_residency_container(Some(first));

        let mut heap_allocations = Vec::with_capacity(HeapType::COUNT);
        for heap in self.indirect_heaps.iter_mut().flatten() {
            heap.rewind();
            heap_allocations.push(heap.graphics_allocation().clone());
        }
        for allocation in heap_allocations {
            self.add_to_residency_container(Some(allocation));
        }

        self.set_dirty_state_for_all_heaps(true);
        self.slm_size = SLM_SIZE_NOT_SET;
    }

    fn allocate_command_buffer(
        &self,
        config: &RuntimeConfig,
    ) -> Result<Arc<GraphicsAllocation>, AllocError> {
        self.device.allocator().allocate(&AllocationProperties::new(
            self.device.root_device_index(),
            config.container.command_buffer_size,
            AllocationType::CommandBuffer,
            PAGE_SIZE,
            self.device.multi_os_context_capable(),
            true,
            false,
        ))
    }
}

impl Drop for CommandContainer {
    fn drop(&mut self) {
        self.command_stream = None;
        self.residency_container.clear();
        self.deallocation_container.clear();
        for allocation in self.cmd_buffer_allocations.drain(..) {
            self.device.allocator().free(allocation);
        }
        for slot in self.indirect_heaps.iter_mut() {
            if let Some(heap) = slot.take() {
                // Heap allocations are parked for reuse, not freed.
                self.device
                    .heap_pool()
                    .store_heap_allocation(heap.into_allocation());
            }
        }
    }
}
