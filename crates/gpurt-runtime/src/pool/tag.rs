use crate::memory_management::{
    AllocError, AllocationProperties, AllocationType, GraphicsAllocation, MemoryAllocator,
    CACHE_LINE_SIZE,
};
use crate::pool::{IntrusiveList, LinkedNode, ListLinks, NodeArena};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bytemuck::Zeroable;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A record that can live in a tag pool.
///
/// Payloads are placed directly inside GPU-visible memory, so they must be
/// valid for the all-zero bit pattern ([`Zeroable`]) and must synchronize
/// their own fields (hardware writes them concurrently with host polling).
pub trait TagPayload: Zeroable + Send + Sync + 'static {
    /// Reset the record to its checked-out, in-flight state.
    fn initialize(&self);

    /// Whether the GPU has released this record.
    fn can_be_released(&self) -> bool;
}

/// One slot of a tag pool, embedded links included.
struct TagSlot<T> {
    payload: NonNull<T>,
    gpu_address: u64,
    ref_count: AtomicU32,
    do_not_release: AtomicBool,
    links: ListLinks,
}

unsafe impl<T: Send + Sync> Send for TagSlot<T> {}
unsafe impl<T: Send + Sync> Sync for TagSlot<T> {}

impl<T: TagPayload> TagSlot<T> {
    fn payload(&self) -> &T {
        // Slot payloads point into the pool allocation, which outlives every
        // slot of its chunk; the memory is zero-initialized at allocation.
        unsafe { self.payload.as_ref() }
    }

    fn can_be_released(&self) -> bool {
        !self.do_not_release.load(Ordering::Relaxed) && self.payload().can_be_released()
    }
}

impl<T> LinkedNode for TagSlot<T> {
    fn links(&self) -> &ListLinks {
        &self.links
    }
}

/// One bulk allocation sliced into `tags_per_chunk` slots.
struct TagChunk<T> {
    allocation: Arc<GraphicsAllocation>,
    slots: alloc::boxed::Box<[TagSlot<T>]>,
}

struct Chunks<T> {
    chunks: Vec<TagChunk<T>>,
    tags_per_chunk: u32,
}

impl<T: TagPayload> NodeArena for Chunks<T> {
    type Node = TagSlot<T>;

    fn node(&self, index: u32) -> &TagSlot<T> {
        let chunk = (index / self.tags_per_chunk) as usize;
        let slot = (index % self.tags_per_chunk) as usize;
        &self.chunks[chunk].slots[slot]
    }
}

struct PoolState<T> {
    chunks: Chunks<T>,
    free: IntrusiveList,
    used: IntrusiveList,
    deferred: IntrusiveList,
}

struct TagAllocatorInner<T: TagPayload> {
    allocator: Arc<dyn MemoryAllocator>,
    root_device_index: u32,
    tag_count: u32,
    tag_stride: u64,
    state: spin::Mutex<PoolState<T>>,
    // Serializes pool growth: one thread grows, the others observe the
    // populated free list afterwards. Never held while allocating under the
    // state lock.
    growth: spin::Mutex<()>,
}

/// Pool allocator of GPU-addressable, fixed-size completion records.
///
/// `get_tag` hands out [`TagNode`] handles; handles are reference counted
/// (clone to share) and route the slot back to the free or deferred pool when
/// the last one drops. Safe for concurrent `get_tag`/drop from multiple
/// threads.
pub struct TagAllocator<T: TagPayload> {
    inner: Arc<TagAllocatorInner<T>>,
}

impl<T: TagPayload> Clone for TagAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Checked-out reference to a pooled tag.
pub struct TagNode<T: TagPayload> {
    inner: Arc<TagAllocatorInner<T>>,
    index: u32,
    slot: NonNull<TagSlot<T>>,
}

unsafe impl<T: TagPayload> Send for TagNode<T> {}
unsafe impl<T: TagPayload> Sync for TagNode<T> {}

impl<T: TagPayload> TagAllocator<T> {
    /// Create an allocator slicing pools of `tag_count` records out of bulk
    /// allocations obtained from `allocator`.
    pub fn new(
        allocator: Arc<dyn MemoryAllocator>,
        root_device_index: u32,
        tag_count: u32,
    ) -> Self {
        debug_assert!(tag_count > 0);
        debug_assert!(core::mem::align_of::<T>() as u64 <= CACHE_LINE_SIZE);
        let tag_stride = (core::mem::size_of::<T>() as u64).next_multiple_of(CACHE_LINE_SIZE);
        Self {
            inner: Arc::new(TagAllocatorInner {
                allocator,
                root_device_index,
                tag_count,
                tag_stride,
                state: spin::Mutex::new(PoolState {
                    chunks: Chunks {
                        chunks: Vec::new(),
                        tags_per_chunk: tag_count,
                    },
                    free: IntrusiveList::new(),
                    used: IntrusiveList::new(),
                    deferred: IntrusiveList::new(),
                }),
                growth: spin::Mutex::new(()),
            }),
        }
    }

    /// Check out a tag, its payload reset and its reference count at one.
    ///
    /// Prefers free slots, then deferred slots whose hardware completion is
    /// now visible; grows the pool by one bulk allocation otherwise.
    pub fn get_tag(&self) -> Result<TagNode<T>, AllocError> {
        loop {
            if let Some(node) = self.try_checkout() {
                return Ok(node);
            }
            let _growth = self.inner.growth.lock();
            // Another thread may have grown the pool while we waited.
            if let Some(node) = self.try_checkout() {
                return Ok(node);
            }
            let chunk = self.inner.allocate_chunk()?;
            self.inner.install_chunk(chunk);
        }
    }

    /// Number of bulk allocations backing the pool.
    pub fn pool_count(&self) -> usize {
        self.inner.state.lock().chunks.chunks.len()
    }

    /// Number of tags ready to hand out. Diagnostics only.
    pub fn free_tags(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Number of tags currently checked out. Diagnostics only.
    pub fn used_tags(&self) -> usize {
        self.inner.state.lock().used.len()
    }

    /// Number of tags awaiting hardware release. Diagnostics only.
    pub fn deferred_tags(&self) -> usize {
        self.inner.state.lock().deferred.len()
    }

    fn try_checkout(&self) -> Option<TagNode<T>> {
        let mut state = self.inner.state.lock();
        let PoolState {
            chunks,
            free,
            used,
            deferred,
        } = &mut *state;

        if free.is_empty() && !deferred.is_empty() {
            sweep_deferred(chunks, free, deferred);
        }

        let index = free.pop_front(&*chunks)?;
        used.push_back(&*chunks, index);

        let slot = chunks.node(index);
        slot.ref_count.store(1, Ordering::Relaxed);
        slot.do_not_release.store(false, Ordering::Relaxed);
        slot.payload().initialize();

        Some(TagNode {
            inner: self.inner.clone(),
            index,
            slot: NonNull::from(slot),
        })
    }
}

/// Move deferred slots whose GPU-side completion condition now holds back to
/// the free list; everything else is re-deferred.
fn sweep_deferred<T: TagPayload>(
    chunks: &Chunks<T>,
    free: &mut IntrusiveList,
    deferred: &mut IntrusiveList,
) {
    let chain = deferred.detach_all();
    let mut released = 0usize;
    for index in chain.drain(chunks) {
        if chunks.node(index).can_be_released() {
            free.push_back(chunks, index);
            released += 1;
        } else {
            deferred.push_back(chunks, index);
        }
    }
    if released > 0 {
        log::trace!("tag allocator: released {released} deferred tags");
    }
}

impl<T: TagPayload> TagAllocatorInner<T> {
    fn allocate_chunk(&self) -> Result<TagChunk<T>, AllocError> {
        let size = self.tag_stride * self.tag_count as u64;
        let allocation = self.allocator.allocate(&AllocationProperties::new(
            self.root_device_index,
            size,
            AllocationType::TagBuffer,
            CACHE_LINE_SIZE,
            false,
            true,
            true,
        ))?;

        let base_ptr = allocation.cpu_ptr();
        debug_assert!(!base_ptr.is_null(), "tag buffers must be CPU mapped");

        let slots = (0..self.tag_count)
            .map(|slot_index| {
                let offset = slot_index as u64 * self.tag_stride;
                TagSlot {
                    payload: unsafe {
                        NonNull::new_unchecked(base_ptr.add(offset as usize) as *mut T)
                    },
                    gpu_address: allocation.gpu_address() + offset,
                    ref_count: AtomicU32::new(0),
                    do_not_release: AtomicBool::new(false),
                    links: ListLinks::new(),
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        log::debug!(
            "tag allocator: new pool of {} tags ({size} bytes)",
            self.tag_count
        );

        Ok(TagChunk { allocation, slots })
    }

    fn install_chunk(&self, chunk: TagChunk<T>) {
        let mut state = self.state.lock();
        let PoolState { chunks, free, .. } = &mut *state;
        let base_index = chunks.chunks.len() as u32 * self.tag_count;
        chunks.chunks.push(chunk);
        for slot_index in 0..self.tag_count {
            free.push_back(&*chunks, base_index + slot_index);
        }
    }

    /// Called when the last handle to a slot drops.
    fn release(&self, index: u32) {
        let mut state = self.state.lock();
        let PoolState {
            chunks,
            free,
            used,
            deferred,
        } = &mut *state;
        used.remove(&*chunks, index);
        if chunks.node(index).can_be_released() {
            free.push_back(&*chunks, index);
        } else {
            deferred.push_back(&*chunks, index);
        }
    }
}

impl<T: TagPayload> Drop for TagAllocatorInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for chunk in state.chunks.chunks.drain(..) {
            let TagChunk { allocation, slots } = chunk;
            drop(slots);
            self.allocator.free(allocation);
        }
    }
}

impl<T: TagPayload> TagNode<T> {
    fn slot(&self) -> &TagSlot<T> {
        // Slots live in boxed slices owned by the allocator this handle keeps
        // alive; their addresses are stable.
        unsafe { self.slot.as_ref() }
    }

    /// The tag record itself.
    pub fn tag(&self) -> &T {
        self.slot().payload()
    }

    /// GPU virtual address of the record.
    pub fn gpu_address(&self) -> u64 {
        self.slot().gpu_address
    }

    /// Current number of handles referencing this tag.
    pub fn ref_count(&self) -> u32 {
        self.slot().ref_count.load(Ordering::Relaxed)
    }

    /// Keep the tag out of the free pool even once hardware completion is
    /// visible; it parks in the deferred pool instead.
    pub fn set_do_not_release(&self, do_not_release: bool) {
        self.slot()
            .do_not_release
            .store(do_not_release, Ordering::Relaxed);
    }

    /// Hand the tag back to the pool. Equivalent to dropping the handle.
    pub fn return_tag(self) {
        drop(self);
    }
}

impl<T: TagPayload> Clone for TagNode<T> {
    fn clone(&self) -> Self {
        self.slot().ref_count.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: self.inner.clone(),
            index: self.index,
            slot: self.slot,
        }
    }
}

impl<T: TagPayload> Drop for TagNode<T> {
    fn drop(&mut self) {
        if self.slot().ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.release(self.index);
        }
    }
}

impl<T: TagPayload> core::fmt::Debug for TagNode<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagNode")
            .field("index", &self.index)
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address()))
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
