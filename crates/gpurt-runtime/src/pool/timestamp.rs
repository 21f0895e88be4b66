use crate::pool::{TagNode, TagPayload};
use alloc::vec::Vec;
use bytemuck::Zeroable;
use core::sync::atomic::{AtomicU32, Ordering};

/// Number of packet slots carried by every timestamp record.
pub const PREFERRED_PACKET_COUNT: usize = 16;

/// Value the host seeds every counter with; the command processor overwrites
/// it with an even value on completion.
pub const COUNTER_IN_FLIGHT: u32 = 1;

/// One hardware-written timestamp quadruplet.
///
/// Fields are atomics because the command processor writes them while the
/// host polls; [`AtomicU32`] has the size and bit validity of `u32`, so the
/// byte layout stays exactly what the hardware expects.
#[repr(C)]
#[derive(Zeroable)]
pub struct PacketTimestamps {
    /// Engine-context timer at walker start.
    pub context_start: AtomicU32,
    /// Global timer at walker start.
    pub global_start: AtomicU32,
    /// Engine-context timer at walker end.
    pub context_end: AtomicU32,
    /// Global timer at walker end.
    pub global_end: AtomicU32,
}

/// GPU-written completion record.
///
/// The byte layout of this struct is a contract with the command processor:
/// sub-fields are addressed by fixed offset from the record's GPU address.
/// Any field reordering, width change or change of
/// [`PREFERRED_PACKET_COUNT`] must be paired with a change on the
/// command-encoding side.
#[repr(C)]
#[derive(Zeroable)]
pub struct TimestampPacketStorage {
    packets: [PacketTimestamps; PREFERRED_PACKET_COUNT],
    packets_used: AtomicU32,
    implicit_gpu_dependencies: AtomicU32,
}

const _: () = assert!(
    core::mem::size_of::<TimestampPacketStorage>() == (4 * PREFERRED_PACKET_COUNT + 2) * 4,
    "timestamp record layout is fixed by hardware"
);

impl TimestampPacketStorage {
    /// The packet at `index`.
    pub fn packet(&self, index: usize) -> &PacketTimestamps {
        &self.packets[index]
    }

    /// Number of packets the bound dispatch actually uses.
    pub fn packets_used(&self) -> u32 {
        self.packets_used.load(Ordering::Relaxed)
    }

    /// Set the number of packets the bound dispatch uses.
    pub fn set_packets_used(&self, count: u32) {
        debug_assert!(count >= 1 && count <= PREFERRED_PACKET_COUNT as u32);
        self.packets_used.store(count, Ordering::Relaxed);
    }

    /// Current implicit-dependency count.
    pub fn implicit_dependencies(&self) -> u32 {
        self.implicit_gpu_dependencies.load(Ordering::Acquire)
    }

    /// Record one more command stream waiting on this tag.
    pub fn increment_implicit_dependencies(&self) {
        self.implicit_gpu_dependencies
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one waiter. On hardware this is the command processor's atomic
    /// decrement on dependency satisfaction; host-side use is for simulation.
    pub fn decrement_implicit_dependencies(&self) {
        self.implicit_gpu_dependencies
            .fetch_sub(1, Ordering::AcqRel);
    }

    /// Whether every used packet has completed and no waiters remain.
    ///
    /// Completion of a packet means the command processor wrote even values
    /// to both of its end counters.
    pub fn is_completed(&self) -> bool {
        let used = self
            .packets_used()
            .min(PREFERRED_PACKET_COUNT as u32) as usize;
        let ended = self.packets[..used].iter().all(|packet| {
            packet.context_end.load(Ordering::Acquire) % 2 == 0
                && packet.global_end.load(Ordering::Acquire) % 2 == 0
        });
        ended && self.implicit_dependencies() == 0
    }

    /// Byte offset of packet `index` from the record's GPU address.
    pub const fn packet_offset(index: usize) -> u64 {
        (index * 4 * core::mem::size_of::<u32>()) as u64
    }

    /// Byte offset of the `context_end` counter of packet `index`.
    pub const fn context_end_offset(index: usize) -> u64 {
        Self::packet_offset(index) + 2 * core::mem::size_of::<u32>() as u64
    }

    /// Byte offset of the `global_end` counter of packet `index`.
    pub const fn global_end_offset(index: usize) -> u64 {
        Self::packet_offset(index) + 3 * core::mem::size_of::<u32>() as u64
    }

    /// Byte offset of the packets-used field.
    pub const fn packets_used_offset() -> u64 {
        (4 * PREFERRED_PACKET_COUNT * core::mem::size_of::<u32>()) as u64
    }

    /// Byte offset of the implicit-dependency counter.
    pub const fn implicit_dependencies_offset() -> u64 {
        Self::packets_used_offset() + core::mem::size_of::<u32>() as u64
    }
}

impl TagPayload for TimestampPacketStorage {
    fn initialize(&self) {
        for packet in &self.packets {
            packet.context_start.store(COUNTER_IN_FLIGHT, Ordering::Relaxed);
            packet.global_start.store(COUNTER_IN_FLIGHT, Ordering::Relaxed);
            packet.context_end.store(COUNTER_IN_FLIGHT, Ordering::Relaxed);
            packet.global_end.store(COUNTER_IN_FLIGHT, Ordering::Relaxed);
        }
        self.packets_used.store(1, Ordering::Relaxed);
        self.implicit_gpu_dependencies.store(0, Ordering::Release);
    }

    fn can_be_released(&self) -> bool {
        self.is_completed()
    }
}

/// Owning collection of timestamp tags bound to one unit of work.
///
/// Dropping the container (or calling [`release_nodes`](Self::release_nodes))
/// hands every tag back to its allocator.
#[derive(Default)]
pub struct TimestampPacketContainer {
    nodes: Vec<TagNode<TimestampPacketStorage>>,
}

impl TimestampPacketContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a tag.
    pub fn add(&mut self, node: TagNode<TimestampPacketStorage>) {
        self.nodes.push(node);
    }

    /// The tags currently held.
    pub fn peek_nodes(&self) -> &[TagNode<TimestampPacketStorage>] {
        &self.nodes
    }

    /// Exchange contents with another container.
    pub fn swap_nodes(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.nodes, &mut other.nodes);
    }

    /// Share every tag of `other`, incrementing their reference counts.
    pub fn assign_and_increment_nodes(&mut self, other: &Self) {
        for node in other.peek_nodes() {
            self.nodes.push(node.clone());
        }
    }

    /// Return every tag to its allocator.
    pub fn release_nodes(&mut self) {
        self.nodes.clear();
    }
}
