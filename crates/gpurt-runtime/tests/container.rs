use std::sync::atomic::Ordering;
use std::sync::Arc;

use gpurt_runtime::command::{CommandContainer, HeapType};
use gpurt_runtime::memory_management::BytesAllocator;
use gpurt_runtime::pool::{
    TagAllocator, TagPayload, TimestampPacketContainer, TimestampPacketStorage,
};
use gpurt_runtime::Device;

fn test_device() -> Arc<Device> {
    Arc::new(Device::new(
        0,
        1,
        0x8000_0000,
        Arc::new(BytesAllocator::new()),
    ))
}

fn complete_packet(storage: &TimestampPacketStorage, packet: usize) {
    storage
        .packet(packet)
        .context_end
        .store(2, Ordering::Relaxed);
    storage.packet(packet).global_end.store(2, Ordering::Relaxed);
}

#[test_log::test]
fn encoding_round_trip_over_a_container() {
    let device = test_device();
    let mut container = CommandContainer::new(device);
    container.initialize().unwrap();

    // Emit a few dwords into the primary stream and some surface state.
    let first_command = container.command_stream().write(0x7a000004_u32);
    container.command_stream().write(0x00000000_u32);
    assert_eq!(
        first_command,
        container.command_stream().graphics_allocation().gpu_address()
    );

    let heap = container
        .get_heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 64)
        .unwrap();
    let state = heap.get_space(64);
    assert_eq!(state.gpu_address % 64, 0);

    // Everything the submission needs is in the residency container.
    assert_eq!(container.residency_container().len(), 1 + HeapType::COUNT);
}

#[test_log::test]
fn heap_growth_keeps_old_allocation_alive_until_retirement() {
    let device = test_device();
    let mut container = CommandContainer::new(device);
    container.initialize().unwrap();

    let old_allocation = container
        .indirect_heap_allocation(HeapType::DynamicState)
        .clone();
    let capacity = old_allocation.size();

    container
        .get_heap_with_required_size_and_alignment(HeapType::DynamicState, capacity + 1, 0)
        .unwrap();

    // The superseded allocation is parked, not freed; an in-flight
    // submission may still reference it.
    assert_eq!(container.deallocation_container().len(), 1);
    assert_eq!(
        container.deallocation_container()[0].id(),
        old_allocation.id()
    );

    container.reset();
    assert!(container.deallocation_container().is_empty());
}

#[test_log::test]
fn containers_on_one_device_share_the_heap_pool() {
    let device = test_device();

    let first_heap_ids: Vec<_> = {
        let mut container = CommandContainer::new(device.clone());
        container.initialize().unwrap();
        HeapType::all()
            .iter()
            .map(|&heap_type| container.indirect_heap_allocation(heap_type).id())
            .collect()
    };

    assert_eq!(device.heap_pool().usage().parked_allocations, 3);

    let mut container = CommandContainer::new(device.clone());
    container.initialize().unwrap();
    let second_heap_ids: Vec<_> = HeapType::all()
        .iter()
        .map(|&heap_type| container.indirect_heap_allocation(heap_type).id())
        .collect();

    for id in second_heap_ids {
        assert!(first_heap_ids.contains(&id));
    }
    assert_eq!(device.heap_pool().usage().parked_allocations, 0);
}

#[test_log::test]
fn exhausted_tag_pool_recovers_completed_tags_before_growing() {
    let device = test_device();
    let allocator: TagAllocator<TimestampPacketStorage> =
        TagAllocator::new(device.allocator().clone(), 0, 4);

    let mut held: Vec<_> = (0..4).map(|_| allocator.get_tag().unwrap()).collect();
    assert_eq!(allocator.pool_count(), 1);

    // Return one tag before hardware finished with it.
    let parked = held.pop().unwrap();
    let payload = parked.tag() as *const TimestampPacketStorage;
    parked.return_tag();
    assert_eq!(allocator.deferred_tags(), 1);

    // Hardware completion lands; the next checkout rescues the deferred tag
    // instead of allocating a new bulk pool.
    unsafe { complete_packet(&*payload, 0) };
    let rescued = allocator.get_tag().unwrap();
    assert_eq!(allocator.pool_count(), 1);
    assert_eq!(allocator.deferred_tags(), 0);
    assert!(!rescued.tag().is_completed());
}

#[test_log::test]
fn timestamp_containers_track_submission_lifetime() {
    let device = test_device();
    let allocator: TagAllocator<TimestampPacketStorage> =
        TagAllocator::new(device.allocator().clone(), 0, 8);

    let mut submission = TimestampPacketContainer::new();
    for _ in 0..3 {
        let node = allocator.get_tag().unwrap();
        node.tag().increment_implicit_dependencies();
        submission.add(node);
    }
    assert_eq!(allocator.used_tags(), 3);

    // Hardware retires the work: end counters written, waiters decremented.
    for node in submission.peek_nodes() {
        complete_packet(node.tag(), 0);
        node.tag().decrement_implicit_dependencies();
        assert!(node.tag().can_be_released());
    }

    submission.release_nodes();
    assert_eq!(allocator.used_tags(), 0);
    assert_eq!(allocator.free_tags(), 8);
}

#[test_log::test]
fn fence_values_gate_residency_bookkeeping() {
    let device = test_device();
    let mut container = CommandContainer::new(device);
    container.initialize().unwrap();

    let context_id = 0;
    let fence_value = 42;
    for allocation in container.residency_container() {
        allocation.residency().set_resident(context_id, true);
        allocation.update_task_count(7, context_id);
    }

    // Submission retires: completion data flows back per context.
    for allocation in container.residency_container() {
        allocation
            .residency()
            .update_completion_data(fence_value, context_id);
        allocation.residency().set_resident(context_id, false);
    }

    for allocation in container.residency_container() {
        assert_eq!(
            allocation.residency().fence_value_for_context(context_id),
            fence_value
        );
        assert!(!allocation.residency().is_resident(context_id));
        assert!(allocation.is_used_by_context(context_id));
    }
}
