use core::sync::atomic::{AtomicU32, Ordering};

/// Index value marking the absence of a node.
pub const INVALID_NODE: u32 = u32::MAX;

const NO_OWNER: u32 = 0;

fn next_list_id() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Link cells embedded in every pooled node.
///
/// Stored as atomics so that nodes stay `Sync`, but only ever mutated under
/// the lock of the structure owning the lists; the atomics carry no
/// synchronization of their own.
pub struct ListLinks {
    prev: AtomicU32,
    next: AtomicU32,
    owner: AtomicU32,
}

impl ListLinks {
    /// Create detached links.
    pub fn new() -> Self {
        Self {
            prev: AtomicU32::new(INVALID_NODE),
            next: AtomicU32::new(INVALID_NODE),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    fn clear(&self) {
        self.prev.store(INVALID_NODE, Ordering::Relaxed);
        self.next.store(INVALID_NODE, Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Relaxed);
    }
}

impl Default for ListLinks {
    fn default() -> Self {
        Self::new()
    }
}

/// A node that carries list links.
pub trait LinkedNode {
    /// The link cells of this node.
    fn links(&self) -> &ListLinks;
}

/// Resolves node indices to nodes: the arena a list threads through.
pub trait NodeArena {
    /// Node type stored in the arena.
    type Node: LinkedNode;

    /// The node at `index`. Indices handed to a list must stay valid for the
    /// lifetime of the arena.
    fn node(&self, index: u32) -> &Self::Node;
}

/// Doubly linked list threaded through an external arena by index.
///
/// All operations are O(1) except [`splice`](Self::splice), which retags the
/// spliced nodes. A node belongs to at most one list at a time; membership is
/// tracked with an owner tag so that [`remove`](Self::remove) can verify it.
pub struct IntrusiveList {
    id: u32,
    head: u32,
    tail: u32,
    len: usize,
}

/// A chain detached from a list, ready to be drained or spliced elsewhere.
#[must_use]
pub struct DetachedChain {
    head: u32,
    tail: u32,
    len: usize,
}

impl IntrusiveList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            id: next_list_id(),
            head: INVALID_NODE,
            tail: INVALID_NODE,
            len: 0,
        }
    }

    /// Whether the list holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nodes in the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether `index` is a member of this list.
    pub fn contains<A: NodeArena>(&self, arena: &A, index: u32) -> bool {
        arena.node(index).links().owner.load(Ordering::Relaxed) == self.id
    }

    /// Insert a detached node at the head.
    pub fn push_front<A: NodeArena>(&mut self, arena: &A, index: u32) {
        let links = self.adopt(arena, index);
        links.prev.store(INVALID_NODE, Ordering::Relaxed);
        links.next.store(self.head, Ordering::Relaxed);
        if self.head != INVALID_NODE {
            arena.node(self.head).links().prev.store(index, Ordering::Relaxed);
        } else {
            self.tail = index;
        }
        self.head = index;
        self.len += 1;
    }

    /// Insert a detached node at the tail.
    pub fn push_back<A: NodeArena>(&mut self, arena: &A, index: u32) {
        let links = self.adopt(arena, index);
        links.next.store(INVALID_NODE, Ordering::Relaxed);
        links.prev.store(self.tail, Ordering::Relaxed);
        if self.tail != INVALID_NODE {
            arena.node(self.tail).links().next.store(index, Ordering::Relaxed);
        } else {
            self.head = index;
        }
        self.tail = index;
        self.len += 1;
    }

    /// Detach and return the head node, if any.
    pub fn pop_front<A: NodeArena>(&mut self, arena: &A) -> Option<u32> {
        if self.head == INVALID_NODE {
            return None;
        }
        let index = self.head;
        let links = arena.node(index).links();
        let next = links.next.load(Ordering::Relaxed);
        self.head = next;
        if next != INVALID_NODE {
            arena.node(next).links().prev.store(INVALID_NODE, Ordering::Relaxed);
        } else {
            self.tail = INVALID_NODE;
        }
        links.clear();
        self.len -= 1;
        Some(index)
    }

    /// Detach a specific member node.
    ///
    /// The node must belong to this list; membership is verified in debug
    /// builds only.
    pub fn remove<A: NodeArena>(&mut self, arena: &A, index: u32) {
        let links = arena.node(index).links();
        debug_assert_eq!(
            links.owner.load(Ordering::Relaxed),
            self.id,
            "node {index} does not belong to this list"
        );
        let prev = links.prev.load(Ordering::Relaxed);
        let next = links.next.load(Ordering::Relaxed);
        if prev != INVALID_NODE {
            arena.node(prev).links().next.store(next, Ordering::Relaxed);
        } else {
            debug_assert_eq!(self.head, index);
            self.head = next;
        }
        if next != INVALID_NODE {
            arena.node(next).links().prev.store(prev, Ordering::Relaxed);
        } else {
            debug_assert_eq!(self.tail, index);
            self.tail = prev;
        }
        links.clear();
        self.len -= 1;
    }

    /// Atomically clear the list, returning the former chain.
    ///
    /// The chain's nodes keep their stale owner tags until the chain is
    /// drained or spliced; it must be consumed by one of the two.
    pub fn detach_all(&mut self) -> DetachedChain {
        let chain = DetachedChain {
            head: self.head,
            tail: self.tail,
            len: self.len,
        };
        self.head = INVALID_NODE;
        self.tail = INVALID_NODE;
        self.len = 0;
        chain
    }

    /// Append an entire detached chain at the tail.
    pub fn splice<A: NodeArena>(&mut self, arena: &A, chain: DetachedChain) {
        if chain.is_empty() {
            return;
        }
        let mut current = chain.head;
        while current != INVALID_NODE {
            let links = arena.node(current).links();
            links.owner.store(self.id, Ordering::Relaxed);
            current = links.next.load(Ordering::Relaxed);
        }
        if self.tail != INVALID_NODE {
            arena.node(self.tail).links().next.store(chain.head, Ordering::Relaxed);
            arena.node(chain.head).links().prev.store(self.tail, Ordering::Relaxed);
        } else {
            self.head = chain.head;
        }
        self.tail = chain.tail;
        self.len += chain.len;
    }

    fn adopt<'a, A: NodeArena>(&mut self, arena: &'a A, index: u32) -> &'a ListLinks {
        let links = arena.node(index).links();
        debug_assert_eq!(
            links.owner.load(Ordering::Relaxed),
            NO_OWNER,
            "node {index} already belongs to a list"
        );
        links.owner.store(self.id, Ordering::Relaxed);
        links
    }
}

impl Default for IntrusiveList {
    fn default() -> Self {
        Self::new()
    }
}

impl DetachedChain {
    /// An empty chain.
    pub fn empty() -> Self {
        Self {
            head: INVALID_NODE,
            tail: INVALID_NODE,
            len: 0,
        }
    }

    /// Whether the chain holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of nodes in the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Consume the chain, yielding each node index detached and cleared.
    pub fn drain<A: NodeArena>(self, arena: &A) -> Drain<'_, A> {
        Drain {
            arena,
            current: self.head,
        }
    }
}

/// Iterator produced by [`DetachedChain::drain`].
pub struct Drain<'a, A: NodeArena> {
    arena: &'a A,
    current: u32,
}

impl<A: NodeArena> Iterator for Drain<'_, A> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.current == INVALID_NODE {
            return None;
        }
        let index = self.current;
        let links = self.arena.node(index).links();
        self.current = links.next.load(Ordering::Relaxed);
        links.clear();
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    struct DummyNode {
        links: ListLinks,
    }

    impl LinkedNode for DummyNode {
        fn links(&self) -> &ListLinks {
            &self.links
        }
    }

    struct DummyArena {
        nodes: Vec<DummyNode>,
    }

    impl DummyArena {
        fn with_nodes(count: usize) -> Self {
            Self {
                nodes: (0..count)
                    .map(|_| DummyNode {
                        links: ListLinks::new(),
                    })
                    .collect(),
            }
        }
    }

    impl NodeArena for DummyArena {
        type Node = DummyNode;

        fn node(&self, index: u32) -> &DummyNode {
            &self.nodes[index as usize]
        }
    }

    fn collect(list: &IntrusiveList, arena: &DummyArena) -> Vec<u32> {
        let mut out = Vec::new();
        let mut current = list.head;
        while current != INVALID_NODE {
            out.push(current);
            current = arena.node(current).links().next.load(Ordering::Relaxed);
        }
        out
    }

    #[test]
    fn push_front_prepends() {
        let arena = DummyArena::with_nodes(3);
        let mut list = IntrusiveList::new();
        list.push_front(&arena, 0);
        list.push_front(&arena, 1);
        list.push_front(&arena, 2);
        assert_eq!(collect(&list, &arena), [2, 1, 0]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn push_back_appends() {
        let arena = DummyArena::with_nodes(3);
        let mut list = IntrusiveList::new();
        list.push_back(&arena, 0);
        list.push_back(&arena, 1);
        list.push_back(&arena, 2);
        assert_eq!(collect(&list, &arena), [0, 1, 2]);
    }

    #[test]
    fn pop_front_detaches_head() {
        let arena = DummyArena::with_nodes(2);
        let mut list = IntrusiveList::new();
        list.push_back(&arena, 0);
        list.push_back(&arena, 1);

        assert_eq!(list.pop_front(&arena), Some(0));
        assert!(!list.contains(&arena, 0));
        assert_eq!(list.pop_front(&arena), Some(1));
        assert_eq!(list.pop_front(&arena), None);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_unlinks_middle_head_and_tail() {
        let arena = DummyArena::with_nodes(5);
        let mut list = IntrusiveList::new();
        for index in 0..5 {
            list.push_back(&arena, index);
        }

        list.remove(&arena, 2);
        assert_eq!(collect(&list, &arena), [0, 1, 3, 4]);

        list.remove(&arena, 0);
        assert_eq!(collect(&list, &arena), [1, 3, 4]);

        list.remove(&arena, 4);
        assert_eq!(collect(&list, &arena), [1, 3]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn removed_node_can_join_another_list() {
        let arena = DummyArena::with_nodes(2);
        let mut first = IntrusiveList::new();
        let mut second = IntrusiveList::new();
        first.push_back(&arena, 0);
        first.push_back(&arena, 1);

        first.remove(&arena, 1);
        second.push_back(&arena, 1);
        assert!(second.contains(&arena, 1));
        assert!(!first.contains(&arena, 1));
    }

    #[test]
    fn detach_all_clears_the_list() {
        let arena = DummyArena::with_nodes(4);
        let mut list = IntrusiveList::new();
        for index in 0..4 {
            list.push_back(&arena, index);
        }

        let chain = list.detach_all();
        assert!(list.is_empty());
        assert_eq!(chain.len(), 4);

        let drained: Vec<u32> = chain.drain(&arena).collect();
        assert_eq!(drained, [0, 1, 2, 3]);
        // Drained nodes are fully detached and reusable.
        let mut other = IntrusiveList::new();
        for index in drained {
            other.push_back(&arena, index);
        }
        assert_eq!(other.len(), 4);
    }

    #[test]
    fn splice_appends_whole_chain() {
        let arena = DummyArena::with_nodes(5);
        let mut source = IntrusiveList::new();
        let mut target = IntrusiveList::new();
        target.push_back(&arena, 0);
        for index in 1..5 {
            source.push_back(&arena, index);
        }

        let chain = source.detach_all();
        target.splice(&arena, chain);

        assert_eq!(collect(&target, &arena), [0, 1, 2, 3, 4]);
        assert_eq!(target.len(), 5);
        for index in 1..5 {
            assert!(target.contains(&arena, index));
        }
    }

    #[test]
    fn splice_into_empty_list() {
        let arena = DummyArena::with_nodes(2);
        let mut source = IntrusiveList::new();
        let mut target = IntrusiveList::new();
        source.push_back(&arena, 0);
        source.push_back(&arena, 1);

        target.splice(&arena, source.detach_all());
        assert_eq!(collect(&target, &arena), [0, 1]);
    }
}
