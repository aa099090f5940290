use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::debug;

use super::entry::StreamEntry;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one node of a [`MusicQueue`].
///
/// Handles carry the owning queue's id and the node's generation, so a handle
/// that outlived its node, or that belongs to another guild's queue, is
/// simply ignored instead of corrupting the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    queue: u64,
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node {
    entry: Arc<StreamEntry>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    node: Option<Node>,
}

/// Per-guild ordered sequence of stream entries.
///
/// A doubly-linked list over an arena of slots: push at either end, insert
/// after a known node and remove a known node are all O(1). Index-based
/// lookups walk from the head. The queue has no interior locking; the guild
/// session wraps it in a reader/writer lock and `&mut self` methods are the
/// write-locked ones.
#[derive(Debug)]
pub struct MusicQueue {
    id: u64,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<&Arc<StreamEntry>> {
        self.head.map(|slot| &self.node(slot).entry)
    }

    pub fn head_handle(&self) -> Option<NodeHandle> {
        self.head.map(|slot| self.handle(slot))
    }

    pub fn tail(&self) -> Option<&Arc<StreamEntry>> {
        self.tail.map(|slot| &self.node(slot).entry)
    }

    /// Appends an entry and returns its handle.
    pub fn push_back(&mut self, entry: Arc<StreamEntry>) -> NodeHandle {
        let slot = self.alloc(entry, self.tail, None);
        match self.tail {
            Some(old) => self.node_mut(old).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.handle(slot)
    }

    /// Makes `entry` the new head, displacing (not removing) the old one.
    pub fn push_front(&mut self, entry: Arc<StreamEntry>) -> NodeHandle {
        let slot = self.alloc(entry, None, self.head);
        match self.head {
            Some(old) => self.node_mut(old).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.handle(slot)
    }

    /// Inserts `entry` right after `after`. Returns `None` when the handle is
    /// not a live node of this queue.
    pub fn insert_after(&mut self, after: NodeHandle, entry: Arc<StreamEntry>) -> Option<NodeHandle> {
        let prev = self.resolve(after)?;
        let next = self.node(prev).next;
        let slot = self.alloc(entry, Some(prev), next);
        self.node_mut(prev).next = Some(slot);
        match next {
            Some(next) => self.node_mut(next).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        Some(self.handle(slot))
    }

    /// Unlinks a node. Stale or foreign handles are a no-op returning `None`.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<Arc<StreamEntry>> {
        let Some(slot) = self.resolve(handle) else {
            debug!("Ignorando remove de un nodo ajeno a la cola {}", self.id);
            return None;
        };

        let node = self.slots[slot].node.take()?;
        self.slots[slot].generation += 1;
        self.free.push(slot);

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;

        Some(node.entry)
    }

    pub fn pop_front(&mut self) -> Option<Arc<StreamEntry>> {
        let handle = self.head_handle()?;
        self.remove(handle)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&Arc<StreamEntry>> {
        self.resolve(handle).map(|slot| &self.node(slot).entry)
    }

    /// Walks from the head to the `index`-th entry.
    pub fn nth(&self, index: usize) -> Option<(NodeHandle, &Arc<StreamEntry>)> {
        self.iter().nth(index)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Removes every entry, head first.
    pub fn drain(&mut self) -> Vec<Arc<StreamEntry>> {
        let mut drained = Vec::with_capacity(self.len);
        while let Some(entry) = self.pop_front() {
            drained.push(entry);
        }
        drained
    }

    // Funciones privadas

    fn alloc(&mut self, entry: Arc<StreamEntry>, prev: Option<usize>, next: Option<usize>) -> usize {
        let node = Node { entry, prev, next };
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        self.slots[slot].node = Some(node);
        self.len += 1;
        slot
    }

    fn handle(&self, slot: usize) -> NodeHandle {
        NodeHandle {
            queue: self.id,
            slot,
            generation: self.slots[slot].generation,
        }
    }

    fn resolve(&self, handle: NodeHandle) -> Option<usize> {
        if handle.queue != self.id {
            return None;
        }
        let slot = self.slots.get(handle.slot)?;
        (slot.generation == handle.generation && slot.node.is_some()).then_some(handle.slot)
    }

    // Only called with slots reachable from head/tail or a resolved handle,
    // which are always occupied.
    fn node(&self, slot: usize) -> &Node {
        match &self.slots[slot].node {
            Some(node) => node,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        match &mut self.slots[slot].node {
            Some(node) => node,
            None => unreachable!("linked slot {slot} is vacant"),
        }
    }
}

impl Default for MusicQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    queue: &'a MusicQueue,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (NodeHandle, &'a Arc<StreamEntry>);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.queue.node(slot);
        self.cursor = node.next;
        Some((self.queue.handle(slot), &node.entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::ChannelId;

    fn entry(name: &str) -> Arc<StreamEntry> {
        Arc::new(StreamEntry::new(None, ChannelId::new(1), name, 65))
    }

    fn sources(queue: &MusicQueue) -> Vec<String> {
        queue.iter().map(|(_, e)| e.source.clone()).collect()
    }

    #[test]
    fn push_back_preserves_fifo_order() {
        let mut queue = MusicQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.push_back(entry(name));
        }

        assert_eq!(sources(&queue), vec!["a", "b", "c", "d"]);
        assert_eq!(queue.head().unwrap().source, "a");
        assert_eq!(queue.tail().unwrap().source, "d");
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn push_front_displaces_but_keeps_old_head() {
        let mut queue = MusicQueue::new();
        queue.push_back(entry("a"));
        queue.push_back(entry("b"));
        queue.push_front(entry("filler"));

        assert_eq!(queue.head().unwrap().source, "filler");
        assert_eq!(sources(&queue), vec!["filler", "a", "b"]);
    }

    #[test]
    fn push_front_on_empty_queue_sets_tail() {
        let mut queue = MusicQueue::new();
        queue.push_front(entry("only"));
        assert_eq!(queue.tail().unwrap().source, "only");
    }

    #[test]
    fn remove_unlinks_exactly_one_node() {
        let mut queue = MusicQueue::new();
        queue.push_back(entry("a"));
        let b = queue.push_back(entry("b"));
        queue.push_back(entry("c"));

        let removed = queue.remove(b).unwrap();
        assert_eq!(removed.source, "b");
        assert_eq!(queue.len(), 2);
        assert_eq!(sources(&queue), vec!["a", "c"]);

        // Stale handle: already removed.
        assert!(queue.remove(b).is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn removing_head_and_tail_fixes_the_ends() {
        let mut queue = MusicQueue::new();
        let a = queue.push_back(entry("a"));
        queue.push_back(entry("b"));
        let c = queue.push_back(entry("c"));

        queue.remove(a);
        queue.remove(c);
        assert_eq!(queue.head().unwrap().source, "b");
        assert_eq!(queue.tail().unwrap().source, "b");
    }

    #[test]
    fn foreign_handle_is_a_no_op() {
        let mut mine = MusicQueue::new();
        let mut theirs = MusicQueue::new();
        mine.push_back(entry("a"));
        let foreign = theirs.push_back(entry("x"));

        assert!(mine.remove(foreign).is_none());
        assert_eq!(mine.len(), 1);
        assert_eq!(theirs.len(), 1);
    }

    #[test]
    fn reused_slot_does_not_revive_stale_handle() {
        let mut queue = MusicQueue::new();
        let a = queue.push_back(entry("a"));
        queue.remove(a);
        queue.push_back(entry("b"));

        assert!(queue.get(a).is_none());
        assert!(queue.remove(a).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn insert_after_head_lands_in_second_position() {
        let mut queue = MusicQueue::new();
        let head = queue.push_back(entry("a"));
        queue.push_back(entry("b"));

        queue.insert_after(head, entry("next")).unwrap();
        assert_eq!(sources(&queue), vec!["a", "next", "b"]);

        let tail = queue.nth(2).unwrap().0;
        queue.insert_after(tail, entry("last")).unwrap();
        assert_eq!(queue.tail().unwrap().source, "last");
    }

    #[test]
    fn nth_walks_from_head() {
        let mut queue = MusicQueue::new();
        for name in ["a", "b", "c"] {
            queue.push_back(entry(name));
        }
        assert_eq!(queue.nth(1).unwrap().1.source, "b");
        assert!(queue.nth(3).is_none());
    }

    #[test]
    fn drain_empties_in_order() {
        let mut queue = MusicQueue::new();
        queue.push_back(entry("a"));
        queue.push_back(entry("b"));

        let drained: Vec<_> = queue.drain().iter().map(|e| e.source.clone()).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
        assert!(queue.tail().is_none());
    }
}
