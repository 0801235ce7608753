//! Recency list for LRU eviction.
//!
//! A doubly linked list whose nodes live in an arena (`Vec` of slots) and
//! link to each other by index. Handles stay valid until the node is
//! removed; freed slots are recycled through a free list.
//!
//! Front = most recently used, back = least recently used.

/// Stable handle to a node in a [`RecencyList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Arena-backed doubly linked list with O(1) insert, detach and promote.
#[derive(Debug)]
pub struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecencyList<T> {
    pub fn new() -> Self {
        Self {
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

    /// Most recently used node.
    pub fn front(&self) -> Option<NodeId> {
        self.head
    }

    /// Least recently used node.
    pub fn back(&self) -> Option<NodeId> {
        self.tail
    }

    /// The node one step closer to the front.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.prev)
    }

    /// The node one step closer to the back.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.next)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|n| &mut n.value)
    }

    /// Insert a value as most recently used.
    pub fn push_front(&mut self, value: T) -> NodeId {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        };
        self.len += 1;
        self.attach_front(id);
        id
    }

    /// Promote a node to most recently used.
    pub fn move_to_front(&mut self, id: NodeId) {
        if self.head == Some(id) || self.node(id).is_none() {
            return;
        }
        self.detach(id);
        self.attach_front(id);
    }

    /// Unlink a node and release its slot.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        self.node(id)?;
        self.detach(id);
        let node = self.slots[id.0].take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Remove and return the least recently used value.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        self.remove(tail)
    }

    /// Iterate values from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        std::iter::successors(self.head, move |id| self.next(*id)).filter_map(move |id| self.get(id))
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn links_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(node) => node,
            None => unreachable!("recency list link points at an empty slot"),
        }
    }

    fn attach_front(&mut self, id: NodeId) {
        let old_head = self.head;
        {
            let node = self.links_mut(id);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.links_mut(h).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }

    fn detach(&mut self, id: NodeId) {
        let (prev, next) = {
            let node = self.links_mut(id);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(p) => self.links_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }
}
