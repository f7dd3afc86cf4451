//! Bounded recency map: the one LRU structure behind both cache tiers.
//!
//! Entries live in a slot vector threaded onto a doubly linked list
//! (head = most recently used, tail = least). A `hashbrown` index maps keys
//! to slots, so lookup, touch, insert and eviction are all O(1).
//!
//! Eviction is two-phase. When an insert needs room, the tail entry is handed
//! to an [`EvictionHook`] while it is still in the map; only if the hook
//! succeeds is the entry unlinked and the new one linked. A failing hook
//! leaves the map exactly as it was, which is what lets the cache treat
//! "drop from this tier" and "write it somewhere else" as one step.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use hashbrown::HashMap;

/// Side effect run on the least-recently-used entry before it leaves a map.
pub trait EvictionHook<K, V> {
    type Error;

    /// Called with the victim still resident. Returning `Err` cancels the eviction.
    fn on_evict(&mut self, key: &K, value: &V) -> Result<(), Self::Error>;
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Capacity-bounded map that tracks access recency.
///
/// `get`, `get_mut` and `insert_with` count as accesses; `peek`, `contains`,
/// `lru` and iteration do not.
pub struct RecencyMap<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: NonZeroUsize,
}

impl<K, V> RecencyMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity.get().min(4096)),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Look up and mark as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(&self.node(idx).value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(&mut self.node_mut(idx).value)
    }

    /// Look up without changing recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(&self.node(idx).value)
    }

    /// The entry that would be evicted next.
    pub fn lru(&self) -> Option<(&K, &V)> {
        let node = self.node(self.tail?);
        Some((&node.key, &node.value))
    }

    /// Insert or replace `key`, making it most recently used.
    ///
    /// Replacing never evicts. Inserting a new key into a full map first runs
    /// `hook` on the least-recently-used entry; if the hook fails, nothing
    /// changes and the error is returned.
    pub fn insert_with<H>(&mut self, key: K, value: V, hook: &mut H) -> Result<Option<V>, H::Error>
    where
        H: EvictionHook<K, V>,
    {
        if let Some(&idx) = self.index.get(&key) {
            let old = std::mem::replace(&mut self.node_mut(idx).value, value);
            self.touch(idx);
            return Ok(Some(old));
        }

        if self.index.len() >= self.capacity.get() {
            self.evict_lru_with(hook)?;
        }

        let idx = self.alloc(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.push_front(idx);
        self.index.insert(key, idx);
        Ok(None)
    }

    /// Run `hook` on the least-recently-used entry, then remove it.
    ///
    /// `Ok(None)` on an empty map.
    pub fn evict_lru_with<H>(&mut self, hook: &mut H) -> Result<Option<(K, V)>, H::Error>
    where
        H: EvictionHook<K, V>,
    {
        let Some(idx) = self.tail else {
            return Ok(None);
        };
        {
            let victim = self.node(idx);
            hook.on_evict(&victim.key, &victim.value)?;
        }
        Ok(Some(self.remove_at(idx)))
    }

    /// Remove `key` without running any hook.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(self.remove_at(idx).1)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Entries from most to least recently used. Reverse it for LRU-first.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            front: self.head,
            back: self.tail,
            remaining: self.index.len(),
        }
    }

    /// Entries from least to most recently used.
    pub fn iter_lru(&self) -> std::iter::Rev<Iter<'_, K, V>> {
        self.iter().rev()
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    fn remove_at(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let node = match self.slots[idx].take() {
            Some(node) => node,
            None => unreachable!("recency index points at a free slot"),
        };
        self.free.push(idx);
        self.index.remove(&node.key);
        (node.key, node.value)
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

impl<K, V> RecencyMap<K, V> {
    fn node(&self, idx: usize) -> &Node<K, V> {
        match &self.slots[idx] {
            Some(node) => node,
            None => unreachable!("recency list points at a free slot"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        match &mut self.slots[idx] {
            Some(node) => node,
            None => unreachable!("recency list points at a free slot"),
        }
    }
}

impl<K: fmt::Debug + Hash + Eq + Clone, V: fmt::Debug> fmt::Debug for RecencyMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Borrowing iterator over a [`RecencyMap`], most recent first.
pub struct Iter<'a, K, V> {
    map: &'a RecencyMap<K, V>,
    front: Option<usize>,
    back: Option<usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.map.node(self.front?);
        self.front = node.next;
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.map.node(self.back?);
        self.back = node.prev;
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
