//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use generational_arena::{Arena, Index};
use tern_utils::ip::{IpAddrKind, IpNetworkKind};
use tracing::warn;

// Highest representable node reference count (15 bits).
const NODE_REFS_MAX: u16 = 0x7fff;

// A binary trie for route lookups whose iterators act as strong node
// references.
//
// The structure is the same as [`crate::Trie`], with two additions per
// node: a reference count and a `deleted` flag. Erasing a node that an
// iterator still references drops it from lookups and iteration but keeps
// it in place; the node is physically removed when the last reference goes
// away. This lets payloads outlive their logical erasure for as long as
// someone is looking at them.
#[derive(Debug)]
pub struct RefTrie<I: IpAddrKind, P> {
    store: Rc<RefCell<RefTrieStore<I, P>>>,
}

#[derive(Debug)]
struct RefTrieStore<I: IpAddrKind, P> {
    arena: Arena<RefTrieNode<I, P>>,
    root: Option<Index>,
    payload_count: usize,
}

#[derive(Debug)]
struct RefTrieNode<I: IpAddrKind, P> {
    up: Option<Index>,
    left: Option<Index>,
    right: Option<Index>,
    key: I::Network,
    payload: Option<P>,
    refs: u16,
    deleted: bool,
}

#[derive(Clone, Copy)]
enum Slot {
    Root,
    Left(Index),
    Right(Index),
}

// Cursor over the live full nodes of a (sub)trie, in the same postorder as
// the plain trie iterator. Holds a strong reference to the node it sits
// on: the node cannot be physically freed underneath it. A cursor sitting
// on a node that gets erased moves to the next live node the next time it
// is examined, releasing (and possibly freeing) the erased node.
#[derive(Debug)]
pub struct RefTrieIter<I: IpAddrKind, P> {
    store: Rc<RefCell<RefTrieStore<I, P>>>,
    cur: Cell<Option<Index>>,
    bound: I::Network,
}

// ===== impl RefTrie =====

impl<I, P> RefTrie<I, P>
where
    I: IpAddrKind,
{
    pub fn new() -> RefTrie<I, P> {
        RefTrie {
            store: Rc::new(RefCell::new(RefTrieStore {
                arena: Arena::new(),
                root: None,
                payload_count: 0,
            })),
        }
    }

    // Number of live full nodes (logically erased nodes excluded).
    pub fn route_count(&self) -> usize {
        self.store.borrow().payload_count
    }

    pub fn is_empty(&self) -> bool {
        self.route_count() == 0
    }

    // Insert a key/payload pair, returning a reference-holding cursor to
    // the new node. Logs a warning if an existing live payload was
    // replaced. Inserting over a logically erased node revives it.
    pub fn insert(&mut self, key: I::Network, payload: P) -> RefTrieIter<I, P> {
        let (idx, replaced) = self.store.borrow_mut().insert(key, payload);
        if replaced {
            warn!(net = %key, "overwriting a full node");
        }
        RefTrieIter::new_exact(self.store.clone(), Some(idx))
    }

    // Logically erase the node with exactly this key. A no-op if the key
    // is not present or already erased.
    pub fn erase(&mut self, key: &I::Network) -> bool {
        let mut store = self.store.borrow_mut();
        match store.find_exact_idx(key) {
            Some(idx) if store.has_active_payload(idx) => {
                store.erase_idx(idx);
                true
            }
            _ => false,
        }
    }

    // Logically erase the node a cursor points at.
    pub fn erase_at(&mut self, it: &RefTrieIter<I, P>) -> bool {
        assert!(
            Rc::ptr_eq(&self.store, &it.store),
            "cursor belongs to another trie"
        );
        let mut store = self.store.borrow_mut();
        match it.cur.get() {
            Some(idx) if store.has_active_payload(idx) => {
                store.erase_idx(idx);
                true
            }
            _ => false,
        }
    }

    // Longest matching live prefix for the given key.
    pub fn find(&self, key: &I::Network) -> RefTrieIter<I, P> {
        let idx = self.store.borrow().find_idx(key);
        RefTrieIter::new_exact(self.store.clone(), idx)
    }

    // Longest matching live prefix for the given address.
    pub fn find_addr(&self, addr: I) -> RefTrieIter<I, P> {
        self.find(&I::Network::host_prefix(addr))
    }

    // Exact-match lookup among live nodes.
    pub fn find_exact(&self, key: &I::Network) -> RefTrieIter<I, P> {
        let store = self.store.borrow();
        let idx = store
            .find_exact_idx(key)
            .filter(|&idx| store.has_active_payload(idx));
        drop(store);
        RefTrieIter::new_exact(self.store.clone(), idx)
    }

    // The node that would be the parent of this key if it were inserted.
    pub fn find_less_specific(&self, key: &I::Network) -> RefTrieIter<I, P> {
        if key.is_default() {
            return self.end();
        }
        let shorter = I::Network::new(key.addr(), key.prefix_len() - 1)
            .expect("prefix length already validated");
        self.find(&shorter)
    }

    // First full node whose key is >= the given key in coverage order.
    pub fn lower_bound(&self, key: &I::Network) -> RefTrieIter<I, P> {
        let idx = self.store.borrow().lower_bound_idx(key);
        RefTrieIter::new_exact(self.store.clone(), idx)
    }

    // Cursor over every live node.
    pub fn iter(&self) -> RefTrieIter<I, P> {
        let root = self.store.borrow().root;
        RefTrieIter::new_scan(
            self.store.clone(),
            root,
            I::Network::default_route(),
        )
    }

    // Cursor over the live nodes at or below the given key.
    pub fn search_subtree(&self, key: I::Network) -> RefTrieIter<I, P> {
        let start = self.store.borrow().find_subtree_idx(&key);
        RefTrieIter::new_scan(self.store.clone(), start, key)
    }

    // An exhausted cursor.
    pub fn end(&self) -> RefTrieIter<I, P> {
        RefTrieIter::new_exact(self.store.clone(), None)
    }

    // The boundaries of the largest address range that contains `addr` and
    // maps to the same live route entry (or to no route at all).
    pub fn find_bounds(&self, addr: I) -> (I, I) {
        self.store.borrow().find_bounds(addr)
    }

    // Drop everything, including logically erased nodes still referenced
    // by cursors. Outstanding cursors become exhausted.
    pub fn delete_all_nodes(&mut self) {
        let mut store = self.store.borrow_mut();
        store.arena.clear();
        store.root = None;
        store.payload_count = 0;
    }

    // Walk the trie checking the structural invariants. Panics on
    // corruption.
    pub fn validate(&self) {
        let store = self.store.borrow();
        if let Some(root) = store.root {
            store.validate_node(root, None);
        }
    }
}

impl<I, P> Default for RefTrie<I, P>
where
    I: IpAddrKind,
{
    fn default() -> RefTrie<I, P> {
        RefTrie::new()
    }
}

// ===== impl RefTrieStore =====

impl<I, P> RefTrieStore<I, P>
where
    I: IpAddrKind,
{
    fn alloc(
        &mut self,
        key: I::Network,
        payload: Option<P>,
        up: Option<Index>,
    ) -> Index {
        self.arena.insert(RefTrieNode {
            up,
            left: None,
            right: None,
            key,
            payload,
            refs: 0,
            deleted: false,
        })
    }

    fn has_active_payload(&self, idx: Index) -> bool {
        let node = &self.arena[idx];
        node.payload.is_some() && !node.deleted
    }

    fn incr(&mut self, idx: Index) {
        let node = &mut self.arena[idx];
        assert!(node.refs < NODE_REFS_MAX, "node reference count overflow");
        node.refs += 1;
    }

    // Decrement a node's reference count, physically erasing the node if
    // it was logically erased and this was the last reference.
    fn release(&mut self, idx: Index) {
        let Some(node) = self.arena.get_mut(idx) else {
            // The whole trie was torn down under the cursor.
            return;
        };
        assert!(node.refs > 0, "node reference count underflow");
        node.refs -= 1;
        if node.deleted && node.refs == 0 {
            node.payload = None;
            self.collapse(idx);
        }
    }

    fn insert(&mut self, key: I::Network, payload: P) -> (Index, bool) {
        let mut replaced = false;
        let mut slot = Slot::Root;
        let out;
        loop {
            let Some(y_idx) = self.slot_get(slot) else {
                let parent = self.slot_parent(slot);
                let node = self.alloc(key, Some(payload), parent);
                self.slot_set(slot, Some(node));
                out = node;
                break;
            };
            let y = self.arena[y_idx].key;
            if key == y {
                // Same subnet: store the payload and revive the node if it
                // was logically erased.
                let node = &mut self.arena[y_idx];
                replaced = node.payload.is_some() && !node.deleted;
                node.payload = Some(payload);
                node.deleted = false;
                out = y_idx;
                break;
            }

            let x_l = key.addr();
            let x_h = key.top_addr();
            let x_m = key.midpoint();
            let y_l = y.addr();
            let y_h = y.top_addr();
            let y_m = y.midpoint();

            if x_h < y_l {
                let k = I::Network::common_subnet(key, y);
                let parent = self.arena[y_idx].up;
                let int = self.alloc(k, None, parent);
                let x_n = self.alloc(key, Some(payload), Some(int));
                self.arena[int].left = Some(x_n);
                self.arena[int].right = Some(y_idx);
                self.arena[y_idx].up = Some(int);
                self.slot_set(slot, Some(int));
                out = x_n;
                break;
            } else if y_h < x_l {
                let k = I::Network::common_subnet(key, y);
                let parent = self.arena[y_idx].up;
                let int = self.alloc(k, None, parent);
                let x_n = self.alloc(key, Some(payload), Some(int));
                self.arena[int].left = Some(y_idx);
                self.arena[int].right = Some(x_n);
                self.arena[y_idx].up = Some(int);
                self.slot_set(slot, Some(int));
                out = x_n;
                break;
            } else if x_l >= y_l && x_h <= y_m {
                slot = Slot::Left(y_idx);
            } else if x_l > y_m && x_h <= y_h {
                slot = Slot::Right(y_idx);
            } else if y_l > x_m && y_h <= x_h {
                let parent = self.arena[y_idx].up;
                let x_n = self.alloc(key, Some(payload), parent);
                self.arena[x_n].right = Some(y_idx);
                self.arena[y_idx].up = Some(x_n);
                self.slot_set(slot, Some(x_n));
                out = x_n;
                break;
            } else if y_l >= x_l && y_h <= x_m {
                let parent = self.arena[y_idx].up;
                let x_n = self.alloc(key, Some(payload), parent);
                self.arena[x_n].left = Some(y_idx);
                self.arena[y_idx].up = Some(x_n);
                self.slot_set(slot, Some(x_n));
                out = x_n;
                break;
            } else {
                unreachable!("impossible overlap in trie insert");
            }
        }
        if !replaced {
            self.payload_count += 1;
        }
        (out, replaced)
    }

    // Logical erase: referenced nodes are only marked, unreferenced ones
    // are physically removed right away.
    fn erase_idx(&mut self, idx: Index) {
        self.payload_count -= 1;
        let node = &mut self.arena[idx];
        node.deleted = true;
        if node.refs == 0 {
            node.payload = None;
            self.collapse(idx);
        }
    }

    fn slot_get(&self, slot: Slot) -> Option<Index> {
        match slot {
            Slot::Root => self.root,
            Slot::Left(idx) => self.arena[idx].left,
            Slot::Right(idx) => self.arena[idx].right,
        }
    }

    fn slot_set(&mut self, slot: Slot, value: Option<Index>) {
        match slot {
            Slot::Root => self.root = value,
            Slot::Left(idx) => self.arena[idx].left = value,
            Slot::Right(idx) => self.arena[idx].right = value,
        }
    }

    fn slot_parent(&self, slot: Slot) -> Option<Index> {
        match slot {
            Slot::Root => None,
            Slot::Left(idx) | Slot::Right(idx) => Some(idx),
        }
    }

    fn find_idx(&self, key: &I::Network) -> Option<Index> {
        let mut cand = None;
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.arena[idx];
            if !node.key.contains_net(key) {
                break;
            }
            if self.has_active_payload(idx) {
                cand = Some(idx);
            }
            cur = self.child_towards(idx, key);
        }
        cand
    }

    fn find_exact_idx(&self, key: &I::Network) -> Option<Index> {
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.arena[idx];
            if !node.key.contains_net(key) {
                break;
            }
            if node.key == *key {
                return Some(idx);
            }
            cur = self.child_towards(idx, key);
        }
        None
    }

    fn find_subtree_idx(&self, key: &I::Network) -> Option<Index> {
        let mut cur = self.root;
        let mut cand =
            cur.filter(|&idx| key.contains_net(&self.arena[idx].key));
        while let Some(idx) = cur {
            let node = &self.arena[idx];
            if !node.key.contains_net(key) {
                break;
            }
            cand = Some(idx);
            cur = self.child_towards(idx, key);
        }
        cand
    }

    fn lower_bound_idx(&self, key: &I::Network) -> Option<Index> {
        let mut cand = None;
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.arena[idx];
            if !node.key.contains_net(key) {
                break;
            }
            cand = Some(idx);
            cur = self.child_towards(idx, key);
        }
        let cand = cand.or(self.root)?;

        if self.arena[cand].key == *key {
            if self.arena[cand].payload.is_some() {
                return Some(cand);
            }
            return self.next_active(cand, &I::Network::default_route());
        }

        let mut cand = Some(cand);
        while let Some(idx) = cand {
            let node = &self.arena[idx];
            if let Some(left) = node.left {
                if key.coverage_cmp(&self.arena[left].key).is_lt() {
                    return Some(self.leftmost(left));
                }
            }
            if let Some(right) = node.right {
                if key.coverage_cmp(&self.arena[right].key).is_lt() {
                    return Some(self.leftmost(right));
                }
            }
            cand = node.up;
        }
        None
    }

    fn child_towards(&self, idx: Index, key: &I::Network) -> Option<Index> {
        let node = &self.arena[idx];
        match node.left {
            Some(left) if self.arena[left].key.contains_net(key) => {
                Some(left)
            }
            _ => node.right,
        }
    }

    fn collapse(&mut self, mut idx: Index) {
        loop {
            let node = &self.arena[idx];
            if node.payload.is_some()
                || (node.left.is_some() && node.right.is_some())
            {
                break;
            }
            debug_assert_eq!(node.refs, 0, "collapsing a referenced node");
            let parent = node.up;
            let child = node.left.or(node.right);
            if let Some(child) = child {
                self.arena[child].up = parent;
            }
            self.arena.remove(idx);
            match parent {
                None => {
                    self.root = child;
                    break;
                }
                Some(parent_idx) => {
                    let parent_node = &mut self.arena[parent_idx];
                    if parent_node.left == Some(idx) {
                        parent_node.left = child;
                    } else {
                        parent_node.right = child;
                    }
                    idx = parent_idx;
                }
            }
        }
    }

    fn leftmost(&self, mut idx: Index) -> Index {
        loop {
            let node = &self.arena[idx];
            match node.left.or(node.right) {
                Some(child) => idx = child,
                None => return idx,
            }
        }
    }

    // Postorder successor of `idx` among live full nodes under `bound`.
    fn next_active(&self, mut idx: Index, bound: &I::Network) -> Option<Index> {
        self.arena.get(idx)?;
        loop {
            let up = self.arena[idx].up?;
            let was_left = self.arena[up].left == Some(idx);
            let mut next = up;
            if was_left {
                if let Some(right) = self.arena[up].right {
                    next = self.leftmost(right);
                }
            }
            if !bound.contains_net(&self.arena[next].key) {
                return None;
            }
            if self.has_active_payload(next) {
                return Some(next);
            }
            idx = next;
        }
    }

    fn find_bounds(&self, addr: I) -> (I, I) {
        let found = self.find_idx(&I::Network::host_prefix(addr));
        let (mut lo, mut hi) = match found {
            Some(idx) => {
                let k = self.arena[idx].key;
                (k.addr(), k.top_addr())
            }
            None => {
                let k = I::Network::default_route();
                (k.addr(), k.top_addr())
            }
        };

        let mut cur = found;
        loop {
            let (left, right) = match cur {
                Some(idx) => (self.arena[idx].left, self.arena[idx].right),
                None => (self.root, None),
            };
            let Some(x) = left.or(right) else {
                break;
            };
            let xk = self.arena[x].key;
            let mut descended = false;
            if addr < xk.addr() {
                hi = self.low(x).pred();
            } else if addr <= xk.top_addr() {
                cur = Some(x);
                descended = true;
            } else if left.is_none() || right.is_none() {
                lo = self.high(x).succ();
            } else {
                let r = right.unwrap();
                let rk = self.arena[r].key;
                if addr < rk.addr() {
                    lo = self.high(x).succ();
                    hi = self.low(r).pred();
                } else if addr <= rk.top_addr() {
                    cur = Some(r);
                    descended = true;
                } else {
                    lo = self.high(r).succ();
                }
            }
            if !descended {
                break;
            }
        }
        (lo, hi)
    }

    fn low(&self, mut idx: Index) -> I {
        loop {
            if self.has_active_payload(idx) {
                break;
            }
            let node = &self.arena[idx];
            match node.left.or(node.right) {
                Some(child) => idx = child,
                None => break,
            }
        }
        self.arena[idx].key.addr()
    }

    fn high(&self, mut idx: Index) -> I {
        loop {
            if self.has_active_payload(idx) {
                break;
            }
            let node = &self.arena[idx];
            match node.right.or(node.left) {
                Some(child) => idx = child,
                None => break,
            }
        }
        self.arena[idx].key.top_addr()
    }

    fn validate_node(&self, idx: Index, parent: Option<Index>) {
        let node = &self.arena[idx];
        assert_eq!(node.up, parent, "bad parent link");
        if let Some(parent) = parent {
            let pk = &self.arena[parent].key;
            assert!(
                pk.contains_net(&node.key) && *pk != node.key,
                "child not strictly contained in parent"
            );
        }
        assert!(
            node.payload.is_some()
                || (node.left.is_some() && node.right.is_some()),
            "useless internal node"
        );
        if let Some(left) = node.left {
            self.validate_node(left, Some(idx));
        }
        if let Some(right) = node.right {
            self.validate_node(right, Some(idx));
        }
    }
}

// ===== impl RefTrieIter =====

impl<I, P> RefTrieIter<I, P>
where
    I: IpAddrKind,
{
    // Cursor over a single node; advancing leaves the node's own subtree.
    fn new_exact(
        store: Rc<RefCell<RefTrieStore<I, P>>>,
        idx: Option<Index>,
    ) -> RefTrieIter<I, P> {
        let bound = match idx {
            Some(idx) => {
                let mut s = store.borrow_mut();
                s.incr(idx);
                s.arena[idx].key
            }
            None => I::Network::default_route(),
        };
        RefTrieIter {
            store,
            cur: Cell::new(idx),
            bound,
        }
    }

    // Cursor scanning the subtree under `start`, bounded by `bound`.
    fn new_scan(
        store: Rc<RefCell<RefTrieStore<I, P>>>,
        start: Option<Index>,
        bound: I::Network,
    ) -> RefTrieIter<I, P> {
        let cur = {
            let s = store.borrow();
            start.and_then(|idx| {
                let first = s.leftmost(idx);
                if s.has_active_payload(first)
                    && bound.contains_net(&s.arena[first].key)
                {
                    Some(first)
                } else {
                    s.next_active(first, &bound)
                }
            })
        };
        if let Some(idx) = cur {
            store.borrow_mut().incr(idx);
        }
        RefTrieIter {
            store,
            cur: Cell::new(cur),
            bound,
        }
    }

    // True once the cursor has run off the end. A cursor sitting on a node
    // that has since been erased advances (and releases the node) here.
    pub fn is_end(&self) -> bool {
        self.force_valid();
        self.cur.get().is_none()
    }

    // Key of the current node. Panics if the cursor is exhausted or the
    // node was erased; callers that may race an erase must check `is_end`
    // first.
    pub fn key(&self) -> I::Network {
        let store = self.store.borrow();
        let idx = self.cur.get().expect("cursor is exhausted");
        let node = &store.arena[idx];
        assert!(!node.deleted, "cursor on an erased node");
        node.key
    }

    // Borrow the current node's payload. Same panics as `key`.
    pub fn payload(&self) -> Ref<'_, P> {
        let store = self.store.borrow();
        let idx = self.cur.get().expect("cursor is exhausted");
        assert!(!store.arena[idx].deleted, "cursor on an erased node");
        Ref::map(store, |s| s.arena[idx].payload.as_ref().unwrap())
    }

    // Mutably borrow the current node's payload. Same panics as `key`.
    pub fn payload_mut(&self) -> RefMut<'_, P> {
        let store = self.store.borrow_mut();
        let idx = self.cur.get().expect("cursor is exhausted");
        assert!(!store.arena[idx].deleted, "cursor on an erased node");
        RefMut::map(store, |s| s.arena[idx].payload.as_mut().unwrap())
    }

    // Move to the next live node in postorder.
    pub fn advance(&mut self) {
        self.step();
    }

    fn step(&self) {
        let old = self.cur.get();
        let next = {
            let store = self.store.borrow();
            old.and_then(|idx| store.next_active(idx, &self.bound))
        };
        let mut store = self.store.borrow_mut();
        if let Some(next) = next {
            store.incr(next);
        }
        if let Some(old) = old {
            store.release(old);
        }
        drop(store);
        self.cur.set(next);
    }

    // If the node under the cursor was erased, move off it.
    fn force_valid(&self) {
        let Some(idx) = self.cur.get() else {
            return;
        };
        let deleted = {
            let store = self.store.borrow();
            store.arena.get(idx).map(|node| node.deleted)
        };
        match deleted {
            // Torn down wholesale; nothing to release.
            None => self.cur.set(None),
            Some(true) => self.step(),
            Some(false) => (),
        }
    }
}

impl<I, P> Clone for RefTrieIter<I, P>
where
    I: IpAddrKind,
{
    fn clone(&self) -> RefTrieIter<I, P> {
        if let Some(idx) = self.cur.get() {
            self.store.borrow_mut().incr(idx);
        }
        RefTrieIter {
            store: self.store.clone(),
            cur: Cell::new(self.cur.get()),
            bound: self.bound,
        }
    }
}

impl<I, P> Drop for RefTrieIter<I, P>
where
    I: IpAddrKind,
{
    fn drop(&mut self) {
        if let Some(idx) = self.cur.get() {
            self.store.borrow_mut().release(idx);
        }
    }
}
