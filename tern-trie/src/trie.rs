//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use generational_arena::{Arena, Index};
use tern_utils::ip::{IpAddrKind, IpNetworkKind};
use tracing::warn;

// A binary trie for route lookups, keyed by prefix.
//
// Nodes with a payload ("full") can have 0, 1 or 2 children. Nodes without
// a payload ("empty") are internal only and always have both children; an
// empty node that loses a child is collapsed away. A child's key is
// strictly contained in its parent's key and falls entirely within either
// the lower or the upper half of the parent's range.
#[derive(Debug)]
pub struct Trie<I: IpAddrKind, P> {
    arena: Arena<TrieNode<I, P>>,
    root: Option<Index>,
    payload_count: usize,
}

#[derive(Debug)]
struct TrieNode<I: IpAddrKind, P> {
    up: Option<Index>,
    left: Option<Index>,
    right: Option<Index>,
    key: I::Network,
    payload: Option<P>,
}

// Where an insertion walk currently points: the root slot or one of an
// existing node's child slots.
#[derive(Clone, Copy)]
enum Slot {
    Root,
    Left(Index),
    Right(Index),
}

// Iterator over the full nodes of a (sub)trie, in depth-first postorder:
// left subtree, right subtree, then the node itself. Empty internal nodes
// and nodes outside the root bound are skipped.
#[derive(Debug)]
pub struct TrieIter<'a, I: IpAddrKind, P> {
    trie: &'a Trie<I, P>,
    cur: Option<Index>,
    bound: I::Network,
}

// ===== impl Trie =====

impl<I, P> Trie<I, P>
where
    I: IpAddrKind,
{
    pub fn new() -> Trie<I, P> {
        Trie {
            arena: Arena::new(),
            root: None,
            payload_count: 0,
        }
    }

    // Number of full nodes.
    pub fn route_count(&self) -> usize {
        self.payload_count
    }

    pub fn is_empty(&self) -> bool {
        self.payload_count == 0
    }

    // Insert a key/payload pair. Returns true if an existing full node with
    // the same key had its payload replaced.
    pub fn insert(&mut self, key: I::Network, payload: P) -> bool {
        let mut replaced = false;
        let mut slot = Slot::Root;
        loop {
            let Some(y_idx) = self.slot_get(slot) else {
                // Empty slot, the new node goes right here.
                let parent = self.slot_parent(slot);
                let node = self.alloc(key, Some(payload), parent);
                self.slot_set(slot, Some(node));
                break;
            };
            let y = self.arena[y_idx].key;
            if key == y {
                // Same subnet. Store the payload, replacing any old one.
                let node = &mut self.arena[y_idx];
                replaced = node.payload.is_some();
                if replaced {
                    warn!(net = %key, "overwriting a full node");
                }
                node.payload = Some(payload);
                break;
            }

            // Range endpoints and midpoints of the insertion key (x) and
            // the current node (y) decide the branching case.
            let x_l = key.addr();
            let x_h = key.top_addr();
            let x_m = key.midpoint();
            let y_l = y.addr();
            let y_h = y.top_addr();
            let y_m = y.midpoint();

            if x_h < y_l {
                // Disjoint, x below y: new empty node keyed on the common
                // subnet, x left, y right.
                let k = I::Network::common_subnet(key, y);
                let parent = self.arena[y_idx].up;
                let int = self.alloc(k, None, parent);
                let x_n = self.alloc(key, Some(payload), Some(int));
                self.arena[int].left = Some(x_n);
                self.arena[int].right = Some(y_idx);
                self.arena[y_idx].up = Some(int);
                self.slot_set(slot, Some(int));
                break;
            } else if y_h < x_l {
                // Disjoint, y below x: mirror of the previous case.
                let k = I::Network::common_subnet(key, y);
                let parent = self.arena[y_idx].up;
                let int = self.alloc(k, None, parent);
                let x_n = self.alloc(key, Some(payload), Some(int));
                self.arena[int].left = Some(y_idx);
                self.arena[int].right = Some(x_n);
                self.arena[y_idx].up = Some(int);
                self.slot_set(slot, Some(int));
                break;
            } else if x_l >= y_l && x_h <= y_m {
                // x in y's lower half.
                slot = Slot::Left(y_idx);
            } else if x_l > y_m && x_h <= y_h {
                // x in y's upper half.
                slot = Slot::Right(y_idx);
            } else if y_l > x_m && y_h <= x_h {
                // y in x's upper half: x takes y's place, y goes right.
                let parent = self.arena[y_idx].up;
                let x_n = self.alloc(key, Some(payload), parent);
                self.arena[x_n].right = Some(y_idx);
                self.arena[y_idx].up = Some(x_n);
                self.slot_set(slot, Some(x_n));
                break;
            } else if y_l >= x_l && y_h <= x_m {
                // y in x's lower half: x takes y's place, y goes left.
                let parent = self.arena[y_idx].up;
                let x_n = self.alloc(key, Some(payload), parent);
                self.arena[x_n].left = Some(y_idx);
                self.arena[y_idx].up = Some(x_n);
                self.slot_set(slot, Some(x_n));
                break;
            } else {
                unreachable!("impossible overlap in trie insert");
            }
        }
        if !replaced {
            self.payload_count += 1;
        }
        replaced
    }

    // Remove the node with exactly this key. Erasing a key that is not
    // present is a no-op.
    pub fn erase(&mut self, key: &I::Network) -> bool {
        let Some(idx) = self.find_exact_idx(key) else {
            return false;
        };
        if self.arena[idx].payload.is_none() {
            return false;
        }
        self.arena[idx].payload = None;
        self.payload_count -= 1;
        self.collapse(idx);
        true
    }

    // Longest matching prefix for the given key.
    pub fn find(&self, key: &I::Network) -> Option<(I::Network, &P)> {
        self.find_idx(key).map(|idx| {
            let node = &self.arena[idx];
            (node.key, node.payload.as_ref().unwrap())
        })
    }

    // Longest matching prefix for the given address.
    pub fn find_addr(&self, addr: I) -> Option<(I::Network, &P)> {
        self.find(&I::Network::host_prefix(addr))
    }

    // Exact-match lookup.
    pub fn find_exact(&self, key: &I::Network) -> Option<&P> {
        self.find_exact_idx(key)
            .and_then(|idx| self.arena[idx].payload.as_ref())
    }

    pub fn find_exact_mut(&mut self, key: &I::Network) -> Option<&mut P> {
        self.find_exact_idx(key)
            .and_then(|idx| self.arena[idx].payload.as_mut())
    }

    // The node that would be the parent of this key if it were inserted.
    pub fn find_less_specific(
        &self,
        key: &I::Network,
    ) -> Option<(I::Network, &P)> {
        if key.is_default() {
            return None;
        }
        let shorter = I::Network::new(key.addr(), key.prefix_len() - 1)
            .expect("prefix length already validated");
        self.find(&shorter)
    }

    // First full node whose key is >= the given key in coverage order.
    pub fn lower_bound(&self, key: &I::Network) -> Option<(I::Network, &P)> {
        let idx = self.lower_bound_idx(key)?;
        let node = &self.arena[idx];
        Some((node.key, node.payload.as_ref().unwrap()))
    }

    // The boundaries of the largest address range that contains `addr` and
    // maps to the same route entry (or to no route at all).
    pub fn find_bounds(&self, addr: I) -> (I, I) {
        let found = self.find_idx(&I::Network::host_prefix(addr));
        let (mut lo, mut hi) = match found {
            Some(idx) => {
                let k = self.arena[idx].key;
                (k.addr(), k.top_addr())
            }
            None => {
                // No route, not even a default: pretend there is a node
                // covering the whole space whose only child is the trie.
                let k = I::Network::default_route();
                (k.addr(), k.top_addr())
            }
        };

        // `cur == None` is the virtual no-route node from above.
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
                // Below the first child's range.
                hi = self.low(x).pred();
            } else if addr <= xk.top_addr() {
                // Inside the first child's range.
                cur = Some(x);
                descended = true;
            } else if left.is_none() || right.is_none() {
                // Above the only child's range.
                lo = self.high(x).succ();
            } else {
                let r = right.unwrap();
                let rk = self.arena[r].key;
                if addr < rk.addr() {
                    // Between the two children.
                    lo = self.high(x).succ();
                    hi = self.low(r).pred();
                } else if addr <= rk.top_addr() {
                    // Inside the right child's range.
                    cur = Some(r);
                    descended = true;
                } else {
                    // Above the right child's range.
                    lo = self.high(r).succ();
                }
            }
            if !descended {
                break;
            }
        }
        (lo, hi)
    }

    // Iterate over every full node.
    pub fn iter(&self) -> TrieIter<'_, I, P> {
        TrieIter::new(self, self.root, I::Network::default_route())
    }

    // Iterate over the full nodes at or below the given key.
    pub fn search_subtree(&self, key: I::Network) -> TrieIter<'_, I, P> {
        TrieIter::new(self, self.find_subtree_idx(&key), key)
    }

    pub fn delete_all_nodes(&mut self) {
        self.arena.clear();
        self.root = None;
        self.payload_count = 0;
    }

    // Walk the trie checking the structural invariants. Panics on
    // corruption.
    pub fn validate(&self) {
        if let Some(root) = self.root {
            self.validate_node(root, None);
        }
    }

    // ===== internal helpers =====

    fn alloc(
        &mut self,
        key: I::Network,
        payload: Option<P>,
        up: Option<Index>,
    ) -> Index {
        self.arena.insert(TrieNode {
            up,
            left: None,
            right: None,
            key,
            payload,
        })
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

    // Walk down from the root, remembering the last full node whose key
    // contains the search key.
    fn find_idx(&self, key: &I::Network) -> Option<Index> {
        let mut cand = None;
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.arena[idx];
            if !node.key.contains_net(key) {
                break;
            }
            if node.payload.is_some() {
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

    // The highest node at or below the key, used to root subtree scans.
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
            // Any node on the path is a candidate, full or not.
            cand = Some(idx);
            cur = self.child_towards(idx, key);
        }
        let cand = cand.or(self.root)?;

        if self.arena[cand].key == *key {
            if self.arena[cand].payload.is_some() {
                return Some(cand);
            }
            // Exact match on an empty node: skip to the next full node in
            // the whole-trie order.
            return self.next_node(cand, &I::Network::default_route());
        }

        // No exact match; `cand` is where the key's parent would be. Find
        // the first subtree sorting after the key.
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

    // The child to descend into while searching for a contained key.
    fn child_towards(&self, idx: Index, key: &I::Network) -> Option<Index> {
        let node = &self.arena[idx];
        match node.left {
            Some(left) if self.arena[left].key.contains_net(key) => {
                Some(left)
            }
            _ => node.right,
        }
    }

    // Collapse useless empty nodes starting at `idx` and walking up.
    fn collapse(&mut self, mut idx: Index) {
        loop {
            let node = &self.arena[idx];
            if node.payload.is_some()
                || (node.left.is_some() && node.right.is_some())
            {
                break;
            }
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

    // Postorder successor of `idx` among full nodes under `bound`.
    fn next_node(&self, mut idx: Index, bound: &I::Network) -> Option<Index> {
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
            if self.arena[next].payload.is_some() {
                return Some(next);
            }
            idx = next;
        }
    }

    // Lowest address with a route in the subtree.
    fn low(&self, mut idx: Index) -> I {
        loop {
            let node = &self.arena[idx];
            if node.payload.is_some() {
                break;
            }
            match node.left.or(node.right) {
                Some(child) => idx = child,
                None => break,
            }
        }
        self.arena[idx].key.addr()
    }

    // Highest address with a route in the subtree.
    fn high(&self, mut idx: Index) -> I {
        loop {
            let node = &self.arena[idx];
            if node.payload.is_some() {
                break;
            }
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

impl<I, P> Default for Trie<I, P>
where
    I: IpAddrKind,
{
    fn default() -> Trie<I, P> {
        Trie::new()
    }
}

// ===== impl TrieIter =====

impl<'a, I, P> TrieIter<'a, I, P>
where
    I: IpAddrKind,
{
    fn new(
        trie: &'a Trie<I, P>,
        start: Option<Index>,
        bound: I::Network,
    ) -> TrieIter<'a, I, P> {
        let cur = start.and_then(|idx| {
            let first = trie.leftmost(idx);
            let node = &trie.arena[first];
            if node.payload.is_some() && bound.contains_net(&node.key) {
                Some(first)
            } else {
                trie.next_node(first, &bound)
            }
        });
        TrieIter { trie, cur, bound }
    }
}

impl<'a, I, P> Iterator for TrieIter<'a, I, P>
where
    I: IpAddrKind,
{
    type Item = (I::Network, &'a P);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = &self.trie.arena[idx];
        self.cur = self.trie.next_node(idx, &self.bound);
        Some((node.key, node.payload.as_ref().unwrap()))
    }
}
