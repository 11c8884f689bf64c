//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use tern_trie::{RefTrie, RefTrieIter};
use tern_utils::ip::IpAddrKind;

use crate::attrs::PaListRef;
use crate::route::SubnetRoute;

// A route threaded into the ring of routes sharing its path-attribute
// list.
//
// The ring is a circular doubly-linked list. The links are weak: strong
// ownership of every member stays with the trie node payloads and the
// pathmap representative, so tearing the trie down cannot leak a cycle.
#[derive(Debug)]
pub struct ChainedSubnetRoute<I: IpAddrKind> {
    route: Rc<SubnetRoute<I>>,
    prev: RefCell<Weak<ChainedSubnetRoute<I>>>,
    next: RefCell<Weak<ChainedSubnetRoute<I>>>,
}

// Map from a path-attribute list to one representative member of the ring
// of routes carrying it.
pub type Pathmap<I> = BTreeMap<PaListRef<I>, Rc<ChainedSubnetRoute<I>>>;

// A prefix trie over routes, augmented with a secondary index that chains
// together all routes sharing the same path-attribute list. The trie
// answers prefix queries; the chains answer "every route with these
// attributes" without a full scan.
#[derive(Debug)]
pub struct BgpTrie<I: IpAddrKind> {
    trie: RefTrie<I, Rc<ChainedSubnetRoute<I>>>,
    pathmap: Pathmap<I>,
}

impl<I> Default for BgpTrie<I>
where
    I: IpAddrKind,
{
    fn default() -> BgpTrie<I> {
        BgpTrie::new()
    }
}

// ===== impl ChainedSubnetRoute =====

impl<I> ChainedSubnetRoute<I>
where
    I: IpAddrKind,
{
    fn new(route: Rc<SubnetRoute<I>>) -> Rc<ChainedSubnetRoute<I>> {
        Rc::new(ChainedSubnetRoute {
            route,
            prev: RefCell::new(Weak::new()),
            next: RefCell::new(Weak::new()),
        })
    }

    pub fn route(&self) -> &Rc<SubnetRoute<I>> {
        &self.route
    }

    pub fn net(&self) -> I::Network {
        *self.route.net()
    }

    pub fn attrs(&self) -> &PaListRef<I> {
        self.route.attrs()
    }

    // The previous member of the attribute ring, while chained.
    pub fn prev(&self) -> Option<Rc<ChainedSubnetRoute<I>>> {
        self.prev.borrow().upgrade()
    }

    // The next member of the attribute ring, while chained.
    pub fn next(&self) -> Option<Rc<ChainedSubnetRoute<I>>> {
        self.next.borrow().upgrade()
    }

    fn set_prev(&self, prev: &Rc<ChainedSubnetRoute<I>>) {
        *self.prev.borrow_mut() = Rc::downgrade(prev);
    }

    fn set_next(&self, next: &Rc<ChainedSubnetRoute<I>>) {
        *self.next.borrow_mut() = Rc::downgrade(next);
    }

    fn clear_links(&self) {
        *self.prev.borrow_mut() = Weak::new();
        *self.next.borrow_mut() = Weak::new();
    }
}

// ===== impl BgpTrie =====

impl<I> BgpTrie<I>
where
    I: IpAddrKind,
{
    pub fn new() -> BgpTrie<I> {
        BgpTrie {
            trie: RefTrie::new(),
            pathmap: Pathmap::default(),
        }
    }

    // Read-only view of the attribute-list chains.
    pub fn pathmap(&self) -> &Pathmap<I> {
        &self.pathmap
    }

    pub fn route_count(&self) -> usize {
        self.trie.route_count()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    // Insert a route, splicing it into the ring of routes sharing its
    // attribute list. Replacing an existing route for the same prefix
    // unchains and disposes of the old one first.
    pub fn insert(
        &mut self,
        net: I::Network,
        route: Rc<SubnetRoute<I>>,
    ) -> RefTrieIter<I, Rc<ChainedSubnetRoute<I>>> {
        let old = self.trie.find_exact(&net);
        if !old.is_end() {
            let old = old.payload().clone();
            self.remove_from_chain(&old);
            old.route.unref();
        }

        let chained = ChainedSubnetRoute::new(route);
        match self.pathmap.get(chained.attrs()) {
            None => {
                // First route with these attributes: a ring of one.
                chained.set_prev(&chained);
                chained.set_next(&chained);
                self.pathmap
                    .insert(chained.attrs().clone(), chained.clone());
            }
            Some(rep) => {
                // Splice in right after the representative.
                let rep = rep.clone();
                let after = rep.next().expect("chained route outside ring");
                chained.set_prev(&rep);
                chained.set_next(&after);
                after.set_prev(&chained);
                rep.set_next(&chained);
            }
        }
        self.trie.insert(net, chained)
    }

    // Erase the route for this exact prefix, removing it from its ring.
    pub fn erase(&mut self, net: &I::Network) -> bool {
        let it = self.trie.find_exact(net);
        if it.is_end() {
            return false;
        }
        let chained = it.payload().clone();
        drop(it);
        self.remove_from_chain(&chained);
        chained.route.unref();
        self.trie.erase(net)
    }

    // Tear down every chain, then the trie itself.
    pub fn delete_all_nodes(&mut self) {
        for (_, rep) in std::mem::take(&mut self.pathmap) {
            let mut cur = rep.clone();
            loop {
                let next = cur.next();
                cur.clear_links();
                cur.route.unref();
                match next {
                    Some(next) if !Rc::ptr_eq(&next, &rep) => cur = next,
                    _ => break,
                }
            }
        }
        self.trie.delete_all_nodes();
    }

    // Longest matching live prefix for the given key.
    pub fn find(
        &self,
        net: &I::Network,
    ) -> RefTrieIter<I, Rc<ChainedSubnetRoute<I>>> {
        self.trie.find(net)
    }

    // Longest matching live prefix for the given address.
    pub fn find_addr(
        &self,
        addr: I,
    ) -> RefTrieIter<I, Rc<ChainedSubnetRoute<I>>> {
        self.trie.find_addr(addr)
    }

    pub fn find_exact(
        &self,
        net: &I::Network,
    ) -> RefTrieIter<I, Rc<ChainedSubnetRoute<I>>> {
        self.trie.find_exact(net)
    }

    pub fn iter(&self) -> RefTrieIter<I, Rc<ChainedSubnetRoute<I>>> {
        self.trie.iter()
    }

    pub fn find_bounds(&self, addr: I) -> (I, I) {
        self.trie.find_bounds(addr)
    }

    // Unsplice a route from its ring, dropping or re-pointing the pathmap
    // entry as needed.
    fn remove_from_chain(&mut self, chained: &Rc<ChainedSubnetRoute<I>>) {
        let key = chained.attrs().clone();
        let next = chained.next().expect("chained route outside ring");
        if Rc::ptr_eq(&next, chained) {
            // Sole member: the chain goes away.
            self.pathmap.remove(&key);
        } else {
            let prev = chained.prev().expect("chained route outside ring");
            prev.set_next(&next);
            next.set_prev(&prev);
            if let Some(rep) = self.pathmap.get(&key) {
                if Rc::ptr_eq(rep, chained) {
                    self.pathmap.insert(key, next);
                }
            }
        }
        chained.clear_links();
    }
}
