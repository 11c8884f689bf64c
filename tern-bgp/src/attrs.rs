//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::Deref;
use std::sync::Arc;

use itertools::Itertools;
use tern_utils::ip::IpAddrKind;

// Default values.
pub const DFLT_LOCAL_PREF: u32 = 100;

// Origin of the path information.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

// Sequence of AS numbers the route has traversed, most recent first.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AsPath(Vec<u32>);

// A path-attribute list: the ordered set of routing attributes attached to
// a route. Many routes share identical lists, so lists are interned through
// an [`AttrSets`] registry and passed around as [`PaListRef`] handles.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PathAttrs<I: IpAddrKind> {
    pub origin: Origin,
    pub as_path: AsPath,
    pub nexthop: I,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub atomic_aggregate: bool,
    pub communities: BTreeSet<u32>,
}

// An interned path-attribute list. The index is unique within the registry
// that produced the set and stable for the set's lifetime.
#[derive(Debug, Eq, PartialEq)]
pub struct AttrSet<I: IpAddrKind> {
    pub index: u64,
    pub value: PathAttrs<I>,
}

// Shared handle to an interned path-attribute list.
//
// Handles from the same registry compare equal exactly when they point to
// the same set. Ordering compares the attribute values themselves, which
// gives containers keyed by handle a stable, content-defined order.
#[derive(Debug)]
pub struct PaListRef<I: IpAddrKind>(Arc<AttrSet<I>>);

// Per-family interning registry for path-attribute lists: at most one live
// copy of each distinct list exists at any time.
#[derive(Debug)]
pub struct AttrSets<I: IpAddrKind> {
    tree: BTreeMap<PathAttrs<I>, PaListRef<I>>,
    next_index: u64,
}

// The interning registries of both address families.
#[derive(Debug, Default)]
pub struct AttrSetsCxt {
    pub ipv4: AttrSets<Ipv4Addr>,
    pub ipv6: AttrSets<Ipv6Addr>,
}

// ===== impl AsPath =====

impl AsPath {
    pub fn new(asns: Vec<u32>) -> AsPath {
        AsPath(asns)
    }

    pub fn path_length(&self) -> usize {
        self.0.len()
    }

    // The neighboring AS the route was learned from.
    pub fn first(&self) -> Option<u32> {
        self.0.first().copied()
    }

    #[must_use]
    pub fn prepend(&self, asn: u32) -> AsPath {
        let mut asns = Vec::with_capacity(self.0.len() + 1);
        asns.push(asn);
        asns.extend(&self.0);
        AsPath(asns)
    }
}

impl std::fmt::Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

// ===== impl PathAttrs =====

impl<I> PathAttrs<I>
where
    I: IpAddrKind,
{
    pub fn new(origin: Origin, as_path: AsPath, nexthop: I) -> PathAttrs<I> {
        PathAttrs {
            origin,
            as_path,
            nexthop,
            med: None,
            local_pref: None,
            atomic_aggregate: false,
            communities: Default::default(),
        }
    }
}

// ===== impl PaListRef =====

impl<I> PaListRef<I>
where
    I: IpAddrKind,
{
    pub fn attrs(&self) -> &PathAttrs<I> {
        &self.0.value
    }

    pub fn index(&self) -> u64 {
        self.0.index
    }

    // Number of live handles to this set, the registry's own included.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<I> Clone for PaListRef<I>
where
    I: IpAddrKind,
{
    fn clone(&self) -> PaListRef<I> {
        PaListRef(self.0.clone())
    }
}

impl<I> Deref for PaListRef<I>
where
    I: IpAddrKind,
{
    type Target = AttrSet<I>;

    fn deref(&self) -> &AttrSet<I> {
        &self.0
    }
}

// Handles compare by set identity.
impl<I> PartialEq for PaListRef<I>
where
    I: IpAddrKind,
{
    fn eq(&self, other: &PaListRef<I>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<I> Eq for PaListRef<I> where I: IpAddrKind {}

// Containers keyed by handle sort by attribute value.
impl<I> Ord for PaListRef<I>
where
    I: IpAddrKind,
{
    fn cmp(&self, other: &PaListRef<I>) -> Ordering {
        self.0.value.cmp(&other.0.value)
    }
}

impl<I> PartialOrd for PaListRef<I>
where
    I: IpAddrKind,
{
    fn partial_cmp(&self, other: &PaListRef<I>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<I> std::hash::Hash for PaListRef<I>
where
    I: IpAddrKind,
{
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

// ===== impl AttrSets =====

impl<I> AttrSets<I>
where
    I: IpAddrKind,
{
    // Intern an attribute list, returning a handle to the single live copy.
    pub fn get(&mut self, attrs: &PathAttrs<I>) -> PaListRef<I> {
        if let Some(set) = self.tree.get(attrs) {
            return set.clone();
        }
        self.next_index += 1;
        let set = PaListRef(Arc::new(AttrSet {
            index: self.next_index,
            value: attrs.clone(),
        }));
        self.tree.insert(attrs.clone(), set.clone());
        set
    }

    // Drop interned sets no longer referenced outside the registry.
    pub fn purge(&mut self) {
        self.tree.retain(|_, set| Arc::strong_count(&set.0) > 1);
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl<I> Default for AttrSets<I>
where
    I: IpAddrKind,
{
    fn default() -> AttrSets<I> {
        AttrSets {
            tree: Default::default(),
            next_index: 0,
        }
    }
}
