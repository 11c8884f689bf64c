//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;

use bitflags::bitflags;
use tern_utils::ip::IpAddrKind;
use tern_utils::policy::{PolicyFilterRef, PolicyTags};

use crate::attrs::PaListRef;

// Aggregation markers stored in the aggregation prefix-length field.
pub const AGGR_IGNORE: u8 = 0xff;
pub const AGGR_IBGP_ONLY: u8 = 0xe0;
pub const AGGR_EBGP_AGGREGATE: u8 = 0xd0;
pub const AGGR_EBGP_NOT_AGGREGATED: u8 = 0xd1;
pub const AGGR_EBGP_WAS_AGGREGATED: u8 = 0xd2;

// Number of policy-filter banks a route passes through.
pub const POLICY_FILTER_BANKS: usize = 3;

bitflags! {
    // Route state flags.
    //
    // IN_USE means the route was at least a contender for the decision
    // process and was not dropped by the inbound filter bank, not that it
    // won. WINNER is set only by the decision process, together with the
    // IGP metric that applied at the time. DELETED marks a route that has
    // been logically freed but is still referenced.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const IN_USE = 0x01;
        const WINNER = 0x02;
        const FILTERED = 0x04;
        const DELETED = 0x08;
        const NH_RESOLVED = 0x10;
        const AGGR_BRIEF = 0x20;
    }
}

// Per-route bookkeeping: state flags, the reference count driving deferred
// deletion, the aggregation marker, the IGP metric recorded when the route
// won, and the policy layer's tags and filter handles.
#[derive(Debug)]
pub struct RouteMetadata {
    flags: Cell<RouteFlags>,
    refs: Cell<u16>,
    aggr_prefix_len: Cell<u8>,
    igp_metric: Cell<u32>,
    policytags: RefCell<PolicyTags>,
    pfilters: [RefCell<PolicyFilterRef>; POLICY_FILTER_BANKS],
}

// A route record: the unit of currency passed between route-processing
// pipeline stages.
//
// A route consists of the subnet it refers to, a shared handle to its
// interned path-attribute list, and metadata. A filter that modifies a
// route clones it with a different attribute list and points the clone's
// `parent` at the original; state-recording setters on the clone propagate
// up that chain so every version agrees.
//
// Routes are reference counted: dispose of one with [`SubnetRoute::unref`],
// never by simply dropping the last handle while others may still be
// interested. The refcount counts explicit holds ([`SubnetRouteRef`] and
// parent links); a route whose refcount is nonzero when unreferenced is
// only marked deleted and survives until the holds go away.
#[derive(Debug)]
pub struct SubnetRoute<I: IpAddrKind> {
    net: I::Network,
    attrs: PaListRef<I>,
    parent: Option<Rc<SubnetRoute<I>>>,
    metadata: RouteMetadata,
}

// Strong reference to a route; bumps the refcount for its lifetime.
#[derive(Debug)]
pub struct SubnetRouteRef<I: IpAddrKind>(Rc<SubnetRoute<I>>);

// ===== impl RouteMetadata =====

impl RouteMetadata {
    fn new() -> RouteMetadata {
        RouteMetadata {
            flags: Cell::new(RouteFlags::IN_USE),
            refs: Cell::new(0),
            aggr_prefix_len: Cell::new(AGGR_IGNORE),
            igp_metric: Cell::new(u32::MAX),
            policytags: Default::default(),
            pfilters: Default::default(),
        }
    }

    // Duplicate for a cloned route: same flags except the deleted bit, and
    // a fresh reference count.
    fn clone_for_route(&self) -> RouteMetadata {
        let metadata = RouteMetadata::new();
        metadata.flags.set(self.flags.get() - RouteFlags::DELETED);
        metadata.aggr_prefix_len.set(self.aggr_prefix_len.get());
        metadata.igp_metric.set(self.igp_metric.get());
        *metadata.policytags.borrow_mut() = self.policytags.borrow().clone();
        for (dst, src) in metadata.pfilters.iter().zip(&self.pfilters) {
            *dst.borrow_mut() = src.borrow().clone();
        }
        metadata
    }

    fn flag(&self, flag: RouteFlags) -> bool {
        self.flags.get().contains(flag)
    }

    fn set_flag(&self, flag: RouteFlags, value: bool) {
        let mut flags = self.flags.get();
        flags.set(flag, value);
        self.flags.set(flags);
    }

    pub fn refcount(&self) -> u16 {
        self.refs.get()
    }

    // Adjust the reference count. Returns true when a deferred deletion
    // became due (count reached zero on a deleted route).
    fn bump_refcount(&self, delta: i32) -> bool {
        debug_assert!(delta == 1 || delta == -1);
        let refs = self.refs.get();
        if delta == 1 {
            assert!(refs < u16::MAX, "route reference count overflow");
            self.refs.set(refs + 1);
            false
        } else {
            assert!(refs > 0, "route reference count underflow");
            self.refs.set(refs - 1);
            refs == 1 && self.flag(RouteFlags::DELETED)
        }
    }
}

// ===== impl SubnetRoute =====

impl<I> SubnetRoute<I>
where
    I: IpAddrKind,
{
    // Create a route. `parent` is the route this one was derived from, if
    // a filter produced it by modifying another route; the parent gains a
    // reference for as long as the child exists. `igp_metric` is the IGP
    // distance to the next hop, when already known from the RIB.
    pub fn new(
        net: I::Network,
        attrs: PaListRef<I>,
        parent: Option<Rc<SubnetRoute<I>>>,
        igp_metric: Option<u32>,
    ) -> Rc<SubnetRoute<I>> {
        if let Some(parent) = &parent {
            parent.metadata.bump_refcount(1);
        }
        let metadata = RouteMetadata::new();
        if let Some(igp_metric) = igp_metric {
            metadata.igp_metric.set(igp_metric);
        }
        Rc::new(SubnetRoute {
            net,
            attrs,
            parent,
            metadata,
        })
    }

    // Clone a route, keeping its flags but clearing the deleted bit and
    // starting with a fresh reference count.
    pub fn clone_route(route: &Rc<SubnetRoute<I>>) -> Rc<SubnetRoute<I>> {
        if let Some(parent) = &route.parent {
            parent.metadata.bump_refcount(1);
        }
        Rc::new(SubnetRoute {
            net: route.net,
            attrs: route.attrs.clone(),
            parent: route.parent.clone(),
            metadata: route.metadata.clone_for_route(),
        })
    }

    pub fn net(&self) -> &I::Network {
        &self.net
    }

    pub fn attrs(&self) -> &PaListRef<I> {
        &self.attrs
    }

    // The immediate pre-filter version of this route, if any.
    pub fn parent_route(&self) -> Option<&Rc<SubnetRoute<I>>> {
        self.parent.as_ref()
    }

    // The original version of this route, before any filters modified it.
    // If no filters were applied this is the route itself.
    pub fn original_route(route: &Rc<SubnetRoute<I>>) -> Rc<SubnetRoute<I>> {
        let mut cur = route.clone();
        loop {
            let Some(parent) = cur.parent.clone() else {
                return cur;
            };
            cur = parent;
        }
    }

    pub fn in_use(&self) -> bool {
        self.metadata.flag(RouteFlags::IN_USE)
    }

    // Record whether the route is a contender for decision. Propagates to
    // the parent chain.
    pub fn set_in_use(&self, used: bool) {
        self.metadata.set_flag(RouteFlags::IN_USE, used);
        if let Some(parent) = &self.parent {
            parent.set_in_use(used);
        }
    }

    pub fn is_winner(&self) -> bool {
        self.metadata.flag(RouteFlags::WINNER)
    }

    // Record that the decision process chose this route, along with the
    // IGP metric that applied. Propagates to the parent chain.
    pub fn set_is_winner(&self, igp_metric: u32) {
        self.metadata.set_flag(RouteFlags::WINNER, true);
        self.metadata.igp_metric.set(igp_metric);
        if let Some(parent) = &self.parent {
            parent.set_is_winner(igp_metric);
        }
    }

    // Record that the route lost the decision process. Propagates to the
    // parent chain.
    pub fn set_is_not_winner(&self) {
        self.metadata.set_flag(RouteFlags::WINNER, false);
        if let Some(parent) = &self.parent {
            parent.set_is_not_winner();
        }
    }

    pub fn nexthop_resolved(&self) -> bool {
        self.metadata.flag(RouteFlags::NH_RESOLVED)
    }

    // Record whether the route's next hop resolved. Propagates to the
    // parent chain.
    pub fn set_nexthop_resolved(&self, resolved: bool) {
        self.metadata.set_flag(RouteFlags::NH_RESOLVED, resolved);
        if let Some(parent) = &self.parent {
            parent.set_nexthop_resolved(resolved);
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.metadata.flag(RouteFlags::FILTERED)
    }

    // Record that the inbound filter bank dropped the route. Unlike the
    // other setters this does not propagate: it describes one version of
    // the route, not the route itself.
    pub fn set_filtered(&self, filtered: bool) {
        self.metadata.set_flag(RouteFlags::FILTERED, filtered);
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.flag(RouteFlags::DELETED)
    }

    // The IGP metric recorded when the route won the decision process.
    // Meaningless unless `is_winner` is true.
    pub fn igp_metric(&self) -> u32 {
        self.metadata.igp_metric.get()
    }

    pub fn refcount(&self) -> u16 {
        self.metadata.refcount()
    }

    // Dispose of the route. With no outstanding references the storage
    // goes away with the caller's handle; otherwise the route is marked
    // deleted and freed when the last reference drops.
    pub fn unref(&self) {
        if self.metadata.refcount() > 0 {
            self.metadata.set_flag(RouteFlags::DELETED, true);
        }
    }

    pub fn policytags(&self) -> PolicyTags {
        self.metadata.policytags.borrow().clone()
    }

    pub fn set_policytags(&self, tags: PolicyTags) {
        *self.metadata.policytags.borrow_mut() = tags;
    }

    pub fn policyfilter(&self, bank: usize) -> PolicyFilterRef {
        self.metadata.pfilters[bank].borrow().clone()
    }

    pub fn set_policyfilter(&self, bank: usize, pf: PolicyFilterRef) {
        *self.metadata.pfilters[bank].borrow_mut() = pf;
    }

    pub fn aggr_prefix_len(&self) -> u8 {
        self.metadata.aggr_prefix_len.get()
    }

    // The field doubles as storage for aggregation markers.
    pub fn set_aggr_prefix_len(&self, len: u8) {
        self.metadata.aggr_prefix_len.set(len);
    }

    pub fn aggr_brief_mode(&self) -> bool {
        self.metadata.flag(RouteFlags::AGGR_BRIEF)
    }

    pub fn set_aggr_brief_mode(&self, brief: bool) {
        self.metadata.set_flag(RouteFlags::AGGR_BRIEF, brief);
    }

    pub(crate) fn bump_refcount(&self, delta: i32) -> bool {
        self.metadata.bump_refcount(delta)
    }
}

// Only the subnet and the attribute list take part in equality; metadata
// describes a route's life, not its identity.
impl<I> PartialEq for SubnetRoute<I>
where
    I: IpAddrKind,
{
    fn eq(&self, other: &SubnetRoute<I>) -> bool {
        self.net == other.net && self.attrs == other.attrs
    }
}

impl<I> Eq for SubnetRoute<I> where I: IpAddrKind {}

impl<I> Drop for SubnetRoute<I>
where
    I: IpAddrKind,
{
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            parent.metadata.bump_refcount(-1);
        }
    }
}

impl<I> std::fmt::Display for SubnetRoute<I>
where
    I: IpAddrKind,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nexthop {} [{}]",
            self.net,
            self.attrs.attrs().nexthop,
            self.attrs.attrs().as_path,
        )
    }
}

// ===== impl SubnetRouteRef =====

impl<I> SubnetRouteRef<I>
where
    I: IpAddrKind,
{
    pub fn new(route: Rc<SubnetRoute<I>>) -> SubnetRouteRef<I> {
        route.metadata.bump_refcount(1);
        SubnetRouteRef(route)
    }

    pub fn route(&self) -> &Rc<SubnetRoute<I>> {
        &self.0
    }
}

impl<I> Clone for SubnetRouteRef<I>
where
    I: IpAddrKind,
{
    fn clone(&self) -> SubnetRouteRef<I> {
        SubnetRouteRef::new(self.0.clone())
    }
}

impl<I> Deref for SubnetRouteRef<I>
where
    I: IpAddrKind,
{
    type Target = SubnetRoute<I>;

    fn deref(&self) -> &SubnetRoute<I> {
        &self.0
    }
}

impl<I> Drop for SubnetRouteRef<I>
where
    I: IpAddrKind,
{
    fn drop(&mut self) {
        self.0.metadata.bump_refcount(-1);
    }
}
