//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use tern_trie::RefTrie;
use tern_utils::ip::{IpAddrKind, IpNetworkKind};
use tern_utils::rpc::RpcError;
use tern_utils::task::TimeoutTask;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::debug::Debug;
use crate::error::Error;

// Delay before re-asking a RIB that has not come up yet.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

// Requests the resolver sends to the RIB.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(bound = "I: IpAddrKind")]
#[derive(EnumAsInner)]
pub enum RibRequestMsg<I: IpAddrKind> {
    RegisterInterest { nexthop: I },
    DeregisterInterest { addr: I, prefix_len: u8 },
}

// A RIB answer to a register-interest request: whether the next hop
// resolves, the covering range the answer is valid for, the prefix length
// of the actual route that resolved it, and the IGP metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
#[serde(bound = "I: IpAddrKind")]
pub struct RibLookup<I: IpAddrKind> {
    pub resolves: bool,
    pub base_addr: I,
    pub prefix_len: u8,
    pub real_prefix_len: u8,
    pub actual_nexthop: I,
    pub metric: u32,
}

// Callback seam for the pipeline stage that asked about a next hop. The
// callback fires once the asynchronous registration has an answer, with
// the nets the requester associated with it.
pub trait NexthopRequester<I: IpAddrKind>: std::fmt::Debug {
    fn nexthop_resolved(&self, nexthop: I, nets: &BTreeSet<I::Network>);
}

// Callback seam for the decision process: invoked when a next hop's
// resolvability or IGP metric changed and decision must be re-run for the
// routes using it.
pub trait DecisionSink<I: IpAddrKind>: std::fmt::Debug {
    fn igp_nexthop_changed(&self, nexthop: I);
}

// Next hop resolvability and IGP distances are accessed through this
// object.
//
// Both are owned by the RIB and cached here. Retrieval implicitly
// registers interest with the RIB, so later changes to a next hop are
// signalled back via the `rib_client_route_info_*` upcalls.
//
// Three interfaces answer next-hop questions: an asynchronous one used
// before the decision stage (`register_nexthop`, answered through the
// requester callback), a synchronous one for the decision stage itself
// (`lookup`, which must hit), and a synchronous probing one
// (`lookup_by_nexthop_without_entry`).
#[derive(Debug)]
pub struct NextHopResolver<I: IpAddrKind> {
    cache: NextHopCache<I>,
    rib_request: NextHopRibRequest<I>,
    decision: Option<Rc<dyn DecisionSink<I>>>,
}

// A cache of next-hop information.
//
// The RIB answers with an address/prefix-length range for which the answer
// is valid, so one entry typically covers many next hops. Entries are
// indexed twice: by the covering prefix (for lookups) and by the prefix
// length of the actual resolving route (to route RIB upcalls back to the
// entry). The two tries are kept in sync.
#[derive(Debug)]
pub struct NextHopCache<I: IpAddrKind> {
    by_prefix: RefTrie<I, PrefixEntry<I>>,
    by_real_prefix: RefTrie<I, RealPrefixEntry<I>>,
}

type PrefixEntry<I> = Rc<RefCell<NextHopEntry<I>>>;
type RealPrefixEntry<I> = Vec<PrefixEntry<I>>;

#[derive(Debug)]
pub struct NextHopEntry<I: IpAddrKind> {
    // Base address as returned by the RIB.
    address: I,
    // Reference count per next hop covered by this answer.
    nexthop_refs: BTreeMap<I, u32>,
    prefix_len: u8,
    real_prefix_len: u8,
    resolvable: bool,
    metric: u32,
}

// Outcome of dropping a next hop's cache reference.
#[derive(Debug, Eq, PartialEq)]
pub enum CacheDereg<I: IpAddrKind> {
    NotFound,
    Removed,
    // The entry lost its last next hop and was freed; the RIB should be
    // told to forget the range.
    Last { addr: I, prefix_len: u8 },
}

// The queue of outstanding requests to the RIB.
//
// At most one request is in flight at any time: the RIB must not be
// overrun, and queued next hops may resolve to an answer that arrives
// while they wait. A register entry exists either because a pipeline stage
// asked (`new_register`) or because the RIB invalidated a previous answer
// (`reregister`, carrying the old answer so lookups stay satisfied during
// the re-query); both can be true when the two collide.
#[derive(Debug)]
pub struct NextHopRibRequest<I: IpAddrKind> {
    rib_tx: UnboundedSender<RibRequestMsg<I>>,
    wakeup_tx: UnboundedSender<()>,
    queue: VecDeque<RibRequestEnt<I>>,
    busy: bool,
    previously_successful: bool,
    failed: Option<String>,
    retry_timer: Option<TimeoutTask>,
}

#[derive(Debug)]
enum RibRequestEnt<I: IpAddrKind> {
    Register(RibRegisterEnt<I>),
    Deregister { base_addr: I, prefix_len: u8 },
}

#[derive(Debug)]
struct RibRegisterEnt<I: IpAddrKind> {
    nexthop: I,
    // Register info.
    new_register: bool,
    requests: NhRequest<I>,
    // Reregister info: the old answer, kept so lookups during the
    // re-query return it.
    reregister: bool,
    ref_cnt: u32,
    resolvable: bool,
    metric: u32,
}

// The (net, requester) pairs coalesced into one pending registration.
#[derive(Debug)]
struct NhRequest<I: IpAddrKind> {
    requesters: Vec<(Rc<dyn NexthopRequester<I>>, BTreeSet<I::Network>)>,
    total: usize,
}

impl<I> Default for NhRequest<I>
where
    I: IpAddrKind,
{
    fn default() -> NhRequest<I> {
        NhRequest {
            requesters: vec![],
            total: 0,
        }
    }
}

// ===== impl NextHopResolver =====

impl<I> NextHopResolver<I>
where
    I: IpAddrKind,
{
    // `rib_tx` carries requests to the RIB; `wakeup_tx` receives a unit
    // message when a retry timer fires, upon which the owner must call
    // `retry`.
    pub fn new(
        rib_tx: UnboundedSender<RibRequestMsg<I>>,
        wakeup_tx: UnboundedSender<()>,
    ) -> NextHopResolver<I> {
        NextHopResolver {
            cache: NextHopCache::new(),
            rib_request: NextHopRibRequest::new(rib_tx, wakeup_tx),
            decision: None,
        }
    }

    // Hook up the decision process; it is notified whenever a next-hop
    // metric changes.
    pub fn add_decision(&mut self, decision: Rc<dyn DecisionSink<I>>) {
        self.decision = Some(decision);
    }

    // Register interest in a next hop. Returns true if the registration is
    // in progress or was already satisfied. When the cache already covers
    // the next hop no RPC is issued and the requester is not called back.
    pub fn register_nexthop(
        &mut self,
        nexthop: I,
        net: I::Network,
        requester: &Rc<dyn NexthopRequester<I>>,
    ) -> bool {
        Debug::NexthopRegister(nexthop).log();
        if self.cache.register_nexthop(nexthop, 1) {
            Debug::NexthopCacheHit(nexthop).log();
            return true;
        }
        self.rib_request.register_nexthop(nexthop, net, requester);
        true
    }

    // Drop interest in a next hop. Cancels a queued register that has not
    // been sent; otherwise decrements the cache entry's count and, when the
    // entry empties, schedules a RIB deregister.
    pub fn deregister_nexthop(
        &mut self,
        nexthop: I,
        net: I::Network,
        requester: &Rc<dyn NexthopRequester<I>>,
    ) {
        Debug::NexthopDeregister(nexthop).log();
        if self.rib_request.deregister_nexthop(nexthop, net, requester) {
            return;
        }
        match self.cache.deregister_nexthop(nexthop) {
            CacheDereg::Last { addr, prefix_len } => {
                self.rib_request.deregister_from_rib(addr, prefix_len);
            }
            CacheDereg::Removed => (),
            CacheDereg::NotFound => {
                warn!(%nexthop, "deregister of unknown next hop");
            }
        }
    }

    // Synchronous lookup for the decision stage. By the time decision runs
    // the asynchronous registration must have completed, so a miss is a
    // fatal programming error.
    pub fn lookup(&self, nexthop: I) -> (bool, u32) {
        if let Some(hit) = self.cache.lookup_by_nexthop(nexthop) {
            return hit;
        }
        // The cache entry may be mid-requery; the queue holds the old
        // answer.
        if let Some(stale) = self.rib_request.lookup(nexthop) {
            return stale;
        }
        panic!("lookup of unregistered next hop {nexthop}");
    }

    // Probe the cache for an answer covering a next hop whose own
    // registration may not have been established yet.
    pub fn lookup_by_nexthop_without_entry(
        &self,
        nexthop: I,
    ) -> Option<(bool, u32)> {
        self.cache.lookup_by_nexthop_without_entry(nexthop)
    }

    // Reply to a register-interest request.
    pub fn register_interest_response(
        &mut self,
        nexthop: I,
        result: Result<RibLookup<I>, RpcError>,
    ) {
        self.rib_request.register_interest_response(
            nexthop,
            result,
            &mut self.cache,
            self.decision.as_ref(),
        );
    }

    // Reply to a deregister-interest request.
    pub fn deregister_interest_response(
        &mut self,
        addr: I,
        prefix_len: u8,
        result: Result<(), RpcError>,
    ) {
        self.rib_request
            .deregister_interest_response(addr, prefix_len, result);
    }

    // RIB upcall: the metric of the route covering this range changed.
    // Returns true if a matching entry was found.
    pub fn rib_client_route_info_changed(
        &mut self,
        addr: I,
        real_prefix_len: u8,
        nexthop: I,
        metric: u32,
    ) -> bool {
        Debug::NexthopMetricChanged(nexthop, metric).log();
        let Some((resolvable, old_metric, refs)) =
            self.cache.change_entry(addr, real_prefix_len, metric)
        else {
            return false;
        };
        if resolvable && old_metric != metric {
            for nexthop in refs.keys() {
                if let Some(decision) = &self.decision {
                    decision.igp_nexthop_changed(*nexthop);
                }
            }
        }
        true
    }

    // RIB upcall: every registration against this range is now invalid.
    // The entry is dropped and each next hop that referenced it is
    // re-queried, carrying the old answer for lookups in the interim.
    pub fn rib_client_route_info_invalid(
        &mut self,
        addr: I,
        prefix_len: u8,
    ) -> bool {
        Debug::NexthopInvalidated(addr, prefix_len).log();
        let Some((resolvable, metric, refs)) =
            self.cache.delete_entry(addr, prefix_len)
        else {
            return false;
        };
        for (nexthop, ref_cnt) in refs {
            self.rib_request
                .reregister_nexthop(nexthop, ref_cnt, resolvable, metric);
        }
        true
    }

    // Re-issue the pending request after a retry timer fired.
    pub fn retry(&mut self) {
        self.rib_request.retry();
    }

    // Health of the RIB interface: `Err` carries the reason for a fatal
    // transport failure.
    pub fn status(&self) -> Result<(), &str> {
        self.rib_request.status()
    }

    pub fn failed(&self) -> bool {
        self.status().is_err()
    }
}

// ===== impl NextHopCache =====

impl<I> NextHopCache<I>
where
    I: IpAddrKind,
{
    pub fn new() -> NextHopCache<I> {
        NextHopCache {
            by_prefix: RefTrie::new(),
            by_real_prefix: RefTrie::new(),
        }
    }

    // Whether some cached answer covers this next hop.
    pub fn covers(&self, nexthop: I) -> bool {
        !self.by_prefix.find_addr(nexthop).is_end()
    }

    // Add an answer to the cache. The entry starts with no next-hop
    // references; a `register_nexthop` is expected to follow.
    pub fn add_entry(
        &mut self,
        addr: I,
        prefix_len: u8,
        real_prefix_len: u8,
        resolvable: bool,
        metric: u32,
    ) {
        let Ok(net) = I::Network::new(addr, prefix_len) else {
            return;
        };
        let Ok(rnet) = I::Network::new(addr, real_prefix_len) else {
            return;
        };
        let entry = Rc::new(RefCell::new(NextHopEntry {
            address: addr,
            nexthop_refs: Default::default(),
            prefix_len,
            real_prefix_len,
            resolvable,
            metric,
        }));
        let rit = self.by_real_prefix.find_exact(&rnet);
        if rit.is_end() {
            drop(rit);
            self.by_real_prefix.insert(rnet, vec![entry.clone()]);
        } else {
            rit.payload_mut().push(entry.clone());
            drop(rit);
        }
        drop(self.by_prefix.insert(net, entry));
    }

    // Check that the entry created for this answer ended up referenced; a
    // deregister racing the RIB round trip can leave it unused, in which
    // case it is dropped. Returns true if the entry is in use.
    pub fn validate_entry(
        &mut self,
        addr: I,
        nexthop: I,
        prefix_len: u8,
    ) -> bool {
        let Ok(net) = I::Network::new(addr, prefix_len) else {
            return false;
        };
        let it = self.by_prefix.find_exact(&net);
        if it.is_end() {
            drop(it);
            // The answer was deduplicated into an older covering entry;
            // it is in use if that entry references the next hop.
            return self.lookup_by_nexthop(nexthop).is_some();
        }
        let in_use =
            { !it.payload().borrow().nexthop_refs.is_empty() };
        drop(it);
        if !in_use {
            self.delete_entry(addr, prefix_len);
        }
        in_use
    }

    // Update the metric of the entry matching a RIB upcall. Returns the
    // entry's resolvability, old metric, and its next-hop references.
    pub fn change_entry(
        &mut self,
        addr: I,
        real_prefix_len: u8,
        metric: u32,
    ) -> Option<(bool, u32, BTreeMap<I, u32>)> {
        let entry = self.real_prefix_entry(addr, real_prefix_len)?;
        let mut entry = entry.borrow_mut();
        let old_metric = entry.metric;
        entry.metric = metric;
        Some((entry.resolvable, old_metric, entry.nexthop_refs.clone()))
    }

    // Drop an entry from both tries. Returns its resolvability, metric and
    // next-hop references.
    pub fn delete_entry(
        &mut self,
        addr: I,
        prefix_len: u8,
    ) -> Option<(bool, u32, BTreeMap<I, u32>)> {
        let net = I::Network::new(addr, prefix_len).ok()?;
        let it = self.by_prefix.find_exact(&net);
        if it.is_end() {
            return None;
        }
        let entry = it.payload().clone();
        drop(it);

        let (rnet, data) = {
            let e = entry.borrow();
            (
                I::Network::new(e.address, e.real_prefix_len).ok()?,
                (e.resolvable, e.metric, e.nexthop_refs.clone()),
            )
        };
        let rit = self.by_real_prefix.find_exact(&rnet);
        if !rit.is_end() {
            let now_empty = {
                let mut set = rit.payload_mut();
                set.retain(|e| !Rc::ptr_eq(e, &entry));
                set.is_empty()
            };
            drop(rit);
            if now_empty {
                self.by_real_prefix.erase(&rnet);
            }
        } else {
            drop(rit);
        }
        self.by_prefix.erase(&net);
        Some(data)
    }

    pub fn lookup_by_addr(
        &self,
        addr: I,
        prefix_len: u8,
    ) -> Option<(bool, u32)> {
        let net = I::Network::new(addr, prefix_len).ok()?;
        let it = self.by_prefix.find_exact(&net);
        if it.is_end() {
            return None;
        }
        let payload = it.payload();
        let entry = payload.borrow();
        Some((entry.resolvable, entry.metric))
    }

    // Answer for a next hop that has been registered in the cache.
    pub fn lookup_by_nexthop(&self, nexthop: I) -> Option<(bool, u32)> {
        let it = self.by_prefix.find_addr(nexthop);
        if it.is_end() {
            return None;
        }
        let payload = it.payload();
        let entry = payload.borrow();
        if !entry.nexthop_refs.contains_key(&nexthop) {
            return None;
        }
        Some((entry.resolvable, entry.metric))
    }

    // Answer for any next hop covered by a cached range, registered or
    // not.
    pub fn lookup_by_nexthop_without_entry(
        &self,
        nexthop: I,
    ) -> Option<(bool, u32)> {
        let it = self.by_prefix.find_addr(nexthop);
        if it.is_end() {
            return None;
        }
        let payload = it.payload();
        let entry = payload.borrow();
        Some((entry.resolvable, entry.metric))
    }

    // Count a next hop against the entry covering it. Returns false if no
    // cached answer covers the next hop.
    pub fn register_nexthop(&mut self, nexthop: I, ref_cnt_incr: u32) -> bool {
        let it = self.by_prefix.find_addr(nexthop);
        if it.is_end() {
            return false;
        }
        let entry = it.payload().clone();
        drop(it);
        *entry.borrow_mut().nexthop_refs.entry(nexthop).or_insert(0) +=
            ref_cnt_incr;
        true
    }

    // Drop one reference to a next hop. When the covering entry loses its
    // last next hop it is freed and the caller must deregister the range
    // from the RIB.
    pub fn deregister_nexthop(&mut self, nexthop: I) -> CacheDereg<I> {
        let it = self.by_prefix.find_addr(nexthop);
        if it.is_end() {
            return CacheDereg::NotFound;
        }
        let entry = it.payload().clone();
        drop(it);

        let (addr, prefix_len, now_empty) = {
            let mut e = entry.borrow_mut();
            let Some(count) = e.nexthop_refs.get_mut(&nexthop) else {
                return CacheDereg::NotFound;
            };
            *count -= 1;
            if *count == 0 {
                e.nexthop_refs.remove(&nexthop);
            }
            (e.address, e.prefix_len, e.nexthop_refs.is_empty())
        };
        if now_empty {
            self.delete_entry(addr, prefix_len);
            return CacheDereg::Last { addr, prefix_len };
        }
        CacheDereg::Removed
    }

    // Locate an entry by the prefix length of the actual resolving route.
    fn real_prefix_entry(
        &self,
        addr: I,
        real_prefix_len: u8,
    ) -> Option<PrefixEntry<I>> {
        let rnet = I::Network::new(addr, real_prefix_len).ok()?;
        let it = self.by_real_prefix.find_exact(&rnet);
        if it.is_end() {
            return None;
        }
        let set = it.payload();
        set.iter()
            .find(|entry| {
                let entry = entry.borrow();
                entry.address == addr
                    && entry.real_prefix_len == real_prefix_len
            })
            .cloned()
    }
}

impl<I> Default for NextHopCache<I>
where
    I: IpAddrKind,
{
    fn default() -> NextHopCache<I> {
        NextHopCache::new()
    }
}

// ===== impl NextHopRibRequest =====

impl<I> NextHopRibRequest<I>
where
    I: IpAddrKind,
{
    pub fn new(
        rib_tx: UnboundedSender<RibRequestMsg<I>>,
        wakeup_tx: UnboundedSender<()>,
    ) -> NextHopRibRequest<I> {
        NextHopRibRequest {
            rib_tx,
            wakeup_tx,
            queue: VecDeque::new(),
            busy: false,
            previously_successful: false,
            failed: None,
            retry_timer: None,
        }
    }

    // Queue a registration, coalescing with a pending request for the same
    // next hop.
    pub fn register_nexthop(
        &mut self,
        nexthop: I,
        net: I::Network,
        requester: &Rc<dyn NexthopRequester<I>>,
    ) {
        for ent in self.queue.iter_mut() {
            if let RibRequestEnt::Register(e) = ent {
                if e.nexthop == nexthop {
                    e.new_register = true;
                    e.requests.add_request(net, requester.clone());
                    return;
                }
            }
        }
        let mut requests = NhRequest::default();
        requests.add_request(net, requester.clone());
        self.queue.push_back(RibRequestEnt::Register(RibRegisterEnt {
            nexthop,
            new_register: true,
            requests,
            reregister: false,
            ref_cnt: 0,
            resolvable: false,
            metric: 0,
        }));
        self.send_next_request();
    }

    // Queue a re-registration after the RIB invalidated its answer. The
    // old answer rides along so lookups during the re-query still work.
    pub fn reregister_nexthop(
        &mut self,
        nexthop: I,
        ref_cnt: u32,
        resolvable: bool,
        metric: u32,
    ) {
        for ent in self.queue.iter_mut() {
            if let RibRequestEnt::Register(e) = ent {
                if e.nexthop == nexthop {
                    assert!(!e.reregister, "next hop already reregistering");
                    e.reregister = true;
                    e.ref_cnt = ref_cnt;
                    e.resolvable = resolvable;
                    e.metric = metric;
                    return;
                }
            }
        }
        self.queue.push_back(RibRequestEnt::Register(RibRegisterEnt {
            nexthop,
            new_register: false,
            requests: NhRequest::default(),
            reregister: true,
            ref_cnt,
            resolvable,
            metric,
        }));
        self.send_next_request();
    }

    // Cancel a queued registration. Returns true if the deregistration was
    // absorbed by the queue.
    pub fn deregister_nexthop(
        &mut self,
        nexthop: I,
        net: I::Network,
        requester: &Rc<dyn NexthopRequester<I>>,
    ) -> bool {
        for ent in self.queue.iter_mut() {
            if let RibRequestEnt::Register(e) = ent {
                if e.nexthop != nexthop {
                    continue;
                }
                if e.new_register && e.requests.remove_request(net, requester)
                {
                    return true;
                }
                if e.reregister {
                    assert!(e.ref_cnt > 0, "reregister count underflow");
                    e.ref_cnt -= 1;
                    return true;
                }
            }
        }
        false
    }

    // Queue a deregistration of a covering range the cache dropped.
    pub fn deregister_from_rib(&mut self, base_addr: I, prefix_len: u8) {
        self.queue
            .push_back(RibRequestEnt::Deregister { base_addr, prefix_len });
        self.send_next_request();
    }

    // The old answer for a next hop that is waiting on a re-query.
    pub fn lookup(&self, nexthop: I) -> Option<(bool, u32)> {
        self.queue.iter().find_map(|ent| match ent {
            RibRequestEnt::Register(e)
                if e.nexthop == nexthop && e.reregister =>
            {
                Some((e.resolvable, e.metric))
            }
            _ => None,
        })
    }

    pub fn register_interest_response(
        &mut self,
        nexthop: I,
        result: Result<RibLookup<I>, RpcError>,
        cache: &mut NextHopCache<I>,
        decision: Option<&Rc<dyn DecisionSink<I>>>,
    ) {
        assert!(self.busy, "unexpected RIB reply");
        self.busy = false;
        assert!(
            matches!(self.queue.front(),
                Some(RibRequestEnt::Register(e)) if e.nexthop == nexthop),
            "RIB reply does not match the pending request"
        );

        let lookup = match result {
            Ok(lookup) => lookup,
            Err(error) => {
                self.handle_transport_error(error);
                return;
            }
        };
        self.previously_successful = true;

        let Some(RibRequestEnt::Register(entry)) = self.queue.pop_front()
        else {
            unreachable!();
        };
        if lookup.prefix_len > I::BITLEN || lookup.real_prefix_len > I::BITLEN
        {
            warn!(%nexthop, prefix_len = %lookup.prefix_len,
                real_prefix_len = %lookup.real_prefix_len,
                "malformed RIB answer dropped");
            self.send_next_request();
            return;
        }
        Debug::NexthopResolved(nexthop, lookup.resolves, lookup.metric).log();

        // Queued next hops may share one covering answer; only the first
        // reply materializes the entry.
        if !cache.covers(nexthop) {
            cache.add_entry(
                lookup.base_addr,
                lookup.prefix_len,
                lookup.real_prefix_len,
                lookup.resolves,
                lookup.metric,
            );
        }

        if entry.new_register {
            let total = entry.requests.total() as u32;
            if total > 0 {
                cache.register_nexthop(nexthop, total);
            }
            for (requester, nets) in entry.requests.requesters {
                requester.nexthop_resolved(nexthop, &nets);
            }
        }
        if entry.reregister {
            if entry.ref_cnt > 0 {
                cache.register_nexthop(nexthop, entry.ref_cnt);
            }
            // Ripple the change up to decision, unless nothing changed.
            let changed = match cache.lookup_by_nexthop_without_entry(nexthop)
            {
                Some((resolves, metric)) => {
                    resolves != entry.resolvable
                        || (resolves && metric != entry.metric)
                }
                None => entry.resolvable,
            };
            if changed {
                if let Some(decision) = decision {
                    decision.igp_nexthop_changed(nexthop);
                }
            }
        }

        // A deregister may have raced the round trip and left the entry
        // unreferenced; if so drop it and tell the RIB.
        if !cache.validate_entry(lookup.base_addr, nexthop, lookup.prefix_len)
        {
            self.queue.push_back(RibRequestEnt::Deregister {
                base_addr: lookup.base_addr,
                prefix_len: lookup.prefix_len,
            });
        }
        self.send_next_request();
    }

    pub fn deregister_interest_response(
        &mut self,
        addr: I,
        prefix_len: u8,
        result: Result<(), RpcError>,
    ) {
        assert!(self.busy, "unexpected RIB reply");
        self.busy = false;
        assert!(
            matches!(self.queue.front(),
                Some(RibRequestEnt::Deregister { base_addr, prefix_len: len })
                    if *base_addr == addr && *len == prefix_len),
            "RIB reply does not match the pending request"
        );
        match result {
            Ok(()) => {
                self.previously_successful = true;
                self.queue.pop_front();
                self.send_next_request();
            }
            Err(error) => self.handle_transport_error(error),
        }
    }

    pub fn retry(&mut self) {
        self.retry_timer = None;
        self.send_next_request();
    }

    pub fn status(&self) -> Result<(), &str> {
        match &self.failed {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn send_next_request(&mut self) {
        if self.busy || self.failed.is_some() {
            return;
        }
        let Some(front) = self.queue.front() else {
            return;
        };
        let msg = match front {
            RibRequestEnt::Register(e) => {
                Debug::RibRegisterSent(e.nexthop).log();
                RibRequestMsg::RegisterInterest { nexthop: e.nexthop }
            }
            RibRequestEnt::Deregister { base_addr, prefix_len } => {
                Debug::RibDeregisterSent(*base_addr, *prefix_len).log();
                RibRequestMsg::DeregisterInterest {
                    addr: *base_addr,
                    prefix_len: *prefix_len,
                }
            }
        };
        if self.rib_tx.send(msg).is_err() {
            self.failed = Some("RIB request channel closed".to_owned());
            return;
        }
        self.busy = true;
    }

    fn handle_transport_error(&mut self, error: RpcError) {
        if error.is_fatal(self.previously_successful) {
            Error::RibTransport(error.clone()).log();
            self.failed = Some(error.to_string());
        } else if matches!(error, RpcError::ResolveFailed) {
            // The RIB has not come up yet; try again shortly. The pending
            // request stays at the front of the queue.
            let wakeup_tx = self.wakeup_tx.clone();
            self.retry_timer = Some(TimeoutTask::new(RETRY_DELAY, move || {
                async move {
                    let _ = wakeup_tx.send(());
                }
            }));
        } else {
            // The RIB rejected this particular request; drop it and move
            // on.
            Error::RibCommandFailed(error).log();
            self.queue.pop_front();
            self.send_next_request();
        }
    }
}

// ===== impl NhRequest =====

impl<I> NhRequest<I>
where
    I: IpAddrKind,
{
    fn add_request(
        &mut self,
        net: I::Network,
        requester: Rc<dyn NexthopRequester<I>>,
    ) {
        for (existing, nets) in self.requesters.iter_mut() {
            if Rc::ptr_eq(existing, &requester) {
                if nets.insert(net) {
                    self.total += 1;
                }
                return;
            }
        }
        self.requesters.push((requester, [net].into()));
        self.total += 1;
    }

    fn remove_request(
        &mut self,
        net: I::Network,
        requester: &Rc<dyn NexthopRequester<I>>,
    ) -> bool {
        for (pos, (existing, nets)) in self.requesters.iter_mut().enumerate()
        {
            if !Rc::ptr_eq(existing, requester) {
                continue;
            }
            if !nets.remove(&net) {
                return false;
            }
            self.total -= 1;
            if nets.is_empty() {
                self.requesters.remove(pos);
            }
            return true;
        }
        false
    }

    fn total(&self) -> usize {
        self.total
    }
}
