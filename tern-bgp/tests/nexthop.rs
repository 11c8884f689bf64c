//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::rc::Rc;

use ipnetwork::Ipv4Network;
use tern_bgp::nexthop::{
    DecisionSink, NextHopResolver, NexthopRequester, RibLookup, RibRequestMsg,
};
use tern_utils::ip::IpNetworkKind;
use tern_utils::rpc::RpcError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

fn net(s: &str) -> Ipv4Network {
    Ipv4Network::from_str_net(s).unwrap()
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

#[derive(Debug, Default)]
struct TestRequester {
    resolved: RefCell<Vec<(Ipv4Addr, Vec<Ipv4Network>)>>,
}

impl NexthopRequester<Ipv4Addr> for TestRequester {
    fn nexthop_resolved(
        &self,
        nexthop: Ipv4Addr,
        nets: &BTreeSet<Ipv4Network>,
    ) {
        self.resolved
            .borrow_mut()
            .push((nexthop, nets.iter().copied().collect()));
    }
}

#[derive(Debug, Default)]
struct TestDecision {
    changed: RefCell<Vec<Ipv4Addr>>,
}

impl DecisionSink<Ipv4Addr> for TestDecision {
    fn igp_nexthop_changed(&self, nexthop: Ipv4Addr) {
        self.changed.borrow_mut().push(nexthop);
    }
}

struct Harness {
    resolver: NextHopResolver<Ipv4Addr>,
    rib_rx: UnboundedReceiver<RibRequestMsg<Ipv4Addr>>,
    requester: Rc<TestRequester>,
    requester_dyn: Rc<dyn NexthopRequester<Ipv4Addr>>,
    decision: Rc<TestDecision>,
}

fn harness() -> Harness {
    let (rib_tx, rib_rx) = mpsc::unbounded_channel();
    let (wakeup_tx, _wakeup_rx) = mpsc::unbounded_channel();
    let mut resolver = NextHopResolver::new(rib_tx, wakeup_tx);
    let requester = Rc::new(TestRequester::default());
    let requester_dyn: Rc<dyn NexthopRequester<Ipv4Addr>> = requester.clone();
    let decision = Rc::new(TestDecision::default());
    resolver.add_decision(decision.clone());
    Harness {
        resolver,
        rib_rx,
        requester,
        requester_dyn,
        decision,
    }
}

impl Harness {
    fn expect_register(&mut self, nexthop: &str) {
        assert_eq!(
            self.rib_rx.try_recv().ok(),
            Some(RibRequestMsg::RegisterInterest { nexthop: addr(nexthop) })
        );
    }

    fn expect_deregister(&mut self, a: &str, prefix_len: u8) {
        assert_eq!(
            self.rib_rx.try_recv().ok(),
            Some(RibRequestMsg::DeregisterInterest {
                addr: addr(a),
                prefix_len
            })
        );
    }

    fn expect_quiet(&mut self) {
        assert!(self.rib_rx.try_recv().is_err());
    }
}

#[test]
fn test_register_coalesce_and_lookup() {
    let mut h = harness();

    // First registration goes to the RIB.
    assert!(h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    ));
    h.expect_register("10.0.0.1");

    // A second registration for the same next hop while the RPC is in
    // flight is coalesced into the pending request.
    assert!(h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("198.51.100.0/24"),
        &h.requester_dyn.clone(),
    ));
    h.expect_quiet();

    // The reply satisfies both requests in one callback.
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );
    let resolved = h.requester.resolved.borrow();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].0, addr("10.0.0.1"));
    assert_eq!(
        resolved[0].1,
        vec![net("192.0.2.0/24"), net("198.51.100.0/24")]
    );
    drop(resolved);

    // Synchronous lookups are answered from the cache without an RPC.
    assert_eq!(h.resolver.lookup(addr("10.0.0.1")), (true, 5));
    h.expect_quiet();

    // A metric change notifies the decision sink exactly once.
    assert!(h.resolver.rib_client_route_info_changed(
        addr("10.0.0.0"),
        24,
        addr("10.0.0.1"),
        6,
    ));
    assert_eq!(*h.decision.changed.borrow(), vec![addr("10.0.0.1")]);
    assert_eq!(h.resolver.lookup(addr("10.0.0.1")), (true, 6));

    // An unchanged metric does not re-run decision.
    assert!(h.resolver.rib_client_route_info_changed(
        addr("10.0.0.0"),
        24,
        addr("10.0.0.1"),
        6,
    ));
    assert_eq!(h.decision.changed.borrow().len(), 1);
}

#[test]
fn test_covered_nexthop_needs_no_rpc() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );

    // Another next hop inside the answered range is a cache hit: no RPC,
    // no callback needed.
    assert!(h.resolver.register_nexthop(
        addr("10.0.0.2"),
        net("203.0.113.0/24"),
        &h.requester_dyn.clone(),
    ));
    h.expect_quiet();
    assert_eq!(h.resolver.lookup(addr("10.0.0.2")), (true, 5));
    assert_eq!(h.requester.resolved.borrow().len(), 1);
}

#[test]
fn test_deregister_releases_range() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );
    h.resolver.register_nexthop(
        addr("10.0.0.2"),
        net("203.0.113.0/24"),
        &h.requester_dyn.clone(),
    );

    // Dropping one of two next hops keeps the entry alive.
    h.resolver.deregister_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_quiet();
    assert_eq!(h.resolver.lookup(addr("10.0.0.2")), (true, 5));

    // Dropping the last one deregisters the range from the RIB.
    h.resolver.deregister_nexthop(
        addr("10.0.0.2"),
        net("203.0.113.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_deregister("10.0.0.0", 24);
    h.resolver.deregister_interest_response(addr("10.0.0.0"), 24, Ok(()));
    h.expect_quiet();
}

#[test]
fn test_deregister_cancels_queued_register() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");

    // Queue a second next hop behind the in-flight request, then cancel
    // it before it is ever sent.
    h.resolver.register_nexthop(
        addr("172.16.0.9"),
        net("198.51.100.0/24"),
        &h.requester_dyn.clone(),
    );
    h.resolver.deregister_nexthop(
        addr("172.16.0.9"),
        net("198.51.100.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_quiet();

    // The cancelled register is still asked (the RIB now tracks it), but
    // with nobody interested the answer is validated away and the
    // registration undone.
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );
    h.expect_register("172.16.0.9");
    h.resolver.register_interest_response(
        addr("172.16.0.9"),
        Ok(RibLookup::new(
            true,
            addr("172.16.0.0"),
            16,
            16,
            addr("172.16.0.9"),
            2,
        )),
    );
    h.expect_deregister("172.16.0.0", 16);

    // Only the first next hop ever produced a callback.
    assert_eq!(h.requester.resolved.borrow().len(), 1);
}

#[test]
fn test_invalidation_requeries_with_stale_answer() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );

    // The RIB invalidates the range: the next hop is re-queried.
    assert!(h.resolver.rib_client_route_info_invalid(addr("10.0.0.0"), 24));
    h.expect_register("10.0.0.1");

    // While the re-query is in flight, lookups return the old answer.
    assert_eq!(h.resolver.lookup(addr("10.0.0.1")), (true, 5));

    // The new answer lands; the metric changed, so decision is notified.
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 25, 25, addr("10.0.0.1"), 9)),
    );
    assert_eq!(h.resolver.lookup(addr("10.0.0.1")), (true, 9));
    assert_eq!(*h.decision.changed.borrow(), vec![addr("10.0.0.1")]);

    // An invalidation for an unknown range reports failure.
    assert!(!h.resolver.rib_client_route_info_invalid(addr("9.9.9.0"), 24));
}

#[test]
fn test_fatal_transport_error() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");

    h.resolver
        .register_interest_response(addr("10.0.0.1"), Err(RpcError::NoFinder));
    assert!(h.resolver.failed());
    assert!(h.resolver.status().is_err());

    // Nothing further is sent once the interface failed.
    h.resolver.register_nexthop(
        addr("10.0.0.2"),
        net("198.51.100.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_quiet();
}

#[tokio::test]
async fn test_transient_resolve_failure_retries() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");

    // A resolve failure before the first success is transient: the
    // request stays queued and is re-sent on retry.
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Err(RpcError::ResolveFailed),
    );
    assert!(h.resolver.status().is_ok());
    h.expect_quiet();

    h.resolver.retry();
    h.expect_register("10.0.0.1");

    // After a success, a resolve failure is fatal.
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );
    h.resolver.register_nexthop(
        addr("10.99.0.1"),
        net("198.51.100.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.99.0.1");
    h.resolver.register_interest_response(
        addr("10.99.0.1"),
        Err(RpcError::ResolveFailed),
    );
    assert!(h.resolver.failed());
}

#[test]
#[should_panic(expected = "unregistered next hop")]
fn test_lookup_unregistered_is_fatal() {
    let h = harness();
    h.resolver.lookup(addr("10.0.0.1"));
}

#[test]
fn test_lookup_without_entry() {
    let mut h = harness();
    h.resolver.register_nexthop(
        addr("10.0.0.1"),
        net("192.0.2.0/24"),
        &h.requester_dyn.clone(),
    );
    h.expect_register("10.0.0.1");
    h.resolver.register_interest_response(
        addr("10.0.0.1"),
        Ok(RibLookup::new(true, addr("10.0.0.0"), 24, 24, addr("10.0.0.1"), 5)),
    );

    // Probing works for covered next hops that were never registered.
    assert_eq!(
        h.resolver.lookup_by_nexthop_without_entry(addr("10.0.0.77")),
        Some((true, 5))
    );
    assert_eq!(
        h.resolver.lookup_by_nexthop_without_entry(addr("172.16.0.1")),
        None
    );
}
