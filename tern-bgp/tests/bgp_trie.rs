//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::rc::Rc;

use ipnetwork::Ipv4Network;
use tern_bgp::attrs::{AsPath, AttrSets, Origin, PathAttrs};
use tern_bgp::route::SubnetRoute;
use tern_bgp::trie::{BgpTrie, ChainedSubnetRoute};
use tern_utils::ip::IpNetworkKind;

fn net(s: &str) -> Ipv4Network {
    Ipv4Network::from_str_net(s).unwrap()
}

fn attrs(asn: u32) -> PathAttrs<Ipv4Addr> {
    PathAttrs::new(
        Origin::Igp,
        AsPath::new(vec![asn]),
        "10.0.0.1".parse().unwrap(),
    )
}

fn chain_len(rep: &Rc<ChainedSubnetRoute<Ipv4Addr>>) -> usize {
    let mut len = 1;
    let mut cur = rep.next().unwrap();
    while !Rc::ptr_eq(&cur, rep) {
        len += 1;
        let next = cur.next().unwrap();
        cur = next;
    }
    len
}

fn chain_nets(rep: &Rc<ChainedSubnetRoute<Ipv4Addr>>) -> Vec<Ipv4Network> {
    let mut nets = vec![rep.net()];
    let mut cur = rep.next().unwrap();
    while !Rc::ptr_eq(&cur, rep) {
        nets.push(cur.net());
        let next = cur.next().unwrap();
        cur = next;
    }
    nets.sort();
    nets
}

#[test]
fn test_chains_by_attribute_set() {
    let mut sets = AttrSets::default();
    let shared = sets.get(&attrs(65001));
    let other = sets.get(&attrs(65002));
    let mut trie = BgpTrie::new();

    for s in ["192.0.2.0/24", "198.51.100.0/24", "203.0.113.0/24"] {
        let route = SubnetRoute::new(net(s), shared.clone(), None, None);
        trie.insert(net(s), route);
    }
    let route = SubnetRoute::new(net("10.0.0.0/8"), other.clone(), None, None);
    trie.insert(net("10.0.0.0/8"), route);

    assert_eq!(trie.route_count(), 4);
    assert_eq!(trie.pathmap().len(), 2);

    let rep = &trie.pathmap()[&shared];
    assert_eq!(chain_len(rep), 3);
    assert_eq!(
        chain_nets(rep),
        vec![
            net("192.0.2.0/24"),
            net("198.51.100.0/24"),
            net("203.0.113.0/24")
        ]
    );
    assert_eq!(chain_len(&trie.pathmap()[&other]), 1);

    // Chain order is independent of trie order; backward links agree.
    let rep = trie.pathmap()[&shared].clone();
    let forward = rep.next().unwrap();
    assert!(Rc::ptr_eq(&forward.prev().unwrap(), &rep));
}

#[test]
fn test_erase_unsplices() {
    let mut sets = AttrSets::default();
    let shared = sets.get(&attrs(65001));
    let mut trie = BgpTrie::new();

    for s in ["192.0.2.0/24", "198.51.100.0/24", "203.0.113.0/24"] {
        let route = SubnetRoute::new(net(s), shared.clone(), None, None);
        trie.insert(net(s), route);
    }

    // Erase the representative itself: the pathmap re-points.
    let rep_net = trie.pathmap()[&shared].net();
    assert!(trie.erase(&rep_net));
    assert_eq!(trie.route_count(), 2);
    assert_eq!(chain_len(&trie.pathmap()[&shared]), 2);
    assert_ne!(trie.pathmap()[&shared].net(), rep_net);

    // Erasing down to nothing drops the pathmap entry.
    let remaining: Vec<_> = chain_nets(&trie.pathmap()[&shared]);
    for n in remaining {
        assert!(trie.erase(&n));
    }
    assert!(trie.pathmap().is_empty());
    assert!(trie.is_empty());
}

#[test]
fn test_replace_moves_chains() {
    let mut sets = AttrSets::default();
    let pa1 = sets.get(&attrs(65001));
    let pa2 = sets.get(&attrs(65002));
    let mut trie = BgpTrie::new();

    let route = SubnetRoute::new(net("192.0.2.0/24"), pa1.clone(), None, None);
    trie.insert(net("192.0.2.0/24"), route);
    let route = SubnetRoute::new(net("198.51.100.0/24"), pa1.clone(), None, None);
    trie.insert(net("198.51.100.0/24"), route);
    assert_eq!(chain_len(&trie.pathmap()[&pa1]), 2);

    // Replacing a prefix's route with different attributes moves it from
    // one chain to another.
    let route = SubnetRoute::new(net("192.0.2.0/24"), pa2.clone(), None, None);
    trie.insert(net("192.0.2.0/24"), route);
    assert_eq!(trie.route_count(), 2);
    assert_eq!(chain_len(&trie.pathmap()[&pa1]), 1);
    assert_eq!(chain_len(&trie.pathmap()[&pa2]), 1);

    let it = trie.find_exact(&net("192.0.2.0/24"));
    assert_eq!(*it.payload().attrs(), pa2);
}

#[test]
fn test_lookup_passthrough() {
    let mut sets = AttrSets::default();
    let pa = sets.get(&attrs(65001));
    let mut trie = BgpTrie::new();

    let route = SubnetRoute::new(net("192.0.2.0/24"), pa.clone(), None, None);
    trie.insert(net("192.0.2.0/24"), route);
    let route = SubnetRoute::new(net("192.0.0.0/16"), pa.clone(), None, None);
    trie.insert(net("192.0.0.0/16"), route);

    let it = trie.find_addr("192.0.2.7".parse().unwrap());
    assert_eq!(it.payload().net(), net("192.0.2.0/24"));
    let it = trie.find_addr("192.0.9.7".parse().unwrap());
    assert_eq!(it.payload().net(), net("192.0.0.0/16"));
}

#[test]
fn test_delete_all_nodes() {
    let mut sets = AttrSets::default();
    let pa1 = sets.get(&attrs(65001));
    let pa2 = sets.get(&attrs(65002));
    let mut trie = BgpTrie::new();

    for (s, pa) in [
        ("192.0.2.0/24", &pa1),
        ("198.51.100.0/24", &pa1),
        ("10.0.0.0/8", &pa2),
    ] {
        let route = SubnetRoute::new(net(s), (*pa).clone(), None, None);
        trie.insert(net(s), route);
    }

    trie.delete_all_nodes();
    assert!(trie.is_empty());
    assert!(trie.pathmap().is_empty());
    assert!(trie.iter().is_end());

    // The trie is usable again afterwards.
    let route = SubnetRoute::new(net("192.0.2.0/24"), pa1.clone(), None, None);
    trie.insert(net("192.0.2.0/24"), route);
    assert_eq!(trie.route_count(), 1);
}
