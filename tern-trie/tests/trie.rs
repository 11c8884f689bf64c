//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tern_trie::Trie;
use tern_utils::ip::IpNetworkKind;

fn net(s: &str) -> Ipv4Network {
    Ipv4Network::from_str_net(s).unwrap()
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn build(nets: &[&str]) -> Trie<Ipv4Addr, String> {
    let mut trie = Trie::new();
    for s in nets {
        trie.insert(net(s), s.to_string());
    }
    trie.validate();
    trie
}

fn keys(trie: &Trie<Ipv4Addr, String>) -> Vec<Ipv4Network> {
    trie.iter().map(|(net, _)| net).collect()
}

#[test]
fn test_longest_match() {
    let mut trie = build(&[
        "1.2.1.0/24",
        "1.2.0.0/16",
        "1.2.3.0/24",
        "1.2.128.0/24",
        "1.2.0.0/20",
    ]);

    let lookup = |trie: &Trie<Ipv4Addr, String>, a: &str| {
        trie.find_addr(addr(a)).map(|(net, _)| net)
    };
    assert_eq!(lookup(&trie, "1.2.1.5"), Some(net("1.2.1.0/24")));
    assert_eq!(lookup(&trie, "1.2.2.5"), Some(net("1.2.0.0/20")));
    assert_eq!(lookup(&trie, "1.2.129.0"), Some(net("1.2.128.0/24")));
    assert_eq!(lookup(&trie, "2.0.0.1"), None);

    trie.erase(&net("1.2.0.0/20"));
    trie.validate();
    assert_eq!(lookup(&trie, "1.2.2.5"), Some(net("1.2.0.0/16")));
}

#[test]
fn test_find_returns_exact_payload() {
    let mut trie = build(&["1.2.0.0/16", "1.2.1.0/24"]);
    assert_eq!(trie.find_exact(&net("1.2.1.0/24")).unwrap(), "1.2.1.0/24");
    assert_eq!(trie.find_exact(&net("1.2.2.0/24")), None);

    // Replacing a full node keeps the most recent payload.
    let replaced = trie.insert(net("1.2.1.0/24"), "new".to_string());
    assert!(replaced);
    assert_eq!(trie.find_exact(&net("1.2.1.0/24")).unwrap(), "new");
    assert_eq!(trie.route_count(), 2);
}

#[test]
fn test_find_bounds() {
    let mut trie = build(&["1.2.0.0/16", "1.2.128.0/24", "1.2.192.0/24"]);

    assert_eq!(
        trie.find_bounds(addr("1.2.190.1")),
        (addr("1.2.129.0"), addr("1.2.191.255"))
    );
    assert_eq!(
        trie.find_bounds(addr("1.2.192.1")),
        (addr("1.2.192.0"), addr("1.2.192.255"))
    );

    trie.erase(&net("1.2.128.0/24"));
    trie.validate();
    assert_eq!(
        trie.find_bounds(addr("1.2.128.1")),
        (addr("1.2.0.0"), addr("1.2.191.255"))
    );
}

#[test]
fn test_find_bounds_no_route() {
    let trie: Trie<Ipv4Addr, String> = Trie::new();
    assert_eq!(
        trie.find_bounds(addr("10.0.0.1")),
        (addr("0.0.0.0"), addr("255.255.255.255"))
    );

    // An uncovered address between two routes.
    let trie = build(&["1.2.0.0/24", "1.2.2.0/24"]);
    assert_eq!(
        trie.find_bounds(addr("1.2.1.1")),
        (addr("1.2.1.0"), addr("1.2.1.255"))
    );
}

#[test]
fn test_iteration_order() {
    let trie = build(&[
        "1.2.1.0/24",
        "1.2.0.0/16",
        "1.2.3.0/24",
        "1.2.128.0/24",
        "1.2.0.0/20",
    ]);

    // Postorder: both subtrees before the node, empty internals skipped.
    assert_eq!(
        keys(&trie),
        vec![
            net("1.2.1.0/24"),
            net("1.2.3.0/24"),
            net("1.2.0.0/20"),
            net("1.2.128.0/24"),
            net("1.2.0.0/16"),
        ]
    );
}

#[test]
fn test_insert_erase_restores() {
    let mut trie = build(&[
        "1.2.1.0/24",
        "1.2.0.0/16",
        "1.2.3.0/24",
        "1.2.128.0/24",
    ]);
    let before = keys(&trie);

    trie.insert(net("1.2.0.0/20"), "x".to_string());
    trie.validate();
    assert_eq!(trie.route_count(), 5);

    trie.erase(&net("1.2.0.0/20"));
    trie.validate();
    assert_eq!(trie.route_count(), 4);
    assert_eq!(keys(&trie), before);
    for a in ["1.2.1.5", "1.2.2.5", "1.2.129.0"] {
        let restored = build(&[
            "1.2.1.0/24",
            "1.2.0.0/16",
            "1.2.3.0/24",
            "1.2.128.0/24",
        ]);
        assert_eq!(
            trie.find_addr(addr(a)).map(|(n, _)| n),
            restored.find_addr(addr(a)).map(|(n, _)| n)
        );
    }
}

#[test]
fn test_erase_missing_is_noop() {
    let mut trie = build(&["1.2.0.0/16"]);
    assert!(!trie.erase(&net("1.2.1.0/24")));
    assert_eq!(trie.route_count(), 1);
    // The covering route is untouched.
    assert!(trie.find_exact(&net("1.2.0.0/16")).is_some());
}

#[test]
fn test_search_subtree() {
    let trie = build(&[
        "1.2.1.0/24",
        "1.2.0.0/16",
        "1.2.3.0/24",
        "1.2.128.0/24",
    ]);

    let under: Vec<_> =
        trie.search_subtree(net("1.2.0.0/22")).map(|(n, _)| n).collect();
    assert_eq!(under, vec![net("1.2.1.0/24"), net("1.2.3.0/24")]);

    let under: Vec<_> =
        trie.search_subtree(net("1.2.0.0/16")).map(|(n, _)| n).collect();
    assert_eq!(under.len(), 4);

    let under: Vec<_> =
        trie.search_subtree(net("9.0.0.0/8")).map(|(n, _)| n).collect();
    assert!(under.is_empty());
}

#[test]
fn test_lower_bound() {
    let trie = build(&["1.2.1.0/24", "1.2.3.0/24"]);

    // Exact full match returns the node itself.
    assert_eq!(
        trie.lower_bound(&net("1.2.1.0/24")).map(|(n, _)| n),
        Some(net("1.2.1.0/24"))
    );
    // No exact match: first subtree sorting after the key.
    assert_eq!(
        trie.lower_bound(&net("1.2.2.0/24")).map(|(n, _)| n),
        Some(net("1.2.3.0/24"))
    );
    assert_eq!(trie.lower_bound(&net("9.9.0.0/16")).map(|(n, _)| n), None);
}

#[test]
fn test_find_less_specific() {
    let trie = build(&["1.2.0.0/16", "1.2.1.0/24"]);
    assert_eq!(
        trie.find_less_specific(&net("1.2.1.0/24")).map(|(n, _)| n),
        Some(net("1.2.0.0/16"))
    );
    assert_eq!(
        trie.find_less_specific(&net("1.2.0.0/16")).map(|(n, _)| n),
        None
    );
}

#[test]
fn test_delete_all_nodes() {
    let mut trie = build(&["1.2.0.0/16", "1.2.1.0/24", "9.9.9.0/24"]);
    trie.delete_all_nodes();
    assert!(trie.is_empty());
    assert_eq!(keys(&trie), Vec::<Ipv4Network>::new());
    trie.insert(net("1.2.0.0/16"), "again".to_string());
    trie.validate();
    assert_eq!(trie.route_count(), 1);
}

#[test]
fn test_ipv6_trie() {
    use std::net::Ipv6Addr;
    use ipnetwork::Ipv6Network;

    let mut trie: Trie<Ipv6Addr, String> = Trie::new();
    for s in ["2001:db8::/32", "2001:db8:1::/48", "2001:db8:1:2::/64"] {
        trie.insert(
            Ipv6Network::from_str_net(s).unwrap(),
            s.to_string(),
        );
    }
    trie.validate();

    let lookup = |a: &str| {
        trie.find_addr(a.parse().unwrap()).map(|(net, _)| net)
    };
    assert_eq!(
        lookup("2001:db8:1:2::9"),
        Some(Ipv6Network::from_str_net("2001:db8:1:2::/64").unwrap())
    );
    assert_eq!(
        lookup("2001:db8:1:3::9"),
        Some(Ipv6Network::from_str_net("2001:db8:1::/48").unwrap())
    );
    assert_eq!(
        lookup("2001:db8:9::1"),
        Some(Ipv6Network::from_str_net("2001:db8::/32").unwrap())
    );
    assert_eq!(lookup("2001:db9::1"), None);
}

#[test]
fn test_replace_does_not_grow() {
    let mut trie = build(&["1.2.0.0/16"]);
    assert!(trie.insert(net("1.2.0.0/16"), "v2".to_string()));
    assert!(trie.insert(net("1.2.0.0/16"), "v3".to_string()));
    assert_eq!(trie.route_count(), 1);
    assert_eq!(trie.find_exact(&net("1.2.0.0/16")).unwrap(), "v3");
}

#[test]
fn test_erase_empty_internal_is_noop() {
    // 1.2.1.0/24 and 1.2.3.0/24 hang off an empty 1.2.0.0/22 node.
    let mut trie = build(&["1.2.1.0/24", "1.2.3.0/24"]);
    assert!(!trie.erase(&net("1.2.0.0/22")));
    assert_eq!(trie.route_count(), 2);
    trie.validate();
}
