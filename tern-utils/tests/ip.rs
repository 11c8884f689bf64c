//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use tern_utils::ip::{
    IpAddrKind, IpError, IpNetworkKind, Ipv4NetworkExt, Ipv6NetworkExt,
};

fn net4(s: &str) -> Ipv4Network {
    Ipv4Network::from_str_net(s).unwrap()
}

fn net6(s: &str) -> Ipv6Network {
    Ipv6Network::from_str_net(s).unwrap()
}

#[test]
fn test_address_type() {
    let default_route = net4("0.0.0.0/0");
    let unicast1 = net4("0.0.0.0/1");
    let unicast2 = net4("12.34.0.0/16");
    let unicast3 = net4("128.0.0.0/2");
    let unicast4 = net4("128.16.0.0/24");
    let unicast5 = net4("192.0.0.0/3");
    let multicast1 = net4("224.0.0.0/4");
    let multicast2 = net4("224.0.0.0/24");
    let multicast3 = net4("224.0.1.0/24");
    let experimental1 = net4("240.0.0.0/4");
    let experimental2 = net4("240.0.1.0/16");
    // Prefixes that include, but are not contained in, the multicast space.
    let odd1 = net4("128.0.0.0/1");
    let odd2 = net4("192.0.0.0/2");

    for net in [
        default_route,
        unicast1,
        unicast2,
        unicast3,
        unicast4,
        unicast5,
    ] {
        assert!(net.is_unicast(), "{net}");
        assert!(!net.is_multicast(), "{net}");
        assert!(!net.is_experimental(), "{net}");
    }
    for net in [multicast1, multicast2, multicast3] {
        assert!(!net.is_unicast(), "{net}");
        assert!(net.is_multicast(), "{net}");
        assert!(!net.is_experimental(), "{net}");
    }
    for net in [experimental1, experimental2] {
        assert!(!net.is_unicast(), "{net}");
        assert!(!net.is_multicast(), "{net}");
        assert!(net.is_experimental(), "{net}");
    }
    for net in [odd1, odd2] {
        assert!(!net.is_unicast(), "{net}");
        assert!(!net.is_multicast(), "{net}");
    }
}

#[test]
fn test_address_type_v6() {
    assert!(net6("::/0").is_unicast());
    assert!(net6("2001:db8::/32").is_unicast());
    assert!(!net6("2001:db8::/32").is_multicast());
    assert!(net6("ff00::/8").is_multicast());
    assert!(net6("ff02::/16").is_multicast());
    assert!(!net6("ff02::/16").is_unicast());
    // Covers the multicast space without being contained in it.
    assert!(!net6("8000::/1").is_unicast());
}

#[test]
fn test_overlap() {
    let net = net4("12.34.0.0/16");
    assert_eq!(net.overlap_bits(&net4("12.35.0.0/16")), 15);
    assert_eq!(net.overlap_bits(&net4("12.34.56.0/24")), 16);
    assert_eq!(
        Ipv4Network::common_subnet(
            net4("12.34.1.0/24"),
            net4("12.34.128.0/24")
        ),
        net4("12.34.0.0/16")
    );
}

#[test]
fn test_common_subnet_contains_both() {
    let a = net4("1.2.1.0/24");
    let b = net4("1.2.128.0/24");
    let common = Ipv4Network::common_subnet(a, b);
    assert!(common.contains_net(&a));
    assert!(common.contains_net(&b));
    // Smallest: one more bit of prefix no longer covers both.
    let longer =
        Ipv4Network::new(common.addr(), common.prefix_len() + 1).unwrap();
    assert!(!(longer.contains_net(&a) && longer.contains_net(&b)));
}

#[test]
fn test_prefix_step_roundtrip() {
    for s in ["128.2.0.0/16", "1.2.3.0/24", "255.255.255.255/32"] {
        let net = net4(s);
        assert_eq!(net.next().prev(), net, "{s}");
        assert_eq!(net.prev().next(), net, "{s}");
    }
    assert_eq!(net4("128.2.0.0/16").prev(), net4("128.1.0.0/16"));
    assert_eq!(net4("128.2.0.0/16").next(), net4("128.3.0.0/16"));
}

#[test]
fn test_string_roundtrip() {
    for s in ["0.0.0.0/0", "1.2.3.0/24", "128.16.64.0/18", "9.9.9.9/32"] {
        let net = net4(s);
        assert_eq!(Ipv4Network::from_str_net(&net.to_string()).unwrap(), net);
    }
    let net = net6("2001:db8:1234::/48");
    assert_eq!(Ipv6Network::from_str_net(&net.to_string()).unwrap(), net);
}

#[test]
fn test_canonical_form() {
    // Host bits are masked away on construction.
    let net = <Ipv4Network as IpNetworkKind<Ipv4Addr>>::new(
        Ipv4Addr::new(1, 2, 3, 4),
        24,
    )
    .unwrap();
    assert_eq!(net, net4("1.2.3.0/24"));
    assert_eq!(net.addr(), Ipv4Addr::new(1, 2, 3, 0));
}

#[test]
fn test_range_bounds() {
    let net = net4("1.2.128.0/17");
    assert_eq!(net.top_addr(), Ipv4Addr::new(1, 2, 255, 255));
    assert_eq!(net.midpoint(), Ipv4Addr::new(1, 2, 191, 255));
    assert!(net.contains_addr(Ipv4Addr::new(1, 2, 200, 1)));
    assert!(!net.contains_addr(Ipv4Addr::new(1, 2, 1, 1)));
    assert!(net4("1.2.0.0/16").contains_net(&net));
    assert!(!net.contains_net(&net4("1.2.0.0/16")));
}

#[test]
fn test_coverage_order() {
    // A covering prefix sorts after anything it covers; unrelated prefixes
    // sort by base address.
    let a = net4("128.16.0.0/24");
    let b = net4("128.16.64.0/24");
    let c = net4("128.16.0.0/16");
    let d = net4("128.17.0.0/24");
    assert_eq!(a.coverage_cmp(&b), Ordering::Less);
    assert_eq!(b.coverage_cmp(&c), Ordering::Less);
    assert_eq!(c.coverage_cmp(&a), Ordering::Greater);
    assert_eq!(c.coverage_cmp(&d), Ordering::Less);
    assert_eq!(a.coverage_cmp(&a), Ordering::Equal);
}

#[test]
fn test_construction_errors() {
    assert_eq!(
        Ipv4Network::from_str_net("1.2.3.0/33"),
        Err(IpError::InvalidNetmaskLength(33))
    );
    assert!(matches!(
        Ipv4Network::from_str_net("1.2.3.0"),
        Err(IpError::InvalidString(_))
    ));
    assert!(matches!(
        Ipv4Network::from_str_net("foo/8"),
        Err(IpError::InvalidString(_))
    ));
    assert!(matches!(
        Ipv6Network::from_str_net("2001:db8::/129"),
        Err(IpError::InvalidNetmaskLength(129))
    ));
    // An address of the wrong family is a mismatch, not a bad string.
    assert_eq!(
        Ipv4Network::from_str_net("2001:db8::/32"),
        Err(IpError::InvalidFamily)
    );
    assert_eq!(
        Ipv6Network::from_str_net("1.2.3.0/24"),
        Err(IpError::InvalidFamily)
    );
}

#[test]
fn test_family_casts() {
    let v4: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
    let v6: IpAddr = Ipv6Addr::LOCALHOST.into();
    assert_eq!(Ipv4Addr::get(v4), Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(Ipv4Addr::get(v6), None);
    assert_eq!(Ipv4Addr::try_get(v6), Err(IpError::InvalidCast));
    assert_eq!(Ipv6Addr::try_get(v6), Ok(Ipv6Addr::LOCALHOST));
}

#[test]
fn test_host_prefix() {
    let net = Ipv4Network::host_prefix(Ipv4Addr::new(1, 2, 3, 4));
    assert_eq!(net, net4("1.2.3.4/32"));
    assert!(net.is_host());
    assert!(Ipv4Network::default_route().is_default());
}
