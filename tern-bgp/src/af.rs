//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use tern_utils::ip;
use tern_utils::ip::{IpAddrKind, IpNetworkKind};

use crate::attrs::{AttrSets, AttrSetsCxt};

// Address-family specific code.
pub trait AddressFamily: std::fmt::Debug + Send + Sync + Sized + 'static {
    const AF: ip::AddressFamily;

    // The type of IP address used by this address family.
    type IpAddr: IpAddrKind<Network = Self::IpNetwork>;
    // The type of IP network used by this address family.
    type IpNetwork: IpNetworkKind<Self::IpAddr>;

    // Get the attribute-interning registry for this address family from the
    // provided `AttrSetsCxt`.
    fn attr_sets(cxt: &mut AttrSetsCxt) -> &mut AttrSets<Self::IpAddr>;
}

#[derive(Debug)]
pub struct Ipv4Unicast;

#[derive(Debug)]
pub struct Ipv6Unicast;

// ===== impl Ipv4Unicast =====

impl AddressFamily for Ipv4Unicast {
    const AF: ip::AddressFamily = ip::AddressFamily::Ipv4;

    type IpAddr = Ipv4Addr;
    type IpNetwork = Ipv4Network;

    fn attr_sets(cxt: &mut AttrSetsCxt) -> &mut AttrSets<Ipv4Addr> {
        &mut cxt.ipv4
    }
}

// ===== impl Ipv6Unicast =====

impl AddressFamily for Ipv6Unicast {
    const AF: ip::AddressFamily = ip::AddressFamily::Ipv6;

    type IpAddr = Ipv6Addr;
    type IpNetwork = Ipv6Network;

    fn attr_sets(cxt: &mut AttrSetsCxt) -> &mut AttrSets<Ipv6Addr> {
        &mut cxt.ipv6
    }
}
