//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_traits::{One, PrimInt, WrappingAdd, WrappingSub, Zero};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Errors that can occur while constructing address and prefix values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IpError {
    InvalidNetmaskLength(u8),
    InvalidString(String),
    InvalidFamily,
    InvalidCast,
}

pub trait IpAddrKind:
    Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpAddr>
    + 'static
{
    // Fixed-width integer representation of the address.
    type Bits: PrimInt + WrappingAdd + WrappingSub + Debug + Send + Sync;
    // The prefix type of the same address family.
    type Network: IpNetworkKind<Self>;

    const AF: AddressFamily;
    const BITLEN: u8;
    const UNSPECIFIED: Self;

    fn get(addr: IpAddr) -> Option<Self>;

    // Like `get`, but surfaces a downcast failure to the caller.
    fn try_get(addr: IpAddr) -> Result<Self, IpError> {
        Self::get(addr).ok_or(IpError::InvalidCast)
    }

    fn to_bits(self) -> Self::Bits;

    fn from_bits(bits: Self::Bits) -> Self;

    // Netmask bit pattern for the given prefix length.
    fn prefix_mask(len: u8) -> Self::Bits {
        if len == 0 {
            Self::Bits::zero()
        } else {
            !Self::Bits::zero() << (Self::BITLEN - len) as usize
        }
    }

    #[must_use]
    fn mask_by_prefix(self, len: u8) -> Self {
        Self::from_bits(self.to_bits() & Self::prefix_mask(len))
    }

    // Numerically previous address, wrapping at zero.
    #[must_use]
    fn pred(self) -> Self {
        Self::from_bits(self.to_bits().wrapping_sub(&Self::Bits::one()))
    }

    // Numerically next address, wrapping at the top of the space.
    #[must_use]
    fn succ(self) -> Self {
        Self::from_bits(self.to_bits().wrapping_add(&Self::Bits::one()))
    }
}

// A prefix: a masked base address plus a prefix length. Values are kept in
// canonical form (host bits zero) by every constructor.
pub trait IpNetworkKind<I: IpAddrKind>:
    Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpNetwork>
    + 'static
{
    fn new(addr: I, prefix_len: u8) -> Result<Self, IpError>;

    fn get(prefix: IpNetwork) -> Option<Self>;

    fn try_get(prefix: IpNetwork) -> Result<Self, IpError> {
        Self::get(prefix).ok_or(IpError::InvalidCast)
    }

    // Parse "addr/len", masking the address into canonical form.
    fn from_str_net(s: &str) -> Result<Self, IpError>;

    fn address_family(&self) -> AddressFamily {
        I::AF
    }

    // The masked base address.
    fn addr(&self) -> I;

    fn prefix_len(&self) -> u8;

    fn is_unicast(&self) -> bool;

    fn is_multicast(&self) -> bool;

    // The all-zeroes, zero-length prefix.
    fn default_route() -> Self {
        match Self::new(I::UNSPECIFIED, 0) {
            Ok(net) => net,
            Err(_) => unreachable!(),
        }
    }

    // Full-length prefix holding a single address.
    fn host_prefix(addr: I) -> Self {
        match Self::new(addr, I::BITLEN) {
            Ok(net) => net,
            Err(_) => unreachable!(),
        }
    }

    fn is_default(&self) -> bool {
        self.prefix_len() == 0
    }

    fn is_host(&self) -> bool {
        self.prefix_len() == I::BITLEN
    }

    fn netmask_bits(&self) -> I::Bits {
        I::prefix_mask(self.prefix_len())
    }

    // The highest address covered by this prefix.
    fn top_addr(&self) -> I {
        I::from_bits(self.addr().to_bits() | !self.netmask_bits())
    }

    // The first address of the upper half of this prefix's range, minus one.
    // This is the split point the trie uses to branch left or right.
    fn midpoint(&self) -> I {
        I::from_bits(self.addr().to_bits() | (!self.netmask_bits() >> 1))
    }

    fn contains_addr(&self, addr: I) -> bool {
        addr.to_bits() & self.netmask_bits() == self.addr().to_bits()
    }

    // Subnet containment: x.contains_net(y) is x ⊇ y.
    fn contains_net(&self, other: &Self) -> bool {
        self.prefix_len() <= other.prefix_len()
            && other.addr().to_bits() & self.netmask_bits()
                == self.addr().to_bits()
    }

    fn is_overlapping(&self, other: &Self) -> bool {
        self.contains_net(other) || other.contains_net(self)
    }

    // Number of common leading bits, capped at the shorter prefix length.
    fn overlap_bits(&self, other: &Self) -> u8 {
        let common =
            (self.addr().to_bits() ^ other.addr().to_bits()).leading_zeros();
        let cap = std::cmp::min(self.prefix_len(), other.prefix_len());
        std::cmp::min(common as u8, cap)
    }

    // The smallest prefix containing both arguments.
    fn common_subnet(x: Self, y: Self) -> Self {
        let len = x.overlap_bits(&y);
        match Self::new(x.addr(), len) {
            Ok(net) => net,
            Err(_) => unreachable!(),
        }
    }

    // Total order where a covering prefix sorts after anything it covers;
    // unrelated prefixes sort by base address.
    fn coverage_cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else if self.contains_net(other) {
            Ordering::Greater
        } else if other.contains_net(self) {
            Ordering::Less
        } else {
            self.addr().cmp(&other.addr())
        }
    }

    // Previous prefix of the same length, treating the prefix as a unit
    // step of its own size. Wraps around the address space.
    #[must_use]
    fn prev(&self) -> Self {
        let len = self.prefix_len();
        if len == 0 {
            return *self;
        }
        let shift = (I::BITLEN - len) as usize;
        let bits = (self.addr().to_bits() >> shift)
            .wrapping_sub(&I::Bits::one())
            << shift;
        match Self::new(I::from_bits(bits), len) {
            Ok(net) => net,
            Err(_) => unreachable!(),
        }
    }

    // Next prefix of the same length. Wraps around the address space.
    #[must_use]
    fn next(&self) -> Self {
        let len = self.prefix_len();
        if len == 0 {
            return *self;
        }
        let shift = (I::BITLEN - len) as usize;
        let bits = (self.addr().to_bits() >> shift)
            .wrapping_add(&I::Bits::one())
            << shift;
        match Self::new(I::from_bits(bits), len) {
            Ok(net) => net,
            Err(_) => unreachable!(),
        }
    }
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    fn class_a_base_prefix() -> Ipv4Network;
    fn class_b_base_prefix() -> Ipv4Network;
    fn class_c_base_prefix() -> Ipv4Network;
    fn multicast_base_prefix() -> Ipv4Network;
    fn experimental_base_prefix() -> Ipv4Network;

    fn is_class_a(&self) -> bool;
    fn is_class_b(&self) -> bool;
    fn is_class_c(&self) -> bool;
    fn is_experimental(&self) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    fn multicast_base_prefix() -> Ipv6Network;
}

// ===== impl IpError =====

impl std::fmt::Display for IpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpError::InvalidNetmaskLength(len) => {
                write!(f, "invalid netmask length: {len}")
            }
            IpError::InvalidString(s) => {
                write!(f, "invalid address string: {s}")
            }
            IpError::InvalidFamily => {
                write!(f, "mismatched address family")
            }
            IpError::InvalidCast => {
                write!(f, "invalid cast between address families")
            }
        }
    }
}

impl std::error::Error for IpError {}

// ===== impl Ipv4Addr =====

impl IpAddrKind for Ipv4Addr {
    type Bits = u32;
    type Network = Ipv4Network;

    const AF: AddressFamily = AddressFamily::Ipv4;
    const BITLEN: u8 = 32;
    const UNSPECIFIED: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

    fn get(addr: IpAddr) -> Option<Ipv4Addr> {
        match addr {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }

    fn to_bits(self) -> u32 {
        self.into()
    }

    fn from_bits(bits: u32) -> Ipv4Addr {
        Ipv4Addr::from(bits)
    }
}

// ===== impl Ipv6Addr =====

impl IpAddrKind for Ipv6Addr {
    type Bits = u128;
    type Network = Ipv6Network;

    const AF: AddressFamily = AddressFamily::Ipv6;
    const BITLEN: u8 = 128;
    const UNSPECIFIED: Ipv6Addr = Ipv6Addr::UNSPECIFIED;

    fn get(addr: IpAddr) -> Option<Ipv6Addr> {
        match addr {
            IpAddr::V4(_) => None,
            IpAddr::V6(addr) => Some(addr),
        }
    }

    fn to_bits(self) -> u128 {
        self.into()
    }

    fn from_bits(bits: u128) -> Ipv6Addr {
        Ipv6Addr::from(bits)
    }
}

// ===== impl Ipv4Network =====

impl IpNetworkKind<Ipv4Addr> for Ipv4Network {
    fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Ipv4Network, IpError> {
        if prefix_len > Ipv4Addr::BITLEN {
            return Err(IpError::InvalidNetmaskLength(prefix_len));
        }
        let addr = addr.mask_by_prefix(prefix_len);
        Ipv4Network::new(addr, prefix_len)
            .map_err(|_| IpError::InvalidNetmaskLength(prefix_len))
    }

    fn get(prefix: IpNetwork) -> Option<Ipv4Network> {
        match prefix {
            IpNetwork::V4(prefix) => Some(prefix),
            IpNetwork::V6(_) => None,
        }
    }

    fn from_str_net(s: &str) -> Result<Ipv4Network, IpError> {
        parse_net::<Ipv4Addr>(s)
    }

    fn addr(&self) -> Ipv4Addr {
        self.ip()
    }

    fn prefix_len(&self) -> u8 {
        self.prefix()
    }

    // All prefixes falling within the class A, B or C address space are
    // unicast. The default route also counts as unicast.
    fn is_unicast(&self) -> bool {
        self.is_default()
            || self.is_class_a()
            || self.is_class_b()
            || self.is_class_c()
    }

    fn is_multicast(&self) -> bool {
        Ipv4Network::multicast_base_prefix().contains_net(self)
    }
}

impl Ipv4NetworkExt for Ipv4Network {
    fn class_a_base_prefix() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(0, 0, 0, 0), 1).unwrap()
    }

    fn class_b_base_prefix() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(128, 0, 0, 0), 2).unwrap()
    }

    fn class_c_base_prefix() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(192, 0, 0, 0), 3).unwrap()
    }

    fn multicast_base_prefix() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(224, 0, 0, 0), 4).unwrap()
    }

    fn experimental_base_prefix() -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(240, 0, 0, 0), 4).unwrap()
    }

    fn is_class_a(&self) -> bool {
        Ipv4Network::class_a_base_prefix().contains_net(self)
    }

    fn is_class_b(&self) -> bool {
        Ipv4Network::class_b_base_prefix().contains_net(self)
    }

    fn is_class_c(&self) -> bool {
        Ipv4Network::class_c_base_prefix().contains_net(self)
    }

    fn is_experimental(&self) -> bool {
        Ipv4Network::experimental_base_prefix().contains_net(self)
    }
}

// ===== impl Ipv6Network =====

impl IpNetworkKind<Ipv6Addr> for Ipv6Network {
    fn new(addr: Ipv6Addr, prefix_len: u8) -> Result<Ipv6Network, IpError> {
        if prefix_len > Ipv6Addr::BITLEN {
            return Err(IpError::InvalidNetmaskLength(prefix_len));
        }
        let addr = addr.mask_by_prefix(prefix_len);
        Ipv6Network::new(addr, prefix_len)
            .map_err(|_| IpError::InvalidNetmaskLength(prefix_len))
    }

    fn get(prefix: IpNetwork) -> Option<Ipv6Network> {
        match prefix {
            IpNetwork::V4(_) => None,
            IpNetwork::V6(prefix) => Some(prefix),
        }
    }

    fn from_str_net(s: &str) -> Result<Ipv6Network, IpError> {
        parse_net::<Ipv6Addr>(s)
    }

    fn addr(&self) -> Ipv6Addr {
        self.ip()
    }

    fn prefix_len(&self) -> u8 {
        self.prefix()
    }

    // All prefixes neither containing nor contained in the multicast
    // address space are unicast, as is the default route.
    fn is_unicast(&self) -> bool {
        if self.is_default() {
            return true;
        }
        let base = Ipv6Network::multicast_base_prefix();
        !self.contains_net(&base) && !base.contains_net(self)
    }

    fn is_multicast(&self) -> bool {
        Ipv6Network::multicast_base_prefix().contains_net(self)
    }
}

impl Ipv6NetworkExt for Ipv6Network {
    fn multicast_base_prefix() -> Ipv6Network {
        Ipv6Network::new(
            Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0),
            8,
        )
        .unwrap()
    }
}

// ===== helper functions =====

fn parse_net<I>(s: &str) -> Result<I::Network, IpError>
where
    I: IpAddrKind,
    I: std::str::FromStr,
{
    let Some((addr, len)) = s.rsplit_once('/') else {
        return Err(IpError::InvalidString(s.to_owned()));
    };
    let addr = match addr.parse::<I>() {
        Ok(addr) => addr,
        // A well-formed address of the other family is a family mismatch,
        // not a malformed string.
        Err(_) if addr.parse::<IpAddr>().is_ok() => {
            return Err(IpError::InvalidFamily);
        }
        Err(_) => return Err(IpError::InvalidString(s.to_owned())),
    };
    let len = len
        .parse::<u8>()
        .map_err(|_| IpError::InvalidString(s.to_owned()))?;
    I::Network::new(addr, len)
}
