//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tern_utils::ip::IpAddrKind;
use tracing::{debug, debug_span};

// Route-core debug messages.
#[derive(Debug)]
pub enum Debug<I: IpAddrKind> {
    NexthopRegister(I),
    NexthopDeregister(I),
    NexthopCacheHit(I),
    NexthopResolved(I, bool, u32),
    NexthopMetricChanged(I, u32),
    NexthopInvalidated(I, u8),
    RibRegisterSent(I),
    RibDeregisterSent(I, u8),
}

// ===== impl Debug =====

impl<I> Debug<I>
where
    I: IpAddrKind,
{
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::NexthopRegister(nexthop)
            | Debug::NexthopDeregister(nexthop)
            | Debug::NexthopCacheHit(nexthop) => {
                debug_span!("nexthop", %nexthop).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NexthopResolved(nexthop, resolves, metric) => {
                debug_span!("nexthop", %nexthop).in_scope(|| {
                    debug!(%resolves, %metric, "{}", self);
                });
            }
            Debug::NexthopMetricChanged(nexthop, metric) => {
                debug_span!("nexthop", %nexthop).in_scope(|| {
                    debug!(%metric, "{}", self);
                });
            }
            Debug::NexthopInvalidated(addr, prefix_len) => {
                debug!(%addr, %prefix_len, "{}", self);
            }
            Debug::RibRegisterSent(nexthop) => {
                debug_span!("nexthop", %nexthop).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::RibDeregisterSent(addr, prefix_len) => {
                debug!(%addr, %prefix_len, "{}", self);
            }
        }
    }
}

impl<I> std::fmt::Display for Debug<I>
where
    I: IpAddrKind,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::NexthopRegister(..) => {
                write!(f, "next-hop registration")
            }
            Debug::NexthopDeregister(..) => {
                write!(f, "next-hop deregistration")
            }
            Debug::NexthopCacheHit(..) => {
                write!(f, "next-hop answered from cache")
            }
            Debug::NexthopResolved(..) => {
                write!(f, "next-hop resolution from RIB")
            }
            Debug::NexthopMetricChanged(..) => {
                write!(f, "next-hop metric changed")
            }
            Debug::NexthopInvalidated(..) => {
                write!(f, "RIB invalidated cached range")
            }
            Debug::RibRegisterSent(..) => {
                write!(f, "register interest sent to RIB")
            }
            Debug::RibDeregisterSent(..) => {
                write!(f, "deregister interest sent to RIB")
            }
        }
    }
}
