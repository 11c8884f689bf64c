//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Failure classes the RPC transport can report back to a request driver.
//
// The first four come from the transport layer itself (target resolution
// and delivery); `CommandFailed` is an application-level rejection of a
// single command.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RpcError {
    NoFinder,
    SendFailed,
    ResolveFailed,
    NoSuchMethod,
    CommandFailed(String),
}

// ===== impl RpcError =====

impl RpcError {
    // Whether this failure permanently poisons the sending driver. A
    // resolve failure is transient until the first successful exchange with
    // the target, giving it a chance to start up.
    pub fn is_fatal(&self, previously_successful: bool) -> bool {
        match self {
            RpcError::NoFinder
            | RpcError::SendFailed
            | RpcError::NoSuchMethod => true,
            RpcError::ResolveFailed => previously_successful,
            RpcError::CommandFailed(_) => false,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::NoFinder => {
                write!(f, "no finder present")
            }
            RpcError::SendFailed => {
                write!(f, "send failed")
            }
            RpcError::ResolveFailed => {
                write!(f, "target resolution failed")
            }
            RpcError::NoSuchMethod => {
                write!(f, "no such method on target")
            }
            RpcError::CommandFailed(reason) => {
                write!(f, "command failed: {reason}")
            }
        }
    }
}

impl std::error::Error for RpcError {}
