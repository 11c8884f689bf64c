//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tern_utils::rpc::RpcError;
use tracing::{error, warn};

// Route-core errors.
#[derive(Debug)]
pub enum Error {
    RibTransport(RpcError),
    RibCommandFailed(RpcError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::RibTransport(error) => {
                error!(%error, "{}", self);
            }
            Error::RibCommandFailed(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RibTransport(..) => {
                write!(f, "fatal transport error talking to the RIB")
            }
            Error::RibCommandFailed(..) => {
                write!(f, "RIB rejected a next-hop request")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RibTransport(error) => Some(error),
            Error::RibCommandFailed(error) => Some(error),
        }
    }
}
