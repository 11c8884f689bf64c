//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tern_utils::rpc::RpcError;
use tracing::{error, warn};

// Forwarding-engine client errors.
#[derive(Debug)]
pub enum Error {
    Transport(RpcError),
    StartFailed(RpcError),
    CommandFailed(RpcError),
    CommitFailed(RpcError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::Transport(error) => {
                error!(%error, "{}", self);
            }
            Error::StartFailed(error) | Error::CommitFailed(error) => {
                error!(%error, "{}", self);
            }
            Error::CommandFailed(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Transport(..) => {
                write!(f, "fatal transport error talking to the target")
            }
            Error::StartFailed(..) => {
                write!(f, "could not start transaction")
            }
            Error::CommandFailed(..) => {
                write!(f, "route operation failed")
            }
            Error::CommitFailed(..) => {
                write!(f, "could not commit transaction")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(error)
            | Error::StartFailed(error)
            | Error::CommandFailed(error)
            | Error::CommitFailed(error) => Some(error),
        }
    }
}
