//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

use crate::client::RouteTask;

// Forwarding-engine client debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    TransactionStart,
    TransactionStarted(u32),
    TransactionDone(usize),
    TaskEnqueue(&'a RouteTask),
    TaskSent(&'a RouteTask),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::TransactionStart => {
                debug!("{}", self);
            }
            Debug::TransactionStarted(tid) => {
                debug!(%tid, "{}", self);
            }
            Debug::TransactionDone(ops) => {
                debug!(%ops, "{}", self);
            }
            Debug::TaskEnqueue(task) | Debug::TaskSent(task) => {
                let data = serde_json::to_string(task).unwrap();
                debug!(%data, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::TransactionStart => {
                write!(f, "starting transaction")
            }
            Debug::TransactionStarted(..) => {
                write!(f, "transaction started")
            }
            Debug::TransactionDone(..) => {
                write!(f, "transaction committed")
            }
            Debug::TaskEnqueue(..) => {
                write!(f, "route change queued")
            }
            Debug::TaskSent(..) => {
                write!(f, "route change sent")
            }
        }
    }
}
