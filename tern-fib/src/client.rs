//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use enum_as_inner::EnumAsInner;
use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use tern_utils::rpc::RpcError;
use tern_utils::task::TimeoutTask;
use tokio::sync::mpsc::UnboundedSender;

use crate::debug::Debug;
use crate::error::Error;

// Maximum number of route operations batched into one transaction.
pub const DFLT_MAX_TRANSACTION_OPS: usize = 100;

// Delay before re-trying a transaction start that could not be delivered.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

// A queued route change waiting to be pushed to the forwarding engine.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteTask {
    AddRoute4 {
        dest: Ipv4Network,
        gw: Ipv4Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    },
    DeleteRoute4 {
        dest: Ipv4Network,
    },
    AddRoute6 {
        dest: Ipv6Network,
        gw: Ipv6Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    },
    DeleteRoute6 {
        dest: Ipv6Network,
    },
}

// Requests sent to the forwarding-engine target. Entry operations carry
// the transaction they belong to.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[derive(EnumAsInner)]
pub enum FibRequestMsg {
    StartTransaction,
    AddEntry4 {
        tid: u32,
        dest: Ipv4Network,
        gw: Ipv4Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    },
    DeleteEntry4 {
        tid: u32,
        dest: Ipv4Network,
    },
    AddEntry6 {
        tid: u32,
        dest: Ipv6Network,
        gw: Ipv6Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    },
    DeleteEntry6 {
        tid: u32,
        dest: Ipv6Network,
    },
    CommitTransaction {
        tid: u32,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TransactionState {
    Idle,
    Starting,
    Sending,
    Committing,
}

// Pushes route changes to a forwarding-engine target through the
// transactional sequence start / entry operations / commit.
//
// Route changes are queued as tasks and drained in insertion order, at
// most `max_ops` per transaction and with at most one transaction in
// flight. Fatal transport failures latch the client into a failed state
// that refuses further work; a target that has not come up yet is retried
// after a short delay.
#[derive(Debug)]
pub struct FibClient {
    fib_tx: UnboundedSender<FibRequestMsg>,
    wakeup_tx: UnboundedSender<()>,
    state: TransactionState,
    tid: u32,
    tasks: VecDeque<RouteTask>,
    // Tasks applied in the current transaction, dropped on commit.
    completed: Vec<RouteTask>,
    max_ops: usize,
    op_count: usize,
    enabled: bool,
    failed: Option<String>,
    previously_successful: bool,
    retry_timer: Option<TimeoutTask>,
}

// ===== impl FibClient =====

impl FibClient {
    // `fib_tx` carries requests to the forwarding engine; `wakeup_tx`
    // receives a unit message when a retry timer fires, upon which the
    // owner must call `retry`.
    pub fn new(
        fib_tx: UnboundedSender<FibRequestMsg>,
        wakeup_tx: UnboundedSender<()>,
        max_ops: usize,
    ) -> FibClient {
        FibClient {
            fib_tx,
            wakeup_tx,
            state: TransactionState::Idle,
            tid: 0,
            tasks: VecDeque::new(),
            completed: vec![],
            max_ops,
            op_count: 0,
            enabled: true,
            failed: None,
            previously_successful: false,
            retry_timer: None,
        }
    }

    // When disabled the client silently discards route changes instead of
    // sending them.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_route4(
        &mut self,
        dest: Ipv4Network,
        gw: Ipv4Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    ) {
        if self.failed.is_some() {
            return;
        }
        let task = RouteTask::AddRoute4 {
            dest,
            gw,
            ifname,
            vifname,
            metric,
            admin_distance,
            protocol_origin,
        };
        Debug::TaskEnqueue(&task).log();
        self.tasks.push_back(task);
        self.start();
    }

    pub fn delete_route4(&mut self, dest: Ipv4Network) {
        if self.failed.is_some() {
            return;
        }
        let task = RouteTask::DeleteRoute4 { dest };
        Debug::TaskEnqueue(&task).log();
        self.tasks.push_back(task);
        self.start();
    }

    pub fn add_route6(
        &mut self,
        dest: Ipv6Network,
        gw: Ipv6Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
        protocol_origin: String,
    ) {
        if self.failed.is_some() {
            return;
        }
        let task = RouteTask::AddRoute6 {
            dest,
            gw,
            ifname,
            vifname,
            metric,
            admin_distance,
            protocol_origin,
        };
        Debug::TaskEnqueue(&task).log();
        self.tasks.push_back(task);
        self.start();
    }

    pub fn delete_route6(&mut self, dest: Ipv6Network) {
        if self.failed.is_some() {
            return;
        }
        let task = RouteTask::DeleteRoute6 { dest };
        Debug::TaskEnqueue(&task).log();
        self.tasks.push_back(task);
        self.start();
    }

    // Number of route changes still queued for transmission.
    pub fn tasks_count(&self) -> usize {
        self.tasks.len()
    }

    // Whether any route changes are queued or awaiting acknowledgement.
    pub fn tasks_pending(&self) -> bool {
        !self.tasks.is_empty() || self.state != TransactionState::Idle
    }

    pub fn failed(&self) -> bool {
        self.failed.is_some()
    }

    // Health of the forwarding-engine interface: `Err` carries the reason
    // for a fatal transport failure.
    pub fn status(&self) -> Result<(), &str> {
        match &self.failed {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    // Reply to a start-transaction request.
    pub fn start_transaction_response(&mut self, result: Result<u32, RpcError>) {
        assert_eq!(
            self.state,
            TransactionState::Starting,
            "unexpected transaction start reply"
        );
        match result {
            Ok(tid) => {
                self.previously_successful = true;
                self.tid = tid;
                self.state = TransactionState::Sending;
                Debug::TransactionStarted(tid).log();
                self.send_current();
            }
            Err(error) => {
                if error.is_fatal(self.previously_successful) {
                    self.fail(error);
                    self.state = TransactionState::Idle;
                } else if matches!(error, RpcError::ResolveFailed) {
                    // The target has not come up yet; give it a chance.
                    self.state = TransactionState::Idle;
                    self.schedule_retry();
                } else {
                    Error::StartFailed(error).log();
                    self.state = TransactionState::Idle;
                    self.finish();
                }
            }
        }
    }

    // Reply to an entry operation.
    pub fn command_response(&mut self, result: Result<(), RpcError>) {
        assert_eq!(
            self.state,
            TransactionState::Sending,
            "unexpected command reply"
        );
        match result {
            Ok(()) => {
                if let Some(task) = self.tasks.pop_front() {
                    self.completed.push(task);
                }
                self.op_count += 1;
                if self.tasks.is_empty() || self.op_count >= self.max_ops {
                    self.commit();
                } else {
                    self.send_current();
                }
            }
            Err(error) => {
                if error.is_fatal(self.previously_successful) {
                    self.fail(error);
                    self.state = TransactionState::Idle;
                    self.completed.clear();
                } else {
                    // The target rejected this change; drop it and commit
                    // what went through.
                    Error::CommandFailed(error).log();
                    self.tasks.pop_front();
                    self.commit();
                }
            }
        }
    }

    // Reply to a commit-transaction request.
    pub fn commit_response(&mut self, result: Result<(), RpcError>) {
        assert_eq!(
            self.state,
            TransactionState::Committing,
            "unexpected commit reply"
        );
        match result {
            Ok(()) => {
                Debug::TransactionDone(self.completed.len()).log();
                self.state = TransactionState::Idle;
                self.finish();
            }
            Err(error) => {
                if error.is_fatal(self.previously_successful) {
                    self.fail(error);
                } else {
                    Error::CommitFailed(error).log();
                }
                self.state = TransactionState::Idle;
                self.finish();
            }
        }
    }

    // Kick the state machine again after a retry timer fired.
    pub fn retry(&mut self) {
        self.retry_timer = None;
        self.start();
    }

    // ===== internal helpers =====

    fn start(&mut self) {
        if self.state != TransactionState::Idle {
            return;
        }
        if self.tasks.is_empty() || self.failed.is_some() {
            return;
        }
        if !self.enabled {
            self.tasks.clear();
            return;
        }
        self.op_count = 0;
        Debug::TransactionStart.log();
        if self.fib_tx.send(FibRequestMsg::StartTransaction).is_err() {
            // Could not hand the request to the transport; try again
            // shortly.
            self.schedule_retry();
            return;
        }
        self.state = TransactionState::Starting;
    }

    fn send_current(&mut self) {
        let Some(task) = self.tasks.front() else {
            self.commit();
            return;
        };
        Debug::TaskSent(task).log();
        let msg = self.task_msg(task);
        if self.fib_tx.send(msg).is_err() {
            self.fail(RpcError::SendFailed);
            self.state = TransactionState::Idle;
            self.completed.clear();
        }
    }

    fn commit(&mut self) {
        self.state = TransactionState::Committing;
        if self
            .fib_tx
            .send(FibRequestMsg::CommitTransaction { tid: self.tid })
            .is_err()
        {
            self.fail(RpcError::SendFailed);
            self.state = TransactionState::Idle;
            self.completed.clear();
        }
    }

    // End of a transaction: drop the applied tasks and start another
    // transaction if more work is queued.
    fn finish(&mut self) {
        self.completed.clear();
        if !self.tasks.is_empty() {
            self.start();
        }
    }

    fn fail(&mut self, error: RpcError) {
        Error::Transport(error.clone()).log();
        self.failed = Some(error.to_string());
    }

    fn schedule_retry(&mut self) {
        let wakeup_tx = self.wakeup_tx.clone();
        self.retry_timer = Some(TimeoutTask::new(RETRY_DELAY, move || {
            async move {
                let _ = wakeup_tx.send(());
            }
        }));
    }

    fn task_msg(&self, task: &RouteTask) -> FibRequestMsg {
        let tid = self.tid;
        match task {
            RouteTask::AddRoute4 {
                dest,
                gw,
                ifname,
                vifname,
                metric,
                admin_distance,
                protocol_origin,
            } => FibRequestMsg::AddEntry4 {
                tid,
                dest: *dest,
                gw: *gw,
                ifname: ifname.clone(),
                vifname: vifname.clone(),
                metric: *metric,
                admin_distance: *admin_distance,
                protocol_origin: protocol_origin.clone(),
            },
            RouteTask::DeleteRoute4 { dest } => {
                FibRequestMsg::DeleteEntry4 { tid, dest: *dest }
            }
            RouteTask::AddRoute6 {
                dest,
                gw,
                ifname,
                vifname,
                metric,
                admin_distance,
                protocol_origin,
            } => FibRequestMsg::AddEntry6 {
                tid,
                dest: *dest,
                gw: *gw,
                ifname: ifname.clone(),
                vifname: vifname.clone(),
                metric: *metric,
                admin_distance: *admin_distance,
                protocol_origin: protocol_origin.clone(),
            },
            RouteTask::DeleteRoute6 { dest } => {
                FibRequestMsg::DeleteEntry6 { tid, dest: *dest }
            }
        }
    }
}
