//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod client;
pub mod debug;
pub mod error;

pub use client::{FibClient, FibRequestMsg, RouteTask};
