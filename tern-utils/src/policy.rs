//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// Set of opaque numeric tags a policy layer attaches to routes. The core
// only stores and compares them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PolicyTags(BTreeSet<u32>);

// Handle to a compiled policy-filter program. Routes record which filter
// generation last processed them; evaluation happens in the policy layer.
#[derive(Clone, Debug, Default)]
pub struct PolicyFilterRef(Option<Arc<PolicyFilter>>);

#[derive(Debug)]
pub struct PolicyFilter {
    pub generation: u32,
}

// ===== impl PolicyTags =====

impl PolicyTags {
    pub fn new() -> PolicyTags {
        PolicyTags::default()
    }

    pub fn insert(&mut self, tag: u32) -> bool {
        self.0.insert(tag)
    }

    pub fn remove(&mut self, tag: u32) -> bool {
        self.0.remove(&tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for PolicyTags {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> PolicyTags {
        PolicyTags(iter.into_iter().collect())
    }
}

// ===== impl PolicyFilterRef =====

impl PolicyFilterRef {
    pub fn new(filter: Arc<PolicyFilter>) -> PolicyFilterRef {
        PolicyFilterRef(Some(filter))
    }

    // Unset handle, meaning the route was never touched by a filter bank.
    pub fn unset() -> PolicyFilterRef {
        PolicyFilterRef(None)
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn generation(&self) -> Option<u32> {
        self.0.as_ref().map(|filter| filter.generation)
    }
}

// Handles compare by filter identity, not by content.
impl PartialEq for PolicyFilterRef {
    fn eq(&self, other: &PolicyFilterRef) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for PolicyFilterRef {}
