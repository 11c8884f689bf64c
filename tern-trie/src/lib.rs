//
// Copyright (c) The Tern Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ref_trie;
pub mod trie;

pub use ref_trie::{RefTrie, RefTrieIter};
pub use trie::{Trie, TrieIter};
