//! Shared type definitions for the repack crate
//!
//! Hash-map aliases used across components. Every map whose iteration order
//! can reach the merged output is an `IndexMap`/`IndexSet`, so that merging
//! identical inputs produces identical modules.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

/// Type alias for FxHasher-based IndexMap
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Type alias for FxHasher-based IndexSet
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;
