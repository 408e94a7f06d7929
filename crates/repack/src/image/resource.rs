//! Embedded native resource tree

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of a resource tree entry at one level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Id(u32),
    Name(String),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Leaf payload or nested directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceNode {
    Data(Vec<u8>),
    Directory(ResourceDirectory),
}

/// One keyed entry of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub key: ResourceKey,
    pub node: ResourceNode,
}

/// A level of the resource tree; keys are unique among siblings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDirectory {
    #[serde(default)]
    pub entries: Vec<ResourceEntry>,
}

impl ResourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.entries.iter().find(|e| &e.key == key).map(|e| &e.node)
    }

    pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceNode> {
        self.entries
            .iter_mut()
            .find(|e| &e.key == key)
            .map(|e| &mut e.node)
    }

    /// Insert an entry, replacing the node of an existing sibling with the same key
    pub fn insert(&mut self, key: ResourceKey, node: ResourceNode) {
        match self.get_mut(&key) {
            Some(existing) => *existing = node,
            None => self.entries.push(ResourceEntry { key, node }),
        }
    }

    /// Builder-style variant of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, key: ResourceKey, node: ResourceNode) -> Self {
        self.insert(key, node);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
