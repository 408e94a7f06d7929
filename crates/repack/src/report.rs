//! Non-fatal findings of a merge run

use std::fmt;

use crate::{symbol_map::SymbolMapStats, types::FxIndexMap};

/// Recoverable condition encountered while merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// Two modules contribute different payloads for the same resource leaf
    ResourceCollision { module: String, path: String },
    /// A resource leaf and a resource directory share a key
    InconsistentResource { module: String, path: String },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceCollision { module, path } => write!(
                f,
                "Resource {path} from module '{module}' collides with an existing resource; \
                 keeping the existing payload"
            ),
            Self::InconsistentResource { module, path } => write!(
                f,
                "Resource {path} from module '{module}' is a leaf on one side and a directory \
                 on the other; keeping the existing entry"
            ),
        }
    }
}

/// Two non-internalized modules define the same public type
///
/// The first declaration wins and absorbs the members the second one adds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolConflict {
    pub name: String,
    pub kept_from: String,
    pub merged_from: String,
}

/// An internalized type renamed to avoid a name collision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedType {
    pub module: String,
    pub original: String,
    pub renamed: String,
}

/// Everything a successful run has to say besides the merged module
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub warnings: Vec<MergeWarning>,
    pub conflicts: Vec<SymbolConflict>,
    pub renamed: Vec<RenamedType>,
    /// Module name -> offset of its data inside the concatenated resource blob
    pub resource_offsets: FxIndexMap<String, u32>,
    pub stats: SymbolMapStats,
}

impl MergeReport {
    pub fn has_findings(&self) -> bool {
        !self.warnings.is_empty() || !self.conflicts.is_empty()
    }
}
