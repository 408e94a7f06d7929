//! Native resource tree merging
//!
//! The primary module's tree is the accumulator; each secondary tree is merged
//! into it recursively, key by key. Most leaf collisions keep the existing
//! payload and warn. Two layouts are special: the appendable string blob
//! (id 101 under type 0x3FF), which is concatenated, and version metadata
//! (language 0 or 1033 under type 16, name 1), which the primary owns.

use log::{debug, warn};

use crate::{
    image::{ResourceDirectory, ResourceKey, ResourceNode},
    merge_context::MergeContext,
    module_registry::ModuleId,
    report::MergeWarning,
    types::FxIndexMap,
};

/// Resource type holding the appendable blob
pub const APPENDABLE_TYPE: u32 = 0x3FF;
/// Resource name of the appendable blob
pub const APPENDABLE_NAME: u32 = 101;
/// Resource type of version metadata
pub const VERSION_TYPE: u32 = 16;
/// Resource name of version metadata
pub const VERSION_NAME: u32 = 1;
/// Languages under which version metadata is stored
pub const VERSION_LANGUAGES: [u32; 2] = [0, 1033];

/// Recursive merger that remembers blob offsets and collisions
#[derive(Debug, Default)]
pub struct ResourceMerger {
    offsets: FxIndexMap<ModuleId, u32>,
    warnings: Vec<MergeWarning>,
}

impl ResourceMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `tree` of `module` into `accumulator`
    pub fn merge(
        &mut self,
        accumulator: &mut ResourceDirectory,
        module: ModuleId,
        module_name: &str,
        tree: &ResourceDirectory,
    ) {
        let mut parents = Vec::new();
        self.merge_level(accumulator, tree, &mut parents, module, module_name);
    }

    /// Offset of each module's data inside the concatenated blob
    pub fn offsets(&self) -> &FxIndexMap<ModuleId, u32> {
        &self.offsets
    }

    pub fn warnings(&self) -> &[MergeWarning] {
        &self.warnings
    }

    pub fn into_parts(self) -> (FxIndexMap<ModuleId, u32>, Vec<MergeWarning>) {
        (self.offsets, self.warnings)
    }

    fn merge_level(
        &mut self,
        accumulator: &mut ResourceDirectory,
        incoming: &ResourceDirectory,
        parents: &mut Vec<ResourceKey>,
        module: ModuleId,
        module_name: &str,
    ) {
        for entry in &incoming.entries {
            let Some(existing) = accumulator.get_mut(&entry.key) else {
                accumulator.insert(entry.key.clone(), entry.node.clone());
                continue;
            };

            match (existing, &entry.node) {
                (ResourceNode::Directory(existing), ResourceNode::Directory(subtree)) => {
                    parents.push(entry.key.clone());
                    self.merge_level(existing, subtree, parents, module, module_name);
                    parents.pop();
                }
                (ResourceNode::Data(existing), ResourceNode::Data(payload)) => {
                    if is_appendable(parents, &entry.key) {
                        let offset = u32::try_from(existing.len()).unwrap_or(u32::MAX);
                        existing.extend_from_slice(payload);
                        self.offsets.insert(module, offset);
                        debug!(
                            "Appended {} resource bytes of {module_name} at offset {offset}",
                            payload.len()
                        );
                    } else if is_version_info(parents, &entry.key) {
                        continue;
                    } else {
                        let path = render_path(parents, &entry.key);
                        warn!("Resource collision at {path} from {module_name}; keeping existing");
                        self.warnings.push(MergeWarning::ResourceCollision {
                            module: module_name.to_owned(),
                            path,
                        });
                    }
                }
                _ => {
                    let path = render_path(parents, &entry.key);
                    warn!(
                        "Inconsistent resource tree at {path} from {module_name}; keeping existing"
                    );
                    self.warnings.push(MergeWarning::InconsistentResource {
                        module: module_name.to_owned(),
                        path,
                    });
                }
            }
        }
    }
}

fn is_appendable(parents: &[ResourceKey], key: &ResourceKey) -> bool {
    *key == ResourceKey::Id(APPENDABLE_NAME) && parents == [ResourceKey::Id(APPENDABLE_TYPE)]
}

fn is_version_info(parents: &[ResourceKey], key: &ResourceKey) -> bool {
    matches!(key, ResourceKey::Id(language) if VERSION_LANGUAGES.contains(language))
        && parents == [ResourceKey::Id(VERSION_TYPE), ResourceKey::Id(VERSION_NAME)]
}

fn render_path(parents: &[ResourceKey], key: &ResourceKey) -> String {
    parents
        .iter()
        .chain(std::iter::once(key))
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Merge the resource trees of all input modules, primary first
///
/// Returns `None` when no module carries resources.
pub fn merge_resources(ctx: &MergeContext) -> (Option<ResourceDirectory>, ResourceMerger) {
    let mut merger = ResourceMerger::new();
    let mut accumulator: Option<ResourceDirectory> = None;

    for id in ctx.registry.import_order() {
        let module = ctx.module(id);
        let Some(tree) = &module.resources else {
            continue;
        };
        match &mut accumulator {
            None => accumulator = Some(tree.clone()),
            Some(accumulator) => merger.merge(accumulator, id, &module.name, tree),
        }
    }
    (accumulator, merger)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn leaf(bytes: &[u8]) -> ResourceNode {
        ResourceNode::Data(bytes.to_vec())
    }

    fn dir(entries: Vec<(ResourceKey, ResourceNode)>) -> ResourceNode {
        ResourceNode::Directory(
            entries
                .into_iter()
                .fold(ResourceDirectory::new(), |d, (k, n)| d.with(k, n)),
        )
    }

    fn blob_tree(bytes: &[u8]) -> ResourceDirectory {
        ResourceDirectory::new().with(
            ResourceKey::Id(APPENDABLE_TYPE),
            dir(vec![(ResourceKey::Id(APPENDABLE_NAME), leaf(bytes))]),
        )
    }

    fn version_tree(bytes: &[u8]) -> ResourceDirectory {
        ResourceDirectory::new().with(
            ResourceKey::Id(VERSION_TYPE),
            dir(vec![(
                ResourceKey::Id(VERSION_NAME),
                dir(vec![(ResourceKey::Id(1033), leaf(bytes))]),
            )]),
        )
    }

    fn blob(tree: &ResourceDirectory) -> &[u8] {
        let Some(ResourceNode::Directory(level)) = tree.get(&ResourceKey::Id(APPENDABLE_TYPE))
        else {
            panic!("missing blob type");
        };
        match level.get(&ResourceKey::Id(APPENDABLE_NAME)) {
            Some(ResourceNode::Data(bytes)) => bytes,
            other => panic!("unexpected blob node {other:?}"),
        }
    }

    #[test]
    fn test_appendable_blob_is_concatenated() {
        let mut merged = blob_tree(b"primary");
        let mut merger = ResourceMerger::new();
        merger.merge(&mut merged, ModuleId::new(1), "Lib", &blob_tree(b"-lib"));
        merger.merge(&mut merged, ModuleId::new(2), "Other", &blob_tree(b"-other"));

        assert_eq!(blob(&merged), b"primary-lib-other");
        assert_eq!(merger.offsets().get(&ModuleId::new(1)), Some(&7));
        assert_eq!(merger.offsets().get(&ModuleId::new(2)), Some(&11));
        assert!(merger.warnings().is_empty());
    }

    #[test]
    fn test_version_info_is_skipped_silently() {
        let mut merged = version_tree(b"primary version");
        let mut merger = ResourceMerger::new();
        merger.merge(&mut merged, ModuleId::new(1), "Lib", &version_tree(b"lib version"));

        assert_eq!(merged, version_tree(b"primary version"));
        assert!(merger.warnings().is_empty());
    }

    #[test]
    fn test_leaf_collision_keeps_existing_and_warns() {
        let icon = |bytes: &[u8]| {
            ResourceDirectory::new().with(
                ResourceKey::Id(3),
                dir(vec![(ResourceKey::Name("APPICON".to_owned()), leaf(bytes))]),
            )
        };
        let mut merged = icon(b"first");
        let mut merger = ResourceMerger::new();
        merger.merge(&mut merged, ModuleId::new(1), "Lib", &icon(b"second"));

        assert_eq!(merged, icon(b"first"));
        assert_eq!(
            merger.warnings(),
            &[MergeWarning::ResourceCollision {
                module: "Lib".to_owned(),
                path: "#3/APPICON".to_owned(),
            }]
        );
    }

    #[test]
    fn test_leaf_against_directory_is_inconsistent() {
        let mut merged = ResourceDirectory::new().with(ResourceKey::Id(24), leaf(b"manifest"));
        let incoming = ResourceDirectory::new()
            .with(
                ResourceKey::Id(24),
                dir(vec![(ResourceKey::Id(1), leaf(b"nested"))]),
            )
            .with(ResourceKey::Id(6), leaf(b"strings"));
        let mut merger = ResourceMerger::new();
        merger.merge(&mut merged, ModuleId::new(1), "Lib", &incoming);

        // Non-conflicting keys are still inserted
        assert_eq!(merged.get(&ResourceKey::Id(6)), Some(&leaf(b"strings")));
        assert_eq!(merged.get(&ResourceKey::Id(24)), Some(&leaf(b"manifest")));
        assert_eq!(
            merger.warnings(),
            &[MergeWarning::InconsistentResource {
                module: "Lib".to_owned(),
                path: "#24".to_owned(),
            }]
        );
    }

    #[test]
    fn test_blob_rule_requires_exact_parent() {
        // Same name under a different type is an ordinary collision
        let tree = |bytes: &[u8]| {
            ResourceDirectory::new().with(
                ResourceKey::Id(10),
                dir(vec![(ResourceKey::Id(APPENDABLE_NAME), leaf(bytes))]),
            )
        };
        let mut merged = tree(b"a");
        let mut merger = ResourceMerger::new();
        merger.merge(&mut merged, ModuleId::new(1), "Lib", &tree(b"b"));

        assert_eq!(merged, tree(b"a"));
        assert_eq!(merger.warnings().len(), 1);
        assert!(merger.offsets().is_empty());
    }
}
