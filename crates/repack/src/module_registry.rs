//! Module registry for tracking input modules during a merge
//!
//! The ModuleRegistry is the single source of truth for module identity
//! throughout the merge. It assigns module IDs in input order, remembers which
//! module is primary, and resolves module names case-insensitively.

use std::fmt;

use cow_utils::CowUtils;
use sha2::{Digest, Sha256};

use crate::{error::MergeError, image::Module, types::FxIndexMap};

/// Unique identifier for an input module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A loaded module handed to the merge, flagged primary or secondary
#[derive(Debug, Clone)]
pub struct InputModule {
    pub module: Module,
    pub primary: bool,
}

impl InputModule {
    pub fn primary(module: Module) -> Self {
        Self {
            module,
            primary: true,
        }
    }

    pub fn secondary(module: Module) -> Self {
        Self {
            module,
            primary: false,
        }
    }
}

/// Complete information about a registered module
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Unique identifier for this module
    pub id: ModuleId,
    /// The read-only module image
    pub module: Module,
    /// Whether this is the primary module
    pub is_primary: bool,
    /// SHA-256 of the module identity (hex-encoded)
    pub content_hash: String,
}

/// Central registry for input modules
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    /// Map from ModuleId to module information, in input order
    modules: FxIndexMap<ModuleId, ModuleInfo>,
    /// Map from lowercased module name to ModuleId
    name_to_id: FxIndexMap<String, ModuleId>,
    /// The primary module, once registered
    primary: Option<ModuleId>,
}

impl ModuleRegistry {
    /// Create a new empty module registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every input in order and require exactly one primary
    pub fn from_inputs(inputs: Vec<InputModule>) -> Result<Self, MergeError> {
        let mut registry = Self::new();
        for input in inputs {
            registry.add_module(input.module, input.primary)?;
        }
        if registry.primary.is_none() {
            return Err(MergeError::NoPrimaryModule);
        }
        Ok(registry)
    }

    /// Add a module to the registry
    ///
    /// The module is validated first; everything downstream indexes its
    /// tables directly.
    pub fn add_module(&mut self, module: Module, is_primary: bool) -> Result<ModuleId, MergeError> {
        module.validate()?;
        let key = module.name.cow_to_ascii_lowercase().into_owned();
        if self.name_to_id.contains_key(&key) {
            return Err(MergeError::DuplicateModule { name: module.name });
        }
        if is_primary && let Some(existing) = self.primary {
            return Err(MergeError::MultiplePrimaryModules {
                first: self.modules[&existing].module.name.clone(),
                second: module.name,
            });
        }

        let id = ModuleId::new(u32::try_from(self.modules.len()).unwrap_or(u32::MAX));
        let content_hash = identity_hash(&module);
        log::debug!(
            "Registered module {} as {id} ({}, hash {})",
            module.name,
            if is_primary { "primary" } else { "secondary" },
            &content_hash[..8]
        );

        if is_primary {
            self.primary = Some(id);
        }
        self.name_to_id.insert(key, id);
        self.modules.insert(
            id,
            ModuleInfo {
                id,
                module,
                is_primary,
                content_hash,
            },
        );
        Ok(id)
    }

    /// Get the module image by ID
    ///
    /// Panics if the ID was not issued by this registry.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[&id].module
    }

    /// Get module ID by name (case-insensitive)
    pub fn get_id_by_name(&self, name: &str) -> Option<ModuleId> {
        self.name_to_id
            .get(name.cow_to_ascii_lowercase().as_ref())
            .copied()
    }

    /// The primary module ID, if one was registered
    pub fn primary_id(&self) -> Option<ModuleId> {
        self.primary
    }

    pub fn is_primary(&self, id: ModuleId) -> bool {
        self.primary == Some(id)
    }

    /// Secondary modules in input order
    pub fn secondary_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules
            .keys()
            .copied()
            .filter(move |id| Some(*id) != self.primary)
    }

    /// Primary first, then secondaries in input order
    pub fn import_order(&self) -> Vec<ModuleId> {
        self.primary
            .into_iter()
            .chain(self.secondary_ids())
            .collect()
    }

    /// Iterate over all modules in input order
    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &ModuleInfo)> {
        self.modules.iter()
    }

    /// Check if a module with the given name exists in the registry
    pub fn has_module(&self, name: &str) -> bool {
        self.get_id_by_name(name).is_some()
    }

    /// Get total number of modules in the registry
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Get all module names in input order
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.values().map(|info| info.module.name.as_str())
    }

    /// Digest over every module's identity hash in import order
    ///
    /// Identical inputs produce identical digests, which keeps the merged
    /// module version id stable across runs.
    pub fn combined_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for id in self.import_order() {
            hasher.update(self.modules[&id].content_hash.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Hash of the parts of a module that identify it
fn identity_hash(module: &Module) -> String {
    let mut hasher = Sha256::new();
    hasher.update(module.name.as_bytes());
    hasher.update(module.version.to_string().as_bytes());
    for id in module.type_ids() {
        hasher.update(module.qualified_name(id).as_bytes());
        hasher.update([0]);
    }
    for method in &module.methods {
        hasher.update(method.name.as_bytes());
        let len = method.body.as_ref().map_or(0, |b| b.instructions.len());
        hasher.update((len as u64).to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> Module {
        Module::new(name)
    }

    #[test]
    fn test_module_registry_basic_operations() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.is_empty());

        let primary = registry.add_module(module("App"), true).unwrap();
        let lib = registry.add_module(module("Lib"), false).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());

        // Lookups are case-insensitive
        assert_eq!(registry.get_id_by_name("app"), Some(primary));
        assert_eq!(registry.get_id_by_name("LIB"), Some(lib));
        assert!(registry.has_module("Lib"));
        assert!(!registry.has_module("Other"));

        assert_eq!(registry.primary_id(), Some(primary));
        assert!(registry.is_primary(primary));
        assert!(!registry.is_primary(lib));

        let names: Vec<&str> = registry.module_names().collect();
        assert_eq!(names, vec!["App", "Lib"]);
    }

    #[test]
    fn test_import_order_puts_primary_first() {
        let registry = ModuleRegistry::from_inputs(vec![
            InputModule::secondary(module("A")),
            InputModule::primary(module("Main")),
            InputModule::secondary(module("B")),
        ])
        .unwrap();

        let order: Vec<&str> = registry
            .import_order()
            .into_iter()
            .map(|id| registry.module(id).name.as_str())
            .collect();
        assert_eq!(order, vec!["Main", "A", "B"]);
    }

    #[test]
    fn test_duplicate_module_detection() {
        let mut registry = ModuleRegistry::new();
        registry.add_module(module("Lib"), true).unwrap();
        let err = registry.add_module(module("lib"), false).unwrap_err();
        assert_eq!(
            err,
            MergeError::DuplicateModule {
                name: "lib".to_owned()
            }
        );
    }

    #[test]
    fn test_primary_designation_is_required_and_unique() {
        let err = ModuleRegistry::from_inputs(vec![InputModule::secondary(module("A"))])
            .unwrap_err();
        assert_eq!(err, MergeError::NoPrimaryModule);

        let err = ModuleRegistry::from_inputs(vec![
            InputModule::primary(module("A")),
            InputModule::primary(module("B")),
        ])
        .unwrap_err();
        assert!(matches!(err, MergeError::MultiplePrimaryModules { .. }));
    }

    #[test]
    fn test_malformed_module_is_not_registered() {
        let mut broken = module("Broken");
        broken.types.push(crate::image::TypeDef {
            declaring: Some(crate::image::TypeId::new(3)),
            ..crate::image::TypeDef::new("Ns", "Orphan", crate::image::TypeVisibility::Public)
        });

        let mut registry = ModuleRegistry::new();
        let err = registry.add_module(broken, true).unwrap_err();
        assert!(matches!(err, MergeError::MalformedModule { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_combined_hash_is_deterministic() {
        let build = || {
            ModuleRegistry::from_inputs(vec![
                InputModule::primary(module("Main")),
                InputModule::secondary(module("Lib")),
            ])
            .unwrap()
        };
        let first = build().combined_hash();
        assert_eq!(first, build().combined_hash());
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
