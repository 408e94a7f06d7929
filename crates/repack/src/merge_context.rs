//! Run-scoped lookup context
//!
//! Built once before the first symbol is imported and passed by reference to
//! every stage. Holds the registry, the compiled internalization policy and
//! the qualified-name indexes that resolve references into merged modules.

use log::debug;
use rustc_hash::FxHashSet;

use crate::{
    image::{Module, TypeId},
    internalize::InternalizePolicy,
    module_registry::{ModuleId, ModuleRegistry},
    types::FxIndexMap,
};

/// Immutable state shared by every merge stage
#[derive(Debug)]
pub struct MergeContext {
    pub registry: ModuleRegistry,
    pub policy: InternalizePolicy,
    /// Per module: qualified name -> type
    type_index: FxIndexMap<ModuleId, FxIndexMap<String, TypeId>>,
    /// Across modules in import order; the first declaration of a name wins
    global_index: FxIndexMap<String, (ModuleId, TypeId)>,
    /// Secondary modules whose types are internalization candidates
    internalized_modules: FxHashSet<ModuleId>,
    target_name: String,
}

impl MergeContext {
    pub fn new(registry: ModuleRegistry, policy: InternalizePolicy, target_name: String) -> Self {
        let mut type_index = FxIndexMap::default();
        let mut global_index = FxIndexMap::default();
        let mut internalized_modules = FxHashSet::default();

        for id in registry.import_order() {
            let module = registry.module(id);
            let mut names = FxIndexMap::default();
            for ty in module.type_ids() {
                let name = module.qualified_name(ty);
                global_index.entry(name.clone()).or_insert((id, ty));
                names.entry(name).or_insert(ty);
            }
            debug!("Indexed {} types of module {}", names.len(), module.name);
            type_index.insert(id, names);

            if !registry.is_primary(id) && policy.should_internalize_assembly(&module.name) {
                internalized_modules.insert(id);
            }
        }

        Self {
            registry,
            policy,
            type_index,
            global_index,
            internalized_modules,
            target_name,
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        self.registry.module(id)
    }

    /// Name of the merged module
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Look up a type of one module by qualified name
    pub fn find_type(&self, module: ModuleId, qualified_name: &str) -> Option<TypeId> {
        self.type_index
            .get(&module)
            .and_then(|names| names.get(qualified_name))
            .copied()
    }

    /// Look up a type across every merged module
    pub fn find_type_anywhere(&self, qualified_name: &str) -> Option<(ModuleId, TypeId)> {
        self.global_index.get(qualified_name).copied()
    }

    /// The input module a reference scope names, if it takes part in the merge
    pub fn merged_module(&self, name: &str) -> Option<ModuleId> {
        self.registry.get_id_by_name(name)
    }

    /// Module-granularity internalization decision; always false for the primary
    pub fn internalizes(&self, module: ModuleId) -> bool {
        self.internalized_modules.contains(&module)
    }

    /// Type-granularity internalization decision
    pub fn internalizes_type(&self, module: ModuleId, ty: TypeId) -> bool {
        self.policy
            .should_internalize_type(self.module(module), ty, self.internalizes(module))
    }
}
