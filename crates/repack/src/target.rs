//! The module under construction
//!
//! `TargetModule` wraps the merged [`Module`] with the lookup caches the
//! importer needs: declared types by qualified name, interned type and member
//! references, and assembly references keyed by name.

use cow_utils::CowUtils;
use log::{debug, trace};

use crate::{
    image::{
        AssemblyRefId, FieldId, MemberRef, MemberRefId, MethodId, Module, ModuleVersion, Scope,
        TypeDef, TypeId, TypeRef, TypeRefId, TypeSig, TypeVisibility, MODULE_TYPE_NAME,
        join_namespace,
    },
    merge_context::MergeContext,
    module_registry::ModuleId,
    types::FxIndexMap,
};

/// Where an assembly reference of an input module points after merging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeResolution {
    /// One of the modules being merged
    Merged(ModuleId),
    /// A module outside the merge, referenced by the target
    External(AssemblyRefId),
}

/// Merged module plus its lookup caches
#[derive(Debug)]
pub struct TargetModule {
    module: Module,
    type_names: FxIndexMap<String, TypeId>,
    type_refs: FxIndexMap<TypeRef, TypeRefId>,
    member_refs: FxIndexMap<MemberRef, MemberRefId>,
    /// Lowercased name -> reference
    assembly_refs: FxIndexMap<String, AssemblyRefId>,
}

impl TargetModule {
    /// Start an empty target that inherits identity details from the primary
    pub fn new(name: &str, primary: &Module) -> Self {
        let mut module = Module::new(name);
        module.version = primary.version;
        module.runtime.clone_from(&primary.runtime);
        module.kind = primary.kind;
        Self {
            module,
            type_names: FxIndexMap::default(),
            type_refs: FxIndexMap::default(),
            member_refs: FxIndexMap::default(),
            assembly_refs: FxIndexMap::default(),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Mutable access for bodies, visibility and other non-identity details
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    /// Add a type definition and index it by qualified name
    pub fn declare_type(&mut self, def: TypeDef) -> TypeId {
        let id = self.module.add_type(def);
        let name = self.module.qualified_name(id);
        trace!("Declared target type {name}");
        self.type_names.insert(name, id);
        id
    }

    pub fn find_type(&self, qualified_name: &str) -> Option<TypeId> {
        self.type_names.get(qualified_name).copied()
    }

    /// Qualified name a type would get when declared in `container`
    pub fn qualified_name_in(&self, container: Option<TypeId>, namespace: &str, name: &str) -> String {
        match container {
            Some(outer) => format!("{}/{name}", self.module.qualified_name(outer)),
            None => join_namespace(namespace, name),
        }
    }

    /// A simple name for `name` that does not collide inside `container`
    ///
    /// Produces `<Prefix>Name`, then `<Prefix>Name_2`, `<Prefix>Name_3`, ...
    pub fn unique_type_name(
        &self,
        container: Option<TypeId>,
        namespace: &str,
        name: &str,
        prefix: &str,
    ) -> String {
        let base = format!("<{prefix}>{name}");
        let mut candidate = base.clone();
        let mut counter = 2;
        while self
            .find_type(&self.qualified_name_in(container, namespace, &candidate))
            .is_some()
        {
            candidate = format!("{base}_{counter}");
            counter += 1;
        }
        candidate
    }

    /// The reserved module-level type, created on first use
    pub fn module_type(&mut self) -> TypeId {
        match self.find_type(MODULE_TYPE_NAME) {
            Some(id) => id,
            None => {
                debug!("Creating {MODULE_TYPE_NAME} in target module");
                self.declare_type(TypeDef::new("", MODULE_TYPE_NAME, TypeVisibility::NotPublic))
            }
        }
    }

    /// A method of `ty` with the given name and signature
    pub fn find_method(
        &self,
        ty: TypeId,
        name: &str,
        params: &[TypeSig],
        ret: Option<&TypeSig>,
    ) -> Option<MethodId> {
        self.module.type_def(ty).methods.iter().copied().find(|&m| {
            let def = self.module.method(m);
            def.name == name && def.params == params && def.ret.as_ref() == ret
        })
    }

    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.module
            .type_def(ty)
            .fields
            .iter()
            .copied()
            .find(|&f| self.module.field(f).name == name)
    }

    /// Reuse an identical type reference or add a new one
    pub fn intern_type_ref(&mut self, tr: TypeRef) -> TypeRefId {
        if let Some(&id) = self.type_refs.get(&tr) {
            return id;
        }
        let id = self.module.add_type_ref(tr.clone());
        self.type_refs.insert(tr, id);
        id
    }

    /// Reuse an identical member reference or add a new one
    pub fn intern_member_ref(&mut self, mr: MemberRef) -> MemberRefId {
        if let Some(&id) = self.member_refs.get(&mr) {
            return id;
        }
        let id = self.module.add_member_ref(mr.clone());
        self.member_refs.insert(mr, id);
        id
    }

    /// Reference an external module by name, keeping the highest version seen
    pub fn merge_assembly_ref(&mut self, name: &str, version: ModuleVersion) -> AssemblyRefId {
        let key = name.cow_to_ascii_lowercase().into_owned();
        if let Some(&id) = self.assembly_refs.get(&key) {
            let existing = &mut self.module.assembly_refs[id.index()];
            if version > existing.version {
                debug!(
                    "Raising reference to {name} from {} to {version}",
                    existing.version
                );
                existing.version = version;
            }
            return id;
        }
        let id = self.module.add_assembly_ref(name, version);
        self.assembly_refs.insert(key, id);
        id
    }

    /// Resolve an input module's assembly reference against the merge
    ///
    /// References to merged modules disappear; everything else becomes a
    /// reference of the target.
    pub fn merge_scope(
        &mut self,
        ctx: &MergeContext,
        module: ModuleId,
        assembly: AssemblyRefId,
    ) -> ScopeResolution {
        let reference = ctx.module(module).assembly_ref(assembly);
        match ctx.merged_module(&reference.name) {
            Some(merged) => ScopeResolution::Merged(merged),
            None => ScopeResolution::External(
                self.merge_assembly_ref(&reference.name, reference.version),
            ),
        }
    }

    /// Reference to an external top-level type
    pub fn external_type_ref(
        &mut self,
        assembly: AssemblyRefId,
        namespace: &str,
        name: &str,
    ) -> TypeRefId {
        self.intern_type_ref(TypeRef {
            scope: Scope::Assembly(assembly),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })
    }
}
