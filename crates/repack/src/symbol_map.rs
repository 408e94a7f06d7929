//! Symbol mapping table
//!
//! Maps every symbol of every input module to its counterpart in the merged
//! module. The table is created once per run and consulted by every later
//! stage. Entries are first-write-wins: once a symbol is mapped the mapping
//! never changes, which makes the import order (primary first) the priority
//! order for same-named symbols.

use std::ops::Range;

use log::trace;
use rustc_hash::FxHashSet;

use crate::{
    image::{
        FieldHandle, FieldId, MemberRefId, MethodHandle, MethodId, TypeId, TypeRefId, TypeSig,
    },
    module_registry::ModuleId,
    types::FxIndexMap,
};

/// Identity of a symbol inside its origin module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginSymbol {
    Type(TypeId),
    Method(MethodId),
    Field(FieldId),
    TypeRef(TypeRefId),
    MemberRef(MemberRefId),
    /// Exported type, keyed by qualified name
    Export(String),
}

/// Counterpart of a symbol in the merged module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergedSymbol {
    Type(TypeSig),
    Method(MethodHandle),
    Field(FieldHandle),
}

/// Entry counts per symbol kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SymbolMapStats {
    pub types: usize,
    pub methods: usize,
    pub fields: usize,
    pub type_refs: usize,
    pub member_refs: usize,
    pub exports: usize,
    pub resolved_exports: usize,
}

/// Run-scoped map from (origin module, origin symbol) to merged symbol
#[derive(Debug, Default)]
pub struct SymbolMap {
    entries: FxIndexMap<(ModuleId, OriginSymbol), MergedSymbol>,
    /// Merged type -> every (module, type) mapped onto it, in mapping order
    type_sources: FxIndexMap<TypeId, Vec<(ModuleId, TypeId)>>,
    /// Merged method -> module whose definition created it
    method_origins: FxIndexMap<MethodId, ModuleId>,
    /// Merged method -> instruction ranges copied in from other routines
    block_origins: FxIndexMap<MethodId, Vec<(Range<usize>, ModuleId)>>,
    /// Exports that resolved to a type defined in the merged module
    resolved_exports: FxHashSet<(ModuleId, String)>,
    /// Initializer routines folded into the merged initializer
    consumed_initializers: FxHashSet<(ModuleId, MethodId)>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping unless one exists; returns the mapping that is in effect
    pub fn insert(
        &mut self,
        module: ModuleId,
        origin: OriginSymbol,
        merged: MergedSymbol,
    ) -> MergedSymbol {
        let entry = self.entries.entry((module, origin));
        match entry {
            indexmap::map::Entry::Occupied(existing) => {
                trace!(
                    "Keeping existing mapping for {:?} in {module}: {:?}",
                    existing.key().1,
                    existing.get()
                );
                existing.get().clone()
            }
            indexmap::map::Entry::Vacant(slot) => slot.insert(merged).clone(),
        }
    }

    pub fn get(&self, module: ModuleId, origin: &OriginSymbol) -> Option<&MergedSymbol> {
        // Key construction clones the origin; lookups are not on a hot path
        self.entries.get(&(module, origin.clone()))
    }

    pub fn contains(&self, module: ModuleId, origin: &OriginSymbol) -> bool {
        self.get(module, origin).is_some()
    }

    /// Merged type defined for an origin type definition
    pub fn type_of(&self, module: ModuleId, ty: TypeId) -> Option<TypeId> {
        match self.get(module, &OriginSymbol::Type(ty)) {
            Some(MergedSymbol::Type(TypeSig::Def(id))) => Some(*id),
            _ => None,
        }
    }

    /// Merged type signature for an origin type reference
    pub fn type_ref_of(&self, module: ModuleId, tr: TypeRefId) -> Option<&TypeSig> {
        match self.get(module, &OriginSymbol::TypeRef(tr)) {
            Some(MergedSymbol::Type(sig)) => Some(sig),
            _ => None,
        }
    }

    pub fn method_of(&self, module: ModuleId, method: MethodId) -> Option<MethodHandle> {
        match self.get(module, &OriginSymbol::Method(method)) {
            Some(MergedSymbol::Method(handle)) => Some(*handle),
            _ => None,
        }
    }

    pub fn field_of(&self, module: ModuleId, field: FieldId) -> Option<FieldHandle> {
        match self.get(module, &OriginSymbol::Field(field)) {
            Some(MergedSymbol::Field(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Mapping of a member reference, whichever kind it resolved to
    pub fn member_ref_of(&self, module: ModuleId, member: MemberRefId) -> Option<&MergedSymbol> {
        self.get(module, &OriginSymbol::MemberRef(member))
    }

    /// Where an exported name of a module now lives
    pub fn export_of(&self, module: ModuleId, qualified_name: &str) -> Option<&TypeSig> {
        match self.get(module, &OriginSymbol::Export(qualified_name.to_owned())) {
            Some(MergedSymbol::Type(sig)) => Some(sig),
            _ => None,
        }
    }

    /// Remember that `(module, origin)` was mapped onto merged type `merged`
    pub fn record_type_source(&mut self, merged: TypeId, module: ModuleId, origin: TypeId) {
        let sources = self.type_sources.entry(merged).or_default();
        if !sources.contains(&(module, origin)) {
            sources.push((module, origin));
        }
    }

    /// Every origin type mapped onto a merged type, first mapping first
    pub fn type_sources(&self, merged: TypeId) -> &[(ModuleId, TypeId)] {
        self.type_sources
            .get(&merged)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Module whose declaration created the merged type
    pub fn type_origin(&self, merged: TypeId) -> Option<ModuleId> {
        self.type_sources(merged).first().map(|(module, _)| *module)
    }

    pub fn record_method_origin(&mut self, merged: MethodId, module: ModuleId) {
        self.method_origins.entry(merged).or_insert(module);
    }

    /// Module whose definition created the merged method
    pub fn method_origin(&self, merged: MethodId) -> Option<ModuleId> {
        self.method_origins.get(&merged).copied()
    }

    /// Remember that instructions `range` of merged `method` came from `module`
    pub fn record_block_origin(&mut self, method: MethodId, range: Range<usize>, module: ModuleId) {
        self.block_origins
            .entry(method)
            .or_default()
            .push((range, module));
    }

    /// Module the instruction at `index` was copied from, when it lies in a
    /// recorded block
    pub fn block_origin(&self, method: MethodId, index: usize) -> Option<ModuleId> {
        self.block_origins
            .get(&method)?
            .iter()
            .find(|(range, _)| range.contains(&index))
            .map(|(_, module)| *module)
    }

    pub fn mark_export_resolved(&mut self, module: ModuleId, qualified_name: &str) {
        self.resolved_exports
            .insert((module, qualified_name.to_owned()));
    }

    /// Whether an export resolved to a type defined in the merged module
    pub fn is_export_resolved(&self, module: ModuleId, qualified_name: &str) -> bool {
        self.resolved_exports
            .contains(&(module, qualified_name.to_owned()))
    }

    pub fn mark_initializer_consumed(&mut self, module: ModuleId, method: MethodId) {
        self.consumed_initializers.insert((module, method));
    }

    pub fn is_initializer_consumed(&self, module: ModuleId, method: MethodId) -> bool {
        self.consumed_initializers.contains(&(module, method))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SymbolMapStats {
        let mut stats = SymbolMapStats {
            resolved_exports: self.resolved_exports.len(),
            ..SymbolMapStats::default()
        };
        for (_, origin) in self.entries.keys() {
            match origin {
                OriginSymbol::Type(_) => stats.types += 1,
                OriginSymbol::Method(_) => stats.methods += 1,
                OriginSymbol::Field(_) => stats.fields += 1,
                OriginSymbol::TypeRef(_) => stats.type_refs += 1,
                OriginSymbol::MemberRef(_) => stats.member_refs += 1,
                OriginSymbol::Export(_) => stats.exports += 1,
            }
        }
        stats
    }
}
