//! Type import pipeline
//!
//! Copies the types of every input module into the target module and records
//! each copy in the [`SymbolMap`]. Import runs in three sweeps over all
//! modules in import order (primary first, then secondaries in input order,
//! declaration order within a module):
//!
//! 1. declare type shells, so that first-write-wins priority follows the
//!    import order and every type has a target identity before any signature
//!    mentions it;
//! 2. populate base types, interfaces, fields and method signatures;
//! 3. copy method bodies, once every member a body can reference exists.
//!
//! Every step checks the symbol map before doing work, which makes import
//! idempotent and lets cyclic type graphs terminate.

use log::{debug, trace, warn};
use rustc_hash::FxHashSet;

use crate::{
    error::MergeError,
    forwarders::{self, ChainEnd},
    image::{
        CallSig, FieldDef, FieldHandle, FieldId, Instruction, MemberRef, MemberRefId,
        MemberRefKind, MethodBody, MethodDef, MethodHandle, MethodId, Operand, Scope, TypeDef, TypeId,
        TypeRef, TypeRefId, TypeSig, join_namespace, listing::render_sig,
    },
    merge_context::MergeContext,
    module_registry::ModuleId,
    report::{MergeReport, RenamedType, SymbolConflict},
    symbol_map::{MergedSymbol, OriginSymbol, SymbolMap},
    target::{ScopeResolution, TargetModule},
};

/// Imports symbols of the input modules into the target module
#[derive(Debug)]
pub struct TypeImporter<'a> {
    ctx: &'a MergeContext,
    pub(crate) map: SymbolMap,
    pub(crate) target: TargetModule,
    pub(crate) report: MergeReport,
    populated: FxHashSet<(ModuleId, TypeId)>,
    imported_bodies: FxHashSet<(ModuleId, MethodId)>,
}

impl<'a> TypeImporter<'a> {
    pub fn new(ctx: &'a MergeContext, target: TargetModule) -> Self {
        Self {
            ctx,
            map: SymbolMap::new(),
            target,
            report: MergeReport::default(),
            populated: FxHashSet::default(),
            imported_bodies: FxHashSet::default(),
        }
    }

    pub fn ctx(&self) -> &'a MergeContext {
        self.ctx
    }

    pub fn map(&self) -> &SymbolMap {
        &self.map
    }

    pub fn target(&self) -> &TargetModule {
        &self.target
    }

    pub fn into_parts(self) -> (TargetModule, SymbolMap, MergeReport) {
        (self.target, self.map, self.report)
    }

    /// Import every type of every input module
    pub fn run(&mut self) -> Result<(), MergeError> {
        let ctx = self.ctx;
        let order = ctx.registry.import_order();

        for &module in &order {
            for ty in ctx.module(module).top_level_types() {
                let internalize = ctx.internalizes_type(module, ty);
                self.declare(module, ty, None, internalize);
            }
        }
        for &module in &order {
            for ty in ctx.module(module).type_ids() {
                self.populate(module, ty)?;
            }
        }
        for &module in &order {
            for method in ctx.module(module).method_ids() {
                self.import_body(module, method)?;
            }
        }

        debug!(
            "Imported {} types into {} ({} conflicts, {} renamed)",
            self.target.module().types.len(),
            self.target.module().name,
            self.report.conflicts.len(),
            self.report.renamed.len()
        );
        Ok(())
    }

    /// Import one type into `container` and populate its members
    ///
    /// Re-importing a type that is already mapped returns the existing target
    /// type. Method bodies are left to [`run`](Self::run), which copies them
    /// once all members exist.
    pub fn import(
        &mut self,
        module: ModuleId,
        ty: TypeId,
        container: Option<TypeId>,
        internalize: bool,
    ) -> Result<TypeId, MergeError> {
        let target_ty = self.declare(module, ty, container, internalize);
        self.populate(module, ty)?;
        Ok(target_ty)
    }

    /// Target type of an input type, declaring it and its declaring types if needed
    pub fn ensure_declared(&mut self, module: ModuleId, ty: TypeId) -> TypeId {
        if let Some(existing) = self.map.type_of(module, ty) {
            return existing;
        }
        let container = self
            .ctx
            .module(module)
            .type_def(ty)
            .declaring
            .map(|outer| self.ensure_declared(module, outer));
        // Declaring the outer type declares its nested types too
        if let Some(existing) = self.map.type_of(module, ty) {
            return existing;
        }
        let internalize = self.ctx.internalizes_type(module, ty);
        self.declare(module, ty, container, internalize)
    }

    fn declare(
        &mut self,
        module: ModuleId,
        ty: TypeId,
        container: Option<TypeId>,
        internalize: bool,
    ) -> TypeId {
        if let Some(existing) = self.map.type_of(module, ty) {
            return existing;
        }
        let ctx = self.ctx;
        let source = ctx.module(module);
        let def = source.type_def(ty);

        let target_ty = if def.is_module_type() {
            self.target.module_type()
        } else {
            let qualified = self
                .target
                .qualified_name_in(container, &def.namespace, &def.name);
            match self.target.find_type(&qualified) {
                None => self.declare_shell(def, container, &def.name, internalize),
                Some(_) if internalize => {
                    let renamed = self.target.unique_type_name(
                        container,
                        &def.namespace,
                        &def.name,
                        &source.name,
                    );
                    debug!("Renaming internalized type {qualified} of {} to {renamed}", source.name);
                    self.report.renamed.push(RenamedType {
                        module: source.name.clone(),
                        original: qualified,
                        renamed: renamed.clone(),
                    });
                    self.declare_shell(def, container, &renamed, internalize)
                }
                Some(existing) => {
                    let kept_from = self.map.type_origin(existing).map_or_else(
                        || self.target.module().name.clone(),
                        |origin| ctx.module(origin).name.clone(),
                    );
                    warn!(
                        "Public type {qualified} is defined by both '{kept_from}' and '{}'; \
                         keeping the first definition",
                        source.name
                    );
                    self.report.conflicts.push(SymbolConflict {
                        name: qualified,
                        kept_from,
                        merged_from: source.name.clone(),
                    });
                    existing
                }
            }
        };

        self.map.insert(
            module,
            OriginSymbol::Type(ty),
            MergedSymbol::Type(TypeSig::Def(target_ty)),
        );
        self.map.record_type_source(target_ty, module, ty);

        for &nested in &def.nested {
            let internalize = ctx.internalizes_type(module, nested);
            self.declare(module, nested, Some(target_ty), internalize);
        }
        target_ty
    }

    fn declare_shell(
        &mut self,
        def: &TypeDef,
        container: Option<TypeId>,
        name: &str,
        internalize: bool,
    ) -> TypeId {
        let visibility = if internalize {
            def.visibility.internalized()
        } else {
            def.visibility
        };
        let mut shell = TypeDef::new(&def.namespace, name, visibility);
        shell.is_serializable = def.is_serializable;
        shell.attributes.clone_from(&def.attributes);
        shell.declaring = container;
        self.target.declare_type(shell)
    }

    /// Fill in base type, interfaces, fields and method signatures
    fn populate(&mut self, module: ModuleId, ty: TypeId) -> Result<(), MergeError> {
        if !self.populated.insert((module, ty)) {
            return Ok(());
        }
        let ctx = self.ctx;
        let source = ctx.module(module);
        let def = source.type_def(ty);
        let target_ty = self.ensure_declared(module, ty);

        // Only the declaration that created the target type shapes its hierarchy
        if self.map.type_sources(target_ty).first() == Some(&(module, ty)) {
            let base = def
                .base
                .as_ref()
                .map(|base| self.import_sig(module, base))
                .transpose()?;
            let interfaces = self.import_sigs(module, &def.interfaces)?;
            let shell = self.target.module_mut().type_def_mut(target_ty);
            shell.base = base;
            shell.interfaces = interfaces;
        }

        for &field in &def.fields {
            self.import_field(module, field, target_ty)?;
        }
        for &method in &def.methods {
            if def.is_module_type()
                && !ctx.registry.is_primary(module)
                && source.method(method).is_initializer()
            {
                trace!("Leaving initializer of {} to the combiner", source.name);
                continue;
            }
            self.import_method_shell(module, method, target_ty)?;
        }
        Ok(())
    }

    fn import_field(
        &mut self,
        module: ModuleId,
        field: FieldId,
        target_ty: TypeId,
    ) -> Result<FieldId, MergeError> {
        if let Some(FieldHandle::Def(existing)) = self.map.field_of(module, field) {
            return Ok(existing);
        }
        let def = self.ctx.module(module).field(field);
        let id = match self.target.find_field(target_ty, &def.name) {
            Some(existing) => existing,
            None => {
                let field_type = self.import_sig(module, &def.field_type)?;
                self.target.module_mut().add_field(FieldDef {
                    name: def.name.clone(),
                    access: def.access,
                    is_static: def.is_static,
                    field_type,
                    declaring: target_ty,
                })
            }
        };
        self.map.insert(
            module,
            OriginSymbol::Field(field),
            MergedSymbol::Field(FieldHandle::Def(id)),
        );
        Ok(id)
    }

    fn import_method_shell(
        &mut self,
        module: ModuleId,
        method: MethodId,
        target_ty: TypeId,
    ) -> Result<MethodId, MergeError> {
        if let Some(MethodHandle::Def(existing)) = self.map.method_of(module, method) {
            return Ok(existing);
        }
        let def = self.ctx.module(module).method(method);
        let params = self.import_sigs(module, &def.params)?;
        let ret = def
            .ret
            .as_ref()
            .map(|ret| self.import_sig(module, ret))
            .transpose()?;

        let id = match self
            .target
            .find_method(target_ty, &def.name, &params, ret.as_ref())
        {
            Some(existing) => existing,
            None => {
                let id = self.target.module_mut().add_method(MethodDef {
                    name: def.name.clone(),
                    access: def.access,
                    is_static: def.is_static,
                    params,
                    ret,
                    body: None,
                    declaring: target_ty,
                });
                self.map.record_method_origin(id, module);
                id
            }
        };
        self.map.insert(
            module,
            OriginSymbol::Method(method),
            MergedSymbol::Method(MethodHandle::Def(id)),
        );
        Ok(id)
    }

    /// Copy a method body into the target method created for it
    fn import_body(&mut self, module: ModuleId, method: MethodId) -> Result<(), MergeError> {
        if !self.imported_bodies.insert((module, method)) {
            return Ok(());
        }
        let def = self.ctx.module(module).method(method);
        let Some(body) = &def.body else {
            return Ok(());
        };
        // Deferred initializers have no mapping
        let Some(MethodHandle::Def(target_method)) = self.map.method_of(module, method) else {
            return Ok(());
        };
        // A member merged into an existing definition keeps the winner's body
        if self.map.method_origin(target_method) != Some(module) {
            return Ok(());
        }

        let instructions = body
            .instructions
            .iter()
            .map(|instr| {
                Ok(Instruction::new(
                    instr.opcode,
                    self.import_operand(module, &instr.operand)?,
                ))
            })
            .collect::<Result<Vec<_>, MergeError>>()?;
        let locals = self.import_sigs(module, &body.locals)?;
        self.target.module_mut().method_mut(target_method).body =
            Some(MethodBody { instructions, locals });
        Ok(())
    }

    /// Remap an operand of an input instruction into the target
    ///
    /// Symbol operands go through the symbol map; branch targets and literals
    /// are copied as they are.
    pub fn import_operand(
        &mut self,
        module: ModuleId,
        operand: &Operand,
    ) -> Result<Operand, MergeError> {
        Ok(match operand {
            Operand::Type(sig) => Operand::Type(self.import_sig(module, sig)?),
            Operand::Method(handle) => Operand::Method(self.import_method_handle(module, *handle)?),
            Operand::Field(handle) => Operand::Field(self.import_field_handle(module, *handle)?),
            Operand::Signature(sig) => Operand::Signature(CallSig {
                params: self.import_sigs(module, &sig.params)?,
                ret: sig
                    .ret
                    .as_ref()
                    .map(|ret| self.import_sig(module, ret))
                    .transpose()?,
            }),
            other => other.clone(),
        })
    }

    pub fn import_method_handle(
        &mut self,
        module: ModuleId,
        handle: MethodHandle,
    ) -> Result<MethodHandle, MergeError> {
        match handle {
            MethodHandle::Def(method) => self
                .map
                .method_of(module, method)
                .ok_or_else(|| self.unknown(module, self.method_name(module, method))),
            MethodHandle::Ref(member) => match self.import_member_ref(module, member)? {
                MergedSymbol::Method(handle) => Ok(handle),
                _ => Err(self.unknown(module, self.member_name(module, member))),
            },
        }
    }

    pub fn import_field_handle(
        &mut self,
        module: ModuleId,
        handle: FieldHandle,
    ) -> Result<FieldHandle, MergeError> {
        match handle {
            FieldHandle::Def(field) => self.map.field_of(module, field).ok_or_else(|| {
                let source = self.ctx.module(module);
                let def = source.field(field);
                self.unknown(
                    module,
                    format!("{}::{}", source.qualified_name(def.declaring), def.name),
                )
            }),
            FieldHandle::Ref(member) => match self.import_member_ref(module, member)? {
                MergedSymbol::Field(handle) => Ok(handle),
                _ => Err(self.unknown(module, self.member_name(module, member))),
            },
        }
    }

    /// Remap a type signature into the target
    pub fn import_sig(&mut self, module: ModuleId, sig: &TypeSig) -> Result<TypeSig, MergeError> {
        Ok(match sig {
            TypeSig::Def(ty) => TypeSig::Def(self.ensure_declared(module, *ty)),
            TypeSig::Ref(tr) => self.import_type_ref(module, *tr)?,
            TypeSig::Array(element) => TypeSig::Array(Box::new(self.import_sig(module, element)?)),
            TypeSig::Generic { base, args } => TypeSig::Generic {
                base: Box::new(self.import_sig(module, base)?),
                args: self.import_sigs(module, args)?,
            },
        })
    }

    fn import_sigs(&mut self, module: ModuleId, sigs: &[TypeSig]) -> Result<Vec<TypeSig>, MergeError> {
        sigs.iter().map(|sig| self.import_sig(module, sig)).collect()
    }

    /// Resolve a type reference: merged modules yield definitions, anything
    /// else an interned target reference
    fn import_type_ref(&mut self, module: ModuleId, tr: TypeRefId) -> Result<TypeSig, MergeError> {
        if let Some(sig) = self.map.type_ref_of(module, tr) {
            return Ok(sig.clone());
        }
        let ctx = self.ctx;
        let source = ctx.module(module);
        let tref = source.type_ref(tr);

        let sig = match tref.scope {
            Scope::Nested(outer) => match self.import_type_ref(module, outer)? {
                TypeSig::Def(outer_ty) => TypeSig::Def(
                    self.find_nested(outer_ty, &tref.name)
                        .ok_or_else(|| self.unknown(module, source.type_ref_name(tr)))?,
                ),
                TypeSig::Ref(outer_ref) => TypeSig::Ref(self.target.intern_type_ref(TypeRef {
                    scope: Scope::Nested(outer_ref),
                    namespace: tref.namespace.clone(),
                    name: tref.name.clone(),
                })),
                TypeSig::Array(_) | TypeSig::Generic { .. } => {
                    return Err(self.unknown(module, source.type_ref_name(tr)));
                }
            },
            Scope::Local => {
                let qualified = source.type_ref_name(tr);
                let ty = ctx
                    .find_type(module, &qualified)
                    .ok_or_else(|| self.unknown(module, qualified))?;
                TypeSig::Def(self.ensure_declared(module, ty))
            }
            Scope::Assembly(assembly) => match self.target.merge_scope(ctx, module, assembly) {
                ScopeResolution::Merged(merged) => self.resolve_in_merged(module, merged, tref)?,
                ScopeResolution::External(assembly) => TypeSig::Ref(
                    self.target
                        .external_type_ref(assembly, &tref.namespace, &tref.name),
                ),
            },
        };

        self.map.insert(
            module,
            OriginSymbol::TypeRef(tr),
            MergedSymbol::Type(sig.clone()),
        );
        Ok(sig)
    }

    /// A reference into a merged module: its own definition, or wherever its
    /// forwarders lead
    fn resolve_in_merged(
        &mut self,
        from: ModuleId,
        merged: ModuleId,
        tref: &TypeRef,
    ) -> Result<TypeSig, MergeError> {
        let ctx = self.ctx;
        let qualified = join_namespace(&tref.namespace, &tref.name);
        if let Some(ty) = ctx.find_type(merged, &qualified) {
            return Ok(TypeSig::Def(self.ensure_declared(merged, ty)));
        }
        match forwarders::walk_chain(ctx, merged, &qualified)? {
            ChainEnd::Defined(defining, ty) => Ok(TypeSig::Def(self.ensure_declared(defining, ty))),
            ChainEnd::External { module, assembly } => {
                match self.target.merge_scope(ctx, module, assembly) {
                    ScopeResolution::External(assembly) => Ok(TypeSig::Ref(
                        self.target
                            .external_type_ref(assembly, &tref.namespace, &tref.name),
                    )),
                    ScopeResolution::Merged(_) => Err(self.unknown(from, qualified)),
                }
            }
            ChainEnd::Unresolved => Err(self.unknown(
                from,
                format!("[{}]{qualified}", ctx.module(merged).name),
            )),
        }
    }

    /// Nested type `name` of a target type, found through the input types
    /// mapped onto it
    fn find_nested(&mut self, outer: TypeId, name: &str) -> Option<TypeId> {
        let ctx = self.ctx;
        let origin = self.map.type_sources(outer).iter().find_map(|&(module, ty)| {
            let source = ctx.module(module);
            source
                .type_def(ty)
                .nested
                .iter()
                .copied()
                .find(|&nested| source.type_def(nested).name == name)
                .map(|nested| (module, nested))
        });
        match origin {
            Some((module, nested)) => Some(self.ensure_declared(module, nested)),
            None => self
                .target
                .find_type(&self.target.qualified_name_in(Some(outer), "", name)),
        }
    }

    /// Resolve a member reference: members of target definitions resolve to
    /// the member itself, everything else to an interned target reference
    fn import_member_ref(
        &mut self,
        module: ModuleId,
        member: MemberRefId,
    ) -> Result<MergedSymbol, MergeError> {
        if let Some(merged) = self.map.member_ref_of(module, member) {
            return Ok(merged.clone());
        }
        let mref = self.ctx.module(module).member_ref(member);
        let parent = self.import_sig(module, &mref.parent)?;

        let merged = match (&parent, &mref.kind) {
            (TypeSig::Def(owner), MemberRefKind::Method { params, ret }) => {
                let params = self.import_sigs(module, params)?;
                let ret = ret
                    .as_ref()
                    .map(|ret| self.import_sig(module, ret))
                    .transpose()?;
                let method = self
                    .target
                    .find_method(*owner, &mref.name, &params, ret.as_ref())
                    .ok_or_else(|| self.unknown(module, self.member_name(module, member)))?;
                MergedSymbol::Method(MethodHandle::Def(method))
            }
            (TypeSig::Def(owner), MemberRefKind::Field { .. }) => {
                let field = self
                    .target
                    .find_field(*owner, &mref.name)
                    .ok_or_else(|| self.unknown(module, self.member_name(module, member)))?;
                MergedSymbol::Field(FieldHandle::Def(field))
            }
            (_, MemberRefKind::Method { params, ret }) => {
                let kind = MemberRefKind::Method {
                    params: self.import_sigs(module, params)?,
                    ret: ret
                        .as_ref()
                        .map(|ret| self.import_sig(module, ret))
                        .transpose()?,
                };
                MergedSymbol::Method(MethodHandle::Ref(self.intern_member(parent, mref, kind)))
            }
            (_, MemberRefKind::Field { ty }) => {
                let kind = MemberRefKind::Field {
                    ty: self.import_sig(module, ty)?,
                };
                MergedSymbol::Field(FieldHandle::Ref(self.intern_member(parent, mref, kind)))
            }
        };

        self.map
            .insert(module, OriginSymbol::MemberRef(member), merged.clone());
        Ok(merged)
    }

    fn intern_member(&mut self, parent: TypeSig, mref: &MemberRef, kind: MemberRefKind) -> MemberRefId {
        self.target.intern_member_ref(MemberRef {
            parent,
            name: mref.name.clone(),
            kind,
        })
    }

    fn method_name(&self, module: ModuleId, method: MethodId) -> String {
        let source = self.ctx.module(module);
        let def = source.method(method);
        format!("{}::{}", source.qualified_name(def.declaring), def.name)
    }

    fn member_name(&self, module: ModuleId, member: MemberRefId) -> String {
        let source = self.ctx.module(module);
        let mref = source.member_ref(member);
        format!("{}::{}", render_sig(source, &mref.parent), mref.name)
    }

    fn unknown(&self, module: ModuleId, symbol: String) -> MergeError {
        MergeError::UnknownSymbol {
            module: self.ctx.module(module).name.clone(),
            symbol,
        }
    }
}

#[cfg(test)]
mod tests;
