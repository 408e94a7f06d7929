//! Exported-type and forwarder resolution
//!
//! Every exported type of every input module is recorded in the symbol map
//! under its qualified name. Forwarders whose chain ends at a type defined by
//! one of the merged modules resolve to that type in the target; everything
//! else becomes a type reference and, unless internalized, an exported-type
//! entry of the target.

use log::{debug, trace};

use crate::{
    error::MergeError,
    image::{
        AssemblyRefId, ExportImpl, ExportedType, ExportedTypeId, Module, Scope, TypeId, TypeRef,
        TypeRefId, TypeSig,
    },
    merge_context::MergeContext,
    module_registry::ModuleId,
    symbol_map::{MergedSymbol, OriginSymbol},
    target::ScopeResolution,
    type_import::TypeImporter,
    types::{FxIndexMap, FxIndexSet},
};

/// Where a forwarding chain ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    /// A type defined by one of the merged modules
    Defined(ModuleId, TypeId),
    /// A module outside the merge, named by an assembly reference of `module`
    External {
        module: ModuleId,
        assembly: AssemblyRefId,
    },
    /// Neither the merged modules nor an external module claim the name
    Unresolved,
}

/// Next hop of a forwarder entry
enum Hop {
    Merged(ModuleId),
    External(AssemblyRefId),
    /// The module has no forwarder for the name
    None,
}

/// Follow the forwarders of `qualified_name`, starting at `origin`'s export
///
/// Every `(module, name)` pair is visited at most once; revisiting one is a
/// cycle and fails with [`MergeError::CyclicForwarder`]. A chain that stops
/// without reaching a definition, whether inside the merge or at an external
/// module, falls back to the first merged module that defines the name.
pub fn walk_chain(
    ctx: &MergeContext,
    origin: ModuleId,
    qualified_name: &str,
) -> Result<ChainEnd, MergeError> {
    let mut visited: FxIndexSet<(ModuleId, String)> = FxIndexSet::default();
    visited.insert((origin, qualified_name.to_owned()));
    let mut current = origin;

    loop {
        let next = match next_hop(ctx, ctx.module(current), qualified_name) {
            Hop::Merged(next) => next,
            Hop::External(assembly) => {
                if let Some((defining, ty)) = ctx.find_type_anywhere(qualified_name) {
                    trace!(
                        "Forwarder {qualified_name} leaves the merge but {} defines it",
                        ctx.module(defining).name
                    );
                    return Ok(ChainEnd::Defined(defining, ty));
                }
                return Ok(ChainEnd::External {
                    module: current,
                    assembly,
                });
            }
            Hop::None => {
                return Ok(ctx
                    .find_type_anywhere(qualified_name)
                    .map_or(ChainEnd::Unresolved, |(m, ty)| ChainEnd::Defined(m, ty)));
            }
        };

        if !visited.insert((next, qualified_name.to_owned())) {
            let mut chain: Vec<String> = visited
                .iter()
                .map(|(m, name)| format!("[{}]{name}", ctx.module(*m).name))
                .collect();
            chain.push(format!("[{}]{qualified_name}", ctx.module(next).name));
            return Err(MergeError::CyclicForwarder { chain });
        }

        trace!(
            "Forwarder {qualified_name}: {} -> {}",
            ctx.module(current).name,
            ctx.module(next).name
        );
        if let Some(ty) = ctx.find_type(next, qualified_name) {
            return Ok(ChainEnd::Defined(next, ty));
        }
        current = next;
    }
}

fn next_hop(ctx: &MergeContext, module: &Module, qualified_name: &str) -> Hop {
    let Some(export) = module.find_exported_type(qualified_name) else {
        return Hop::None;
    };
    if !is_forwarder(module, export) {
        return Hop::None;
    }
    match root_assembly(module, export) {
        Some(assembly) => match ctx.merged_module(&module.assembly_ref(assembly).name) {
            Some(merged) => Hop::Merged(merged),
            None => Hop::External(assembly),
        },
        None => Hop::None,
    }
}

/// Whether an export forwards, directly or through its declaring export
pub fn is_forwarder(module: &Module, export: ExportedTypeId) -> bool {
    let mut seen = Vec::new();
    let mut current = export;
    loop {
        let entry = module.exported_type(current);
        if entry.is_forwarder {
            return true;
        }
        seen.push(current);
        match entry.implementation {
            ExportImpl::Declaring(outer) if !seen.contains(&outer) => current = outer,
            _ => return false,
        }
    }
}

/// Assembly reference at the root of an export's declaring chain
fn root_assembly(module: &Module, export: ExportedTypeId) -> Option<AssemblyRefId> {
    let mut seen = Vec::new();
    let mut current = export;
    loop {
        seen.push(current);
        match module.exported_type(current).implementation {
            ExportImpl::Assembly(assembly) => return Some(assembly),
            ExportImpl::Declaring(outer) if !seen.contains(&outer) => current = outer,
            ExportImpl::Declaring(_) | ExportImpl::Local => return None,
        }
    }
}

/// Resolve every exported type and build the target's exported-type list
pub fn resolve_exports(importer: &mut TypeImporter<'_>) -> Result<(), MergeError> {
    let ctx = importer.ctx();
    // Qualified name -> target export, for nesting and deduplication
    let mut emitted: FxIndexMap<String, ExportedTypeId> = FxIndexMap::default();

    for module_id in ctx.registry.import_order() {
        let module = ctx.module(module_id);
        for export in module.exported_type_ids() {
            let qualified_name = module.exported_type_name(export);

            let end = if is_forwarder(module, export) {
                walk_chain(ctx, module_id, &qualified_name)?
            } else {
                ChainEnd::Unresolved
            };

            if let ChainEnd::Defined(defining, ty) = end {
                let target_ty = importer.ensure_declared(defining, ty);
                importer.map.insert(
                    module_id,
                    OriginSymbol::Export(qualified_name.clone()),
                    MergedSymbol::Type(TypeSig::Def(target_ty)),
                );
                importer.map.mark_export_resolved(module_id, &qualified_name);
                debug!(
                    "Forwarder {qualified_name} of {} resolved inside the merged module",
                    module.name
                );
                continue;
            }

            let root_scope = match end {
                ChainEnd::External {
                    module: last,
                    assembly,
                } => export_scope(importer, ctx, last, Some(assembly)),
                _ => export_scope(importer, ctx, module_id, root_assembly(module, export)),
            };
            let type_ref = synthesize_ref(importer, module, export, root_scope, &mut Vec::new())?;
            importer.map.insert(
                module_id,
                OriginSymbol::Export(qualified_name.clone()),
                MergedSymbol::Type(TypeSig::Ref(type_ref)),
            );

            let internalized = ctx
                .policy
                .should_internalize(&qualified_name, ctx.internalizes(module_id));
            if internalized || emitted.contains_key(&qualified_name) {
                trace!("Not re-exporting {qualified_name} of {}", module.name);
                continue;
            }

            let entry = module.exported_type(export);
            let implementation = match importer.target.module().type_ref(type_ref).scope {
                Scope::Assembly(assembly) => ExportImpl::Assembly(assembly),
                Scope::Nested(_) => {
                    let outer = match entry.implementation {
                        ExportImpl::Declaring(outer) => {
                            emitted.get(&module.exported_type_name(outer)).copied()
                        }
                        _ => None,
                    };
                    let Some(outer) = outer else {
                        trace!("Not exporting {qualified_name}: declaring export was dropped");
                        continue;
                    };
                    ExportImpl::Declaring(outer)
                }
                Scope::Local => ExportImpl::Local,
            };
            let id = importer.target.module_mut().add_exported_type(ExportedType {
                namespace: entry.namespace.clone(),
                name: entry.name.clone(),
                implementation,
                is_forwarder: entry.is_forwarder,
            });
            emitted.insert(qualified_name, id);
        }
    }

    debug!("Target exports {} types", emitted.len());
    Ok(())
}

/// Scope of the outermost export of a chain
fn export_scope(
    importer: &mut TypeImporter<'_>,
    ctx: &MergeContext,
    module: ModuleId,
    assembly: Option<AssemblyRefId>,
) -> Scope {
    match assembly.map(|a| importer.target.merge_scope(ctx, module, a)) {
        Some(ScopeResolution::External(target_assembly)) => Scope::Assembly(target_assembly),
        // Unresolved names that point into the merge now live in the target itself
        Some(ScopeResolution::Merged(_)) | None => Scope::Local,
    }
}

/// Build a target type reference mirroring an export and its declaring exports
///
/// `chain` holds the exports already on the way down; a declaring export
/// that is already on it fails with [`MergeError::CyclicForwarder`].
fn synthesize_ref(
    importer: &mut TypeImporter<'_>,
    module: &Module,
    export: ExportedTypeId,
    root_scope: Scope,
    chain: &mut Vec<ExportedTypeId>,
) -> Result<TypeRefId, MergeError> {
    if chain.contains(&export) {
        let mut names: Vec<String> = chain
            .iter()
            .map(|&e| format!("[{}]{}", module.name, module.exported_type_name(e)))
            .collect();
        names.push(format!("[{}]{}", module.name, module.exported_type_name(export)));
        return Err(MergeError::CyclicForwarder { chain: names });
    }
    chain.push(export);

    let entry = module.exported_type(export);
    let scope = match entry.implementation {
        ExportImpl::Declaring(outer) => {
            Scope::Nested(synthesize_ref(importer, module, outer, root_scope, chain)?)
        }
        _ => root_scope,
    };
    Ok(importer.target.intern_type_ref(TypeRef {
        scope,
        namespace: entry.namespace.clone(),
        name: entry.name.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::ModuleBuilder,
        config::InternalizeConfig,
        image::TypeVisibility,
        internalize::InternalizePolicy,
        module_registry::{InputModule, ModuleRegistry},
    };

    fn context(modules: Vec<InputModule>) -> MergeContext {
        let registry = ModuleRegistry::from_inputs(modules).unwrap();
        let policy = InternalizePolicy::new(&InternalizeConfig::default()).unwrap();
        MergeContext::new(registry, policy, "App".to_owned())
    }

    #[test]
    fn test_chain_across_merged_modules_reaches_definition() {
        let mut app = ModuleBuilder::new("App");
        app.forward("Shared", "Widget", "Facade");
        let mut facade = ModuleBuilder::new("Facade");
        facade.forward("Shared", "Widget", "Impl");
        let mut implementation = ModuleBuilder::new("Impl");
        let widget = implementation.add_type("Shared", "Widget", TypeVisibility::Public);

        let ctx = context(vec![
            InputModule::primary(app.build()),
            InputModule::secondary(facade.build()),
            InputModule::secondary(implementation.build()),
        ]);
        let app_id = ctx.merged_module("App").unwrap();
        let impl_id = ctx.merged_module("Impl").unwrap();

        assert_eq!(
            walk_chain(&ctx, app_id, "Shared.Widget").unwrap(),
            ChainEnd::Defined(impl_id, widget)
        );
    }

    #[test]
    fn test_chain_leaving_the_merge_is_external() {
        let mut app = ModuleBuilder::new("App");
        app.forward("System", "Span", "System.Memory");
        let ctx = context(vec![InputModule::primary(app.build())]);
        let app_id = ctx.merged_module("App").unwrap();

        assert!(matches!(
            walk_chain(&ctx, app_id, "System.Span").unwrap(),
            ChainEnd::External { module, .. } if module == app_id
        ));
    }

    #[test]
    fn test_chain_leaving_the_merge_prefers_a_merged_definition() {
        let mut app = ModuleBuilder::new("App");
        app.forward("Shared", "Widget", "System.Memory");
        let mut lib = ModuleBuilder::new("Lib");
        let widget = lib.add_type("Shared", "Widget", TypeVisibility::Public);

        let ctx = context(vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ]);
        let app_id = ctx.merged_module("App").unwrap();
        let lib_id = ctx.merged_module("Lib").unwrap();

        assert_eq!(
            walk_chain(&ctx, app_id, "Shared.Widget").unwrap(),
            ChainEnd::Defined(lib_id, widget)
        );
    }

    #[test]
    fn test_cyclic_chain_is_a_fault() {
        let mut first = ModuleBuilder::new("First");
        first.forward("Loop", "Node", "Second");
        let mut second = ModuleBuilder::new("Second");
        second.forward("Loop", "Node", "First");

        let ctx = context(vec![
            InputModule::primary(first.build()),
            InputModule::secondary(second.build()),
        ]);
        let first_id = ctx.merged_module("First").unwrap();

        let err = walk_chain(&ctx, first_id, "Loop.Node").unwrap_err();
        assert_eq!(
            err,
            MergeError::CyclicForwarder {
                chain: vec![
                    "[First]Loop.Node".to_owned(),
                    "[Second]Loop.Node".to_owned(),
                    "[First]Loop.Node".to_owned(),
                ]
            }
        );
    }

    #[test]
    fn test_nested_export_inherits_forwarder_status() {
        let mut lib = ModuleBuilder::new("Lib");
        let outer = lib.forward("Ns", "Outer", "Other");
        let inner = lib.forward_nested(outer, "Inner");
        let module = lib.build();

        assert!(is_forwarder(&module, inner));
        assert_eq!(module.exported_type_name(inner), "Ns.Outer/Inner");
        assert_eq!(
            root_assembly(&module, inner).map(|a| module.assembly_ref(a).name.clone()),
            Some("Other".to_owned())
        );
    }
}
