//! Module initializer combiner
//!
//! Folds the `.cctor` of every secondary module, followed by the primary's,
//! into a single initializer on the target's `<Module>` type. Each block is
//! copied in two passes: the first copies instructions and records where every
//! source instruction landed, the second relinks branch targets through that
//! association. Only the final emitted instruction of the merged body returns.

use log::{debug, trace};

use crate::{
    builder,
    error::MergeError,
    image::{
        INITIALIZER_NAME, Instruction, MODULE_TYPE_NAME, MemberAccess, MethodBody, MethodDef,
        MethodHandle, OpCode, Operand,
    },
    module_registry::ModuleId,
    type_import::TypeImporter,
};

/// How operands of a copied block are translated
enum Remap<'i, 'a> {
    /// Symbol operands go through the importer; frame-relative operands fault
    Import(&'i mut TypeImporter<'a>, ModuleId),
    /// The block already lives in the target
    Identity,
}

/// Where a copied block came from, for diagnostics
struct BlockOrigin<'s> {
    routine: &'s str,
    module: &'s str,
}

/// Merge every module initializer into one target initializer
///
/// Consumed secondary initializers are recorded in the symbol map; the input
/// modules themselves are not touched. No initializer is created when no
/// module has one.
pub fn combine_initializers(importer: &mut TypeImporter<'_>) -> Result<(), MergeError> {
    let ctx = importer.ctx();

    let secondaries: Vec<_> = ctx
        .registry
        .secondary_ids()
        .filter_map(|id| ctx.module(id).initializer().map(|method| (id, method)))
        .collect();

    // The primary's initializer was imported like any other method
    let existing = ctx.registry.primary_id().and_then(|primary| {
        let method = ctx.module(primary).initializer()?;
        match importer.map.method_of(primary, method) {
            Some(MethodHandle::Def(target_method)) => Some(target_method),
            _ => None,
        }
    });

    // The primary's own body is already final when nothing is folded into it
    if secondaries.is_empty() {
        trace!("No secondary initializers to merge");
        return Ok(());
    }

    let module_type = importer.target.module_type();
    let detached = existing
        .and_then(|method| importer.target.module_mut().method_mut(method).body.take());

    let mut merged = Vec::new();
    // Where each copied block landed, for later passes that depend on origin
    let mut blocks = Vec::new();
    for &(module, method) in &secondaries {
        let source = ctx.module(module);
        let def = source.method(method);
        let Some(body) = &def.body else {
            continue;
        };
        let routine = format!("{}::{}", source.qualified_name(def.declaring), def.name);
        let start = merged.len();
        copy_block(
            body,
            &mut merged,
            Remap::Import(&mut *importer, module),
            &BlockOrigin {
                routine: &routine,
                module: &source.name,
            },
        )?;
        blocks.push((start..merged.len(), module));
        importer.map.mark_initializer_consumed(module, method);
        debug!(
            "Folded initializer of {} ({} instructions)",
            source.name,
            body.instructions.len()
        );
    }

    let mut locals = Vec::new();
    if let Some(body) = detached {
        let routine = format!("{MODULE_TYPE_NAME}::{INITIALIZER_NAME}");
        let start = merged.len();
        copy_block(
            &body,
            &mut merged,
            Remap::Identity,
            &BlockOrigin {
                routine: &routine,
                module: ctx.target_name(),
            },
        )?;
        if let Some(primary) = ctx.registry.primary_id() {
            blocks.push((start..merged.len(), primary));
        }
        locals = body.locals;
    }
    merged.push(builder::ret());

    let instruction_count = merged.len();
    let body = MethodBody {
        instructions: merged,
        locals,
    };
    let initializer = match existing {
        Some(method) => {
            importer.target.module_mut().method_mut(method).body = Some(body);
            method
        }
        None => importer.target.module_mut().add_method(MethodDef {
            name: INITIALIZER_NAME.to_owned(),
            access: MemberAccess::Private,
            is_static: true,
            params: Vec::new(),
            ret: None,
            body: Some(body),
            declaring: module_type,
        }),
    };
    for (range, module) in blocks {
        importer.map.record_block_origin(initializer, range, module);
    }

    debug!(
        "Merged {} secondary initializers into {INITIALIZER_NAME} ({instruction_count} instructions)",
        secondaries.len()
    );
    Ok(())
}

/// Append a copy of `body` to `merged`, dropping its returns
///
/// A trailing `ret` is dropped and maps to the next emitted position. A `ret`
/// in the middle of the body becomes a `br` to the end of the block, which is
/// where the next block (or the final `ret`) starts.
fn copy_block(
    body: &MethodBody,
    merged: &mut Vec<Instruction>,
    mut remap: Remap<'_, '_>,
    origin: &BlockOrigin<'_>,
) -> Result<(), MergeError> {
    let base = merged.len();
    let end = body.instructions.len();
    // Source index -> merged index; one extra slot for the block end
    let mut association = Vec::with_capacity(end + 1);
    let mut copies: Vec<Instruction> = Vec::with_capacity(end);

    // Pass 1: copy and remap symbol operands
    for (index, instr) in body.instructions.iter().enumerate() {
        association.push(base + copies.len());
        if instr.opcode == OpCode::Ret {
            if index + 1 != end {
                copies.push(builder::branch(OpCode::Br, end));
            }
            continue;
        }
        let operand = match (&mut remap, &instr.operand) {
            (_, Operand::Branch(_) | Operand::Switch(_)) => instr.operand.clone(),
            (Remap::Import(..), Operand::Local(_) | Operand::Argument(_) | Operand::Signature(_)) => {
                return Err(MergeError::NotImplemented {
                    operand: instr.operand.kind(),
                    routine: origin.routine.to_owned(),
                    module: origin.module.to_owned(),
                });
            }
            (Remap::Import(importer, module), operand) => importer.import_operand(*module, operand)?,
            (Remap::Identity, operand) => operand.clone(),
        };
        copies.push(Instruction::new(instr.opcode, operand));
    }
    association.push(base + copies.len());

    // Pass 2: relink branch targets to the copies
    let relink = |target: usize| {
        association
            .get(target)
            .copied()
            .ok_or_else(|| MergeError::InvalidBranchTarget {
                routine: origin.routine.to_owned(),
                module: origin.module.to_owned(),
                target,
            })
    };
    for copy in &mut copies {
        match &mut copy.operand {
            Operand::Branch(target) => *target = relink(*target)?,
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = relink(*target)?;
                }
            }
            _ => {}
        }
    }

    merged.extend(copies);
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        builder::ModuleBuilder,
        config::InternalizeConfig,
        image::{FieldHandle, Module, TypeSig, TypeVisibility, listing::render_body},
        internalize::InternalizePolicy,
        merge_context::MergeContext,
        module_registry::{InputModule, ModuleRegistry},
        target::TargetModule,
    };

    fn context(inputs: Vec<InputModule>) -> MergeContext {
        let registry = ModuleRegistry::from_inputs(inputs).unwrap();
        let policy = InternalizePolicy::new(&InternalizeConfig::default()).unwrap();
        MergeContext::new(registry, policy, "App".to_owned())
    }

    fn combine(ctx: &MergeContext) -> Result<Module, MergeError> {
        let primary = ctx.module(ctx.registry.primary_id().unwrap());
        let mut importer = TypeImporter::new(ctx, TargetModule::new("App", primary));
        importer.run()?;
        combine_initializers(&mut importer)?;
        Ok(importer.into_parts().0.into_module())
    }

    fn initializer_listing(module: &Module) -> String {
        let method = module.initializer().unwrap();
        render_body(module, module.method(method).body.as_ref().unwrap())
    }

    /// Initializer that pushes a constant and hands it to an external logger
    fn logging_module(name: &str, value: i32) -> Module {
        let mut module = ModuleBuilder::new(name);
        let log = module.type_ref("Logging", "Logging", "Log");
        let write = module.method_ref(TypeSig::Ref(log), "Write", vec![], None);
        module.initializer(vec![
            builder::ldc_i4(value),
            builder::call(write),
            builder::ret(),
        ]);
        module.build()
    }

    #[test]
    fn test_secondary_initializers_run_in_input_order() {
        let ctx = context(vec![
            InputModule::primary(ModuleBuilder::new("App").build()),
            InputModule::secondary(logging_module("First", 1)),
            InputModule::secondary(logging_module("Second", 2)),
        ]);
        let merged = combine(&ctx).unwrap();

        insta::assert_snapshot!(initializer_listing(&merged), @r"
        0000: ldc.i4 1
        0001: call [Logging]Logging.Log::Write
        0002: ldc.i4 2
        0003: call [Logging]Logging.Log::Write
        0004: ret
        ");
        assert_eq!(merged.member_refs.len(), 1);

        let method = merged.initializer().unwrap();
        let def = merged.method(method);
        assert_eq!(def.access, MemberAccess::Private);
        assert!(def.is_initializer());
    }

    #[test]
    fn test_branches_are_relinked_to_copies() {
        let mut primary = ModuleBuilder::new("App");
        primary.initializer(vec![builder::nop(), builder::ret()]);

        let mut alpha = ModuleBuilder::new("Alpha");
        alpha.initializer(vec![builder::ldc_i4(1), builder::ret()]);

        let mut beta = ModuleBuilder::new("Beta");
        beta.initializer(vec![
            builder::ldc_i4(0),
            builder::branch(OpCode::Brtrue, 4),
            builder::ldc_i4(7),
            builder::ret(),
            builder::ldc_i4(9),
            Instruction::new(OpCode::Switch, Operand::Switch(vec![0, 7])),
            builder::nop(),
            builder::ret(),
        ]);

        let ctx = context(vec![
            InputModule::primary(primary.build()),
            InputModule::secondary(alpha.build()),
            InputModule::secondary(beta.build()),
        ]);
        let merged = combine(&ctx).unwrap();

        insta::assert_snapshot!(initializer_listing(&merged), @r"
        0000: ldc.i4 1
        0001: ldc.i4 0
        0002: brtrue -> 0005
        0003: ldc.i4 7
        0004: br -> 0008
        0005: ldc.i4 9
        0006: switch 0001, 0008
        0007: nop
        0008: nop
        0009: ret
        ");
    }

    #[test]
    fn test_primary_only_initializer_is_unchanged() {
        let mut app = ModuleBuilder::new("App");
        let settings = app.add_type("App", "Settings", TypeVisibility::NotPublic);
        let field = app.add_field(settings, "Level", TypeSig::Def(settings));
        app.initializer(vec![
            builder::ldc_i4(0),
            builder::branch(OpCode::Brtrue, 3),
            builder::ret(),
            builder::ldc_i4(3),
            builder::stsfld(FieldHandle::Def(field)),
            builder::ret(),
        ]);
        let ctx = context(vec![InputModule::primary(app.build())]);

        let primary = ctx.module(ctx.registry.primary_id().unwrap());
        let mut importer = TypeImporter::new(&ctx, TargetModule::new("App", primary));
        importer.run().unwrap();
        let cctor = importer.target().module().initializer().unwrap();
        let before = importer.target().module().method(cctor).body.clone();

        combine_initializers(&mut importer).unwrap();
        let target = importer.target().module();
        assert_eq!(target.initializer(), Some(cctor));
        assert_eq!(target.method(cctor).body, before);
    }

    #[test]
    fn test_no_initializers_creates_none() {
        let mut app = ModuleBuilder::new("App");
        app.add_type("App", "Program", TypeVisibility::Public);
        let ctx = context(vec![
            InputModule::primary(app.build()),
            InputModule::secondary(ModuleBuilder::new("Lib").build()),
        ]);
        let merged = combine(&ctx).unwrap();

        assert_eq!(merged.initializer(), None);
        assert!(merged.module_type().is_none());
    }

    #[test]
    fn test_frame_operands_in_secondary_initializer_are_rejected() {
        let mut lib = ModuleBuilder::new("Lib");
        lib.initializer(vec![
            Instruction::new(OpCode::Ldloc, Operand::Local(0)),
            builder::ret(),
        ]);
        let ctx = context(vec![
            InputModule::primary(ModuleBuilder::new("App").build()),
            InputModule::secondary(lib.build()),
        ]);

        assert_eq!(
            combine(&ctx).unwrap_err(),
            MergeError::NotImplemented {
                operand: "local",
                routine: "<Module>::.cctor".to_owned(),
                module: "Lib".to_owned(),
            }
        );
    }

    #[test]
    fn test_consumed_initializers_are_recorded() {
        let ctx = context(vec![
            InputModule::primary(ModuleBuilder::new("App").build()),
            InputModule::secondary(logging_module("Lib", 4)),
        ]);
        let primary = ctx.module(ctx.registry.primary_id().unwrap());
        let mut importer = TypeImporter::new(&ctx, TargetModule::new("App", primary));
        importer.run().unwrap();
        combine_initializers(&mut importer).unwrap();

        let lib = ctx.merged_module("Lib").unwrap();
        let init = ctx.module(lib).initializer().unwrap();
        assert!(importer.map().is_initializer_consumed(lib, init));
        // The input module still has its own initializer
        assert!(ctx.module(lib).method(init).body.is_some());
    }
}
