use pretty_assertions::assert_eq;

use super::*;
use crate::{
    builder::{self, ModuleBuilder},
    config::InternalizeConfig,
    image::{OpCode, TypeVisibility, listing::render_body},
    internalize::InternalizePolicy,
    module_registry::{InputModule, ModuleRegistry},
};

fn context(inputs: Vec<InputModule>, config: &InternalizeConfig) -> MergeContext {
    let registry = ModuleRegistry::from_inputs(inputs).unwrap();
    let policy = InternalizePolicy::new(config).unwrap();
    let name = registry
        .primary_id()
        .map(|id| registry.module(id).name.clone())
        .unwrap();
    MergeContext::new(registry, policy, name)
}

fn import_all(ctx: &MergeContext) -> TypeImporter<'_> {
    let primary = ctx.module(ctx.registry.primary_id().unwrap());
    let target = TargetModule::new(ctx.target_name(), primary);
    let mut importer = TypeImporter::new(ctx, target);
    importer.run().unwrap();
    importer
}

fn internalize_all() -> InternalizeConfig {
    InternalizeConfig {
        enabled: true,
        ..InternalizeConfig::default()
    }
}

fn visibility(importer: &TypeImporter<'_>, name: &str) -> TypeVisibility {
    let target = importer.target();
    let id = target.find_type(name).unwrap();
    target.module().type_def(id).visibility
}

#[test]
fn test_exclude_pattern_keeps_secondary_type_public() {
    let mut app = ModuleBuilder::new("App");
    app.add_type("", "A", TypeVisibility::Public);
    let mut lib = ModuleBuilder::new("Lib");
    lib.add_type("Lib", "A", TypeVisibility::Public);
    lib.add_type("Lib", "B", TypeVisibility::Public);

    let config = InternalizeConfig {
        exclude_patterns: vec!["Lib.A".to_owned()],
        ..internalize_all()
    };
    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &config,
    );
    let importer = import_all(&ctx);

    assert_eq!(visibility(&importer, "A"), TypeVisibility::Public);
    assert_eq!(visibility(&importer, "Lib.A"), TypeVisibility::Public);
    assert_eq!(visibility(&importer, "Lib.B"), TypeVisibility::NotPublic);
    assert!(importer.report.conflicts.is_empty());
}

#[test]
fn test_internalized_collision_is_renamed() {
    let mut app = ModuleBuilder::new("App");
    app.add_type("Shared", "Helper", TypeVisibility::Public);
    let mut lib = ModuleBuilder::new("Lib");
    let helper = lib.add_type("Shared", "Helper", TypeVisibility::Public);
    lib.add_nested(helper, "Cache", TypeVisibility::NestedPublic);

    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &internalize_all(),
    );
    let importer = import_all(&ctx);

    assert_eq!(visibility(&importer, "Shared.Helper"), TypeVisibility::Public);
    assert_eq!(
        visibility(&importer, "Shared.<Lib>Helper"),
        TypeVisibility::NotPublic
    );
    assert_eq!(
        visibility(&importer, "Shared.<Lib>Helper/Cache"),
        TypeVisibility::NestedAssembly
    );
    assert_eq!(
        importer.report.renamed,
        vec![RenamedType {
            module: "Lib".to_owned(),
            original: "Shared.Helper".to_owned(),
            renamed: "<Lib>Helper".to_owned(),
        }]
    );
}

#[test]
fn test_public_collision_merges_into_first_definition() {
    let mut app = ModuleBuilder::new("App");
    let app_widget = app.add_type("Shared", "Widget", TypeVisibility::Public);
    app.add_method(app_widget, "Draw", vec![], None, Some(vec![builder::ret()]));

    let mut lib = ModuleBuilder::new("Lib");
    let lib_widget = lib.add_type("Shared", "Widget", TypeVisibility::Public);
    lib.add_method(
        lib_widget,
        "Draw",
        vec![],
        None,
        Some(vec![builder::nop(), builder::ret()]),
    );
    lib.add_method(lib_widget, "Resize", vec![], None, Some(vec![builder::ret()]));

    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &InternalizeConfig::default(),
    );
    let importer = import_all(&ctx);
    let target = importer.target().module();

    let widget = importer.target().find_type("Shared.Widget").unwrap();
    let methods: Vec<&str> = target
        .type_def(widget)
        .methods
        .iter()
        .map(|&m| target.method(m).name.as_str())
        .collect();
    assert_eq!(methods, vec!["Draw", "Resize"]);

    // The winner keeps its own body
    let draw = target.type_def(widget).methods[0];
    let body = target.method(draw).body.as_ref().unwrap();
    assert_eq!(body.instructions.len(), 1);

    assert_eq!(
        importer.report.conflicts,
        vec![SymbolConflict {
            name: "Shared.Widget".to_owned(),
            kept_from: "App".to_owned(),
            merged_from: "Lib".to_owned(),
        }]
    );

    let lib_id = ctx.merged_module("Lib").unwrap();
    assert_eq!(importer.map().type_of(lib_id, lib_widget), Some(widget));
}

#[test]
fn test_references_into_merged_modules_become_definitions() {
    let mut lib = ModuleBuilder::new("Lib");
    let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
    lib.add_method(widget, "Run", vec![], None, Some(vec![builder::ret()]));

    let mut app = ModuleBuilder::new("App");
    let program = app.add_type("App", "Program", TypeVisibility::NotPublic);
    let widget_ref = app.type_ref("Lib", "Lib", "Widget");
    let run = app.method_ref(TypeSig::Ref(widget_ref), "Run", vec![], None);
    let console = app.type_ref("System.Console", "System", "Console");
    let write = app.method_ref(
        TypeSig::Ref(console),
        "WriteLine",
        vec![TypeSig::Ref(widget_ref)],
        None,
    );
    app.add_method(
        program,
        "Main",
        vec![],
        None,
        Some(vec![
            builder::call(run),
            builder::ldtoken(TypeSig::Ref(widget_ref)),
            builder::call(write),
            builder::ret(),
        ]),
    );

    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &InternalizeConfig::default(),
    );
    let importer = import_all(&ctx);
    let target = importer.target().module();

    let program = importer.target().find_type("App.Program").unwrap();
    let main = target.type_def(program).methods[0];
    insta::assert_snapshot!(render_body(target, target.method(main).body.as_ref().unwrap()), @r"
    0000: call Lib.Widget::Run
    0001: ldtoken Lib.Widget
    0002: call [System.Console]System.Console::WriteLine
    0003: ret
    ");

    let refs: Vec<&str> = target
        .assembly_refs
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(refs, vec!["System.Console"]);
}

#[test]
fn test_secondary_initializers_are_left_for_the_combiner() {
    let mut app = ModuleBuilder::new("App");
    app.initializer(vec![builder::nop(), builder::ret()]);
    let mut lib = ModuleBuilder::new("Lib");
    lib.initializer(vec![builder::ldc_i4(1), Instruction::simple(OpCode::Pop), builder::ret()]);

    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &InternalizeConfig::default(),
    );
    let importer = import_all(&ctx);
    let target = importer.target().module();

    let module_types: Vec<TypeId> = target
        .type_ids()
        .filter(|&id| target.type_def(id).is_module_type())
        .collect();
    assert_eq!(module_types.len(), 1);
    assert_eq!(target.type_def(module_types[0]).methods.len(), 1);

    let lib_id = ctx.merged_module("Lib").unwrap();
    let lib_init = ctx.module(lib_id).initializer().unwrap();
    assert!(importer.map().method_of(lib_id, lib_init).is_none());
}

#[test]
fn test_import_is_idempotent() {
    let mut app = ModuleBuilder::new("App");
    let node = app.add_type("App", "Node", TypeVisibility::Public);
    // Self-referential field type
    app.add_field(node, "Next", TypeSig::Def(node));

    let ctx = context(
        vec![InputModule::primary(app.build())],
        &InternalizeConfig::default(),
    );
    let primary = ctx.registry.primary_id().unwrap();
    let target = TargetModule::new("App", ctx.module(primary));
    let mut importer = TypeImporter::new(&ctx, target);

    let first = importer.import(primary, node, None, false).unwrap();
    let second = importer.import(primary, node, None, false).unwrap();
    assert_eq!(first, second);

    let target = importer.target().module();
    assert_eq!(target.types.len(), 1);
    assert_eq!(target.fields.len(), 1);
    assert_eq!(target.field(target.type_def(first).fields[0]).field_type, TypeSig::Def(first));
}

#[test]
fn test_unknown_reference_into_merged_module_is_a_fault() {
    let mut app = ModuleBuilder::new("App");
    let program = app.add_type("App", "Program", TypeVisibility::NotPublic);
    let missing = app.type_ref("Lib", "Lib", "Missing");
    app.add_field(program, "Value", TypeSig::Ref(missing));
    let lib = ModuleBuilder::new("Lib");

    let ctx = context(
        vec![
            InputModule::primary(app.build()),
            InputModule::secondary(lib.build()),
        ],
        &InternalizeConfig::default(),
    );
    let primary = ctx.module(ctx.registry.primary_id().unwrap());
    let mut importer = TypeImporter::new(&ctx, TargetModule::new("App", primary));

    let err = importer.run().unwrap_err();
    assert_eq!(
        err,
        MergeError::UnknownSymbol {
            module: "App".to_owned(),
            symbol: "[Lib]Lib.Missing".to_owned(),
        }
    );
}
