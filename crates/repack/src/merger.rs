//! Merge orchestration
//!
//! Drives one merge run over its fixed stage order. A run owns its context,
//! symbol map and target; nothing is shared between runs.

use log::{debug, info};

use crate::{
    config::{Config, InternalizeConfig},
    error::MergeError,
    forwarders::resolve_exports,
    image::Module,
    initializer::combine_initializers,
    internalize::InternalizePolicy,
    merge_context::MergeContext,
    module_registry::{InputModule, ModuleRegistry},
    path_patcher::patch_paths,
    report::MergeReport,
    resource_offsets::apply_resource_offsets,
    resources::merge_resources,
    target::TargetModule,
    type_import::TypeImporter,
};

/// Options of a merge run
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Name of the merged module; the primary's name when unset
    pub target_name: Option<String>,
    pub internalize: InternalizeConfig,
}

impl MergeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_name: config.target_name.clone(),
            internalize: config.internalize.clone(),
        }
    }
}

/// Result of a successful run
#[derive(Debug)]
pub struct MergeOutput {
    pub module: Module,
    pub report: MergeReport,
}

/// Combines input modules into a single module
#[derive(Debug)]
pub struct Merger {
    options: MergeOptions,
}

impl Merger {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    /// Merge `inputs`, exactly one of which must be flagged primary
    ///
    /// Inputs are processed in the order given. On error no partial output is
    /// returned.
    pub fn run(&self, inputs: Vec<InputModule>) -> Result<MergeOutput, MergeError> {
        let registry = ModuleRegistry::from_inputs(inputs)?;
        let primary_id = registry.primary_id().ok_or(MergeError::NoPrimaryModule)?;
        check_runtimes(&registry)?;

        let policy = InternalizePolicy::new(&self.options.internalize)?;
        let target_name = self
            .options
            .target_name
            .clone()
            .unwrap_or_else(|| registry.module(primary_id).name.clone());
        info!("Merging {} modules into {target_name}", registry.len());

        let ctx = MergeContext::new(registry, policy, target_name);
        let target = TargetModule::new(ctx.target_name(), ctx.module(primary_id));

        let mut importer = TypeImporter::new(&ctx, target);
        importer.run()?;
        combine_initializers(&mut importer)?;
        resolve_exports(&mut importer)?;
        let (target, map, mut report) = importer.into_parts();
        let mut module = target.into_module();

        let (resources, resource_merger) = merge_resources(&ctx);
        module.resources = resources;
        let (offsets, warnings) = resource_merger.into_parts();
        report.warnings.extend(warnings);
        for (&id, &offset) in &offsets {
            report
                .resource_offsets
                .insert(ctx.module(id).name.clone(), offset);
        }

        let adjusted = apply_resource_offsets(&mut module, &map, &offsets);
        let patched = patch_paths(&ctx, &map, &mut module);
        debug!("Post-processing adjusted {adjusted} resource offsets and {patched} locators");

        module.mvid = Some(derive_mvid(&ctx.registry.combined_hash()));
        report.stats = map.stats();

        info!(
            "Merged module {}: {} types, {} methods, {} warnings, {} conflicts",
            module.name,
            module.types.len(),
            module.methods.len(),
            report.warnings.len(),
            report.conflicts.len()
        );
        Ok(MergeOutput { module, report })
    }
}

/// Every module must target the primary's runtime
///
/// A module without a declared runtime is accepted.
fn check_runtimes(registry: &ModuleRegistry) -> Result<(), MergeError> {
    let Some(primary) = registry.primary_id() else {
        return Ok(());
    };
    let expected = &registry.module(primary).runtime;
    if expected.is_empty() {
        return Ok(());
    }
    for id in registry.secondary_ids() {
        let module = registry.module(id);
        if !module.runtime.is_empty() && module.runtime != *expected {
            return Err(MergeError::IncompatibleRuntime {
                module: module.name.clone(),
                runtime: module.runtime.clone(),
                expected: expected.clone(),
            });
        }
    }
    Ok(())
}

/// Format the leading 128 bits of a hex digest as a GUID
fn derive_mvid(digest: &str) -> String {
    let hex: String = digest.chars().chain(std::iter::repeat('0')).take(32).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
