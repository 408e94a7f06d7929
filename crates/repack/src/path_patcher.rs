//! Embedded resource-locator rewriting
//!
//! UI markup is addressed by locators such as
//! `/Lib;component/Views/Main.xaml`, relative to the module that embedded it.
//! After merging, every such resource lives in the target module, so locators
//! naming a secondary module are rewritten to name the target and keep the
//! secondary's name as a path segment.

use cow_utils::CowUtils;
use log::{debug, trace};

use crate::{
    image::{Module, Operand},
    merge_context::MergeContext,
    module_registry::ModuleId,
    symbol_map::SymbolMap,
};

/// Modules referencing this UI framework may embed resource locators
pub const MARKER_MODULE: &str = "PresentationFramework";
/// Absolute locator scheme prefix
pub const PACK_PREFIX: &str = "pack://application:,,,";
/// Separator between a module name and the path inside it
pub const COMPONENT_MARKER: &str = ";component/";
/// Markup file extension of relative locators
pub const MARKUP_EXTENSION: &str = ".xaml";

/// Names a locator can mention
#[derive(Debug)]
pub struct LocatorNames<'n> {
    pub target: &'n str,
    pub secondaries: Vec<&'n str>,
}

/// Rewrite a single literal; `None` when it stays as it is
///
/// `origin` is the name of the secondary module the literal came from, or
/// `None` for the primary.
pub fn patch_literal(
    literal: &str,
    origin: Option<&str>,
    names: &LocatorNames<'_>,
) -> Option<String> {
    let ends_with_markup = literal
        .cow_to_ascii_lowercase()
        .ends_with(MARKUP_EXTENSION);
    if !(literal.starts_with('/') || literal.starts_with(PACK_PREFIX) || ends_with_markup) {
        return None;
    }

    match origin {
        None => {
            let mut current = literal.to_owned();
            let mut changed = false;
            for secondary in &names.secondaries {
                if let Some(rewritten) = substitute_component(&current, secondary, names.target) {
                    current = rewritten;
                    changed = true;
                }
            }
            changed.then_some(current)
        }
        Some(secondary) => substitute_component(literal, secondary, names.target).or_else(|| {
            if !ends_with_markup || literal.contains(COMPONENT_MARKER) {
                return None;
            }
            // Relative markup path: the secondary's name becomes a subdirectory
            Some(match literal.strip_prefix('/') {
                Some(rest) => format!("/{secondary}/{rest}"),
                None => format!("{secondary}/{literal}"),
            })
        }),
    }
}

/// `/{secondary};component/` -> `/{target};component/{secondary}/`
fn substitute_component(literal: &str, secondary: &str, target: &str) -> Option<String> {
    let from = format!("/{secondary}{COMPONENT_MARKER}");
    let to = format!("/{target}{COMPONENT_MARKER}{secondary}/");
    match literal.cow_replace(from.as_str(), to.as_str()) {
        std::borrow::Cow::Owned(rewritten) => Some(rewritten),
        std::borrow::Cow::Borrowed(_) => None,
    }
}

/// Patch string literals that came from a module referencing
/// [`MARKER_MODULE`]
///
/// A literal's module is the one its block was copied from when it sits in
/// a folded initializer, otherwise the module that declared its routine's type.
///
/// Returns the number of rewritten literals.
pub fn patch_paths(ctx: &MergeContext, map: &SymbolMap, target: &mut Module) -> usize {
    let names = LocatorNames {
        target: ctx.target_name(),
        secondaries: ctx
            .registry
            .secondary_ids()
            .map(|id| ctx.module(id).name.as_str())
            .collect(),
    };
    if !ctx
        .registry
        .iter()
        .any(|(_, info)| info.module.references_assembly(MARKER_MODULE))
    {
        trace!("No module references {MARKER_MODULE}; skipping locator rewriting");
        return 0;
    }

    let mut patched = 0;
    for method in target.method_ids().collect::<Vec<_>>() {
        let fallback = map.type_origin(target.method(method).declaring);
        let Some(body) = target.method_mut(method).body.as_mut() else {
            continue;
        };
        for (index, instr) in body.instructions.iter_mut().enumerate() {
            let Operand::String(literal) = &mut instr.operand else {
                continue;
            };
            // Folded initializers mix blocks from several modules
            let Some(origin) = map.block_origin(method, index).or(fallback) else {
                continue;
            };
            if !ctx.module(origin).references_assembly(MARKER_MODULE) {
                continue;
            }
            if let Some(rewritten) = patch_literal(literal, secondary_name(ctx, origin), &names) {
                trace!("Rewrote locator {literal:?} to {rewritten:?}");
                *literal = rewritten;
                patched += 1;
            }
        }
    }

    debug!("Rewrote {patched} resource locators");
    patched
}

fn secondary_name(ctx: &MergeContext, module: ModuleId) -> Option<&str> {
    (!ctx.registry.is_primary(module)).then(|| ctx.module(module).name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> LocatorNames<'static> {
        LocatorNames {
            target: "App",
            secondaries: vec!["Controls", "Themes"],
        }
    }

    #[test]
    fn test_primary_literals_name_the_target() {
        assert_eq!(
            patch_literal("/Controls;component/Button.xaml", None, &names()).as_deref(),
            Some("/App;component/Controls/Button.xaml")
        );
        assert_eq!(
            patch_literal(
                "pack://application:,,,/Themes;component/Dark.xaml",
                None,
                &names()
            )
            .as_deref(),
            Some("pack://application:,,,/App;component/Themes/Dark.xaml")
        );
        // The primary's own locators are already correct
        assert_eq!(patch_literal("/App;component/Main.xaml", None, &names()), None);
    }

    #[test]
    fn test_secondary_literals() {
        let origin = Some("Controls");
        assert_eq!(
            patch_literal("/Controls;component/Button.xaml", origin, &names()).as_deref(),
            Some("/App;component/Controls/Button.xaml")
        );
        assert_eq!(
            patch_literal("Views/Panel.XAML", origin, &names()).as_deref(),
            Some("Controls/Views/Panel.XAML")
        );
        assert_eq!(
            patch_literal("/Views/Panel.xaml", origin, &names()).as_deref(),
            Some("/Controls/Views/Panel.xaml")
        );
        // Another module's locator is left alone by a secondary
        assert_eq!(
            patch_literal("/Themes;component/Dark.xaml", origin, &names()),
            None
        );
    }

    #[test]
    fn test_non_locators_pass_through() {
        assert_eq!(patch_literal("Hello, world", None, &names()), None);
        assert_eq!(
            patch_literal("Controls;component/x", Some("Controls"), &names()),
            None
        );
        assert_eq!(patch_literal("/api/values", Some("Controls"), &names()), None);
    }
}
