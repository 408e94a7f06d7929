//! Reading and writing module images
//!
//! Modules on disk are TOML renderings of the [`Module`] model. Output is
//! written next to its destination and renamed into place, so a failed run
//! never leaves a partial file behind.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;

use crate::image::Module;

/// Source and sink of module images
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<Module>;
    fn store(&self, module: &Module, path: &Path) -> Result<()>;
}

/// Loader for TOML-encoded module images
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlModuleLoader;

impl ModuleLoader for TomlModuleLoader {
    fn load(&self, path: &Path) -> Result<Module> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read module {}", path.display()))?;
        let module: Module = toml::from_str(&text)
            .with_context(|| format!("Failed to parse module {}", path.display()))?;
        module
            .validate()
            .with_context(|| format!("Invalid module {}", path.display()))?;
        debug!(
            "Loaded module {} from {} ({} types)",
            module.name,
            path.display(),
            module.types.len()
        );
        Ok(module)
    }

    fn store(&self, module: &Module, path: &Path) -> Result<()> {
        let text = toml::to_string(module)
            .with_context(|| format!("Failed to serialize module {}", module.name))?;
        let staging = staging_path(path);
        fs::write(&staging, text)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, path).with_context(|| {
            format!("Failed to move {} to {}", staging.display(), path.display())
        })?;
        debug!("Wrote module {} to {}", module.name, path.display());
        Ok(())
    }
}

/// Hidden sibling of `path` used while writing
fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "module".to_owned(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        builder::{self, ModuleBuilder},
        image::{FieldId, ResourceDirectory, ResourceKey, ResourceNode, TypeSig, TypeVisibility},
    };

    #[test]
    fn test_store_then_load_preserves_module() {
        let mut lib = ModuleBuilder::new("Lib").resources(
            ResourceDirectory::new().with(ResourceKey::Id(6), ResourceNode::Data(vec![1, 2, 3])),
        );
        let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
        lib.add_field(widget, "Count", TypeSig::Def(widget));
        lib.add_method(
            widget,
            "Show",
            vec![],
            None,
            Some(vec![builder::ldstr("hi"), builder::ret()]),
        );
        let module = lib.build();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Lib.toml");
        TomlModuleLoader.store(&module, &path).unwrap();

        assert!(!staging_path(&path).exists());
        assert_eq!(TomlModuleLoader.load(&path).unwrap(), module);
    }

    #[test]
    fn test_load_reports_path_on_parse_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "name = [").unwrap();

        let err = TomlModuleLoader.load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse module"));
    }

    #[test]
    fn test_load_rejects_out_of_range_ids() {
        let mut lib = ModuleBuilder::new("Lib");
        let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
        lib.module_mut()
            .type_def_mut(widget)
            .fields
            .push(FieldId::new(5));

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Lib.toml");
        fs::write(&path, toml::to_string(&lib.build()).unwrap()).unwrap();

        let err = TomlModuleLoader.load(&path).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Invalid module"), "{message}");
        assert!(message.contains("refers to field 5"), "{message}");
    }
}
