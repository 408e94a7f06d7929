//! Internalization policy
//!
//! Decides which symbols of secondary modules lose their public visibility in
//! the merged module. The decision is a pure function of the configuration and
//! the symbol's names: patterns are compiled once when the policy is built and
//! nothing is cached afterwards.

use cow_utils::CowUtils;
use regex::{RegexBuilder, RegexSet, RegexSetBuilder};
use rustc_hash::FxHashSet;

use crate::{
    config::InternalizeConfig,
    error::MergeError,
    image::{Module, TypeId},
};

/// Attributes that mark a type as part of a serialization or service contract
pub const CONTRACT_ATTRIBUTES: [&str; 4] = [
    "System.Runtime.Serialization.DataContractAttribute",
    "System.ServiceModel.ServiceContractAttribute",
    "System.Xml.Serialization.XmlRootAttribute",
    "System.Xml.Serialization.XmlTypeAttribute",
];

/// Compiled internalization rules
#[derive(Debug, Clone)]
pub struct InternalizePolicy {
    global: bool,
    /// Lowercased module names
    include: FxHashSet<String>,
    /// Lowercased module names
    exclude: FxHashSet<String>,
    patterns: Option<RegexSet>,
    exclude_serializable: bool,
}

impl InternalizePolicy {
    pub fn new(config: &InternalizeConfig) -> Result<Self, MergeError> {
        let lowercase = |names: &[String]| {
            names
                .iter()
                .map(|n| n.cow_to_ascii_lowercase().into_owned())
                .collect::<FxHashSet<_>>()
        };

        Ok(Self {
            global: config.enabled,
            include: lowercase(&config.include),
            exclude: lowercase(&config.exclude),
            patterns: compile_patterns(&config.exclude_patterns)?,
            exclude_serializable: config.exclude_serializable,
        })
    }

    /// Module granularity: whether a secondary module's types are candidates
    pub fn should_internalize_assembly(&self, module_name: &str) -> bool {
        let key = module_name.cow_to_ascii_lowercase();
        (self.global || self.include.contains(key.as_ref())) && !self.exclude.contains(key.as_ref())
    }

    /// Type granularity: whether a symbol of an internalized module is hidden
    ///
    /// Patterns are tried against both `name` and `[name]`, so patterns written
    /// for generic-argument positions keep matching.
    pub fn should_internalize(&self, qualified_name: &str, assembly_flag: bool) -> bool {
        if !assembly_flag {
            return false;
        }
        let Some(patterns) = &self.patterns else {
            return true;
        };
        !(patterns.is_match(qualified_name) || patterns.is_match(&format!("[{qualified_name}]")))
    }

    /// Type decision including the serializable exemption
    pub fn should_internalize_type(&self, module: &Module, ty: TypeId, assembly_flag: bool) -> bool {
        if !self.should_internalize(&module.qualified_name(ty), assembly_flag) {
            return false;
        }
        !(self.exclude_serializable && is_serializable_exempt(module, ty))
    }
}

/// Public types that are serializable, carry a contract attribute, or have a
/// public nested type that qualifies
pub fn is_serializable_exempt(module: &Module, ty: TypeId) -> bool {
    let def = module.type_def(ty);
    if !def.visibility.is_public() {
        return false;
    }
    if def.is_serializable
        || def
            .attributes
            .iter()
            .any(|attr| CONTRACT_ATTRIBUTES.contains(&attr.as_str()))
    {
        return true;
    }
    def.nested
        .iter()
        .any(|&nested| is_serializable_exempt(module, nested))
}

fn compile_patterns(patterns: &[String]) -> Result<Option<RegexSet>, MergeError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    // Compile individually first so a failure names the offending pattern
    for pattern in patterns {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| MergeError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
    }
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|err| MergeError::InvalidPattern {
            pattern: patterns.join(" | "),
            message: err.to_string(),
        })
}
