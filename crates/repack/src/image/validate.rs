//! Structural checks on a loaded module
//!
//! The rest of the crate indexes the arenas directly, so every id a module
//! stores must name an existing entry and declaring chains must end.

use std::fmt;

use super::{
    CallSig, ExportImpl, FieldHandle, MemberRefKind, MethodHandle, Module, Operand, Scope,
    TypeId, TypeRefId, TypeSig,
};
use crate::error::MergeError;

/// Table entry that holds a bad id
#[derive(Debug, Clone, Copy)]
enum Site {
    Type(usize),
    Method(usize),
    Field(usize),
    TypeRef(usize),
    MemberRef(usize),
    Export(usize),
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(i) => write!(f, "type #{i}"),
            Self::Method(i) => write!(f, "method #{i}"),
            Self::Field(i) => write!(f, "field #{i}"),
            Self::TypeRef(i) => write!(f, "type reference #{i}"),
            Self::MemberRef(i) => write!(f, "member reference #{i}"),
            Self::Export(i) => write!(f, "exported type #{i}"),
        }
    }
}

impl Module {
    /// Check that every stored id is in range and no declaring chain loops
    ///
    /// Cycles between exported types are left to forwarder resolution, which
    /// reports them with the chain.
    pub fn validate(&self) -> Result<(), MergeError> {
        let checker = Checker { module: self };

        for (i, def) in self.types.iter().enumerate() {
            let site = Site::Type(i);
            if let Some(declaring) = def.declaring {
                checker.ty(declaring, site)?;
            }
            for &nested in &def.nested {
                checker.ty(nested, site)?;
            }
            for &field in &def.fields {
                checker.in_range("field", field.index(), self.fields.len(), site)?;
            }
            for &method in &def.methods {
                checker.in_range("method", method.index(), self.methods.len(), site)?;
            }
            for sig in def.base.iter().chain(&def.interfaces) {
                checker.sig(sig, site)?;
            }
        }

        for (i, def) in self.methods.iter().enumerate() {
            let site = Site::Method(i);
            checker.ty(def.declaring, site)?;
            for sig in def.params.iter().chain(&def.ret) {
                checker.sig(sig, site)?;
            }
            if let Some(body) = &def.body {
                for sig in &body.locals {
                    checker.sig(sig, site)?;
                }
                for instruction in &body.instructions {
                    checker.operand(&instruction.operand, site)?;
                }
            }
        }

        for (i, def) in self.fields.iter().enumerate() {
            let site = Site::Field(i);
            checker.ty(def.declaring, site)?;
            checker.sig(&def.field_type, site)?;
        }

        for (i, type_ref) in self.type_refs.iter().enumerate() {
            let site = Site::TypeRef(i);
            match type_ref.scope {
                Scope::Assembly(assembly) => checker.in_range(
                    "assembly reference",
                    assembly.index(),
                    self.assembly_refs.len(),
                    site,
                )?,
                Scope::Nested(outer) => checker.type_ref(outer, site)?,
                Scope::Local => {}
            }
        }

        for (i, member_ref) in self.member_refs.iter().enumerate() {
            let site = Site::MemberRef(i);
            checker.sig(&member_ref.parent, site)?;
            match &member_ref.kind {
                MemberRefKind::Method { params, ret } => {
                    checker.signature(params, ret.as_ref(), site)?;
                }
                MemberRefKind::Field { ty } => checker.sig(ty, site)?,
            }
        }

        for (i, export) in self.exported_types.iter().enumerate() {
            let site = Site::Export(i);
            match export.implementation {
                ExportImpl::Assembly(assembly) => checker.in_range(
                    "assembly reference",
                    assembly.index(),
                    self.assembly_refs.len(),
                    site,
                )?,
                ExportImpl::Declaring(outer) => checker.in_range(
                    "exported type",
                    outer.index(),
                    self.exported_types.len(),
                    site,
                )?,
                ExportImpl::Local => {}
            }
        }

        checker.declaring_chains_end()
    }
}

struct Checker<'m> {
    module: &'m Module,
}

impl Checker<'_> {
    fn malformed(&self, detail: String) -> MergeError {
        MergeError::MalformedModule {
            module: self.module.name.clone(),
            detail,
        }
    }

    fn in_range(&self, kind: &str, index: usize, len: usize, site: Site) -> Result<(), MergeError> {
        if index < len {
            Ok(())
        } else {
            Err(self.malformed(format!(
                "{site} refers to {kind} {index}, but only {len} exist"
            )))
        }
    }

    fn ty(&self, id: TypeId, site: Site) -> Result<(), MergeError> {
        self.in_range("type", id.index(), self.module.types.len(), site)
    }

    fn type_ref(&self, id: TypeRefId, site: Site) -> Result<(), MergeError> {
        self.in_range(
            "type reference",
            id.index(),
            self.module.type_refs.len(),
            site,
        )
    }

    fn sig(&self, sig: &TypeSig, site: Site) -> Result<(), MergeError> {
        match sig {
            TypeSig::Def(id) => self.ty(*id, site),
            TypeSig::Ref(id) => self.type_ref(*id, site),
            TypeSig::Array(element) => self.sig(element, site),
            TypeSig::Generic { base, args } => {
                self.sig(base, site)?;
                args.iter().try_for_each(|arg| self.sig(arg, site))
            }
        }
    }

    fn signature(
        &self,
        params: &[TypeSig],
        ret: Option<&TypeSig>,
        site: Site,
    ) -> Result<(), MergeError> {
        params
            .iter()
            .chain(ret)
            .try_for_each(|sig| self.sig(sig, site))
    }

    fn member_ref(&self, index: usize, site: Site) -> Result<(), MergeError> {
        self.in_range(
            "member reference",
            index,
            self.module.member_refs.len(),
            site,
        )
    }

    fn operand(&self, operand: &Operand, site: Site) -> Result<(), MergeError> {
        match operand {
            Operand::Type(sig) => self.sig(sig, site),
            Operand::Method(MethodHandle::Def(id)) => {
                self.in_range("method", id.index(), self.module.methods.len(), site)
            }
            Operand::Method(MethodHandle::Ref(id)) | Operand::Field(FieldHandle::Ref(id)) => {
                self.member_ref(id.index(), site)
            }
            Operand::Field(FieldHandle::Def(id)) => {
                self.in_range("field", id.index(), self.module.fields.len(), site)
            }
            Operand::Signature(CallSig { params, ret }) => {
                self.signature(params, ret.as_ref(), site)
            }
            // Branch targets are checked against the body when it is relinked
            Operand::None
            | Operand::Int32(_)
            | Operand::Int64(_)
            | Operand::Float64(_)
            | Operand::String(_)
            | Operand::Branch(_)
            | Operand::Switch(_)
            | Operand::Local(_)
            | Operand::Argument(_) => Ok(()),
        }
    }

    /// Walks every declaring chain; a chain longer than its table loops
    fn declaring_chains_end(&self) -> Result<(), MergeError> {
        let types = &self.module.types;
        for (start, def) in types.iter().enumerate() {
            let mut current = def.declaring;
            let mut steps = 0;
            while let Some(outer) = current {
                steps += 1;
                if steps > types.len() {
                    return Err(self.malformed(format!(
                        "declaring types of {} form a cycle",
                        Site::Type(start)
                    )));
                }
                current = types[outer.index()].declaring;
            }
        }

        let type_refs = &self.module.type_refs;
        for (start, type_ref) in type_refs.iter().enumerate() {
            let mut current = type_ref.scope;
            let mut steps = 0;
            while let Scope::Nested(outer) = current {
                steps += 1;
                if steps > type_refs.len() {
                    return Err(self.malformed(format!(
                        "declaring references of {} form a cycle",
                        Site::TypeRef(start)
                    )));
                }
                current = type_refs[outer.index()].scope;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        builder::{self, ModuleBuilder},
        image::{FieldId, TypeRef, TypeVisibility},
    };

    #[test]
    fn test_builder_output_is_valid() {
        let mut lib = ModuleBuilder::new("Lib");
        let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
        let inner = lib.add_nested(widget, "Inner", TypeVisibility::NestedPublic);
        let count = lib.add_field(inner, "Count", TypeSig::Def(widget));
        let console = lib.type_ref("System.Console", "System", "Console");
        let write = lib.method_ref(TypeSig::Ref(console), "WriteLine", vec![], None);
        let out = lib.field_ref(TypeSig::Ref(console), "Out", TypeSig::Ref(console));
        lib.add_method(
            widget,
            "Show",
            vec![],
            None,
            Some(vec![
                builder::ldsfld(FieldHandle::Def(count)),
                builder::ldsfld(out),
                builder::call(write),
                builder::ret(),
            ]),
        );
        let span = lib.forward("System", "Span", "System.Memory");
        lib.forward_nested(span, "Enumerator");

        assert_eq!(lib.build().validate(), Ok(()));
    }

    #[test]
    fn test_field_index_past_the_table_is_rejected() {
        let mut lib = ModuleBuilder::new("Lib");
        let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
        lib.module_mut()
            .type_def_mut(widget)
            .fields
            .push(FieldId::new(5));

        assert_eq!(
            lib.build().validate(),
            Err(MergeError::MalformedModule {
                module: "Lib".to_owned(),
                detail: "type #0 refers to field 5, but only 0 exist".to_owned(),
            })
        );
    }

    #[test]
    fn test_operand_into_missing_member_reference_is_rejected() {
        let mut lib = ModuleBuilder::new("Lib");
        let widget = lib.add_type("Lib", "Widget", TypeVisibility::Public);
        lib.add_method(
            widget,
            "Show",
            vec![],
            None,
            Some(vec![
                builder::call(MethodHandle::Ref(crate::image::MemberRefId::new(2))),
                builder::ret(),
            ]),
        );

        let err = lib.build().validate().unwrap_err();
        assert!(
            matches!(&err, MergeError::MalformedModule { detail, .. } if detail.starts_with("method #0")),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn test_declaring_type_cycle_is_rejected() {
        let mut lib = ModuleBuilder::new("Lib");
        let first = lib.add_type("Lib", "First", TypeVisibility::Public);
        let second = lib.add_type("Lib", "Second", TypeVisibility::Public);
        lib.module_mut().type_def_mut(first).declaring = Some(second);
        lib.module_mut().type_def_mut(second).declaring = Some(first);

        let err = lib.build().validate().unwrap_err();
        assert!(
            matches!(&err, MergeError::MalformedModule { detail, .. } if detail.contains("cycle")),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn test_self_nested_type_reference_is_rejected() {
        let mut lib = ModuleBuilder::new("Lib");
        lib.module_mut().add_type_ref(TypeRef {
            scope: Scope::Nested(TypeRefId::new(0)),
            namespace: String::new(),
            name: "Loop".to_owned(),
        });

        assert!(lib.build().validate().is_err());
    }
}
