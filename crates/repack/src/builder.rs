//! Builders for synthetic module content
//!
//! Factory functions for instructions that do not originate from an input
//! module (the merged initializer's final `ret`, relinked branches), plus a
//! small fluent `ModuleBuilder` used to assemble modules in tests and tools.

use crate::image::{
    AssemblyRefId, ExportImpl, ExportedType, ExportedTypeId, FieldDef, FieldHandle, FieldId,
    Instruction, MemberAccess, MemberRef, MemberRefKind, MethodBody, MethodDef, MethodHandle,
    MethodId, Module, ModuleVersion, OpCode, Operand, ResourceDirectory, Scope, TypeDef, TypeId,
    TypeRef, TypeRefId, TypeSig, TypeVisibility,
};

/// Create a return instruction: `ret`
pub fn ret() -> Instruction {
    Instruction::simple(OpCode::Ret)
}

/// Create a no-op: `nop`
pub fn nop() -> Instruction {
    Instruction::simple(OpCode::Nop)
}

/// Create an integer constant load: `ldc.i4 value`
pub fn ldc_i4(value: i32) -> Instruction {
    Instruction::new(OpCode::LdcI4, Operand::Int32(value))
}

/// Create a string literal load: `ldstr "value"`
pub fn ldstr(value: &str) -> Instruction {
    Instruction::new(OpCode::Ldstr, Operand::String(value.to_owned()))
}

/// Create a static call: `call method`
pub fn call(method: MethodHandle) -> Instruction {
    Instruction::new(OpCode::Call, Operand::Method(method))
}

/// Create a static field store: `stsfld field`
pub fn stsfld(field: FieldHandle) -> Instruction {
    Instruction::new(OpCode::Stsfld, Operand::Field(field))
}

/// Create a static field load: `ldsfld field`
pub fn ldsfld(field: FieldHandle) -> Instruction {
    Instruction::new(OpCode::Ldsfld, Operand::Field(field))
}

/// Create a type token load: `ldtoken type`
pub fn ldtoken(ty: TypeSig) -> Instruction {
    Instruction::new(OpCode::Ldtoken, Operand::Type(ty))
}

/// Create a branch with the given opcode to an instruction index
pub fn branch(opcode: OpCode, target: usize) -> Instruction {
    Instruction::new(opcode, Operand::Branch(target))
}

/// Fluent construction of a [`Module`]
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    #[must_use]
    pub fn version(mut self, version: ModuleVersion) -> Self {
        self.module.version = version;
        self
    }

    #[must_use]
    pub fn runtime(mut self, runtime: &str) -> Self {
        self.module.runtime = runtime.to_owned();
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: ResourceDirectory) -> Self {
        self.module.resources = Some(resources);
        self
    }

    /// Declare a top-level type
    pub fn add_type(&mut self, namespace: &str, name: &str, visibility: TypeVisibility) -> TypeId {
        self.module
            .add_type(TypeDef::new(namespace, name, visibility))
    }

    /// Declare a type nested in `outer`
    pub fn add_nested(&mut self, outer: TypeId, name: &str, visibility: TypeVisibility) -> TypeId {
        let mut def = TypeDef::new("", name, visibility);
        def.declaring = Some(outer);
        self.module.add_type(def)
    }

    /// The reserved module-level type, created on first use
    pub fn module_type(&mut self) -> TypeId {
        match self.module.module_type() {
            Some(id) => id,
            None => self.add_type(
                "",
                crate::image::MODULE_TYPE_NAME,
                TypeVisibility::NotPublic,
            ),
        }
    }

    /// Attach a static initializer with the given instructions to the module
    pub fn initializer(&mut self, instructions: Vec<Instruction>) -> MethodId {
        let owner = self.module_type();
        self.module.add_method(MethodDef {
            name: crate::image::INITIALIZER_NAME.to_owned(),
            access: MemberAccess::Private,
            is_static: true,
            params: Vec::new(),
            ret: None,
            body: Some(MethodBody::new(instructions)),
            declaring: owner,
        })
    }

    /// Declare a method; `body` of `None` declares an abstract/extern routine
    pub fn add_method(
        &mut self,
        owner: TypeId,
        name: &str,
        params: Vec<TypeSig>,
        ret: Option<TypeSig>,
        body: Option<Vec<Instruction>>,
    ) -> MethodId {
        self.module.add_method(MethodDef {
            name: name.to_owned(),
            access: MemberAccess::Public,
            is_static: true,
            params,
            ret,
            body: body.map(MethodBody::new),
            declaring: owner,
        })
    }

    /// Declare a static field
    pub fn add_field(&mut self, owner: TypeId, name: &str, field_type: TypeSig) -> FieldId {
        self.module.add_field(FieldDef {
            name: name.to_owned(),
            access: MemberAccess::Public,
            is_static: true,
            field_type,
            declaring: owner,
        })
    }

    pub fn assembly_ref(&mut self, name: &str, version: ModuleVersion) -> AssemblyRefId {
        match self.module.find_assembly_ref(name) {
            Some(id) => id,
            None => self.module.add_assembly_ref(name, version),
        }
    }

    /// Reference a top-level type of another module
    pub fn type_ref(&mut self, assembly: &str, namespace: &str, name: &str) -> TypeRefId {
        let scope = Scope::Assembly(self.assembly_ref(assembly, ModuleVersion::default()));
        self.module.add_type_ref(TypeRef {
            scope,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Reference a method of a type in another module
    pub fn method_ref(
        &mut self,
        parent: TypeSig,
        name: &str,
        params: Vec<TypeSig>,
        ret: Option<TypeSig>,
    ) -> MethodHandle {
        MethodHandle::Ref(self.module.add_member_ref(MemberRef {
            parent,
            name: name.to_owned(),
            kind: MemberRefKind::Method { params, ret },
        }))
    }

    /// Reference a field of a type in another module
    pub fn field_ref(&mut self, parent: TypeSig, name: &str, ty: TypeSig) -> FieldHandle {
        FieldHandle::Ref(self.module.add_member_ref(MemberRef {
            parent,
            name: name.to_owned(),
            kind: MemberRefKind::Field { ty },
        }))
    }

    /// Export a type that lives in another module
    pub fn forward(&mut self, namespace: &str, name: &str, assembly: &str) -> ExportedTypeId {
        let target = self.assembly_ref(assembly, ModuleVersion::default());
        self.module.add_exported_type(ExportedType {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            implementation: ExportImpl::Assembly(target),
            is_forwarder: true,
        })
    }

    /// Export a type nested in another exported type
    pub fn forward_nested(&mut self, outer: ExportedTypeId, name: &str) -> ExportedTypeId {
        self.module.add_exported_type(ExportedType {
            namespace: String::new(),
            name: name.to_owned(),
            implementation: ExportImpl::Declaring(outer),
            is_forwarder: false,
        })
    }

    /// Mutable access for details the fluent methods do not cover
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn build(self) -> Module {
        self.module
    }
}
