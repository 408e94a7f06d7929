//! In-memory image of a compiled module
//!
//! A module is an arena of plain data: types, methods, fields and references
//! live in flat vectors and point at each other through `u32` index newtypes.
//! The symbol graph is cyclic (a type's method can reference the type itself),
//! so nothing here owns anything else through a pointer.

mod instruction;
pub mod listing;
mod resource;
mod validate;

use std::fmt;

use cow_utils::CowUtils;
use serde::{Deserialize, Serialize};

pub use instruction::{CallSig, Instruction, MethodBody, OpCode, Operand};
pub use resource::{ResourceDirectory, ResourceEntry, ResourceKey, ResourceNode};

/// Reserved name of the type that owns module-level members
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// Reserved name of a static initializer routine
pub const INITIALIZER_NAME: &str = ".cctor";

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            /// Returns the underlying u32 value
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            #[inline]
            pub(crate) const fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(u32::try_from(index).unwrap_or(u32::MAX))
            }
        }
    };
}

arena_id!(
    /// Index of a type definition within its module
    TypeId
);
arena_id!(
    /// Index of a method definition within its module
    MethodId
);
arena_id!(
    /// Index of a field definition within its module
    FieldId
);
arena_id!(
    /// Index of a reference to a type defined elsewhere
    TypeRefId
);
arena_id!(
    /// Index of a reference to a member defined elsewhere
    MemberRefId
);
arena_id!(
    /// Index of a referenced module (assembly) entry
    AssemblyRefId
);
arena_id!(
    /// Index of an exported-type (forwarder) entry
    ExportedTypeId
);

/// Four-part module version
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl ModuleVersion {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Output kind of a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    #[default]
    Library,
    Console,
    Windows,
}

/// Visibility of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeVisibility {
    /// Top-level, visible only inside its module
    NotPublic,
    /// Top-level, visible to every consumer
    Public,
    NestedPublic,
    NestedPrivate,
    NestedFamily,
    NestedAssembly,
    NestedFamilyOrAssembly,
    NestedFamilyAndAssembly,
}

impl TypeVisibility {
    /// Whether consumers outside the module can see the type
    pub fn is_public(self) -> bool {
        matches!(self, Self::Public | Self::NestedPublic)
    }

    /// The visibility after internalization
    ///
    /// Only public visibilities change; everything else is already hidden.
    pub fn internalized(self) -> Self {
        match self {
            Self::Public => Self::NotPublic,
            Self::NestedPublic => Self::NestedAssembly,
            other => other,
        }
    }
}

/// Accessibility of a field or method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberAccess {
    Private,
    FamilyAndAssembly,
    Assembly,
    Family,
    FamilyOrAssembly,
    Public,
}

/// A type as it appears in signatures and operands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    /// Type defined in the same module
    Def(TypeId),
    /// Type defined in another module
    Ref(TypeRefId),
    /// Single-dimensional array of the element type
    Array(Box<TypeSig>),
    /// Generic instantiation
    Generic { base: Box<TypeSig>, args: Vec<TypeSig> },
}

/// Reference to a method, either local or through a member reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodHandle {
    Def(MethodId),
    Ref(MemberRefId),
}

/// Reference to a field, either local or through a member reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldHandle {
    Def(FieldId),
    Ref(MemberRefId),
}

/// Type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub visibility: TypeVisibility,
    /// Carries the runtime serializability flag
    #[serde(default)]
    pub is_serializable: bool,
    /// Full names of the custom attribute types applied to this type
    #[serde(default)]
    pub attributes: Vec<String>,
    pub base: Option<TypeSig>,
    #[serde(default)]
    pub interfaces: Vec<TypeSig>,
    pub declaring: Option<TypeId>,
    #[serde(default)]
    pub nested: Vec<TypeId>,
    #[serde(default)]
    pub fields: Vec<FieldId>,
    #[serde(default)]
    pub methods: Vec<MethodId>,
}

impl TypeDef {
    /// Create an empty type definition
    pub fn new(namespace: &str, name: &str, visibility: TypeVisibility) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            visibility,
            is_serializable: false,
            attributes: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            declaring: None,
            nested: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Whether this is the reserved type owning module-level members
    pub fn is_module_type(&self) -> bool {
        self.declaring.is_none() && self.namespace.is_empty() && self.name == MODULE_TYPE_NAME
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub access: MemberAccess,
    pub is_static: bool,
    #[serde(default)]
    pub params: Vec<TypeSig>,
    pub ret: Option<TypeSig>,
    pub body: Option<MethodBody>,
    pub declaring: TypeId,
}

impl MethodDef {
    /// Whether this routine is a static initializer
    pub fn is_initializer(&self) -> bool {
        self.is_static && self.params.is_empty() && self.name == INITIALIZER_NAME
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub access: MemberAccess,
    pub is_static: bool,
    pub field_type: TypeSig,
    pub declaring: TypeId,
}

/// Where a type reference is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Defined in the referenced assembly
    Assembly(AssemblyRefId),
    /// Nested inside another referenced type
    Nested(TypeRefId),
    /// Defined in the referencing module itself
    Local,
}

/// Reference to a type defined elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub scope: Scope,
    pub namespace: String,
    pub name: String,
}

/// Kind-specific part of a member reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRefKind {
    Method {
        params: Vec<TypeSig>,
        ret: Option<TypeSig>,
    },
    Field {
        ty: TypeSig,
    },
}

/// Reference to a member of a type defined elsewhere or of a generic instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub parent: TypeSig,
    pub name: String,
    pub kind: MemberRefKind,
}

/// Reference to another module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyRef {
    pub name: String,
    pub version: ModuleVersion,
}

/// Where an exported type lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportImpl {
    /// In a referenced module
    Assembly(AssemblyRefId),
    /// Nested inside another exported type
    Declaring(ExportedTypeId),
    /// In this module
    Local,
}

/// Exported-type entry, optionally a forwarder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedType {
    pub namespace: String,
    pub name: String,
    pub implementation: ExportImpl,
    #[serde(default)]
    pub is_forwarder: bool,
}

/// A compiled module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub version: ModuleVersion,
    /// Runtime (execution model) the module was compiled for
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub kind: ModuleKind,
    /// Module version id, derived for merged output
    pub mvid: Option<String>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub type_refs: Vec<TypeRef>,
    #[serde(default)]
    pub member_refs: Vec<MemberRef>,
    #[serde(default)]
    pub assembly_refs: Vec<AssemblyRef>,
    #[serde(default)]
    pub exported_types: Vec<ExportedType>,
    pub resources: Option<ResourceDirectory>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn type_def_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index()]
    }

    pub fn type_ref(&self, id: TypeRefId) -> &TypeRef {
        &self.type_refs[id.index()]
    }

    pub fn member_ref(&self, id: MemberRefId) -> &MemberRef {
        &self.member_refs[id.index()]
    }

    pub fn assembly_ref(&self, id: AssemblyRefId) -> &AssemblyRef {
        &self.assembly_refs[id.index()]
    }

    pub fn exported_type(&self, id: ExportedTypeId) -> &ExportedType {
        &self.exported_types[id.index()]
    }

    /// Iterate over all type ids in declaration order
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(TypeId::from_index)
    }

    /// Iterate over all method ids in declaration order
    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> + '_ {
        (0..self.methods.len()).map(MethodId::from_index)
    }

    /// Iterate over exported-type ids in declaration order
    pub fn exported_type_ids(&self) -> impl Iterator<Item = ExportedTypeId> + '_ {
        (0..self.exported_types.len()).map(ExportedTypeId::from_index)
    }

    /// Types that are not nested in another type, in declaration order
    pub fn top_level_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.type_ids()
            .filter(|&id| self.type_def(id).declaring.is_none())
    }

    /// Qualified name: `Namespace.Name`, nested types as `Outer/Inner`
    pub fn qualified_name(&self, id: TypeId) -> String {
        let def = self.type_def(id);
        match def.declaring {
            Some(outer) => format!("{}/{}", self.qualified_name(outer), def.name),
            None => join_namespace(&def.namespace, &def.name),
        }
    }

    /// Qualified name of a type reference, following nesting scopes
    pub fn type_ref_name(&self, id: TypeRefId) -> String {
        let tr = self.type_ref(id);
        match tr.scope {
            Scope::Nested(outer) => format!("{}/{}", self.type_ref_name(outer), tr.name),
            Scope::Assembly(_) | Scope::Local => join_namespace(&tr.namespace, &tr.name),
        }
    }

    /// The reserved module-level type, if the module declares one
    pub fn module_type(&self) -> Option<TypeId> {
        self.top_level_types()
            .find(|&id| self.type_def(id).is_module_type())
    }

    /// The module initializer routine, if any
    pub fn initializer(&self) -> Option<MethodId> {
        let module_type = self.module_type()?;
        self.type_def(module_type)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).is_initializer())
    }

    /// Find an assembly reference by name (case-insensitive)
    pub fn find_assembly_ref(&self, name: &str) -> Option<AssemblyRefId> {
        let wanted = name.cow_to_ascii_lowercase();
        self.assembly_refs
            .iter()
            .position(|r| r.name.cow_to_ascii_lowercase() == wanted)
            .map(AssemblyRefId::from_index)
    }

    /// Whether the module references the named assembly
    pub fn references_assembly(&self, name: &str) -> bool {
        self.find_assembly_ref(name).is_some()
    }

    /// Find an exported-type entry by qualified name
    pub fn find_exported_type(&self, qualified_name: &str) -> Option<ExportedTypeId> {
        self.exported_type_ids()
            .find(|&id| self.exported_type_name(id) == qualified_name)
    }

    /// Qualified name of an exported type, following declaring exports
    ///
    /// Malformed inputs whose declaring chain loops are cut at the first
    /// repeated entry.
    pub fn exported_type_name(&self, id: ExportedTypeId) -> String {
        let mut segments = Vec::new();
        let mut seen = Vec::new();
        let mut current = id;
        loop {
            let export = self.exported_type(current);
            seen.push(current);
            match export.implementation {
                ExportImpl::Declaring(outer) if !seen.contains(&outer) => {
                    segments.push(export.name.clone());
                    current = outer;
                }
                _ => {
                    segments.push(join_namespace(&export.namespace, &export.name));
                    break;
                }
            }
        }
        segments.reverse();
        segments.join("/")
    }

    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId::from_index(self.types.len());
        if let Some(outer) = def.declaring {
            self.type_def_mut(outer).nested.push(id);
        }
        self.types.push(def);
        id
    }

    pub fn add_method(&mut self, def: MethodDef) -> MethodId {
        let id = MethodId::from_index(self.methods.len());
        let declaring = def.declaring;
        self.methods.push(def);
        self.type_def_mut(declaring).methods.push(id);
        id
    }

    pub fn add_field(&mut self, def: FieldDef) -> FieldId {
        let id = FieldId::from_index(self.fields.len());
        let declaring = def.declaring;
        self.fields.push(def);
        self.type_def_mut(declaring).fields.push(id);
        id
    }

    pub fn add_type_ref(&mut self, tr: TypeRef) -> TypeRefId {
        let id = TypeRefId::from_index(self.type_refs.len());
        self.type_refs.push(tr);
        id
    }

    pub fn add_member_ref(&mut self, mr: MemberRef) -> MemberRefId {
        let id = MemberRefId::from_index(self.member_refs.len());
        self.member_refs.push(mr);
        id
    }

    pub fn add_assembly_ref(&mut self, name: &str, version: ModuleVersion) -> AssemblyRefId {
        let id = AssemblyRefId::from_index(self.assembly_refs.len());
        self.assembly_refs.push(AssemblyRef {
            name: name.to_owned(),
            version,
        });
        id
    }

    pub fn add_exported_type(&mut self, export: ExportedType) -> ExportedTypeId {
        let id = ExportedTypeId::from_index(self.exported_types.len());
        self.exported_types.push(export);
        id
    }

    /// Name of the method a call operand targets
    pub fn method_handle_name(&self, handle: MethodHandle) -> &str {
        match handle {
            MethodHandle::Def(id) => &self.method(id).name,
            MethodHandle::Ref(id) => &self.member_ref(id).name,
        }
    }
}

/// Join a namespace and a simple name into a qualified name
pub fn join_namespace(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}
