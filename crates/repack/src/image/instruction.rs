//! Bytecode instructions and routine bodies

use serde::{Deserialize, Serialize};

use super::{FieldHandle, MethodHandle, TypeSig};

/// Operation of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Nop,
    Ret,
    Pop,
    Dup,
    Throw,
    LdcI4,
    LdcI8,
    LdcR8,
    Ldstr,
    Ldnull,
    Ldarg,
    Ldloc,
    Stloc,
    Ldfld,
    Stfld,
    Ldsfld,
    Stsfld,
    Ldtoken,
    Call,
    Callvirt,
    Calli,
    Newobj,
    Newarr,
    Box,
    Castclass,
    Br,
    Brtrue,
    Brfalse,
    Beq,
    Switch,
}

impl OpCode {
    /// Textual mnemonic used in listings
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Ret => "ret",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Throw => "throw",
            Self::LdcI4 => "ldc.i4",
            Self::LdcI8 => "ldc.i8",
            Self::LdcR8 => "ldc.r8",
            Self::Ldstr => "ldstr",
            Self::Ldnull => "ldnull",
            Self::Ldarg => "ldarg",
            Self::Ldloc => "ldloc",
            Self::Stloc => "stloc",
            Self::Ldfld => "ldfld",
            Self::Stfld => "stfld",
            Self::Ldsfld => "ldsfld",
            Self::Stsfld => "stsfld",
            Self::Ldtoken => "ldtoken",
            Self::Call => "call",
            Self::Callvirt => "callvirt",
            Self::Calli => "calli",
            Self::Newobj => "newobj",
            Self::Newarr => "newarr",
            Self::Box => "box",
            Self::Castclass => "castclass",
            Self::Br => "br",
            Self::Brtrue => "brtrue",
            Self::Brfalse => "brfalse",
            Self::Beq => "beq",
            Self::Switch => "switch",
        }
    }

    /// Whether the instruction invokes a routine through a method operand
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::Callvirt | Self::Newobj)
    }
}

/// Stand-alone call-site signature used by indirect calls
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSig {
    pub params: Vec<TypeSig>,
    pub ret: Option<TypeSig>,
}

/// Instruction operand
///
/// Branch targets are indexes into the instruction list of the owning body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Type(TypeSig),
    Method(MethodHandle),
    Field(FieldHandle),
    Branch(usize),
    Switch(Vec<usize>),
    Local(u16),
    Argument(u16),
    Signature(CallSig),
}

impl Operand {
    /// Short name of the operand kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
            Self::Type(_) => "type",
            Self::Method(_) => "method",
            Self::Field(_) => "field",
            Self::Branch(_) => "branch",
            Self::Switch(_) => "switch",
            Self::Local(_) => "local",
            Self::Argument(_) => "argument",
            Self::Signature(_) => "signature",
        }
    }
}

/// One bytecode instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    /// Instruction without an operand
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }
}

/// Executable body of a routine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub locals: Vec<TypeSig>,
}

impl MethodBody {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            locals: Vec::new(),
        }
    }
}
