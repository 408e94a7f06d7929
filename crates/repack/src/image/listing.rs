//! Human-readable rendering of routine bodies, used in logs and tests

use std::fmt::Write;

use super::{
    FieldHandle, Instruction, MethodBody, MethodHandle, Module, Operand, Scope, TypeSig,
};

/// Render a body as one instruction per line: `0003: call Ns.Type::Name`
pub fn render_body(module: &Module, body: &MethodBody) -> String {
    let mut out = String::new();
    for (index, instr) in body.instructions.iter().enumerate() {
        let _ = write!(out, "{index:04}: {}", instr.opcode.mnemonic());
        let operand = render_operand(module, instr);
        if !operand.is_empty() {
            out.push(' ');
            out.push_str(&operand);
        }
        out.push('\n');
    }
    out
}

fn render_operand(module: &Module, instr: &Instruction) -> String {
    match &instr.operand {
        Operand::None => String::new(),
        Operand::Int32(v) => v.to_string(),
        Operand::Int64(v) => v.to_string(),
        Operand::Float64(v) => v.to_string(),
        Operand::String(s) => format!("{s:?}"),
        Operand::Type(sig) => render_sig(module, sig),
        Operand::Method(handle) => render_method(module, *handle),
        Operand::Field(handle) => render_field(module, *handle),
        Operand::Branch(target) => format!("-> {target:04}"),
        Operand::Switch(targets) => targets
            .iter()
            .map(|t| format!("{t:04}"))
            .collect::<Vec<_>>()
            .join(", "),
        Operand::Local(index) => format!("V_{index}"),
        Operand::Argument(index) => format!("A_{index}"),
        Operand::Signature(_) => "<callsite>".to_owned(),
    }
}

/// Render a type signature, prefixing external types with their scope
pub fn render_sig(module: &Module, sig: &TypeSig) -> String {
    match sig {
        TypeSig::Def(id) => module.qualified_name(*id),
        TypeSig::Ref(id) => {
            let mut root = *id;
            while let Scope::Nested(outer) = module.type_ref(root).scope {
                root = outer;
            }
            match module.type_ref(root).scope {
                Scope::Assembly(asm) => format!(
                    "[{}]{}",
                    module.assembly_ref(asm).name,
                    module.type_ref_name(*id)
                ),
                Scope::Local | Scope::Nested(_) => module.type_ref_name(*id),
            }
        }
        TypeSig::Array(element) => format!("{}[]", render_sig(module, element)),
        TypeSig::Generic { base, args } => format!(
            "{}<{}>",
            render_sig(module, base),
            args.iter()
                .map(|a| render_sig(module, a))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn render_method(module: &Module, handle: MethodHandle) -> String {
    match handle {
        MethodHandle::Def(id) => {
            let method = module.method(id);
            format!("{}::{}", module.qualified_name(method.declaring), method.name)
        }
        MethodHandle::Ref(id) => {
            let member = module.member_ref(id);
            format!("{}::{}", render_sig(module, &member.parent), member.name)
        }
    }
}

fn render_field(module: &Module, handle: FieldHandle) -> String {
    match handle {
        FieldHandle::Def(id) => {
            let field = module.field(id);
            format!("{}::{}", module.qualified_name(field.declaring), field.name)
        }
        FieldHandle::Ref(id) => {
            let member = module.member_ref(id);
            format!("{}::{}", render_sig(module, &member.parent), member.name)
        }
    }
}
