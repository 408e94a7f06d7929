//! Offset fixup for the concatenated resource blob
//!
//! Generated page code reads literal strings out of the appendable blob by
//! byte offset. Once a secondary module's blob has been appended after the
//! primary's, those offsets are off by the length of everything in front of
//! it; this pass adds that length back.

use log::{debug, warn};

use crate::{
    image::{Module, OpCode, Operand},
    module_registry::ModuleId,
    symbol_map::SymbolMap,
    types::FxIndexMap,
};

/// Routines whose offset argument is pushed three instructions before the call
pub const OFFSET_CONSUMERS: [&str; 2] = [
    "WriteUTF8ResourceString",
    "CreateResourceBasedLiteralControl",
];

/// Distance from the offset push to the consuming call
const OFFSET_DISTANCE: usize = 3;

/// Shift blob offsets in methods whose module was appended at a nonzero offset
///
/// Returns the number of patched instructions.
pub fn apply_resource_offsets(
    target: &mut Module,
    map: &SymbolMap,
    offsets: &FxIndexMap<ModuleId, u32>,
) -> usize {
    if offsets.values().all(|&offset| offset == 0) {
        return 0;
    }

    let mut patched = 0;
    for method in target.method_ids().collect::<Vec<_>>() {
        let Some(mut body) = target.method_mut(method).body.take() else {
            continue;
        };

        let sites: Vec<usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instr)| match &instr.operand {
                Operand::Method(handle)
                    if instr.opcode.is_call()
                        && index >= OFFSET_DISTANCE
                        && OFFSET_CONSUMERS.contains(&target.method_handle_name(*handle)) =>
                {
                    Some(index - OFFSET_DISTANCE)
                }
                _ => None,
            })
            .collect();

        for site in sites {
            // Folded initializers mix blocks from several modules
            let Some(&offset) = map
                .block_origin(method, site)
                .or_else(|| map.method_origin(method))
                .and_then(|origin| offsets.get(&origin))
            else {
                continue;
            };
            let Ok(shift) = i32::try_from(offset) else {
                warn!("Resource offset {offset} does not fit an ldc.i4 operand; skipping");
                continue;
            };
            let push = &mut body.instructions[site];
            match (push.opcode, &mut push.operand) {
                (OpCode::LdcI4, Operand::Int32(value)) => {
                    *value = value.wrapping_add(shift);
                    patched += 1;
                }
                _ => debug!(
                    "Expected ldc.i4 at {site} in {}; leaving it unchanged",
                    target.method(method).name
                ),
            }
        }
        target.method_mut(method).body = Some(body);
    }

    debug!("Adjusted {patched} resource offsets");
    patched
}
