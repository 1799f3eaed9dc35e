//! The string-keyed dictionary that the compilation passes use to hand data
//! to each other. Payloads are a closed enum rather than type-erased values,
//! so a reader that finds the wrong shape under a well-known key is a plain
//! pattern-match miss instead of a downcast failure.

use std::collections::{BTreeMap, HashMap};

use crate::arm::{ConditionCode, Reg};
use crate::mir::{BlockId, VarId};

/// Key under which the MIR-variable to virtual-register map is published,
/// per function name.
pub const MIR_VARIABLE_TO_ARM_VREG: &str = "mir_variable_to_arm_vreg";

/// Key under which an earlier pass supplies the block traversal order, per
/// function name.
pub const BASIC_BLOCK_ORDERING: &str = "basic_block_ordering";

/// Key under which an earlier pass supplies conditional-execution hints, per
/// function name. The lowering core reads these but leaves acting on them to
/// later passes.
pub const INLINE_BLKS: &str = "inline_blks";

pub type ExtraData = HashMap<String, ExtraDataValue>;

#[derive(Debug, Clone)]
pub enum ExtraDataValue {
    BasicBlockOrdering(HashMap<String, Vec<BlockId>>),
    MirVarToVreg(HashMap<String, BTreeMap<VarId, Reg>>),
    InlineBlks(HashMap<String, BTreeMap<BlockId, ConditionCode>>),
}

/// Looks up the block ordering supplied for `func`, if any.
pub fn block_ordering<'a>(extra: &'a ExtraData, func: &str) -> Option<&'a [BlockId]> {
    match extra.get(BASIC_BLOCK_ORDERING) {
        Some(ExtraDataValue::BasicBlockOrdering(map)) => map.get(func).map(|v| v.as_slice()),
        _ => None,
    }
}

/// Looks up the conditional-execution hints supplied for `func`, if any.
pub fn inline_hints<'a>(
    extra: &'a ExtraData,
    func: &str,
) -> Option<&'a BTreeMap<BlockId, ConditionCode>> {
    match extra.get(INLINE_BLKS) {
        Some(ExtraDataValue::InlineBlks(map)) => map.get(func),
        _ => None,
    }
}

/// Publishes the register map produced while lowering `func`. This is the
/// only write the code generator performs on the shared dictionary.
pub fn publish_reg_map(extra: &mut ExtraData, func: &str, reg_map: BTreeMap<VarId, Reg>) {
    let entry = extra
        .entry(MIR_VARIABLE_TO_ARM_VREG.to_string())
        .or_insert_with(|| ExtraDataValue::MirVarToVreg(HashMap::new()));
    if !matches!(entry, ExtraDataValue::MirVarToVreg(_)) {
        *entry = ExtraDataValue::MirVarToVreg(HashMap::new());
    }
    if let ExtraDataValue::MirVarToVreg(map) = entry {
        map.insert(func.to_string(), reg_map);
    }
}

/// Retrieves a previously published register map for `func`.
pub fn reg_map<'a>(extra: &'a ExtraData, func: &str) -> Option<&'a BTreeMap<VarId, Reg>> {
    match extra.get(MIR_VARIABLE_TO_ARM_VREG) {
        Some(ExtraDataValue::MirVarToVreg(map)) => map.get(func),
        _ => None,
    }
}
