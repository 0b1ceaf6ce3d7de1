//! Pointer-signature inference (C4): assigns symbolic names to abstract
//! storage locations by propagating and unifying "scores" along data flow
//! (spec §4.4).

use crate::formula::{Context, Operand};
use refcount_ir::{GepIndex, Instruction, Type, Value, ValueId};
use std::collections::HashMap;

/// Confidence that a signature names the *true* abstract storage location
/// producing a value, used to pick a winner when two signatures are unified
/// (spec §4.4 "Score table"). Higher always wins; equal scores keep the
/// existing side (first writer wins).
pub mod score {
    pub const DEFAULT: u8 = 0;
    pub const FUNC_CALL: u8 = 50;
    pub const RETURN_VALUE: u8 = 80;
    pub const FORMAL_PARAM: u8 = 90;
    pub const GLOBAL_VAR: u8 = 90;
    pub const CONSTANT: u8 = 95;
    pub const MAX: u8 = 100;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scored {
    pub signature: Operand,
    pub score: u8,
}

/// Per-path overlay of `ValueId -> Scored` signature bindings, mirroring
/// `Context::pathtree`: a miss in the current path walks toward the root
/// before concluding a value has no signature at all.
pub struct SignatureMap {
    by_path: HashMap<u32, HashMap<ValueId, Scored>>,
}

impl SignatureMap {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
        }
    }

    pub fn get(&self, ctx: &Context, path: u32, value: ValueId) -> Option<Scored> {
        for ancestor in ctx.path_lineage(path) {
            if let Some(found) = self.by_path.get(&ancestor).and_then(|m| m.get(&value)) {
                return Some(*found);
            }
        }
        None
    }

    pub fn set(&mut self, path: u32, value: ValueId, scored: Scored) {
        self.by_path.entry(path).or_default().insert(value, scored);
    }

    /// Unifies `value`'s binding toward whichever side scores higher (spec
    /// §4.4 "copySig"). A strictly higher incoming score overwrites; a tie
    /// or loss leaves the existing binding untouched. Returns whether the
    /// binding actually changed, so callers can iterate to a fixpoint.
    pub fn copy_sig(&mut self, ctx: &Context, path: u32, value: ValueId, candidate: Scored) -> bool {
        match self.get(ctx, path, value) {
            Some(existing) if existing.score >= candidate.score => false,
            _ => {
                self.set(path, value, candidate);
                true
            }
        }
    }
}

impl Default for SignatureMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a GEP step chain into a dotted signature suffix, or `None` if an
/// unrecognized step clears the whole component list (spec §4.4 "GEP
/// composition"; SPEC_FULL.md supplement on struct field-name lookup).
pub fn gep_suffix(base_type: &Type, indices: &[GepIndex]) -> Option<String> {
    let mut ty = base_type;
    let mut parts = Vec::new();
    for index in indices {
        match (ty, index) {
            (Type::Struct { fields, .. }, GepIndex::Constant(i)) => {
                let i = usize::try_from(*i).ok()?;
                let field = fields.get(i)?;
                match &field.name {
                    Some(name) => parts.push(name.clone()),
                    None => parts.push(i.to_string()),
                }
                ty = &field.ty;
            }
            (Type::Array { element, .. }, _) => {
                ty = element;
            }
            (Type::Pointer(inner), _) => {
                ty = inner;
            }
            _ => return None,
        }
    }
    Some(parts.join("."))
}

/// `__container_of(ptr, type, member)`-shaped calls invert a field access:
/// the result signature is the pointer's signature with its last `.member`
/// suffix cancelled (spec §4.4, grounded on the original's special-cased
/// handling of this one libc/kernel idiom).
pub fn handle_container_of(pointer_sig: &str, member: &str) -> String {
    let suffix = format!(".{member}");
    if let Some(stripped) = pointer_sig.strip_suffix(&suffix) {
        stripped.to_string()
    } else {
        format!("{pointer_sig}.-{member}")
    }
}

/// Walks one instruction's semantics and returns the `(value, score,
/// signature-suffix-or-whole)` binding it produces, if any (spec §4.4
/// "Instruction semantics"). Call results and formal parameters are handled
/// by the caller, which has access to the callee summary table and the
/// function's parameter signatures respectively.
pub fn infer_local(ctx: &mut Context, sigmap: &SignatureMap, path: u32, inst: &Instruction) -> Option<(ValueId, Scored)> {
    match inst {
        Instruction::GetElementPtr {
            result,
            base,
            base_type,
            indices,
        } => {
            let base_id = match base {
                Value::Local(id) => *id,
                _ => return None,
            };
            let base_scored = sigmap.get(ctx, path, base_id)?;
            let base_sig = base_scored.signature.as_signature()?.to_string();
            let suffix = gep_suffix(base_type, indices)?;
            let full = if suffix.is_empty() {
                base_sig
            } else {
                format!("{base_sig}.{suffix}")
            };
            let sig = ctx.get_signature(full);
            Some((
                *result,
                Scored {
                    signature: sig,
                    score: base_scored.score,
                },
            ))
        }
        Instruction::Cast { result, operand } => {
            let id = match operand {
                Value::Local(id) => *id,
                _ => return None,
            };
            sigmap.get(ctx, path, id).map(|s| (*result, s))
        }
        Instruction::Load { result, pointer } => {
            let id = match pointer {
                Value::Local(id) => *id,
                _ => return None,
            };
            sigmap.get(ctx, path, id).map(|s| (*result, s))
        }
        _ => None,
    }
}
