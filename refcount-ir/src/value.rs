use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// An opaque handle naming one SSA value (an instruction result, a formal
/// parameter, or the implicit "pseudo-return" slot) within a [`crate::Function`].
///
/// `ValueId` is the thing `refcount-core`'s `Variable` operand wraps; it
/// carries no data of its own, matching spec §3: "an opaque handle to an IR
/// value, carrying a printable name."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl Display for ValueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The pseudo-value standing for a function's return slot, written `[0]` in
/// signature grammar. Every function implicitly has exactly one.
pub const PSEUDO_RETURN: ValueId = ValueId(u32::MAX);

/// A value flowing through the IR: either an instruction result, a formal
/// parameter, a constant, or a named global.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// The result of evaluating an instruction earlier in the same function
    /// (or a different basic block — this is SSA).
    Local(ValueId),
    /// The `k`-th formal parameter, `k >= 1`.
    Param(u32),
    /// A 64-bit signed integer constant.
    ConstInt(i64),
    /// The null pointer constant.
    ConstNull,
    /// A named global variable.
    Global(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Local(id) => write!(f, "{id}"),
            Value::Param(k) => write!(f, "param{k}"),
            Value::ConstInt(i) => write!(f, "{i}"),
            Value::ConstNull => write!(f, "null"),
            Value::Global(name) => write!(f, "@{name}"),
        }
    }
}

/// The subset of a type system the analyzer's GEP-signature composition and
/// cast handling needs to walk: pointers, arrays, named/literal structs, and
/// integers (spec §6 "Required type model").
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Integer { bits: u32 },
    Pointer(Box<Type>),
    Array { element: Box<Type>, len: u64 },
    /// A named aggregate (`struct.Foo` / `union.Foo` in signature grammar).
    /// `fields[i]` gives the debug-info field name for constant index `i`,
    /// when known; a missing entry falls back to the numeric index.
    Struct {
        name: Option<String>,
        fields: Vec<StructField>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: Option<String>,
    pub ty: Type,
}
