use internment::Intern;
use refcount_ir::ValueId;
use std::fmt::{Display, Formatter};

/// Identifies which [`super::Context`] an interned node belongs to, so
/// smart constructors can reject cross-context composition (I4/P2) without
/// every node needing a back-reference to its owning `Context`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(super) u32);

/// The interned payload of an [`Operand`]. Two `OperandNode`s that are
/// `Eq` always resolve to the same `Intern` pointer (I1), regardless of
/// which `Context` asked for them — the `Context` wrapper layered on top
/// (see [`Operand`]) is what gives each handle its locality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandNode {
    Constant(i64),
    /// An opaque handle to an IR value plus the printable name used for
    /// its z3 constant and for display. Never serialized (spec §3).
    Variable(ValueId, Intern<String>),
    Signature(Intern<String>),
}

/// A leaf of the formula algebra (spec §3 "Operand"), tagged with the
/// [`ContextId`] that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Operand {
    pub(super) ctx: ContextId,
    pub(super) node: Intern<OperandNode>,
}

impl Operand {
    pub fn ctx(&self) -> ContextId {
        self.ctx
    }

    pub fn is_constant(&self) -> bool {
        matches!(*self.node, OperandNode::Constant(_))
    }

    pub fn is_variable(&self) -> bool {
        matches!(*self.node, OperandNode::Variable(..))
    }

    pub fn is_signature(&self) -> bool {
        matches!(*self.node, OperandNode::Signature(_))
    }

    pub fn as_constant(&self) -> Option<i64> {
        match *self.node {
            OperandNode::Constant(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_signature(&self) -> Option<&str> {
        match &*self.node {
            OperandNode::Signature(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn node(&self) -> &OperandNode {
        &self.node
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &*self.node {
            OperandNode::Constant(i) => write!(f, "{i}"),
            OperandNode::Variable(_, name) => write!(f, "<{name}>"),
            OperandNode::Signature(s) => write!(f, "{s}"),
        }
    }
}

/// The binary relational operators an [`AtomKind::Relation`] may carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        }
    }

    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ge => RelOp::Lt,
        }
    }
}

impl From<refcount_ir::Predicate> for RelOp {
    fn from(p: refcount_ir::Predicate) -> Self {
        match p {
            refcount_ir::Predicate::Eq => RelOp::Eq,
            refcount_ir::Predicate::Ne => RelOp::Ne,
            refcount_ir::Predicate::Lt => RelOp::Lt,
            refcount_ir::Predicate::Le => RelOp::Le,
            refcount_ir::Predicate::Gt => RelOp::Gt,
            refcount_ir::Predicate::Ge => RelOp::Ge,
        }
    }
}

/// An atom is either a named boolean placeholder (optionally bound to an
/// IR boolean value, for ϕ-resolution to find later) or a binary relation
/// between two operands (spec §3 "Formula").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AtomKind {
    BoolPlaceholder {
        bound_value: Option<ValueId>,
        name: Intern<String>,
    },
    Relation {
        op: RelOp,
        lhs: Operand,
        rhs: Operand,
    },
}

/// The interned payload of a [`Formula`] node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormulaNode {
    True,
    False,
    Atom(AtomKind),
    And(Formula, Formula),
    Or(Formula, Formula),
    Not(Formula),
}

/// A node of the formula DAG (spec §3 "Formula"), tagged with the
/// [`ContextId`] of the `Context` that built it. Subtrees are shared by
/// construction (`Intern` gives pointer-equality = structural equality),
/// so ownership is effectively reference-counted by the global intern pool
/// for the lifetime of the process — matching spec §9's "arena per Context
/// with handles rather than heap references."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Formula {
    pub(super) ctx: ContextId,
    pub(super) node: Intern<FormulaNode>,
}

impl Formula {
    pub fn ctx(&self) -> ContextId {
        self.ctx
    }

    pub fn node(&self) -> &FormulaNode {
        &self.node
    }

    pub fn is_true(&self) -> bool {
        matches!(*self.node, FormulaNode::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(*self.node, FormulaNode::False)
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &*self.node {
            FormulaNode::True => write!(f, "true"),
            FormulaNode::False => write!(f, "false"),
            FormulaNode::Atom(AtomKind::BoolPlaceholder { name, .. }) => write!(f, "{name}"),
            FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs }) => {
                write!(f, "{lhs} {} {rhs}", op.symbol())
            }
            FormulaNode::And(p, q) => write!(f, "({p} & {q})"),
            FormulaNode::Or(p, q) => write!(f, "({p} | {q})"),
            FormulaNode::Not(p) => write!(f, "!{p}"),
        }
    }
}
