use super::operand::{AtomKind, ContextId, Formula, FormulaNode, Operand, OperandNode, RelOp};
use crate::error::AnalysisError;
use internment::Intern;
use refcount_ir::{Value, ValueId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Owns one function's interned operand/atom universe plus its path
/// lineage (spec §3 "Path-level state"). Every [`Operand`] and [`Formula`]
/// built through a `Context` carries that `Context`'s [`ContextId`];
/// composing nodes from two different contexts is rejected (I4/P2).
pub struct Context {
    id: ContextId,
    constants: HashMap<i64, Operand>,
    variables: HashMap<ValueId, Operand>,
    signatures: HashMap<String, Operand>,
    bool_by_value: HashMap<ValueId, Formula>,
    bool_by_name: HashMap<String, Formula>,
    /// `pathtree[new] = old`; the root path `0` has no parent.
    pathtree: HashMap<u32, Option<u32>>,
    next_pathid: u32,
    pathid: u32,
}

impl Context {
    pub fn new() -> Self {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let mut pathtree = HashMap::new();
        pathtree.insert(0, None);
        Self {
            id,
            constants: HashMap::new(),
            variables: HashMap::new(),
            signatures: HashMap::new(),
            bool_by_value: HashMap::new(),
            bool_by_name: HashMap::new(),
            pathtree,
            next_pathid: 1,
            pathid: 0,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn pathid(&self) -> u32 {
        self.pathid
    }

    /// Clones the current path into a fresh one, recording the lineage
    /// edge in `pathtree`, and returns the new id. Used when a path is
    /// split into sub-cases by `RangeToConstant` (spec §4.2).
    pub fn fork_path(&mut self) -> u32 {
        let new = self.next_pathid;
        self.next_pathid += 1;
        self.pathtree.insert(new, Some(self.pathid));
        new
    }

    pub fn switch_path(&mut self, id: u32) {
        self.pathid = id;
    }

    /// `id`, then its ancestors in `pathtree`, root-ward. Per-path overlays
    /// (signatures, sign ranges) walk this to find the nearest ancestor
    /// holding a value when the current path has none of its own (spec
    /// §4.4 "Per-path overlay").
    pub fn path_lineage(&self, id: u32) -> Vec<u32> {
        let mut out = vec![id];
        let mut cur = id;
        while let Some(Some(parent)) = self.pathtree.get(&cur) {
            out.push(*parent);
            cur = *parent;
        }
        out
    }

    fn wrap_operand(&self, node: OperandNode) -> Operand {
        Operand {
            ctx: self.id,
            node: Intern::new(node),
        }
    }

    fn wrap_formula(&self, node: FormulaNode) -> Formula {
        Formula {
            ctx: self.id,
            node: Intern::new(node),
        }
    }

    pub fn get_constant(&mut self, i: i64) -> Operand {
        if let Some(op) = self.constants.get(&i) {
            return *op;
        }
        let op = self.wrap_operand(OperandNode::Constant(i));
        self.constants.insert(i, op);
        op
    }

    pub fn get_variable(&mut self, v: ValueId, name: impl Into<String>) -> Operand {
        if let Some(op) = self.variables.get(&v) {
            return *op;
        }
        let op = self.wrap_operand(OperandNode::Variable(v, Intern::new(name.into())));
        self.variables.insert(v, op);
        op
    }

    pub fn get_signature(&mut self, sig: impl AsRef<str>) -> Operand {
        let sig = sig.as_ref();
        if let Some(op) = self.signatures.get(sig) {
            return *op;
        }
        let op = self.wrap_operand(OperandNode::Signature(Intern::new(sig.to_string())));
        self.signatures.insert(sig.to_string(), op);
        op
    }

    /// Resolves an IR `Value` to its initial operand: constants and
    /// globals receive their canonical signature immediately (spec §3's
    /// `[G]` / integer-literal forms); everything else becomes a
    /// `Variable` pending resolution by `VariableToValue` (§4.2).
    pub fn get_operand(&mut self, v: &Value) -> Operand {
        match v {
            Value::ConstInt(i) => self.get_constant(*i),
            Value::ConstNull => self.get_constant(0),
            Value::Global(name) => self.get_signature(format!("[{name}]")),
            Value::Param(k) => self.get_signature(format!("[{k}]")),
            Value::Local(id) => self.get_variable(*id, format!("{id}")),
        }
    }

    pub fn true_(&self) -> Formula {
        self.wrap_formula(FormulaNode::True)
    }

    pub fn false_(&self) -> Formula {
        self.wrap_formula(FormulaNode::False)
    }

    /// A boolean placeholder atom bound to an IR boolean value (e.g. a
    /// branch condition or a call result driving a predicate), deduped by
    /// the value it is bound to.
    pub fn get_atom_for_value(&mut self, v: ValueId, name: impl Into<String>) -> Formula {
        if let Some(f) = self.bool_by_value.get(&v) {
            return *f;
        }
        let name = Intern::new(name.into());
        let f = self.wrap_formula(FormulaNode::Atom(AtomKind::BoolPlaceholder {
            bound_value: Some(v),
            name,
        }));
        self.bool_by_value.insert(v, f);
        f
    }

    pub fn get_atom_named(&mut self, name: impl Into<String>) -> Formula {
        let name = name.into();
        if let Some(f) = self.bool_by_name.get(&name) {
            return *f;
        }
        let interned = Intern::new(name.clone());
        let f = self.wrap_formula(FormulaNode::Atom(AtomKind::BoolPlaceholder {
            bound_value: None,
            name: interned,
        }));
        self.bool_by_name.insert(name, f);
        f
    }

    /// I2: both operands must belong to `self`.
    pub fn relation(
        &mut self,
        op: RelOp,
        lhs: Operand,
        rhs: Operand,
    ) -> Result<Formula, AnalysisError> {
        if lhs.ctx() != self.id || rhs.ctx() != self.id {
            return Err(AnalysisError::CrossContextComposition);
        }
        Ok(self.wrap_formula(FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs })))
    }

    fn check_owned(&self, f: Formula) -> Result<(), AnalysisError> {
        if f.ctx() != self.id {
            Err(AnalysisError::CrossContextComposition)
        } else {
            Ok(())
        }
    }

    /// Smart constructor for conjunction. I3 (`True ∧ p = p`) plus the
    /// general True/False canonicalization spec §4.1 prescribes for `And`.
    pub fn and(&mut self, p: Formula, q: Formula) -> Result<Formula, AnalysisError> {
        self.check_owned(p)?;
        self.check_owned(q)?;
        if p.is_false() || q.is_false() {
            return Ok(self.false_());
        }
        if p.is_true() {
            return Ok(q);
        }
        if q.is_true() {
            return Ok(p);
        }
        Ok(self.wrap_formula(FormulaNode::And(p, q)))
    }

    /// Smart constructor for disjunction. I3 (`False ∨ p = p`).
    pub fn or(&mut self, p: Formula, q: Formula) -> Result<Formula, AnalysisError> {
        self.check_owned(p)?;
        self.check_owned(q)?;
        if p.is_true() || q.is_true() {
            return Ok(self.true_());
        }
        if p.is_false() {
            return Ok(q);
        }
        if q.is_false() {
            return Ok(p);
        }
        Ok(self.wrap_formula(FormulaNode::Or(p, q)))
    }

    /// I3: `¬True = False`, `¬False = True`. `¬¬p` is deliberately *not*
    /// collapsed — the SMT tactic handles that under `deep_simplify`.
    pub fn not(&mut self, p: Formula) -> Result<Formula, AnalysisError> {
        self.check_owned(p)?;
        if p.is_true() {
            return Ok(self.false_());
        }
        if p.is_false() {
            return Ok(self.true_());
        }
        Ok(self.wrap_formula(FormulaNode::Not(p)))
    }

    /// Copies `op` — which may belong to a different `Context` (typically
    /// a callee's) — into `self`. `sub` gets first refusal on every leaf;
    /// if it declines, constants and signatures copy structurally but a
    /// bare `Variable` is refused (spec §4.1 "Variables refuse to
    /// deep-copy; the caller must eliminate them first via
    /// `VariableToValue`").
    pub fn deep_copy_operand(
        &mut self,
        op: Operand,
        sub: &mut impl FnMut(&mut Context, Operand) -> Option<Operand>,
    ) -> Result<Operand, AnalysisError> {
        if let Some(replacement) = sub(self, op) {
            return Ok(replacement);
        }
        match op.node() {
            OperandNode::Constant(i) => Ok(self.get_constant(*i)),
            OperandNode::Signature(s) => Ok(self.get_signature(s.as_str())),
            OperandNode::Variable(..) => Err(AnalysisError::SerializedVariable),
        }
    }

    pub fn deep_copy(
        &mut self,
        f: Formula,
        sub: &mut impl FnMut(&mut Context, Operand) -> Option<Operand>,
    ) -> Result<Formula, AnalysisError> {
        match f.node().clone() {
            FormulaNode::True => Ok(self.true_()),
            FormulaNode::False => Ok(self.false_()),
            FormulaNode::Atom(AtomKind::BoolPlaceholder { name, .. }) => {
                Ok(self.get_atom_named(name.as_str().to_string()))
            }
            FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs }) => {
                let lhs = self.deep_copy_operand(lhs, sub)?;
                let rhs = self.deep_copy_operand(rhs, sub)?;
                self.relation(op, lhs, rhs)
            }
            FormulaNode::And(p, q) => {
                let p = self.deep_copy(p, sub)?;
                let q = self.deep_copy(q, sub)?;
                self.and(p, q)
            }
            FormulaNode::Or(p, q) => {
                let p = self.deep_copy(p, sub)?;
                let q = self.deep_copy(q, sub)?;
                self.or(p, q)
            }
            FormulaNode::Not(p) => {
                let p = self.deep_copy(p, sub)?;
                self.not(p)
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_pointer_equality() {
        let mut c = Context::new();
        assert_eq!(c.get_constant(7), c.get_constant(7));
        assert_eq!(c.get_signature("[1]"), c.get_signature("[1]"));
    }

    #[test]
    fn cross_context_composition_is_rejected() {
        let mut a = Context::new();
        let mut b = Context::new();
        let pa = a.get_atom_named("p");
        let pb = b.get_atom_named("p");
        assert!(matches!(
            a.and(pa, pb),
            Err(AnalysisError::CrossContextComposition)
        ));
    }

    #[test]
    fn short_circuit_laws_hold() {
        let mut c = Context::new();
        let p = c.get_atom_named("p");
        let t = c.true_();
        let f = c.false_();
        assert_eq!(c.and(t, p).unwrap(), p);
        assert_eq!(c.or(f, p).unwrap(), p);
        assert_eq!(c.not(t).unwrap(), f);
        assert_eq!(c.not(f).unwrap(), t);
    }
}
