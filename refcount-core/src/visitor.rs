//! Visitor framework (C2): pre/mid/post rewrite of formula trees (spec
//! §4.1 "Visitor framework"), plus the five derived passes the core
//! pipeline runs: `PrintTree`, `ResolvePhiNodes`, `VariableToValue`,
//! `RangeToConstant`, `RemoveLocals`.

use crate::formula::{AtomKind, Context, Formula, FormulaNode, Operand, OperandNode, RelOp};
use refcount_ir::ValueId;
use std::collections::HashMap;

/// Six hooks per binary node shape (`pre`/`mid`/`post`), trivial identity
/// defaults. `visit` drives `initialize` → structural recursion →
/// `finalize`.
pub trait FormulaVisitor {
    fn initialize(&mut self, _ctx: &mut Context, _f: Formula) {}
    fn finalize(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }

    fn pre_true(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn post_true(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn pre_false(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn post_false(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn pre_atom(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn post_atom(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn pre_conj(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn mid_conj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula) -> Formula {
        f
    }
    fn post_conj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula, _q: Formula) -> Formula {
        f
    }
    fn pre_disj(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn mid_disj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula) -> Formula {
        f
    }
    fn post_disj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula, _q: Formula) -> Formula {
        f
    }
    fn pre_neg(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        f
    }
    fn post_neg(&mut self, _ctx: &mut Context, f: Formula, _p: Formula) -> Formula {
        f
    }

    fn visit_aux(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        match f.node().clone() {
            FormulaNode::True => {
                let f = self.pre_true(ctx, f);
                self.post_true(ctx, f)
            }
            FormulaNode::False => {
                let f = self.pre_false(ctx, f);
                self.post_false(ctx, f)
            }
            FormulaNode::Atom(_) => {
                let f = self.pre_atom(ctx, f);
                self.post_atom(ctx, f)
            }
            FormulaNode::And(p, q) => {
                let f = self.pre_conj(ctx, f);
                let pv = self.visit_aux(ctx, p);
                let f = self.mid_conj(ctx, f, pv);
                let qv = self.visit_aux(ctx, q);
                self.post_conj(ctx, f, pv, qv)
            }
            FormulaNode::Or(p, q) => {
                let f = self.pre_disj(ctx, f);
                let pv = self.visit_aux(ctx, p);
                let f = self.mid_disj(ctx, f, pv);
                let qv = self.visit_aux(ctx, q);
                self.post_disj(ctx, f, pv, qv)
            }
            FormulaNode::Not(p) => {
                let f = self.pre_neg(ctx, f);
                let pv = self.visit_aux(ctx, p);
                self.post_neg(ctx, f, pv)
            }
        }
    }

    fn visit(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        self.initialize(ctx, f);
        let result = self.visit_aux(ctx, f);
        self.finalize(ctx, result)
    }
}

/// Debug dump: one indented line per node.
#[derive(Default)]
pub struct PrintTree {
    depth: usize,
    pub lines: Vec<String>,
}

impl PrintTree {
    fn push(&mut self, label: impl Into<String>) {
        self.lines.push(format!("{}{}", "  ".repeat(self.depth), label.into()));
    }
}

impl FormulaVisitor for PrintTree {
    fn pre_true(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push("true");
        f
    }
    fn pre_false(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push("false");
        f
    }
    fn pre_atom(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push(f.to_string());
        f
    }
    fn pre_conj(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push("and");
        self.depth += 1;
        f
    }
    fn post_conj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula, _q: Formula) -> Formula {
        self.depth -= 1;
        f
    }
    fn pre_disj(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push("or");
        self.depth += 1;
        f
    }
    fn post_disj(&mut self, _ctx: &mut Context, f: Formula, _p: Formula, _q: Formula) -> Formula {
        self.depth -= 1;
        f
    }
    fn pre_neg(&mut self, _ctx: &mut Context, f: Formula) -> Formula {
        self.push("not");
        self.depth += 1;
        f
    }
    fn post_neg(&mut self, _ctx: &mut Context, f: Formula, _p: Formula) -> Formula {
        self.depth -= 1;
        f
    }
}

/// Substitutes every boolean atom bound to a ϕ-defined IR value with the
/// value selected by the path's ϕ resolution (spec §4.2). `resolutions` is
/// precomputed by the path enumerator (§4.3 `determine_phinode`), walking
/// ϕ→ϕ chains to a fixed point already.
pub struct ResolvePhiNodes<'a> {
    pub resolutions: &'a HashMap<ValueId, Formula>,
}

impl FormulaVisitor for ResolvePhiNodes<'_> {
    fn post_atom(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        if let FormulaNode::Atom(AtomKind::BoolPlaceholder {
            bound_value: Some(v),
            ..
        }) = f.node()
        {
            if let Some(resolved) = self.resolutions.get(v) {
                if resolved.ctx() == ctx.id() {
                    return *resolved;
                }
            }
        }
        f
    }
}

/// Replaces every `Variable` operand with its current pointer signature
/// (§4.4). At end-of-path, variables that never resolved to anything
/// become `{name@F}` locals.
pub struct VariableToValue<'a> {
    pub signature_of: &'a HashMap<ValueId, String>,
    pub function_name: &'a str,
    pub end_of_path: bool,
}

impl VariableToValue<'_> {
    /// Exposed so the driver can resolve a path's `ret` operand directly —
    /// it never sits inside the `Formula` tree `visit` walks.
    pub fn resolve(&self, ctx: &mut Context, op: Operand) -> Operand {
        match op.node() {
            OperandNode::Variable(id, name) => {
                if let Some(sig) = self.signature_of.get(id) {
                    ctx.get_signature(sig.clone())
                } else if self.end_of_path {
                    ctx.get_signature(format!("{{{name}@{}}}", self.function_name))
                } else {
                    op
                }
            }
            _ => op,
        }
    }
}

impl FormulaVisitor for VariableToValue<'_> {
    fn post_atom(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        if let FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs }) = *f.node() {
            let lhs = self.resolve(ctx, lhs);
            let rhs = self.resolve(ctx, rhs);
            return ctx.relation(op, lhs, rhs).unwrap_or(f);
        }
        f
    }
}

/// A closed integer interval `[lo, hi]`, full-range by default.
#[derive(Clone, Copy, Debug)]
struct Interval {
    lo: i64,
    hi: i64,
}

impl Interval {
    fn full() -> Self {
        Self {
            lo: i64::MIN,
            hi: i64::MAX,
        }
    }

    fn meet(self, other: Self) -> Self {
        Self {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    fn degenerate(&self) -> Option<i64> {
        (self.lo == self.hi).then_some(self.lo)
    }
}

/// Gathers, per signature, the intersected interval implied by conjuncts
/// `sig <op> k`; when a signature's interval degenerates to a single point,
/// rewrites its atoms to `sig = k`. `[0]` (the return slot) is captured
/// separately as `self.return_value` (spec §4.2, E5).
#[derive(Default)]
pub struct RangeToConstant {
    ranges: HashMap<String, Interval>,
    pub return_value: Option<i64>,
}

impl RangeToConstant {
    fn narrow(&mut self, sig: &str, op: RelOp, k: i64) {
        let delta = match op {
            RelOp::Eq => Interval { lo: k, hi: k },
            RelOp::Ne => return, // a single excluded point isn't representable as an interval
            RelOp::Lt => Interval {
                lo: i64::MIN,
                hi: k.saturating_sub(1),
            },
            RelOp::Le => Interval {
                lo: i64::MIN,
                hi: k,
            },
            RelOp::Gt => Interval {
                lo: k.saturating_add(1),
                hi: i64::MAX,
            },
            RelOp::Ge => Interval {
                lo: k,
                hi: i64::MAX,
            },
        };
        let current = self.ranges.get(sig).copied().unwrap_or_else(Interval::full);
        self.ranges.insert(sig.to_string(), current.meet(delta));
    }

    fn gather(&mut self, f: Formula) {
        match f.node() {
            FormulaNode::And(p, q) => {
                self.gather(*p);
                self.gather(*q);
            }
            FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs }) => {
                if let (Some(sig), Some(k)) = (lhs.as_signature(), rhs.as_constant()) {
                    self.narrow(sig, *op, k);
                } else if let (Some(k), Some(sig)) = (lhs.as_constant(), rhs.as_signature()) {
                    self.narrow(sig, flip(*op), k);
                }
            }
            _ => {}
        }
    }

    /// Whether `sig`'s gathered interval has collapsed to a single point
    /// (spec §4.2 `degenerate`, used both for atom rewriting and, by the
    /// driver, to override a path's `ret` per E5).
    pub fn degenerate(&self, sig: &str) -> Option<i64> {
        self.ranges.get(sig).and_then(Interval::degenerate)
    }
}

fn flip(op: RelOp) -> RelOp {
    match op {
        RelOp::Lt => RelOp::Gt,
        RelOp::Le => RelOp::Ge,
        RelOp::Gt => RelOp::Lt,
        RelOp::Ge => RelOp::Le,
        other => other,
    }
}

impl FormulaVisitor for RangeToConstant {
    fn initialize(&mut self, _ctx: &mut Context, f: Formula) {
        self.gather(f);
        self.return_value = self.degenerate("[0]");
    }

    fn post_atom(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        if let FormulaNode::Atom(AtomKind::Relation { lhs, rhs, .. }) = f.node() {
            let sig = lhs.as_signature().or_else(|| rhs.as_signature());
            if let Some(sig) = sig {
                if let Some(k) = self.degenerate(sig) {
                    let sig_op = ctx.get_signature(sig.to_string());
                    let k_op = ctx.get_constant(k);
                    return ctx.relation(RelOp::Eq, sig_op, k_op).unwrap_or(f);
                }
            }
        }
        f
    }
}

/// Elides atoms mentioning no `[...]`-style signature — i.e. atoms that
/// involve only intermediate locals and so cannot affect the summary's
/// external contract (spec §4.2).
#[derive(Default)]
pub struct RemoveLocals;

fn mentions_external_signature(op: &Operand) -> bool {
    matches!(op.node(), OperandNode::Signature(s) if s.starts_with('['))
}

impl FormulaVisitor for RemoveLocals {
    fn post_atom(&mut self, ctx: &mut Context, f: Formula) -> Formula {
        let keep = match f.node() {
            FormulaNode::Atom(AtomKind::Relation { lhs, rhs, .. }) => {
                mentions_external_signature(lhs) || mentions_external_signature(rhs)
            }
            FormulaNode::Atom(AtomKind::BoolPlaceholder { name, .. }) => name.starts_with('['),
            _ => true,
        };
        if keep {
            f
        } else {
            ctx.true_()
        }
    }
}
