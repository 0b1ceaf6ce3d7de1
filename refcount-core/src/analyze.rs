//! Per-function driver (spec §2 "Flow"): walks each enumerated path to a
//! pointer-signature fixpoint (C4), narrows sign ranges from its branch/
//! switch conditions to prune infeasible paths (C5), builds the path
//! condition and refcount deltas (C1), resolves φ-bound atoms and variable
//! operands against that fixpoint (C2), then hands the result to the SMT
//! backend and the summary merger (C6).
//!
//! Sub-case forking via `Context::fork_path`/`pointer_sig::SignatureMap`'s
//! path-lineage overlay is implemented as infrastructure those modules
//! expose, but this driver does not yet split a single enumerated CFG path
//! into several summary entries by constant sub-range — `RangeToConstant`
//! still narrows and equates signatures within the one path condition it is
//! given, so `[1] >= 0 & [1] <= 0` still collapses to `[1] = 0` inside a
//! single entry rather than forking one. See `DESIGN.md`.

use crate::cfg::Cfg;
use crate::config::Config;
use crate::formula::{Context, Formula, Operand, RelOp};
use crate::pointer_sig::{infer_local, score, handle_container_of, Scored, SignatureMap};
use crate::sign::Range;
use crate::smt::SmtBackend;
use crate::summary::{Operation, PathSummaryEntry, RefcountOps, ReturnValue, Summary};
use crate::visitor::{FormulaVisitor, RangeToConstant, RemoveLocals, ResolvePhiNodes, VariableToValue};
use petgraph::graph::NodeIndex;
use refcount_ir::{Function, Instruction, Value, ValueId};
use std::collections::HashMap;

/// A value's current binding for C4 purposes: a `Local` defers to `sigmap`
/// (falling back to an unresolved `Variable` placeholder), everything else
/// resolves directly through `Context::get_operand`.
fn resolve(ctx: &mut Context, sigmap: &SignatureMap, path: u32, v: &Value) -> Operand {
    match v {
        Value::Local(id) => sigmap
            .get(ctx, path, *id)
            .map(|s| s.signature)
            .unwrap_or_else(|| ctx.get_variable(*id, format!("{id}"))),
        other => ctx.get_operand(other),
    }
}

/// Scores and resolves a `Value` for unification purposes: a `Local`
/// defers to `sigmap` (absent if not yet bound), formal params/globals/
/// constants are scored per the C4 score table (spec §4.4).
fn scored_for_value(ctx: &mut Context, sigmap: &SignatureMap, path: u32, v: &Value) -> Option<Scored> {
    match v {
        Value::Local(id) => sigmap.get(ctx, path, *id),
        Value::Param(_) => Some(Scored {
            signature: ctx.get_operand(v),
            score: score::FORMAL_PARAM,
        }),
        Value::Global(_) => Some(Scored {
            signature: ctx.get_operand(v),
            score: score::GLOBAL_VAR,
        }),
        Value::ConstInt(_) | Value::ConstNull => Some(Scored {
            signature: ctx.get_operand(v),
            score: score::CONSTANT,
        }),
    }
}

fn arg_for_signature(sig: &str) -> Option<usize> {
    sig.strip_prefix('[')?.strip_suffix(']')?.parse::<usize>().ok()
}

/// Resolves a callee's `ret` shape into a caller-side `Operand` at one call
/// site: `[0]` becomes a fresh per-call-site signature, `[k]` (`k >= 1`)
/// becomes the `k`-th argument's current signature, and a constant return
/// passes through unchanged (spec §4.6 "Callee integration").
fn resolve_call_return(
    ctx: &mut Context,
    sigmap: &SignatureMap,
    predefined: &HashMap<String, Summary>,
    callee: Option<&str>,
    args: &[Value],
    function_name: &str,
    call_site: u32,
) -> Option<Operand> {
    let name = callee?;
    let callee_entry = predefined.get(name)?.entries.first()?;
    match &callee_entry.ret {
        ReturnValue::Operand(op) => {
            if let Some(sig) = op.as_signature() {
                match arg_for_signature(sig) {
                    Some(0) => Some(ctx.get_signature(format!("{{new@{function_name}#{call_site}}}"))),
                    Some(k) => args.get(k - 1).map(|v| resolve(ctx, sigmap, 0, v)),
                    None => None,
                }
            } else if op.is_constant() {
                Some(*op)
            } else {
                None
            }
        }
        ReturnValue::Unknown => None,
    }
}

/// Walks every instruction on `path` to a fixpoint, composing `SignatureMap`
/// bindings for GEP/Load/Cast/Call results and unifying `Store`'s pointer
/// and stored value (spec §4.4). Does not touch `ops`/`ret`/the path
/// condition — those are built once, afterward, by `walk_path` against the
/// settled map.
fn infer_signatures(
    func: &Function,
    cfg: &Cfg,
    path: &[NodeIndex],
    ctx: &mut Context,
    predefined: &HashMap<String, Summary>,
) -> SignatureMap {
    let mut sigmap = SignatureMap::new();
    let max_rounds = path.len() + 2;
    for _ in 0..max_rounds {
        let mut changed = false;
        let mut call_site = 0u32;
        for &node in path {
            let block_id = cfg.graph[node].block;
            if cfg.is_pruned(block_id) {
                continue;
            }
            let Some(block) = func.block(block_id) else {
                continue;
            };
            for inst in &block.instructions {
                match inst {
                    Instruction::Phi { result, incoming } => {
                        if let Some(value) = cfg.determine_phinode(path, block_id, incoming) {
                            if let Some(scored) = scored_for_value(ctx, &sigmap, 0, &value) {
                                changed |= sigmap.copy_sig(ctx, 0, *result, scored);
                            }
                        }
                    }
                    Instruction::GetElementPtr {
                        result,
                        base,
                        base_type,
                        indices,
                    } => {
                        if let Some((id, scored)) = infer_local(ctx, &sigmap, 0, inst) {
                            changed |= sigmap.copy_sig(ctx, 0, id, scored);
                        } else if let Some(base_scored) = scored_for_value(ctx, &sigmap, 0, base) {
                            // `infer_local` only composes a `Local` base;
                            // a formal-param/global base still names a
                            // real signature worth propagating.
                            if let Some(base_sig) = base_scored.signature.as_signature() {
                                if let Some(suffix) = crate::pointer_sig::gep_suffix(base_type, indices) {
                                    let full = if suffix.is_empty() {
                                        base_sig.to_string()
                                    } else {
                                        format!("{base_sig}.{suffix}")
                                    };
                                    let sig = ctx.get_signature(full);
                                    changed |= sigmap.copy_sig(
                                        ctx,
                                        0,
                                        *result,
                                        Scored {
                                            signature: sig,
                                            score: base_scored.score,
                                        },
                                    );
                                }
                            }
                        }
                    }
                    Instruction::Load { result, pointer } => {
                        if let Some((id, scored)) = infer_local(ctx, &sigmap, 0, inst) {
                            changed |= sigmap.copy_sig(ctx, 0, id, scored);
                        } else if let Some(scored) = scored_for_value(ctx, &sigmap, 0, pointer) {
                            changed |= sigmap.copy_sig(ctx, 0, *result, scored);
                        }
                    }
                    Instruction::Cast { result, operand } => {
                        if let Some((id, scored)) = infer_local(ctx, &sigmap, 0, inst) {
                            changed |= sigmap.copy_sig(ctx, 0, id, scored);
                        } else if let Some(scored) = scored_for_value(ctx, &sigmap, 0, operand) {
                            changed |= sigmap.copy_sig(ctx, 0, *result, scored);
                        }
                    }
                    Instruction::Store { pointer, value } => {
                        // Bidirectional unification (spec §4.4 "copySig"
                        // on `Store`): the pointed-to location and the
                        // stored value name the same abstract object.
                        let p_scored = scored_for_value(ctx, &sigmap, 0, pointer);
                        let v_scored = scored_for_value(ctx, &sigmap, 0, value);
                        if let (Value::Local(id), Some(v_scored)) = (pointer, v_scored) {
                            changed |= sigmap.copy_sig(ctx, 0, *id, v_scored);
                        }
                        if let (Value::Local(id), Some(p_scored)) = (value, p_scored) {
                            changed |= sigmap.copy_sig(ctx, 0, *id, p_scored);
                        }
                    }
                    Instruction::Call { result, callee, args } => {
                        call_site += 1;
                        if callee.as_deref() == Some("__container_of") {
                            if let (Some(ptr), Some(Value::Global(member))) = (args.first(), args.get(2)) {
                                if let Some(ptr_scored) = scored_for_value(ctx, &sigmap, 0, ptr) {
                                    if let Some(ptr_sig) = ptr_scored.signature.as_signature() {
                                        let combined = handle_container_of(ptr_sig, member);
                                        let sig = ctx.get_signature(combined);
                                        if let Some(result) = result {
                                            changed |= sigmap.copy_sig(
                                                ctx,
                                                0,
                                                *result,
                                                Scored {
                                                    signature: sig,
                                                    score: ptr_scored.score,
                                                },
                                            );
                                        }
                                    }
                                }
                            }
                            continue;
                        }
                        if let Some(result) = result {
                            if let Some(ret_op) = resolve_call_return(
                                ctx,
                                &sigmap,
                                predefined,
                                callee.as_deref(),
                                args,
                                &func.name,
                                call_site,
                            ) {
                                changed |= sigmap.copy_sig(
                                    ctx,
                                    0,
                                    *result,
                                    Scored {
                                        signature: ret_op,
                                        score: score::FUNC_CALL,
                                    },
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if !changed {
            break;
        }
    }
    sigmap
}

struct PathWalk {
    bool_values: HashMap<ValueId, Formula>,
    phi_resolutions: HashMap<ValueId, Formula>,
    cmp_values: HashMap<ValueId, (RelOp, Operand, Operand)>,
    signature_of: HashMap<ValueId, String>,
    sign_ranges: HashMap<String, Range>,
    ops: RefcountOps,
    ret: ReturnValue,
    condition: Option<Formula>,
    feasible: bool,
}

/// Builds the `Formula`-level operand for a value already resolved (at the
/// C4 level) to `resolved`: a `Local` becomes a deferred `Variable` atom
/// (recording its signature, if any, for later `VariableToValue`
/// substitution), everything else resolves immediately.
fn formula_operand(ctx: &mut Context, w: &mut PathWalk, resolved: Operand, v: &Value) -> Operand {
    match v {
        Value::Local(id) => {
            if let Some(sig) = resolved.as_signature() {
                w.signature_of.insert(*id, sig.to_string());
            }
            ctx.get_variable(*id, format!("{id}"))
        }
        other => ctx.get_operand(other),
    }
}

fn flip_relop(op: RelOp) -> RelOp {
    match op {
        RelOp::Lt => RelOp::Gt,
        RelOp::Le => RelOp::Ge,
        RelOp::Gt => RelOp::Lt,
        RelOp::Ge => RelOp::Le,
        other => other,
    }
}

/// Zero-relative mapping from a resolved comparison to the `Range` it
/// implies (spec §4.5). Comparisons against a nonzero constant narrow to
/// that single point; anything else is outside this domain's resolution.
fn sign_from_relop(op: RelOp, k: i64) -> Option<Range> {
    match (op, k) {
        (RelOp::Eq, 0) => Some(Range::Zero),
        (RelOp::Eq, k) => Some(Range::Concrete(k)),
        (RelOp::Ne, 0) => Some(Range::NonZero),
        (RelOp::Lt, 0) => Some(Range::Negative),
        (RelOp::Le, 0) => Some(Range::NonPos),
        (RelOp::Gt, 0) => Some(Range::Positive),
        (RelOp::Ge, 0) => Some(Range::NonNeg),
        _ => None,
    }
}

/// Narrows `sig`'s tracked range by `range`'s meet; an `Empty` result marks
/// the whole path infeasible (spec §4.5 "EMPTY signals path
/// infeasibility").
fn narrow_sign(w: &mut PathWalk, sig: String, range: Range) {
    let current = w.sign_ranges.get(&sig).copied().unwrap_or(Range::Any);
    let narrowed = current.intersects(range);
    if narrowed == Range::Empty {
        w.feasible = false;
    }
    w.sign_ranges.insert(sig, narrowed);
}

/// Derives the `(signature, Range)` constraint a branch/switch arm implies
/// on `condition`, preferring the ICmp that produced it (recovering the
/// comparison's own signature/constant and direction) and falling back to
/// plain truthiness when the condition is a bare pointer/bool test with no
/// ICmp behind it (spec §4.5).
fn branch_sign_constraint(
    ctx: &mut Context,
    sigmap: &SignatureMap,
    w: &PathWalk,
    condition: &Value,
    taken_true: bool,
) -> Option<(String, Range)> {
    let Value::Local(id) = condition else {
        return None;
    };
    if let Some(&(rel, l, r)) = w.cmp_values.get(id) {
        let (sig, rel, k) = if let (Some(sig), Some(k)) = (l.as_signature(), r.as_constant()) {
            (sig.to_string(), rel, k)
        } else if let (Some(k), Some(sig)) = (l.as_constant(), r.as_signature()) {
            (sig.to_string(), flip_relop(rel), k)
        } else {
            return None;
        };
        let rel = if taken_true { rel } else { rel.negate() };
        return sign_from_relop(rel, k).map(|range| (sig, range));
    }
    let scored = sigmap.get(ctx, 0, *id)?;
    let sig = scored.signature.as_signature()?.to_string();
    let range = if taken_true { Range::NonZero } else { Range::Zero };
    Some((sig, range))
}

/// Walks `path` once against the already-fixpointed `sigmap`, building the
/// path condition, accumulated refcount ops, and return value (spec §2
/// "Flow", C1/C5/C6 interleaved). Sets `feasible = false` as soon as a
/// branch/switch arm's implied sign constraint contradicts an earlier one
/// on the same path.
fn walk_path(
    func: &Function,
    cfg: &Cfg,
    path: &[NodeIndex],
    ctx: &mut Context,
    predefined: &HashMap<String, Summary>,
    sigmap: &SignatureMap,
) -> PathWalk {
    let mut w = PathWalk {
        bool_values: HashMap::new(),
        phi_resolutions: HashMap::new(),
        cmp_values: HashMap::new(),
        signature_of: HashMap::new(),
        sign_ranges: HashMap::new(),
        ops: RefcountOps::new(),
        ret: ReturnValue::Unknown,
        condition: None,
        feasible: true,
    };
    let mut call_site = 0u32;

    'path: for (i, &node) in path.iter().enumerate() {
        let block_id = cfg.graph[node].block;
        if cfg.is_pruned(block_id) {
            continue;
        }
        let Some(block) = func.block(block_id) else {
            continue;
        };
        for inst in &block.instructions {
            match inst {
                Instruction::Phi { result, incoming } => {
                    if let Some(Value::Local(id)) = cfg.determine_phinode(path, block_id, incoming) {
                        if let Some(f) = w.bool_values.get(&id).copied() {
                            w.phi_resolutions.insert(*result, f);
                        }
                    }
                }
                Instruction::ICmp { result, predicate, lhs, rhs } => {
                    let sig_l = resolve(ctx, sigmap, 0, lhs);
                    let sig_r = resolve(ctx, sigmap, 0, rhs);
                    let rel = RelOp::from(*predicate);
                    w.cmp_values.insert(*result, (rel, sig_l, sig_r));
                    let fl = formula_operand(ctx, &mut w, sig_l, lhs);
                    let fr = formula_operand(ctx, &mut w, sig_r, rhs);
                    if let Ok(f) = ctx.relation(rel, fl, fr) {
                        w.bool_values.insert(*result, f);
                    }
                }
                Instruction::Call { callee, args, .. } => {
                    call_site += 1;
                    apply_call(ctx, &mut w, sigmap, callee.as_deref(), args, call_site, predefined, &func.name);
                }
                Instruction::Return { value } => {
                    w.ret = match value {
                        Some(v) => {
                            let resolved = resolve(ctx, sigmap, 0, v);
                            ReturnValue::Operand(formula_operand(ctx, &mut w, resolved, v))
                        }
                        None => ReturnValue::Unknown,
                    };
                }
                Instruction::Branch { condition, if_true, if_false: _ } => {
                    let taken_true = path
                        .get(i + 1)
                        .map(|&next| cfg.graph[next].block == *if_true)
                        .unwrap_or(false);
                    if let Some((sig, range)) = branch_sign_constraint(ctx, sigmap, &w, condition, taken_true) {
                        narrow_sign(&mut w, sig, range);
                        if !w.feasible {
                            break 'path;
                        }
                    }
                    let cond_formula = match condition {
                        Value::Local(id) => w
                            .bool_values
                            .get(id)
                            .copied()
                            .unwrap_or_else(|| ctx.get_atom_for_value(*id, format!("{id}"))),
                        other => ctx.get_atom_named(format!("{other}")),
                    };
                    let literal = if taken_true {
                        cond_formula
                    } else {
                        ctx.not(cond_formula).unwrap_or(cond_formula)
                    };
                    w.condition = Some(match w.condition {
                        Some(acc) => ctx.and(acc, literal).unwrap_or(acc),
                        None => literal,
                    });
                }
                Instruction::Switch { value, cases, default } => {
                    let next_block = path.get(i + 1).map(|&n| cfg.graph[n].block);
                    let resolved = resolve(ctx, sigmap, 0, value);
                    let operand = formula_operand(ctx, &mut w, resolved, value);
                    let mut literal = None;
                    for (k, target) in cases {
                        if Some(*target) == next_block {
                            let k_op = ctx.get_constant(*k);
                            literal = ctx.relation(RelOp::Eq, operand, k_op).ok();
                            if let Some(sig) = resolved.as_signature() {
                                if let Some(range) = sign_from_relop(RelOp::Eq, *k) {
                                    narrow_sign(&mut w, sig.to_string(), range);
                                    if !w.feasible {
                                        break 'path;
                                    }
                                }
                            }
                        }
                    }
                    let _ = default;
                    if let Some(lit) = literal {
                        w.condition = Some(match w.condition {
                            Some(acc) => ctx.and(acc, lit).unwrap_or(acc),
                            None => lit,
                        });
                    }
                }
                Instruction::Load { .. }
                | Instruction::Cast { .. }
                | Instruction::GetElementPtr { .. }
                | Instruction::Store { .. }
                | Instruction::Jump { .. } => {}
            }
        }
    }
    w
}

/// Instantiates a callee's predefined summary at one call site (spec §4.6
/// "Callee integration"): `[k]` (`k >= 1`) substitutes the `k`-th
/// argument's current signature, `[0]` substitutes the call's own fresh
/// result signature. Only the callee's first (success-shape) entry is used
/// — this driver does not fork a call site into several summary entries
/// the way a full inter-procedural closure would for e.g. `"new"`'s
/// failure branch. `__container_of` is handled entirely by
/// `infer_signatures` — it has no refcount effect of its own.
fn apply_call(
    ctx: &mut Context,
    w: &mut PathWalk,
    sigmap: &SignatureMap,
    callee: Option<&str>,
    args: &[Value],
    call_site: u32,
    predefined: &HashMap<String, Summary>,
    function_name: &str,
) {
    let Some(name) = callee else {
        tracing::debug!(function = %function_name, "indirect call, effect unknown");
        return;
    };
    if name == "__container_of" {
        return;
    }
    let Some(callee_summary) = predefined.get(name) else {
        tracing::debug!(function = %function_name, callee = name, "unrecognized callee, assumed pure");
        return;
    };
    let Some(callee_entry) = callee_summary.entries.first() else {
        return;
    };
    let resolved_ret = resolve_call_return(ctx, sigmap, predefined, Some(name), args, function_name, call_site);

    for (signature, amount) in callee_entry.ops.iter() {
        if amount == 0 {
            continue;
        }
        let target = match arg_for_signature(signature) {
            Some(0) => resolved_ret,
            Some(k) => args.get(k - 1).map(|v| resolve(ctx, sigmap, 0, v)),
            None => None,
        }
        .and_then(|op| op.as_signature().map(str::to_string));
        if let Some(sig) = target {
            w.ops.add_history_entry(sig, Operation::new(name, amount));
        }
    }
}

/// Runs the full per-path pipeline over `func` and folds the result into one
/// `Summary` (spec §2 "Flow": C3 → C4/C5 interleaved → C1 condition-building
/// → C2 resolution → C6 merge).
pub fn analyze_function(
    func: &Function,
    config: &Config,
    backend: &dyn SmtBackend,
    predefined: &HashMap<String, Summary>,
) -> Summary {
    let mut ctx = Context::new();
    let cfg = Cfg::build(func, config);
    let paths = cfg.enumerate_paths(config.max_path_per_func);
    let mut summary = Summary::new(func.name.clone());

    for path in &paths {
        let sigmap = infer_signatures(func, &cfg, path, &mut ctx, predefined);
        let walked = walk_path(func, &cfg, path, &mut ctx, predefined, &sigmap);
        if !walked.feasible {
            continue;
        }

        let raw_condition = walked.condition.unwrap_or_else(|| ctx.true_());
        let mut resolve_phi = ResolvePhiNodes {
            resolutions: &walked.phi_resolutions,
        };
        let phi_resolved = resolve_phi.visit(&mut ctx, raw_condition);

        let mut var_to_value = VariableToValue {
            signature_of: &walked.signature_of,
            function_name: &func.name,
            end_of_path: true,
        };
        let substituted = var_to_value.visit(&mut ctx, phi_resolved);
        let simplified = backend.simplify(&mut ctx, substituted);

        let mut range_pass = RangeToConstant::default();
        let narrowed = range_pass.visit(&mut ctx, simplified);
        let mut remove_locals = RemoveLocals;
        let cleaned = remove_locals.visit(&mut ctx, narrowed);
        let final_condition = backend.simplify(&mut ctx, cleaned);

        // The pseudo-return slot `[0]` is, in this driver, exactly the
        // signature the path's `Return` resolved to — so if the path
        // condition pins that signature to a single point, the entry's own
        // `ret` collapses to the same constant (spec §4.6 step 2, E5).
        let ret = match &walked.ret {
            ReturnValue::Operand(op) => {
                let resolved = var_to_value.resolve(&mut ctx, *op);
                match resolved.as_signature().and_then(|sig| range_pass.degenerate(sig)) {
                    Some(k) => ReturnValue::Operand(ctx.get_constant(k)),
                    None => ReturnValue::Operand(resolved),
                }
            }
            ReturnValue::Unknown => ReturnValue::Unknown,
        };

        let entry = PathSummaryEntry {
            path_condition: final_condition,
            ops: walked.ops,
            ret,
            exact_pc: true,
            path_id: 0,
            applied: true,
        };
        summary.merge_entry(&mut ctx, backend, entry, config.max_subcase_per_path);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredefinedFamilies;
    use crate::predefined;
    use refcount_ir::{BasicBlock, BlockId, GepIndex, Predicate, StructField, Type};

    fn z3_backend(z3_ctx: &z3::Context) -> crate::smt::Z3Backend<'_> {
        crate::smt::Z3Backend::new(z3_ctx)
    }

    fn build_table() -> HashMap<String, Summary> {
        let mut pctx = Context::new();
        predefined::build_table(&mut pctx, &PredefinedFamilies::all())
            .into_iter()
            .collect()
    }

    /// `void get_twice(struct foo *p) { kref_get(p); kref_get(p); }` — two
    /// calls to a predefined "+1, no return" API on the same argument should
    /// accumulate to a net `+2` on `[1]` (scenario E1-style: linear get/get).
    #[test]
    fn straight_line_double_get_accumulates_refcount() {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::Call {
            result: None,
            callee: Some("kref_get".to_string()),
            args: vec![Value::Param(1)],
        });
        bb0.instructions.push(Instruction::Call {
            result: None,
            callee: Some("kref_get".to_string()),
            args: vec![Value::Param(1)],
        });
        bb0.instructions.push(Instruction::Return { value: None });
        let func = Function {
            name: "get_twice".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0],
            location: None,
        };

        let table = build_table();
        let z3_ctx = z3::Context::new(&z3::Config::new());
        let backend = z3_backend(&z3_ctx);
        let config = Config::default();
        let summary = analyze_function(&func, &config, &backend, &table);

        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].ops.get("[1]"), 2);
    }

    /// `void branch_put(struct foo *p, int cond) { if (cond) kref_put(p); }`
    /// — two paths, one with a `-1` delta guarded by the branch condition,
    /// one pure.
    #[test]
    fn conditional_put_produces_two_distinct_paths() {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::Branch {
            condition: Value::Param(2),
            if_true: BlockId(1),
            if_false: BlockId(2),
        });
        let mut bb1 = BasicBlock::new(BlockId(1));
        bb1.instructions.push(Instruction::Call {
            result: None,
            callee: Some("kref_put".to_string()),
            args: vec![Value::Param(1)],
        });
        bb1.instructions.push(Instruction::Jump { target: BlockId(2) });
        let mut bb2 = BasicBlock::new(BlockId(2));
        bb2.instructions.push(Instruction::Return { value: None });
        let func = Function {
            name: "branch_put".into(),
            param_count: 2,
            entry: BlockId(0),
            blocks: vec![bb0, bb1, bb2],
            location: None,
        };

        let table = build_table();
        let z3_ctx = z3::Context::new(&z3::Config::new());
        let backend = z3_backend(&z3_ctx);
        let config = Config::default();
        let summary = analyze_function(&func, &config, &backend, &table);

        assert_eq!(summary.entries.len(), 2);
        let deltas: Vec<i64> = summary.entries.iter().map(|e| e.ops.get("[1]")).collect();
        assert!(deltas.contains(&0));
        assert!(deltas.contains(&-1));
    }

    /// `if (p1 > 0) { if (p1 < 0) return 1; else return 2; } else return 3;`
    /// — the `p1 > 0 && p1 < 0` arm is structurally infeasible; sign
    /// inference must drop it, leaving exactly the two live paths (P1: path
    /// infeasibility is caught before it reaches the summary).
    #[test]
    fn contradictory_nested_branch_is_pruned_before_merge() {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::ICmp {
            result: ValueId(0),
            predicate: Predicate::Gt,
            lhs: Value::Param(1),
            rhs: Value::ConstInt(0),
        });
        bb0.instructions.push(Instruction::Branch {
            condition: Value::Local(ValueId(0)),
            if_true: BlockId(1),
            if_false: BlockId(4),
        });
        let mut bb1 = BasicBlock::new(BlockId(1));
        bb1.instructions.push(Instruction::ICmp {
            result: ValueId(1),
            predicate: Predicate::Lt,
            lhs: Value::Param(1),
            rhs: Value::ConstInt(0),
        });
        bb1.instructions.push(Instruction::Branch {
            condition: Value::Local(ValueId(1)),
            if_true: BlockId(2),
            if_false: BlockId(3),
        });
        let mut bb2 = BasicBlock::new(BlockId(2));
        bb2.instructions.push(Instruction::Return {
            value: Some(Value::ConstInt(1)),
        });
        let mut bb3 = BasicBlock::new(BlockId(3));
        bb3.instructions.push(Instruction::Return {
            value: Some(Value::ConstInt(2)),
        });
        let mut bb4 = BasicBlock::new(BlockId(4));
        bb4.instructions.push(Instruction::Return {
            value: Some(Value::ConstInt(3)),
        });
        let func = Function {
            name: "nested_contradiction".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0, bb1, bb2, bb3, bb4],
            location: None,
        };

        let table = build_table();
        let z3_ctx = z3::Context::new(&z3::Config::new());
        let backend = z3_backend(&z3_ctx);
        let config = Config::default();
        let summary = analyze_function(&func, &config, &backend, &table);

        assert_eq!(summary.entries.len(), 2, "the p1>0 && p1<0 path must be pruned");
        let rets: Vec<i64> = summary
            .entries
            .iter()
            .filter_map(|e| match &e.ret {
                ReturnValue::Operand(op) => op.as_constant(),
                ReturnValue::Unknown => None,
            })
            .collect();
        assert!(rets.contains(&2));
        assert!(rets.contains(&3));
        assert!(!rets.contains(&1));
    }

    /// `struct foo *obj = __container_of(&p1->entry, struct foo, entry);
    /// kref_get(obj);` — a refcount taken on a container-of'd pointer must
    /// still be attributed back to the original argument's own signature
    /// (spec §4.4 "container_of").
    #[test]
    fn container_of_attributes_the_get_back_to_the_enclosing_argument() {
        let struct_ty = Type::Struct {
            name: Some("list_head".into()),
            fields: vec![StructField {
                name: Some("entry".into()),
                ty: Type::Integer { bits: 32 },
            }],
        };
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::GetElementPtr {
            result: ValueId(0),
            base: Value::Param(1),
            base_type: struct_ty,
            indices: vec![GepIndex::Constant(0)],
        });
        bb0.instructions.push(Instruction::Call {
            result: Some(ValueId(1)),
            callee: Some("__container_of".to_string()),
            args: vec![
                Value::Local(ValueId(0)),
                Value::Global("struct foo".to_string()),
                Value::Global("entry".to_string()),
            ],
        });
        bb0.instructions.push(Instruction::Call {
            result: None,
            callee: Some("kref_get".to_string()),
            args: vec![Value::Local(ValueId(1))],
        });
        bb0.instructions.push(Instruction::Return { value: None });
        let func = Function {
            name: "get_via_container_of".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0],
            location: None,
        };

        let table = build_table();
        let z3_ctx = z3::Context::new(&z3::Config::new());
        let backend = z3_backend(&z3_ctx);
        let config = Config::default();
        let summary = analyze_function(&func, &config, &backend, &table);

        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].ops.get("[1]"), 1);
    }
}
