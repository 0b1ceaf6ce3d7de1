//! Summary data model (spec §3) and merger (C6): per-path entries, their
//! refcount deltas with provenance, and the per-function merge that folds
//! them into a `Summary`.

use crate::formula::{Context, Formula, Operand};
use crate::smt::SmtBackend;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

static NEXT_OPERATION_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// One refcount delta attached to a signature, with the provenance chain
/// that produced it (SPEC_FULL.md §3 "Operation provenance").
#[derive(Debug)]
pub struct Operation {
    pub id: u64,
    pub host: String,
    pub amount: i64,
    pub from: Vec<Rc<Operation>>,
}

impl Operation {
    pub fn new(host: impl Into<String>, amount: i64) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_OPERATION_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            host: host.into(),
            amount,
            from: Vec::new(),
        })
    }

    pub fn derived(host: impl Into<String>, amount: i64, from: Vec<Rc<Operation>>) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_OPERATION_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            host: host.into(),
            amount,
            from,
        })
    }
}

/// A signature-keyed map of refcount operations (spec §3 "PathSummaryEntry.ops").
#[derive(Debug, Default, Clone)]
pub struct RefcountOps {
    by_signature: HashMap<String, Rc<Operation>>,
}

impl RefcountOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &str) -> i64 {
        self.by_signature.get(signature).map_or(0, |op| op.amount)
    }

    /// Inserts or accumulates a delta. Keeps sorted-by-host insertion and
    /// ignores an attempted duplicate by pointer identity (SPEC_FULL.md §3
    /// "add_history_entry").
    pub fn add_history_entry(&mut self, signature: impl Into<String>, op: Rc<Operation>) {
        let signature = signature.into();
        if let Some(existing) = self.by_signature.get(&signature) {
            if Rc::ptr_eq(existing, &op) {
                return;
            }
            let combined = Operation::derived(
                op.host.clone(),
                existing.amount + op.amount,
                vec![existing.clone(), op],
            );
            self.by_signature.insert(signature, combined);
        } else {
            self.by_signature.insert(signature, op);
        }
    }

    pub fn is_pure(&self) -> bool {
        self.by_signature.values().all(|op| op.amount == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.by_signature.iter().map(|(k, op)| (k.as_str(), op.amount))
    }

    /// `(signature, amount)` pairs tainted between `self` and `other`:
    /// every signature present in either side whose amount differs (zero
    /// entries and agreeing entries are skipped either way — SPEC_FULL.md §3
    /// "RefcountOps::diff").
    pub fn diff(&self, other: &RefcountOps) -> Vec<(String, i64, i64)> {
        let mut keys: Vec<&String> = self.by_signature.keys().collect();
        for k in other.by_signature.keys() {
            if !self.by_signature.contains_key(k) {
                keys.push(k);
            }
        }
        keys.sort();
        keys.into_iter()
            .filter_map(|sig| {
                let a = self.get(sig);
                let b = other.get(sig);
                if a == 0 && b == 0 {
                    None
                } else if a == b {
                    None
                } else {
                    Some((sig.clone(), a, b))
                }
            })
            .collect()
    }

    pub fn describe(&self) -> String {
        let mut entries: Vec<_> = self
            .by_signature
            .iter()
            .filter(|(_, op)| op.amount != 0)
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(sig, op)| format!("{sig}: {:+}", op.amount))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for RefcountOps {
    fn eq(&self, other: &Self) -> bool {
        self.diff(other).is_empty()
    }
}

/// Symbolic result a path returns: either a concrete signature/constant, or
/// unknown (e.g. a path that diverges before reaching a `Return`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnValue {
    Operand(Operand),
    Unknown,
}

/// One enumerated path's contribution to a function's summary (spec §3
/// "PathSummaryEntry").
pub struct PathSummaryEntry {
    pub path_condition: Formula,
    pub ops: RefcountOps,
    pub ret: ReturnValue,
    /// Whether `path_condition` has already been reduced to a concrete
    /// per-signature range (post `RangeToConstant`).
    pub exact_pc: bool,
    pub path_id: u32,
    pub applied: bool,
}

/// True for an entry that carries no information at all: unconditional,
/// no refcount effect, and a return value that is just the function's own
/// undetermined return slot (spec §4.6 "skip trivial no-ops").
fn is_trivial_noop(entry: &PathSummaryEntry) -> bool {
    if !entry.path_condition.is_true() || !entry.ops.is_pure() {
        return false;
    }
    match &entry.ret {
        ReturnValue::Unknown => true,
        ReturnValue::Operand(op) => op.as_signature() == Some("[0]"),
    }
}

/// A function's merged behavioral contract (spec §3 "Summary").
#[derive(Default)]
pub struct Summary {
    pub name: String,
    pub entries: Vec<PathSummaryEntry>,
    /// Entries appended here instead of `entries` because they were found
    /// inconsistent with an already-kept entry (spec §4.6 "Merging"), or
    /// because `Config::max_subcase_per_path` was exceeded.
    pub dropped: Vec<PathSummaryEntry>,
    pure: Option<bool>,
}

impl Summary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            dropped: Vec::new(),
            pure: None,
        }
    }

    /// A summary is pure once every kept entry's ops are pure; cached after
    /// first computation (spec §4.6 "purity caching").
    pub fn is_pure(&mut self) -> bool {
        if let Some(p) = self.pure {
            return p;
        }
        let p = self.entries.iter().all(|e| e.ops.is_pure());
        self.pure = Some(p);
        p
    }

    /// Folds a freshly built path entry into the summary (spec §4.6
    /// "Merging into a function summary"):
    /// - an entry matching an existing one on both `ops` and `ret` is
    ///   collapsed into it by disjoining path conditions;
    /// - otherwise, the entry is checked against every already-kept entry
    ///   for inconsistency. Two entries that agree on `ret` but disagree on
    ///   `ops` are always inconsistent (the same outcome must come from the
    ///   same refcount behavior) — see E3. Two entries that disagree on
    ///   `ret` are inconsistent only if their path conditions can hold at
    ///   once — disjoint branches legitimately diverge and are both kept,
    ///   see E2. An inconsistent entry is appended to `dropped` instead of
    ///   `entries`.
    /// - trivial no-op entries are skipped entirely before either check.
    pub fn merge_entry(
        &mut self,
        ctx: &mut Context,
        backend: &dyn SmtBackend,
        entry: PathSummaryEntry,
        max_subcase_per_path: usize,
    ) {
        if is_trivial_noop(&entry) {
            return;
        }

        for existing in &mut self.entries {
            if existing.ops == entry.ops && existing.ret == entry.ret {
                let joint = ctx
                    .or(existing.path_condition, entry.path_condition)
                    .expect("entries share this summary's context");
                existing.path_condition = backend.simplify(ctx, joint);
                self.pure = None;
                return;
            }
        }

        for existing in &self.entries {
            let inconsistent = if existing.ret == entry.ret {
                existing.ops != entry.ops
            } else {
                let joint = ctx
                    .and(existing.path_condition, entry.path_condition)
                    .expect("entries share this summary's context");
                backend.check(joint)
            };
            if inconsistent {
                self.dropped.push(entry);
                return;
            }
        }

        if self.entries.len() >= max_subcase_per_path {
            self.dropped.push(entry);
            return;
        }
        self.pure = None;
        self.entries.push(entry);
    }

    /// Joint-satisfiability inconsistency check (spec §4.6 "Inconsistency
    /// detection") over the entries already kept in this summary. After a
    /// correct `merge_entry` pass this should always be empty — kept here
    /// as an independent post-hoc verifier for inconsistency reporting.
    pub fn inconsistencies(
        &self,
        ctx: &mut Context,
        backend: &dyn SmtBackend,
    ) -> Vec<(usize, usize)> {
        let mut found = Vec::new();
        for i in 0..self.entries.len() {
            for j in (i + 1)..self.entries.len() {
                let a = &self.entries[i];
                let b = &self.entries[j];
                if a.ops == b.ops && a.ret == b.ret {
                    continue;
                }
                let inconsistent = if a.ret == b.ret {
                    a.ops != b.ops
                } else {
                    let joint = ctx
                        .and(a.path_condition, b.path_condition)
                        .expect("entries share this summary's context");
                    backend.check(joint)
                };
                if inconsistent {
                    found.push((i, j));
                }
            }
        }
        found
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} path(s), {} dropped)",
            self.name,
            self.entries.len(),
            self.dropped.len()
        )?;
        for entry in &self.entries {
            let ret = match &entry.ret {
                ReturnValue::Operand(op) => op.to_string(),
                ReturnValue::Unknown => "?".to_string(),
            };
            writeln!(
                f,
                "  [{}] {} => ret={} ops=({})",
                entry.path_id,
                entry.path_condition,
                ret,
                entry.ops.describe()
            )?;
        }
        if !self.dropped.is_empty() {
            writeln!(f, "~~~~~ dropped ~~~~~")?;
            for entry in &self.dropped {
                let ret = match &entry.ret {
                    ReturnValue::Operand(op) => op.to_string(),
                    ReturnValue::Unknown => "?".to_string(),
                };
                writeln!(
                    f,
                    "  [{}] {} => ret={} ops=({})",
                    entry.path_id,
                    entry.path_condition,
                    ret,
                    entry.ops.describe()
                )?;
            }
        }
        Ok(())
    }
}
