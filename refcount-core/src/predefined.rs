//! Predefined summaries (C8): a closed table of well-known reference-
//! counting APIs, seeded directly rather than derived from analysis (spec
//! §4.8), gated per-family by `Config::predefined`.
//!
//! Grounded directly against the original `PredefinedSummary.cpp`'s
//! `get_no_return`/`get_return_success`/`get_unless_zero`/
//! `get_nonnull_no_return`/`noop_ret`/`noop_noret`/`get_return_any`/
//! `put_return_any` helpers, each of which targets a *parameterized*
//! argument index rather than always `[1]` — `PyErr_SetObject` targets its
//! second argument, `PyObject_SetAttrString`/`PyList_Append` their third and
//! second respectively.

use crate::config::PredefinedFamilies;
use crate::formula::{Context, RelOp};
use crate::summary::{Operation, PathSummaryEntry, RefcountOps, ReturnValue, Summary};

/// A predefined function's behavioral shape, expressed independent of any
/// particular signature so the same shape can be instantiated against
/// whichever argument index (`target`) the call site passes to `seed`.
#[derive(Clone, Copy)]
enum Shape {
    /// `obj->refs++`, returns void.
    GetNoReturn,
    /// `obj->refs++`, returns `0` (the C convention these APIs use for
    /// success, not a boolean `1`).
    GetReturnSuccess,
    /// `obj->refs++` only if currently nonzero; returns a fresh symbolic
    /// result (`[0]`), not the target's own signature.
    GetUnlessZero,
    /// `obj->refs++`; returns void — the caller already holds the pointer.
    GetNonNullNoReturn,
    /// No refcount effect at all; returns the target argument's own
    /// signature unchanged (`noop_ret` in the original).
    NoopReturnsTarget,
    /// Allocates and returns a freshly-referenced object (ref count 1).
    New,
    /// `obj->refs--`, returns void; may free (untracked past this point).
    PutNoReturn,
    /// `obj->refs--`; returns a fresh symbolic success/failure flag.
    PutReturnAny,
    /// `obj->refs++`; returns a fresh symbolic success/failure flag.
    GetReturnAny,
    /// No refcount effect, no return tracked.
    NoopNoRet,
}

/// Builds the entry for every shape but `New`, which needs two conditioned
/// entries (see `build_new_entries`). `target` is the 1-based argument index
/// (or `0` for the pseudo-return slot) the shape's refcount op and/or
/// returned signature binds to.
fn build_entry(ctx: &mut Context, shape: Shape, function_name: &str, target: u32) -> PathSummaryEntry {
    let target_sig = format!("[{target}]");
    let sig = ctx.get_signature(target_sig.clone());
    let fresh = ctx.get_signature("[0]");
    let mut ops = RefcountOps::new();
    let ret = match shape {
        Shape::GetNoReturn => {
            ops.add_history_entry(target_sig, Operation::new(function_name, 1));
            ReturnValue::Unknown
        }
        Shape::GetReturnSuccess => {
            ops.add_history_entry(target_sig, Operation::new(function_name, 1));
            ReturnValue::Operand(ctx.get_constant(0))
        }
        Shape::GetUnlessZero => {
            ops.add_history_entry(target_sig, Operation::new(function_name, 1));
            ReturnValue::Operand(fresh)
        }
        Shape::GetNonNullNoReturn => {
            ops.add_history_entry(target_sig, Operation::new(function_name, 1));
            ReturnValue::Unknown
        }
        Shape::NoopReturnsTarget => ReturnValue::Operand(sig),
        Shape::New => unreachable!("New is built by build_new_entries"),
        Shape::PutNoReturn => {
            ops.add_history_entry(target_sig, Operation::new(function_name, -1));
            ReturnValue::Unknown
        }
        Shape::PutReturnAny => {
            ops.add_history_entry(target_sig, Operation::new(function_name, -1));
            ReturnValue::Operand(fresh)
        }
        Shape::GetReturnAny => {
            ops.add_history_entry(target_sig, Operation::new(function_name, 1));
            ReturnValue::Operand(fresh)
        }
        Shape::NoopNoRet => ReturnValue::Unknown,
    };
    PathSummaryEntry {
        path_condition: ctx.true_(),
        ops,
        ret,
        exact_pc: true,
        path_id: 0,
        applied: true,
    }
}

/// `"new"` produces two entries (spec §4.8): one where the allocation
/// succeeded (`[0] ≠ 0`, a fresh reference on the result), one where it
/// failed (`[0] = 0`, returns `0`, no reference to track).
fn build_new_entries(ctx: &mut Context, function_name: &str) -> [PathSummaryEntry; 2] {
    let result = ctx.get_signature("[0]");
    let zero = ctx.get_constant(0);
    let nonzero = ctx.relation(RelOp::Ne, result, zero).unwrap();
    let is_zero = ctx.relation(RelOp::Eq, result, zero).unwrap();

    let mut ops = RefcountOps::new();
    ops.add_history_entry("[0]", Operation::new(function_name, 1));
    let success = PathSummaryEntry {
        path_condition: nonzero,
        ops,
        ret: ReturnValue::Operand(result),
        exact_pc: true,
        path_id: 0,
        applied: true,
    };
    let failure = PathSummaryEntry {
        path_condition: is_zero,
        ops: RefcountOps::new(),
        ret: ReturnValue::Operand(zero),
        exact_pc: true,
        path_id: 0,
        applied: true,
    };
    [success, failure]
}

fn seed(summaries: &mut Vec<(String, Summary)>, ctx: &mut Context, name: &str, shape: Shape, target: u32) {
    let mut summary = Summary::new(name);
    match shape {
        Shape::New => {
            for entry in build_new_entries(ctx, name) {
                summary.entries.push(entry);
            }
        }
        _ => summary.entries.push(build_entry(ctx, shape, name, target)),
    }
    summaries.push((name.to_string(), summary));
}

/// The kref family (`include/linux/kref.h`).
fn kref_table(ctx: &mut Context, out: &mut Vec<(String, Summary)>) {
    seed(out, ctx, "kref_init", Shape::GetNoReturn, 1);
    seed(out, ctx, "kref_get", Shape::GetNoReturn, 1);
    seed(out, ctx, "kref_get_unless_zero", Shape::GetUnlessZero, 1);
    seed(out, ctx, "kref_put", Shape::PutNoReturn, 1);
    seed(out, ctx, "kref_put_spinlock_irqsave", Shape::PutNoReturn, 1);
    seed(out, ctx, "kref_put_mutex", Shape::PutNoReturn, 1);
    // kobject_get/kobject_get_unless_zero have no refcount effect of their
    // own in the original summary table — they just hand back the object.
    seed(out, ctx, "kobject_get", Shape::NoopReturnsTarget, 1);
    seed(out, ctx, "kobject_get_unless_zero", Shape::NoopReturnsTarget, 1);
    seed(out, ctx, "kobject_init_internal", Shape::NoopNoRet, 0);
    seed(out, ctx, "kobject_put", Shape::NoopNoRet, 0);
}

/// The runtime power-management ("dpm", `include/linux/pm_runtime.h`)
/// family.
fn dpm_table(ctx: &mut Context, out: &mut Vec<(String, Summary)>) {
    seed(out, ctx, "pm_runtime_get", Shape::GetReturnAny, 1);
    seed(out, ctx, "pm_runtime_get_sync", Shape::GetReturnAny, 1);
    seed(out, ctx, "pm_runtime_get_noresume", Shape::GetReturnAny, 1);
    seed(out, ctx, "pm_runtime_put", Shape::PutReturnAny, 1);
    seed(out, ctx, "pm_runtime_put_noidle", Shape::PutReturnAny, 1);
    seed(out, ctx, "pm_runtime_put_autosuspend", Shape::PutReturnAny, 1);
    seed(out, ctx, "pm_runtime_put_sync", Shape::PutReturnAny, 1);
    seed(out, ctx, "pm_runtime_put_sync_suspend", Shape::PutReturnAny, 1);
    seed(out, ctx, "pm_runtime_put_sync_autosuspend", Shape::PutReturnAny, 1);
}

/// The FunctionFS data-object family (`drivers/usb/gadget/function/f_fs.c`).
fn ffs_table(ctx: &mut Context, out: &mut Vec<(String, Summary)>) {
    seed(out, ctx, "ffs_data_new", Shape::New, 0);
    seed(out, ctx, "ffs_data_get", Shape::GetNoReturn, 1);
    seed(out, ctx, "ffs_data_put", Shape::PutNoReturn, 1);
}

/// The CPython reference-counting family.
fn py_table(ctx: &mut Context, out: &mut Vec<(String, Summary)>) {
    seed(out, ctx, "_Py_INCREF", Shape::GetNoReturn, 1);
    seed(out, ctx, "_Py_DECREF", Shape::PutNoReturn, 1);
    // Targets its *second* argument (the exception value), not the first.
    seed(out, ctx, "PyErr_SetObject", Shape::GetNonNullNoReturn, 2);
    // Targets its *third* argument (the value being attached).
    seed(out, ctx, "PyObject_SetAttrString", Shape::GetReturnSuccess, 3);
    // Targets its *second* argument (the appended item).
    seed(out, ctx, "PyList_Append", Shape::GetReturnSuccess, 2);
    for ctor in [
        "PyLong_FromLong",
        "PyUnicode_FromString",
        "PyDict_New",
        "PyList_New",
        "PyTuple_New",
        "PyObject_GetAttrString",
    ] {
        seed(out, ctx, ctor, Shape::New, 0);
    }
}

/// Builds the closed predefined-summary table (spec §4.8), gated per
/// `Config::predefined`.
pub fn build_table(ctx: &mut Context, families: &PredefinedFamilies) -> Vec<(String, Summary)> {
    let mut out = Vec::new();
    if families.kref {
        kref_table(ctx, &mut out);
    }
    if families.dpm {
        dpm_table(ctx, &mut out);
    }
    if families.ffs {
        ffs_table(ctx, &mut out);
    }
    if families.py {
        py_table(ctx, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_gate_controls_which_entries_are_seeded() {
        let mut ctx = Context::new();
        let table = build_table(&mut ctx, &PredefinedFamilies::none());
        assert!(table.is_empty());

        let mut ctx = Context::new();
        let families = PredefinedFamilies {
            kref: true,
            ..PredefinedFamilies::none()
        };
        let table = build_table(&mut ctx, &families);
        assert!(table.iter().any(|(name, _)| name == "kref_init"));
        assert!(!table.iter().any(|(name, _)| name == "pm_runtime_get"));
    }

    #[test]
    fn kref_put_decrements_the_first_argument() {
        let mut ctx = Context::new();
        let families = PredefinedFamilies {
            kref: true,
            ..PredefinedFamilies::none()
        };
        let table = build_table(&mut ctx, &families);
        let (_, summary) = table.iter().find(|(name, _)| name == "kref_put").unwrap();
        assert_eq!(summary.entries[0].ops.get("[1]"), -1);
    }

    #[test]
    fn kobject_get_has_no_refcount_effect_of_its_own() {
        let mut ctx = Context::new();
        let families = PredefinedFamilies {
            kref: true,
            ..PredefinedFamilies::none()
        };
        let table = build_table(&mut ctx, &families);
        let (_, summary) = table.iter().find(|(name, _)| name == "kobject_get").unwrap();
        assert_eq!(summary.entries[0].ops.get("[1]"), 0);
        assert!(matches!(summary.entries[0].ret, ReturnValue::Operand(_)));
    }

    #[test]
    fn py_incref_increments_and_ctor_shapes_produce_a_fresh_return_slot() {
        let mut ctx = Context::new();
        let families = PredefinedFamilies {
            py: true,
            ..PredefinedFamilies::none()
        };
        let table = build_table(&mut ctx, &families);
        let (_, incref) = table.iter().find(|(name, _)| name == "_Py_INCREF").unwrap();
        assert_eq!(incref.entries[0].ops.get("[1]"), 1);

        let (_, ctor) = table
            .iter()
            .find(|(name, _)| name == "PyDict_New")
            .unwrap();
        assert!(matches!(ctor.entries[0].ret, ReturnValue::Operand(_)));
    }

    #[test]
    fn py_list_append_targets_its_second_argument_and_returns_zero_on_success() {
        let mut ctx = Context::new();
        let families = PredefinedFamilies {
            py: true,
            ..PredefinedFamilies::none()
        };
        let table = build_table(&mut ctx, &families);
        let (_, append) = table.iter().find(|(name, _)| name == "PyList_Append").unwrap();
        assert_eq!(append.entries[0].ops.get("[2]"), 1);
        assert_eq!(append.entries[0].ops.get("[1]"), 0);
        match &append.entries[0].ret {
            ReturnValue::Operand(op) => assert_eq!(op.as_constant(), Some(0)),
            ReturnValue::Unknown => panic!("expected a constant return"),
        }
    }
}
