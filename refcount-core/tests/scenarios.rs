//! End-to-end scenarios (spec §8 E1-E6): hand-built `refcount_ir::Function`
//! fixtures run through the full `analyze_function`/cache pipeline,
//! asserting the exact behavioral shapes the testable-properties section
//! describes.

use refcount_core::{analyze_function, Config, PredefinedFamilies, ReturnValue, Summary};
use refcount_core::cache::{deserialize_summary_body, serialize_summary_body, CacheReader, CacheWriter};
use refcount_core::formula::Context;
use refcount_core::pointer_sig::handle_container_of;
use refcount_core::predefined;
use refcount_core::smt::{SmtBackend, Z3Backend};
use refcount_ir::{BasicBlock, BlockId, Function, Instruction, Predicate, Value, ValueId};
use std::collections::HashMap;

fn kref_table() -> (Context, HashMap<String, Summary>) {
    let mut ctx = Context::new();
    let table = predefined::build_table(&mut ctx, &PredefinedFamilies::all());
    (ctx, table.into_iter().collect())
}

fn run(func: &Function) -> Summary {
    let (_pctx, table) = kref_table();
    let z3_ctx = z3::Context::new(&z3::Config::new());
    let backend = Z3Backend::new(&z3_ctx);
    let config = Config::default();
    analyze_function(func, &config, &backend, &table)
}

/// E1: `f(x) { if (x) { get(x); put(x); } }` — the get/put cancel and the
/// conditional collapses to a single unconditional, pure entry.
#[test]
fn e1_get_then_put_cancels_into_one_pure_entry() {
    let mut bb0 = BasicBlock::new(BlockId(0));
    bb0.instructions.push(Instruction::Branch {
        condition: Value::Param(1),
        if_true: BlockId(1),
        if_false: BlockId(2),
    });
    let mut bb1 = BasicBlock::new(BlockId(1));
    bb1.instructions.push(Instruction::Call {
        result: None,
        callee: Some("kref_get".to_string()),
        args: vec![Value::Param(1)],
    });
    bb1.instructions.push(Instruction::Call {
        result: None,
        callee: Some("kref_put".to_string()),
        args: vec![Value::Param(1)],
    });
    bb1.instructions.push(Instruction::Jump { target: BlockId(2) });
    let mut bb2 = BasicBlock::new(BlockId(2));
    bb2.instructions.push(Instruction::Return {
        value: Some(Value::ConstInt(0)),
    });
    let func = Function {
        name: "e1".into(),
        param_count: 1,
        entry: BlockId(0),
        blocks: vec![bb0, bb1, bb2],
        location: None,
    };

    let summary = run(&func);

    assert_eq!(summary.entries.len(), 1);
    assert!(summary.dropped.is_empty());
    assert_eq!(summary.entries[0].ops.get("[1]"), 0);
    match &summary.entries[0].ret {
        ReturnValue::Operand(op) => assert_eq!(op.as_constant(), Some(0)),
        ReturnValue::Unknown => panic!("expected a constant return"),
    }
}

/// E2: `f(x) { if (x != 0) { get(x); return x; } else { return 0; } }` —
/// both branches legitimately diverge on both `ret` and `ops`; since their
/// path conditions are mutually exclusive, neither is dropped.
#[test]
fn e2_divergence_on_return_keeps_both_entries() {
    let mut bb0 = BasicBlock::new(BlockId(0));
    bb0.instructions.push(Instruction::ICmp {
        result: ValueId(1),
        predicate: Predicate::Ne,
        lhs: Value::Param(1),
        rhs: Value::ConstInt(0),
    });
    bb0.instructions.push(Instruction::Branch {
        condition: Value::Local(ValueId(1)),
        if_true: BlockId(1),
        if_false: BlockId(2),
    });
    let mut bb1 = BasicBlock::new(BlockId(1));
    bb1.instructions.push(Instruction::Call {
        result: None,
        callee: Some("kref_get".to_string()),
        args: vec![Value::Param(1)],
    });
    bb1.instructions.push(Instruction::Return {
        value: Some(Value::Param(1)),
    });
    let mut bb2 = BasicBlock::new(BlockId(2));
    bb2.instructions.push(Instruction::Return {
        value: Some(Value::ConstInt(0)),
    });
    let func = Function {
        name: "e2".into(),
        param_count: 1,
        entry: BlockId(0),
        blocks: vec![bb0, bb1, bb2],
        location: None,
    };

    let summary = run(&func);

    assert_eq!(summary.entries.len(), 2);
    assert!(summary.dropped.is_empty());

    let got_param_ret = summary
        .entries
        .iter()
        .find(|e| matches!(&e.ret, ReturnValue::Operand(op) if op.as_signature() == Some("[1]")))
        .expect("one entry returns [1]");
    assert_eq!(got_param_ret.ops.get("[1]"), 1);

    let got_zero_ret = summary
        .entries
        .iter()
        .find(|e| matches!(&e.ret, ReturnValue::Operand(op) if op.as_constant() == Some(0)))
        .expect("one entry returns 0");
    assert_eq!(got_zero_ret.ops.get("[1]"), 0);
}

/// E3: `f(x) { if (x != 0) { get(x); return 0; } else { return 0; } }` —
/// both branches return `0` but disagree on `ops`; one is kept, the other
/// is flagged inconsistent and dropped regardless of the disjoint path
/// conditions (the CFG's own DFS order decides which is processed first,
/// so this only asserts the content split, not a fixed index).
#[test]
fn e3_same_return_different_ops_drops_one_entry() {
    let mut bb0 = BasicBlock::new(BlockId(0));
    bb0.instructions.push(Instruction::ICmp {
        result: ValueId(1),
        predicate: Predicate::Ne,
        lhs: Value::Param(1),
        rhs: Value::ConstInt(0),
    });
    bb0.instructions.push(Instruction::Branch {
        condition: Value::Local(ValueId(1)),
        if_true: BlockId(1),
        if_false: BlockId(2),
    });
    let mut bb1 = BasicBlock::new(BlockId(1));
    bb1.instructions.push(Instruction::Call {
        result: None,
        callee: Some("kref_get".to_string()),
        args: vec![Value::Param(1)],
    });
    bb1.instructions.push(Instruction::Return {
        value: Some(Value::ConstInt(0)),
    });
    let mut bb2 = BasicBlock::new(BlockId(2));
    bb2.instructions.push(Instruction::Return {
        value: Some(Value::ConstInt(0)),
    });
    let func = Function {
        name: "e3".into(),
        param_count: 1,
        entry: BlockId(0),
        blocks: vec![bb0, bb1, bb2],
        location: None,
    };

    let summary = run(&func);

    assert_eq!(summary.entries.len(), 1);
    assert_eq!(summary.dropped.len(), 1);

    let deltas: Vec<i64> = summary
        .entries
        .iter()
        .chain(summary.dropped.iter())
        .map(|e| e.ops.get("[1]"))
        .collect();
    assert!(deltas.contains(&1), "one side must carry the kref_get delta");
    assert!(deltas.contains(&0), "the other side must be pure");
    for e in summary.entries.iter().chain(summary.dropped.iter()) {
        match &e.ret {
            ReturnValue::Operand(op) => assert_eq!(op.as_constant(), Some(0)),
            ReturnValue::Unknown => panic!("both sides return a constant 0"),
        }
    }
}

/// E4: `__container_of` composition cancels the matching field suffix.
#[test]
fn e4_container_of_cancels_member_suffix() {
    assert_eq!(handle_container_of("[1]", "f"), "[1].-f");
}

/// E5: a path condition that pins `[1]` (here, also the returned value) to
/// a single point collapses the entry's `ret` to that constant.
#[test]
fn e5_range_collapse_overrides_the_return_value() {
    let mut bb0 = BasicBlock::new(BlockId(0));
    bb0.instructions.push(Instruction::ICmp {
        result: ValueId(1),
        predicate: Predicate::Ge,
        lhs: Value::Param(1),
        rhs: Value::ConstInt(3),
    });
    bb0.instructions.push(Instruction::Branch {
        condition: Value::Local(ValueId(1)),
        if_true: BlockId(1),
        if_false: BlockId(3),
    });
    let mut bb1 = BasicBlock::new(BlockId(1));
    bb1.instructions.push(Instruction::ICmp {
        result: ValueId(2),
        predicate: Predicate::Le,
        lhs: Value::Param(1),
        rhs: Value::ConstInt(3),
    });
    bb1.instructions.push(Instruction::Branch {
        condition: Value::Local(ValueId(2)),
        if_true: BlockId(2),
        if_false: BlockId(3),
    });
    let mut bb2 = BasicBlock::new(BlockId(2));
    bb2.instructions.push(Instruction::Return {
        value: Some(Value::Param(1)),
    });
    let mut bb3 = BasicBlock::new(BlockId(3));
    bb3.instructions.push(Instruction::Return { value: None });
    let func = Function {
        name: "e5".into(),
        param_count: 1,
        entry: BlockId(0),
        blocks: vec![bb0, bb1, bb2, bb3],
        location: None,
    };

    let summary = run(&func);

    let collapsed = summary
        .entries
        .iter()
        .find(|e| matches!(&e.ret, ReturnValue::Operand(op) if op.as_constant() == Some(3)))
        .expect("the x>=3 & x<=3 path collapses ret to 3");
    assert!(collapsed.ops.is_pure());
}

/// E6: after writing summaries for `a, b, c` in that order, opening the
/// cache and deserializing by name seeks straight to the right record.
#[test]
fn e6_cache_seeks_to_the_named_record() {
    let tmp_dir = std::env::temp_dir();
    let path = tmp_dir.join(format!(
        "refcount-core-e6-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));

    let mut ctx = Context::new();
    let summary_a = Summary::new("a");
    let mut summary_b = Summary::new("b");
    let sig = ctx.get_signature("[1]");
    let mut ops = refcount_core::RefcountOps::new();
    ops.add_history_entry("[1]", refcount_core::Operation::new("h", 1));
    summary_b.entries.push(refcount_core::PathSummaryEntry {
        path_condition: ctx.true_(),
        ops,
        ret: ReturnValue::Operand(sig),
        exact_pc: true,
        path_id: 0,
        applied: true,
    });
    let summary_c = Summary::new("c");

    {
        let mut writer = CacheWriter::create(&path).unwrap();
        writer.serialize_summary(&summary_a).unwrap();
        writer.serialize_summary(&summary_b).unwrap();
        writer.serialize_summary(&summary_c).unwrap();
    }

    let mut reader = CacheReader::open(&path).unwrap();
    assert!(reader.contains("a"));
    assert!(reader.contains("b"));
    assert!(reader.contains("c"));

    let mut ctx2 = Context::new();
    let restored = reader.deserialize_summary("b", &mut ctx2).unwrap().unwrap();
    assert_eq!(restored.name, "b");
    assert_eq!(restored.entries.len(), 1);
    assert_eq!(restored.entries[0].ops.get("[1]"), 1);

    let _ = std::fs::remove_file(&path);

    // Body (de)serialization round-trips independent of the cache file too.
    let body = serialize_summary_body(&summary_b).unwrap();
    let mut ctx3 = Context::new();
    let reparsed = deserialize_summary_body("b", &body, &mut ctx3).unwrap();
    assert_eq!(reparsed.entries.len(), 1);
}
