//! Cache layout (C7): bit-exact binary serialization with random access by
//! function name (spec §4.7). Record = `string(name) uint32(body_length)
//! body`; `body` is a pre-order tag stream of the summary's formulas and
//! refcount deltas.

use crate::error::AnalysisError;
use crate::formula::{AtomKind, Context, Formula, FormulaNode, Operand, OperandNode, RelOp};
use crate::summary::{Operation, PathSummaryEntry, RefcountOps, ReturnValue, Summary};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const TAG_TRUE: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_ATOM_BOOL: u8 = 2;
const TAG_ATOM_REL: u8 = 3;
const TAG_AND: u8 = 4;
const TAG_OR: u8 = 5;
const TAG_NOT: u8 = 6;

const OPERAND_CONSTANT: u8 = 0;
const OPERAND_SIGNATURE: u8 = 1;

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// String fields are length-prefixed including a terminating zero (spec
/// §4.7): the length counts the trailing NUL, which is written but not
/// part of the returned `String` on read.
fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_u32(w, s.len() as u32 + 1)?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0u8])
}

fn read_string(r: &mut impl Read) -> io::Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    buf.pop();
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Signatures never round-trip a bare `Variable` — those are context-local
/// by construction and must already be eliminated by `VariableToValue`
/// before a path entry is cached (spec §3 "Variables are never serialized").
fn write_operand(w: &mut impl Write, op: &Operand) -> Result<(), AnalysisError> {
    match op.node() {
        OperandNode::Constant(i) => {
            w.write_all(&[OPERAND_CONSTANT]).map_err(AnalysisError::CacheIo)?;
            write_i64(w, *i).map_err(AnalysisError::CacheIo)
        }
        OperandNode::Signature(s) => {
            w.write_all(&[OPERAND_SIGNATURE]).map_err(AnalysisError::CacheIo)?;
            write_string(w, s).map_err(AnalysisError::CacheIo)
        }
        OperandNode::Variable(..) => Err(AnalysisError::SerializedVariable),
    }
}

fn read_operand(r: &mut impl Read, ctx: &mut Context) -> Result<Operand, AnalysisError> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag).map_err(AnalysisError::CacheIo)?;
    match tag[0] {
        OPERAND_CONSTANT => Ok(ctx.get_constant(read_i64(r).map_err(AnalysisError::CacheIo)?)),
        OPERAND_SIGNATURE => Ok(ctx.get_signature(read_string(r).map_err(AnalysisError::CacheIo)?)),
        other => Err(AnalysisError::UnknownTag(other as u32)),
    }
}

fn relop_tag(op: RelOp) -> u8 {
    match op {
        RelOp::Eq => 0,
        RelOp::Ne => 1,
        RelOp::Lt => 2,
        RelOp::Le => 3,
        RelOp::Gt => 4,
        RelOp::Ge => 5,
    }
}

fn relop_from_tag(tag: u8) -> Result<RelOp, AnalysisError> {
    Ok(match tag {
        0 => RelOp::Eq,
        1 => RelOp::Ne,
        2 => RelOp::Lt,
        3 => RelOp::Le,
        4 => RelOp::Gt,
        5 => RelOp::Ge,
        other => return Err(AnalysisError::UnknownTag(other as u32)),
    })
}

fn write_formula(w: &mut impl Write, f: Formula) -> Result<(), AnalysisError> {
    match f.node() {
        FormulaNode::True => w.write_all(&[TAG_TRUE]).map_err(AnalysisError::CacheIo),
        FormulaNode::False => w.write_all(&[TAG_FALSE]).map_err(AnalysisError::CacheIo),
        FormulaNode::Atom(AtomKind::BoolPlaceholder { name, .. }) => {
            w.write_all(&[TAG_ATOM_BOOL]).map_err(AnalysisError::CacheIo)?;
            write_string(w, name).map_err(AnalysisError::CacheIo)
        }
        FormulaNode::Atom(AtomKind::Relation { op, lhs, rhs }) => {
            w.write_all(&[TAG_ATOM_REL]).map_err(AnalysisError::CacheIo)?;
            w.write_all(&[relop_tag(*op)]).map_err(AnalysisError::CacheIo)?;
            write_operand(w, lhs)?;
            write_operand(w, rhs)
        }
        FormulaNode::And(p, q) => {
            w.write_all(&[TAG_AND]).map_err(AnalysisError::CacheIo)?;
            write_formula(w, *p)?;
            write_formula(w, *q)
        }
        FormulaNode::Or(p, q) => {
            w.write_all(&[TAG_OR]).map_err(AnalysisError::CacheIo)?;
            write_formula(w, *p)?;
            write_formula(w, *q)
        }
        FormulaNode::Not(p) => {
            w.write_all(&[TAG_NOT]).map_err(AnalysisError::CacheIo)?;
            write_formula(w, *p)
        }
    }
}

fn read_formula(r: &mut impl Read, ctx: &mut Context) -> Result<Formula, AnalysisError> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag).map_err(AnalysisError::CacheIo)?;
    match tag[0] {
        TAG_TRUE => Ok(ctx.true_()),
        TAG_FALSE => Ok(ctx.false_()),
        TAG_ATOM_BOOL => {
            let name = read_string(r).map_err(AnalysisError::CacheIo)?;
            Ok(ctx.get_atom_named(name))
        }
        TAG_ATOM_REL => {
            let mut op_tag = [0u8; 1];
            r.read_exact(&mut op_tag).map_err(AnalysisError::CacheIo)?;
            let op = relop_from_tag(op_tag[0])?;
            let lhs = read_operand(r, ctx)?;
            let rhs = read_operand(r, ctx)?;
            ctx.relation(op, lhs, rhs)
        }
        TAG_AND => {
            let p = read_formula(r, ctx)?;
            let q = read_formula(r, ctx)?;
            ctx.and(p, q)
        }
        TAG_OR => {
            let p = read_formula(r, ctx)?;
            let q = read_formula(r, ctx)?;
            ctx.or(p, q)
        }
        TAG_NOT => {
            let p = read_formula(r, ctx)?;
            ctx.not(p)
        }
        other => Err(AnalysisError::UnknownTag(other as u32)),
    }
}

fn write_ops(w: &mut impl Write, ops: &RefcountOps) -> Result<(), AnalysisError> {
    let mut entries: Vec<(&str, i64)> = ops.iter().collect();
    entries.sort();
    write_u32(w, entries.len() as u32).map_err(AnalysisError::CacheIo)?;
    for (sig, amount) in entries {
        write_string(w, sig).map_err(AnalysisError::CacheIo)?;
        write_i64(w, amount).map_err(AnalysisError::CacheIo)?;
    }
    Ok(())
}

fn read_ops(r: &mut impl Read) -> Result<RefcountOps, AnalysisError> {
    let count = read_u32(r).map_err(AnalysisError::CacheIo)?;
    let mut ops = RefcountOps::new();
    for _ in 0..count {
        let sig = read_string(r).map_err(AnalysisError::CacheIo)?;
        let amount = read_i64(r).map_err(AnalysisError::CacheIo)?;
        ops.add_history_entry(sig, Operation::new("cache", amount));
    }
    Ok(ops)
}

/// `entry := formula(pc) refcount_ops string(ret)` (spec §4.7): `ret` is a
/// plain string, not a tagged operand — an empty string stands for
/// `ReturnValue::Unknown`, anything else is re-parsed as a constant or a
/// signature the same way a formula operand's `Display` renders it.
fn write_entry(w: &mut impl Write, entry: &PathSummaryEntry) -> Result<(), AnalysisError> {
    write_formula(w, entry.path_condition)?;
    write_ops(w, &entry.ops)?;
    let ret = match &entry.ret {
        ReturnValue::Operand(op) => op.to_string(),
        ReturnValue::Unknown => String::new(),
    };
    write_string(w, &ret).map_err(AnalysisError::CacheIo)
}

fn read_entry(r: &mut impl Read, ctx: &mut Context) -> Result<PathSummaryEntry, AnalysisError> {
    let path_condition = read_formula(r, ctx)?;
    let ops = read_ops(r)?;
    let ret_text = read_string(r).map_err(AnalysisError::CacheIo)?;
    let ret = if ret_text.is_empty() {
        ReturnValue::Unknown
    } else if let Ok(k) = ret_text.parse::<i64>() {
        ReturnValue::Operand(ctx.get_constant(k))
    } else {
        ReturnValue::Operand(ctx.get_signature(ret_text))
    };
    Ok(PathSummaryEntry {
        path_condition,
        ops,
        ret,
        exact_pc: true,
        path_id: 0,
        applied: true,
    })
}

/// Serializes one function's summary body (everything after the
/// `string(name) uint32(body_length)` record header): `body :=
/// uint32(n_entries) entry* uint32(n_dropped) entry*` (spec §4.7) — dropped
/// entries are fully serialized, not merely counted.
pub fn serialize_summary_body(summary: &Summary) -> Result<Vec<u8>, AnalysisError> {
    let mut body = Vec::new();
    write_u32(&mut body, summary.entries.len() as u32).map_err(AnalysisError::CacheIo)?;
    for entry in &summary.entries {
        write_entry(&mut body, entry)?;
    }
    write_u32(&mut body, summary.dropped.len() as u32).map_err(AnalysisError::CacheIo)?;
    for entry in &summary.dropped {
        write_entry(&mut body, entry)?;
    }
    Ok(body)
}

pub fn deserialize_summary_body(
    name: &str,
    mut body: &[u8],
    ctx: &mut Context,
) -> Result<Summary, AnalysisError> {
    let count = read_u32(&mut body).map_err(AnalysisError::CacheIo)?;
    let mut summary = Summary::new(name);
    for _ in 0..count {
        summary.entries.push(read_entry(&mut body, ctx)?);
    }
    let dropped_count = read_u32(&mut body).map_err(AnalysisError::CacheIo)? as usize;
    for _ in 0..dropped_count {
        summary.dropped.push(read_entry(&mut body, ctx)?);
    }
    Ok(summary)
}

/// Append-only write handle (spec §5: "a single analyzer owns both" the
/// reader and writer; no locking).
pub struct CacheWriter {
    file: BufWriter<File>,
}

impl CacheWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(AnalysisError::CacheIo)?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    pub fn serialize_summary(&mut self, summary: &Summary) -> Result<(), AnalysisError> {
        let body = serialize_summary_body(summary)?;
        write_string(&mut self.file, &summary.name).map_err(AnalysisError::CacheIo)?;
        write_u32(&mut self.file, body.len() as u32).map_err(AnalysisError::CacheIo)?;
        self.file.write_all(&body).map_err(AnalysisError::CacheIo)?;
        self.file.flush().map_err(AnalysisError::CacheIo)
    }
}

/// Random-access read handle: `open` scans once to build a `name -> offset`
/// index, after which `deserialize_summary` seeks directly to one record.
pub struct CacheReader {
    file: File,
    index: HashMap<String, (u64, u32)>,
}

impl CacheReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let mut file = File::open(path).map_err(AnalysisError::CacheIo)?;
        let mut index = HashMap::new();
        let mut reader = BufReader::new(&mut file);
        loop {
            let name = match read_string(&mut reader) {
                Ok(name) => name,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(AnalysisError::CacheIo(e)),
            };
            let body_len = read_u32(&mut reader).map_err(AnalysisError::CacheIo)?;
            let offset = reader
                .stream_position()
                .map_err(AnalysisError::CacheIo)?;
            index.insert(name, (offset, body_len));
            reader
                .seek_relative(body_len as i64)
                .map_err(AnalysisError::CacheIo)?;
        }
        Ok(Self { file, index })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn deserialize_summary(
        &mut self,
        name: &str,
        ctx: &mut Context,
    ) -> Result<Option<Summary>, AnalysisError> {
        let Some(&(offset, len)) = self.index.get(name) else {
            return Ok(None);
        };
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(AnalysisError::CacheIo)?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf).map_err(AnalysisError::CacheIo)?;
        Ok(Some(deserialize_summary_body(name, &buf, ctx)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::RelOp;
    use tempfile_shim::NamedTempFile;

    mod tempfile_shim {
        use std::path::PathBuf;

        /// A self-cleaning scratch file, written by hand so the test suite
        /// doesn't need to pull in the `tempfile` crate for one use site.
        pub struct NamedTempFile {
            path: PathBuf,
        }

        impl NamedTempFile {
            pub fn new() -> std::io::Result<Self> {
                let mut path = std::env::temp_dir();
                let unique = format!(
                    "refcount-core-cache-test-{}-{:?}",
                    std::process::id(),
                    std::thread::current().id()
                );
                path.push(unique);
                Ok(Self { path })
            }

            pub fn path(&self) -> &std::path::Path {
                &self.path
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn round_trips_a_summary_through_the_cache_file() {
        let tmp = NamedTempFile::new().unwrap();
        let mut ctx = Context::new();

        let sig = ctx.get_signature("[1]");
        let zero = ctx.get_constant(0);
        let cond = ctx.relation(RelOp::Eq, sig, zero).unwrap();
        let mut ops = RefcountOps::new();
        ops.add_history_entry("[1]", Operation::new("h", 1));
        let entry = PathSummaryEntry {
            path_condition: cond,
            ops,
            ret: ReturnValue::Operand(zero),
            exact_pc: true,
            path_id: 0,
            applied: true,
        };
        let mut summary = Summary::new("example_fn");
        summary.entries.push(entry);

        {
            let mut writer = CacheWriter::create(tmp.path()).unwrap();
            writer.serialize_summary(&summary).unwrap();
        }

        let mut reader = CacheReader::open(tmp.path()).unwrap();
        assert!(reader.contains("example_fn"));
        let mut ctx2 = Context::new();
        let restored = reader
            .deserialize_summary("example_fn", &mut ctx2)
            .unwrap()
            .unwrap();
        assert_eq!(restored.entries.len(), 1);
        assert_eq!(restored.entries[0].ops.get("[1]"), 1);
    }

    #[test]
    fn formula_round_trips_through_write_and_read() {
        // P4: a formula with no Variable leaves is logically equivalent to
        // itself after a write/read round trip (checked via a fresh
        // context's `relation`, which reconstructs the identical interned
        // node from the same leaves and operator).
        let mut ctx = Context::new();
        let sig = ctx.get_signature("[1]");
        let zero = ctx.get_constant(0);
        let one = ctx.get_constant(1);
        let a = ctx.relation(RelOp::Ge, sig, zero).unwrap();
        let b = ctx.relation(RelOp::Le, sig, one).unwrap();
        let f = ctx.and(a, b).unwrap();

        let mut bytes = Vec::new();
        write_formula(&mut bytes, f).unwrap();

        let mut ctx2 = Context::new();
        let restored = read_formula(&mut bytes.as_slice(), &mut ctx2).unwrap();
        assert_eq!(restored.to_string(), f.to_string());
    }

    #[test]
    fn summary_round_trips_structurally_through_the_cache() {
        // P5: same entries in order, same ops, same ret — checked via
        // context-free comparisons (`RefcountOps`'s `PartialEq` is already
        // context-free; `Formula`/`Operand` carry a `ContextId` that differs
        // across the round trip, so those compare by rendered text instead).
        let mut ctx = Context::new();
        let sig = ctx.get_signature("[1]");
        let zero = ctx.get_constant(0);
        let one = ctx.get_constant(1);

        let mut kept_ops = RefcountOps::new();
        kept_ops.add_history_entry("[1]", Operation::new("h", 1));
        let kept = PathSummaryEntry {
            path_condition: ctx.relation(RelOp::Eq, sig, zero).unwrap(),
            ops: kept_ops,
            ret: ReturnValue::Operand(zero),
            exact_pc: true,
            path_id: 0,
            applied: true,
        };
        let mut dropped_ops = RefcountOps::new();
        dropped_ops.add_history_entry("[1]", Operation::new("h", -1));
        let dropped = PathSummaryEntry {
            path_condition: ctx.relation(RelOp::Eq, sig, one).unwrap(),
            ops: dropped_ops,
            ret: ReturnValue::Unknown,
            exact_pc: true,
            path_id: 0,
            applied: true,
        };

        let mut summary = Summary::new("round_trip_fn");
        summary.entries.push(kept);
        summary.dropped.push(dropped);

        let body = serialize_summary_body(&summary).unwrap();
        let mut ctx2 = Context::new();
        let restored = deserialize_summary_body("round_trip_fn", &body, &mut ctx2).unwrap();

        assert_eq!(restored.name, summary.name);
        assert_eq!(restored.entries.len(), summary.entries.len());
        assert_eq!(restored.dropped.len(), summary.dropped.len());
        for (orig, back) in summary.entries.iter().zip(&restored.entries) {
            assert_eq!(orig.ops, back.ops);
            assert_eq!(orig.path_condition.to_string(), back.path_condition.to_string());
            let ret_text = |r: &ReturnValue| match r {
                ReturnValue::Operand(op) => op.to_string(),
                ReturnValue::Unknown => String::new(),
            };
            assert_eq!(ret_text(&orig.ret), ret_text(&back.ret));
        }
        for (orig, back) in summary.dropped.iter().zip(&restored.dropped) {
            assert_eq!(orig.ops, back.ops);
            assert!(matches!(back.ret, ReturnValue::Unknown));
        }
    }

    #[test]
    fn missing_function_name_returns_none() {
        let tmp = NamedTempFile::new().unwrap();
        let mut ctx = Context::new();
        let summary = Summary::new("present_fn");
        {
            let mut writer = CacheWriter::create(tmp.path()).unwrap();
            writer.serialize_summary(&summary).unwrap();
        }
        let mut reader = CacheReader::open(tmp.path()).unwrap();
        assert!(reader.deserialize_summary("absent_fn", &mut ctx).unwrap().is_none());
    }
}
