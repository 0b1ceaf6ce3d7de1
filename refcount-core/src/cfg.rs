//! Path enumerator (C3): builds a `petgraph` CFG from a `refcount_ir::Function`,
//! slices away vertices that cannot affect a refcount-bearing value, reduces
//! (contracts) the purely-structural ones away, and enumerates simple paths
//! from entry to exit up to the configured caps (spec §4.3).

use crate::config::Config;
use crate::formula::{Context, Formula, RelOp};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use refcount_ir::{BasicBlock, BlockId, Function, Instruction, Value, ValueId};
use std::collections::{HashMap, HashSet};

/// One CFG node: a basic block id plus whatever of its instruction stream
/// survived slicing.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub block: BlockId,
}

/// A CFG edge. `conditions` is the conjunction of branch/switch literals
/// selected to take this edge (empty for an unconditional jump).
/// `dominated_edges` is the set of original (pre-contraction) `(from, to)`
/// block pairs this edge stands in for (spec §4.3 glossary) — a single
/// original edge dominates only itself; a contracted edge's set is the
/// union of the two edges it replaced.
#[derive(Debug, Clone)]
pub struct Edge {
    pub conditions: Vec<(ValueId, bool)>,
    pub dominated_edges: Vec<(BlockId, BlockId)>,
}

impl Edge {
    fn new(from: BlockId, to: BlockId, conditions: Vec<(ValueId, bool)>) -> Self {
        Self {
            conditions,
            dominated_edges: vec![(from, to)],
        }
    }

    fn contracted(in_edge: &Edge, out_edge: &Edge) -> Self {
        let mut conditions = in_edge.conditions.clone();
        conditions.extend(out_edge.conditions.iter().copied());
        let mut dominated_edges = in_edge.dominated_edges.clone();
        dominated_edges.extend(out_edge.dominated_edges.iter().copied());
        Self {
            conditions,
            dominated_edges,
        }
    }
}

pub struct Cfg {
    pub graph: DiGraph<Vertex, Edge>,
    pub index_of: HashMap<BlockId, NodeIndex>,
    pub entry: NodeIndex,
    /// Blocks kept in the graph (for φ resolution) but whose instructions
    /// should be skipped when walking a path — populated only when
    /// `Config::force_exclude` is `false` (spec §6 "force-exclude": "whether
    /// safe_to_include vertices are contracted away instead of merely
    /// pruned").
    pruned_only: HashSet<BlockId>,
}

impl Cfg {
    pub fn build(func: &Function, config: &Config) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for block in &func.blocks {
            let idx = graph.add_node(Vertex { block: block.id });
            index_of.insert(block.id, idx);
        }
        for block in &func.blocks {
            let from = index_of[&block.id];
            match block.terminator() {
                Some(Instruction::Branch {
                    condition,
                    if_true,
                    if_false,
                }) => {
                    let cond_id = match condition {
                        Value::Local(id) => Some(*id),
                        _ => None,
                    };
                    if let Some(&to) = index_of.get(if_true) {
                        let conditions = cond_id.map(|c| vec![(c, true)]).unwrap_or_default();
                        graph.add_edge(from, to, Edge::new(block.id, *if_true, conditions));
                    }
                    if let Some(&to) = index_of.get(if_false) {
                        let conditions = cond_id.map(|c| vec![(c, false)]).unwrap_or_default();
                        graph.add_edge(from, to, Edge::new(block.id, *if_false, conditions));
                    }
                }
                Some(Instruction::Jump { target }) => {
                    if let Some(&to) = index_of.get(target) {
                        graph.add_edge(from, to, Edge::new(block.id, *target, Vec::new()));
                    }
                }
                Some(Instruction::Switch {
                    value,
                    cases,
                    default,
                }) => {
                    let cond_id = match value {
                        Value::Local(id) => Some(*id),
                        _ => None,
                    };
                    for (k, target) in cases {
                        if let Some(&to) = index_of.get(target) {
                            let conditions = cond_id.map(|id| vec![(id, *k != 0)]).unwrap_or_default();
                            graph.add_edge(from, to, Edge::new(block.id, *target, conditions));
                        }
                    }
                    if let Some(&to) = index_of.get(default) {
                        graph.add_edge(from, to, Edge::new(block.id, *default, Vec::new()));
                    }
                }
                _ => {}
            }
        }
        let entry = index_of[&func.entry];
        let mut cfg = Self {
            graph,
            index_of,
            entry,
            pruned_only: HashSet::new(),
        };
        cfg.reduce(func, config);
        cfg
    }

    fn exit_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Marks every vertex reachable from entry *and* able to reach some
    /// exit — vertices outside that set can never lie on an entry-to-exit
    /// path and are dropped unconditionally (spec §4.3 "Slice").
    fn reachable_slice(&self) -> HashSet<NodeIndex> {
        let mut from_entry = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(n) = stack.pop() {
            if from_entry.insert(n) {
                stack.extend(self.graph.neighbors_directed(n, Direction::Outgoing));
            }
        }
        let mut to_exit = HashSet::new();
        let mut stack: Vec<_> = self.exit_nodes();
        while let Some(n) = stack.pop() {
            if to_exit.insert(n) {
                stack.extend(self.graph.neighbors_directed(n, Direction::Incoming));
            }
        }
        from_entry.intersection(&to_exit).copied().collect()
    }

    /// Spec §4.3 "Mark inclusion safety": a vertex is only eligible for
    /// contraction if it has both a predecessor and successor, its
    /// instructions are pure/local, its terminator carries no condition of
    /// its own, and none of its results feed the return or a call argument
    /// (the `in_slice` exclusion below).
    fn is_contractible(&self, func: &Function, n: NodeIndex, block: &BasicBlock, in_slice: &HashSet<ValueId>) -> bool {
        if n == self.entry {
            return false;
        }
        let indeg = self.graph.neighbors_directed(n, Direction::Incoming).count();
        let outdeg = self.graph.neighbors_directed(n, Direction::Outgoing).count();
        if indeg != 1 || outdeg != 1 {
            return false;
        }
        // Contracting through a block some later φ names as its
        // predecessor would break `determine_phinode`'s block-id lookup,
        // so such blocks are never folded away even if otherwise pure.
        let named_by_a_phi = self.graph.neighbors_directed(n, Direction::Outgoing).any(|succ| {
            let succ_block = self.graph[succ].block;
            block_has_phi_predecessor(func, succ_block, block.id)
        });
        if named_by_a_phi {
            return false;
        }
        purity_safe(block, in_slice) && matches!(block.terminator(), Some(Instruction::Jump { .. }))
    }

    /// Spec §4.3 "Slice" + "Reduce paths": drops vertices outside the
    /// entry/exit slice unconditionally, then — only when
    /// `Config::force_exclude` is set — contracts every remaining
    /// safe-to-include vertex into its neighbors. When `force_exclude` is
    /// unset the topology is left alone and the safe set is instead
    /// recorded in `pruned_only` for the driver to skip at walk time.
    fn reduce(&mut self, func: &Function, config: &Config) {
        let reachable = self.reachable_slice();
        self.drop_unreachable(&reachable);

        let slice = in_slice(func);
        if !config.force_exclude {
            let mut pruned_only = HashSet::new();
            for n in self.graph.node_indices() {
                let block_id = self.graph[n].block;
                if let Some(block) = func.block(block_id) {
                    if self.is_contractible(func, n, block, &slice) {
                        pruned_only.insert(block_id);
                    }
                }
            }
            self.pruned_only = pruned_only;
            return;
        }

        loop {
            let target = self.graph.node_indices().find(|&n| {
                func.block(self.graph[n].block)
                    .map(|b| self.is_contractible(func, n, b, &slice))
                    .unwrap_or(false)
            });
            let Some(v) = target else { break };
            self.contract(v);
        }
    }

    fn drop_unreachable(&mut self, reachable: &HashSet<NodeIndex>) {
        if reachable.len() == self.graph.node_count() {
            return;
        }
        let mut new_graph = DiGraph::new();
        let mut mapping = HashMap::new();
        let mut new_index_of = HashMap::new();
        for &n in reachable {
            let block = self.graph[n].block;
            let idx = new_graph.add_node(Vertex { block });
            mapping.insert(n, idx);
            new_index_of.insert(block, idx);
        }
        for edge in self.graph.edge_references() {
            if let (Some(&from), Some(&to)) = (mapping.get(&edge.source()), mapping.get(&edge.target())) {
                new_graph.add_edge(from, to, edge.weight().clone());
            }
        }
        self.entry = mapping[&self.entry];
        self.graph = new_graph;
        self.index_of = new_index_of;
    }

    /// Splices `v`'s unique in-edge and out-edge into one edge, then drops
    /// `v` (spec §4.3 "Reduce paths"): rebuilds the graph rather than using
    /// `petgraph`'s swap-removing `remove_node`, which would invalidate the
    /// indices of unrelated nodes.
    fn contract(&mut self, v: NodeIndex) {
        let in_edge = self
            .graph
            .edges_directed(v, Direction::Incoming)
            .next()
            .map(|e| (e.source(), e.weight().clone()));
        let out_edge = self
            .graph
            .edges_directed(v, Direction::Outgoing)
            .next()
            .map(|e| (e.target(), e.weight().clone()));

        let mut new_graph = DiGraph::new();
        let mut mapping = HashMap::new();
        let mut new_index_of = HashMap::new();
        for n in self.graph.node_indices() {
            if n == v {
                continue;
            }
            let block = self.graph[n].block;
            let idx = new_graph.add_node(Vertex { block });
            mapping.insert(n, idx);
            new_index_of.insert(block, idx);
        }
        for edge in self.graph.edge_references() {
            if edge.source() == v || edge.target() == v {
                continue;
            }
            let (from, to) = (mapping[&edge.source()], mapping[&edge.target()]);
            new_graph.add_edge(from, to, edge.weight().clone());
        }
        if let (Some((src, in_e)), Some((dst, out_e))) = (in_edge, out_edge) {
            if src != v && dst != v {
                let merged = Edge::contracted(&in_e, &out_e);
                new_graph.add_edge(mapping[&src], mapping[&dst], merged);
            }
        }
        self.entry = mapping[&self.entry];
        self.graph = new_graph;
        self.index_of = new_index_of;
    }

    /// Whether `block` survived reduction as "safe" but is still present in
    /// the graph un-contracted (`Config::force_exclude == false`) — the
    /// driver should skip its instructions' effects without dropping it
    /// from path enumeration.
    pub fn is_pruned(&self, block: BlockId) -> bool {
        self.pruned_only.contains(&block)
    }

    /// Enumerates simple entry-to-exit paths (as node-index sequences),
    /// capped at `max_paths`. `is_feasible_path` is an always-true
    /// placeholder — genuine infeasibility is caught later by sign
    /// inference and the SMT `check` once the path condition is built
    /// (spec §9, Open Question).
    pub fn enumerate_paths(&self, max_paths: usize) -> Vec<Vec<NodeIndex>> {
        let mut paths = Vec::new();
        let mut stack = vec![(self.entry, vec![self.entry], HashSet::from([self.entry]))];
        while let Some((node, path, visited)) = stack.pop() {
            if paths.len() >= max_paths {
                break;
            }
            let mut neighbors: Vec<_> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .collect();
            neighbors.sort_by_key(|n| n.index());
            if neighbors.is_empty() {
                if is_feasible_path(&path) {
                    paths.push(path);
                }
                continue;
            }
            for next in neighbors {
                if visited.contains(&next) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(next);
                let mut next_visited = visited.clone();
                next_visited.insert(next);
                stack.push((next, next_path, next_visited));
            }
        }
        paths
    }

    /// Builds the conjunction of branch conditions selected along `path`
    /// (spec §4.3 "Path condition").
    pub fn path_condition(&self, ctx: &mut Context, path: &[NodeIndex]) -> Formula {
        let mut acc = ctx.true_();
        for window in path.windows(2) {
            let (from, to) = (window[0], window[1]);
            let Some(edge) = self.graph.edges_connecting(from, to).next() else {
                continue;
            };
            for &(cond, taken) in &edge.weight().conditions {
                let atom = ctx.get_atom_for_value(cond, format!("{cond}"));
                let lit = if taken {
                    atom
                } else {
                    ctx.not(atom).expect("same-context negation")
                };
                acc = ctx.and(acc, lit).expect("same-context conjunction");
            }
        }
        acc
    }

    /// For a φ at `block` with incoming `(value, predecessor)` pairs, picks
    /// the value selected by whichever predecessor actually precedes `block`
    /// on `path` (spec §4.3 "φ resolution"). Returns `None` if `block` is
    /// not on `path` or no incoming edge matches (malformed φ).
    pub fn determine_phinode(
        &self,
        path: &[NodeIndex],
        block: BlockId,
        incoming: &[(Value, BlockId)],
    ) -> Option<Value> {
        let block_idx = self.index_of.get(&block)?;
        let pos = path.iter().position(|n| n == block_idx)?;
        if pos == 0 {
            return None;
        }
        let pred_block = self.graph[path[pos - 1]].block;
        incoming
            .iter()
            .find(|(_, pred)| *pred == pred_block)
            .map(|(v, _)| v.clone())
    }
}

fn block_has_phi_predecessor(func: &Function, block: BlockId, predecessor: BlockId) -> bool {
    func.block(block)
        .map(|b| {
            b.phis()
                .any(|inst| matches!(inst, Instruction::Phi { incoming, .. } if incoming.iter().any(|(_, pred)| *pred == predecessor)))
        })
        .unwrap_or(false)
}

/// Collects the `ValueId`s an instruction reads (spec §4.3 "Slice": used to
/// walk the backward data-flow closure from externally observable effects).
fn instruction_uses(inst: &Instruction) -> Vec<ValueId> {
    fn push_local(out: &mut Vec<ValueId>, v: &Value) {
        if let Value::Local(id) = v {
            out.push(*id);
        }
    }
    let mut out = Vec::new();
    match inst {
        Instruction::Load { pointer, .. } => push_local(&mut out, pointer),
        Instruction::Store { pointer, value } => {
            push_local(&mut out, pointer);
            push_local(&mut out, value);
        }
        Instruction::GetElementPtr { base, indices, .. } => {
            push_local(&mut out, base);
            for index in indices {
                if let refcount_ir::GepIndex::Dynamic(v) = index {
                    push_local(&mut out, v);
                }
            }
        }
        Instruction::Call { args, .. } => {
            for arg in args {
                push_local(&mut out, arg);
            }
        }
        Instruction::Cast { operand, .. } => push_local(&mut out, operand),
        Instruction::Phi { incoming, .. } => {
            for (v, _) in incoming {
                push_local(&mut out, v);
            }
        }
        Instruction::Return { value: Some(v) } => push_local(&mut out, v),
        Instruction::Return { value: None } => {}
        Instruction::ICmp { lhs, rhs, .. } => {
            push_local(&mut out, lhs);
            push_local(&mut out, rhs);
        }
        Instruction::Branch { condition, .. } => push_local(&mut out, condition),
        Instruction::Jump { .. } => {}
        Instruction::Switch { value, .. } => push_local(&mut out, value),
    }
    out
}

/// Backward closure, from the function's `Return` value and every `Call`'s
/// arguments, of every `ValueId` whose definition transitively feeds one of
/// those externally observable effects (spec §4.3 "Slice").
fn in_slice(func: &Function) -> HashSet<ValueId> {
    let mut defined_by: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
    let mut roots = Vec::new();
    for block in &func.blocks {
        for inst in &block.instructions {
            let uses = instruction_uses(inst);
            if let Some(result) = inst.result() {
                defined_by.insert(result, uses.clone());
            }
            match inst {
                Instruction::Return { value: Some(Value::Local(id)) } => roots.push(*id),
                Instruction::Call { args, .. } => {
                    for arg in args {
                        if let Value::Local(id) = arg {
                            roots.push(*id);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    let mut slice = HashSet::new();
    let mut stack = roots;
    while let Some(id) = stack.pop() {
        if slice.insert(id) {
            if let Some(uses) = defined_by.get(&id) {
                stack.extend(uses.iter().copied());
            }
        }
    }
    slice
}

/// Spec §4.3 "Mark inclusion safety": non-terminator instructions must be
/// pure, and none of a block's own results may feed the return or a call
/// argument anywhere in the function.
fn purity_safe(block: &BasicBlock, in_slice: &HashSet<ValueId>) -> bool {
    block.instructions.iter().all(|inst| {
        if inst.is_terminator() {
            return true;
        }
        inst.is_pure() && inst.result().map_or(true, |r| !in_slice.contains(&r))
    })
}

fn is_feasible_path(_path: &[NodeIndex]) -> bool {
    true
}

pub fn relop_for_branch() -> RelOp {
    RelOp::Eq
}

#[cfg(test)]
mod tests {
    use super::*;
    use refcount_ir::{BasicBlock, Function};

    fn diamond() -> Function {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::Branch {
            condition: Value::Local(ValueId(0)),
            if_true: BlockId(1),
            if_false: BlockId(2),
        });
        let mut bb1 = BasicBlock::new(BlockId(1));
        bb1.instructions.push(Instruction::Jump {
            target: BlockId(3),
        });
        let mut bb2 = BasicBlock::new(BlockId(2));
        bb2.instructions.push(Instruction::Jump {
            target: BlockId(3),
        });
        let mut bb3 = BasicBlock::new(BlockId(3));
        bb3.instructions.push(Instruction::Return {
            value: Some(Value::ConstInt(0)),
        });
        Function {
            name: "diamond".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0, bb1, bb2, bb3],
            location: None,
        }
    }

    #[test]
    fn enumerates_both_branch_arms() {
        let f = diamond();
        let cfg = Cfg::build(&f, &Config::default());
        let paths = cfg.enumerate_paths(100);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn enumerates_both_branch_arms_without_force_exclude() {
        let f = diamond();
        let config = Config {
            force_exclude: false,
            ..Config::default()
        };
        let cfg = Cfg::build(&f, &config);
        let paths = cfg.enumerate_paths(100);
        assert_eq!(paths.len(), 2);
        assert!(cfg.is_pruned(BlockId(1)));
        assert!(cfg.is_pruned(BlockId(2)));
    }

    /// Two diamonds chained in sequence: the DAG-approximated path count is
    /// `2 * 2 = 4` (each diamond independently contributes a factor of two),
    /// and every enumerated path must be a distinct node sequence (P6).
    fn double_diamond() -> Function {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::Branch {
            condition: Value::Local(ValueId(0)),
            if_true: BlockId(1),
            if_false: BlockId(2),
        });
        let mut bb1 = BasicBlock::new(BlockId(1));
        bb1.instructions.push(Instruction::Jump { target: BlockId(3) });
        let mut bb2 = BasicBlock::new(BlockId(2));
        bb2.instructions.push(Instruction::Jump { target: BlockId(3) });
        let mut bb3 = BasicBlock::new(BlockId(3));
        bb3.instructions.push(Instruction::Branch {
            condition: Value::Local(ValueId(1)),
            if_true: BlockId(4),
            if_false: BlockId(5),
        });
        let mut bb4 = BasicBlock::new(BlockId(4));
        bb4.instructions.push(Instruction::Jump { target: BlockId(6) });
        let mut bb5 = BasicBlock::new(BlockId(5));
        bb5.instructions.push(Instruction::Jump { target: BlockId(6) });
        let mut bb6 = BasicBlock::new(BlockId(6));
        bb6.instructions.push(Instruction::Return {
            value: Some(Value::ConstInt(0)),
        });
        Function {
            name: "double_diamond".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0, bb1, bb2, bb3, bb4, bb5, bb6],
            location: None,
        }
    }

    #[test]
    fn enumerated_paths_match_the_dag_approximated_count_with_no_duplicates() {
        let f = double_diamond();
        let cfg = Cfg::build(&f, &Config::default());
        let paths = cfg.enumerate_paths(100);

        assert_eq!(paths.len(), 4);

        let mut seen = HashSet::new();
        for path in &paths {
            assert!(seen.insert(path.clone()), "duplicate simple path enumerated: {path:?}");
        }
    }

    #[test]
    fn path_condition_negates_the_untaken_arm() {
        let f = diamond();
        let cfg = Cfg::build(&f, &Config::default());
        let mut ctx = Context::new();
        let paths = cfg.enumerate_paths(100);
        let conditions: Vec<_> = paths
            .iter()
            .map(|p| cfg.path_condition(&mut ctx, p).to_string())
            .collect();
        assert!(conditions.iter().any(|c| !c.starts_with('!')));
        assert!(conditions.iter().any(|c| c.starts_with('!')));
    }

    #[test]
    fn force_exclude_contracts_pure_jump_only_blocks_without_changing_route_count() {
        // bb1/bb2/bb4/bb5 are each a single unconditional Jump with no other
        // instructions — vacuously pure, so `force_exclude` (the default)
        // should splice them away. The number of distinct entry-to-exit
        // routes must stay 4 even though the node sequences get shorter.
        let f = double_diamond();
        let cfg = Cfg::build(&f, &Config::default());
        assert!(cfg.graph.node_count() < 7, "expected contraction to drop pure jump-only blocks");
        let paths = cfg.enumerate_paths(100);
        assert_eq!(paths.len(), 4);
        let mut seen = HashSet::new();
        for path in &paths {
            assert!(seen.insert(path.clone()));
        }
    }

    #[test]
    fn in_slice_follows_call_arguments_and_the_return_value() {
        let mut bb0 = BasicBlock::new(BlockId(0));
        bb0.instructions.push(Instruction::GetElementPtr {
            result: ValueId(0),
            base: Value::Param(1),
            base_type: refcount_ir::Type::Integer { bits: 32 },
            indices: vec![],
        });
        bb0.instructions.push(Instruction::Call {
            result: None,
            callee: Some("kref_get".to_string()),
            args: vec![Value::Local(ValueId(0))],
        });
        bb0.instructions.push(Instruction::Return { value: None });
        let f = Function {
            name: "f".into(),
            param_count: 1,
            entry: BlockId(0),
            blocks: vec![bb0],
            location: None,
        };
        let slice = in_slice(&f);
        assert!(slice.contains(&ValueId(0)));
    }
}
