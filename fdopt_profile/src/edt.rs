//! Edge-level dominance over function CFGs.
//!
//! Every function contributes a contiguous range of edge indices starting
//! with a synthetic *entry edge* (no source block, targeting the entry
//! block), followed by one edge per (block, terminator successor) in layout
//! order. Dominance is computed over the non-back edges only:
//!
//! 1. Link edges: `p` is a parent of `c` iff `p.target == c.source`.
//! 2. Roots are edges with no parents; the entry edge is always one. More
//!    than one root is unusual but tolerated.
//! 3. A depth-first walk marks non-back edges (an edge is a back edge when
//!    its source equals its target or a child is on the traversal stack).
//! 4. A top-down worklist builds each edge's non-strict ancestor set over
//!    the non-back subgraph.
//! 5. The immediate dominator of an edge is the least common ancestor of
//!    its non-back parents: intersect the parents' ancestor sets, then
//!    prune every candidate that is an ancestor of another candidate.
//!    Anything but exactly one survivor is a construction error.
//!
//! Raw edge-execution counts normalize hierarchically against the immediate
//! dominator's count, yielding ratios in `[0, 1]`.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use rustc_hash::FxHashMap;

use fdopt_ir::{BlockId, BlockRef, FuncId, Function, Module};

/// Global CFG-edge index.
pub type EdgeIndex = u32;

pub type IndexSet = BTreeSet<EdgeIndex>;

// =============================================================================
// Errors
// =============================================================================

/// Dominance-construction failures; each aborts the affected function's
/// tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdtError {
    /// A nonempty edge graph with no parentless edge.
    NoRoots { function: String },
    /// LCA pruning left no candidate dominator.
    NoDominator { function: String, edge: EdgeIndex },
    /// LCA pruning left more than one candidate dominator.
    AmbiguousDominator {
        function: String,
        edge: EdgeIndex,
        candidates: Vec<EdgeIndex>,
    },
}

impl fmt::Display for EdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdtError::NoRoots { function } => {
                write!(f, "{function}: no roots in edge graph")
            }
            EdtError::NoDominator { function, edge } => {
                write!(f, "{function}: edge {edge}: LCA leaves no potential dominators")
            }
            EdtError::AmbiguousDominator {
                function,
                edge,
                candidates,
            } => write!(
                f,
                "{function}: edge {edge}: LCA leaves {} potential dominators",
                candidates.len()
            ),
        }
    }
}

impl std::error::Error for EdtError {}

pub type EdtResult<T> = Result<T, EdtError>;

// =============================================================================
// Edge node
// =============================================================================

/// One directed CFG edge.
#[derive(Debug, Clone)]
pub struct EdgeNode {
    /// Source block; `None` for a function's synthetic entry edge.
    pub source: Option<BlockRef>,
    pub target: BlockRef,
    pub index: EdgeIndex,
    pub parents: IndexSet,
    pub children: IndexSet,
    /// Edges this one immediately dominates.
    pub dom_children: IndexSet,
    /// Immediate dominator; equal to `index` for roots.
    pub dom_index: EdgeIndex,
}

impl EdgeNode {
    fn new(source: Option<BlockRef>, target: BlockRef, index: EdgeIndex) -> Self {
        EdgeNode {
            source,
            target,
            index,
            parents: IndexSet::new(),
            children: IndexSet::new(),
            dom_children: IndexSet::new(),
            dom_index: index,
        }
    }
}

// =============================================================================
// Worklist
// =============================================================================

/// Top-down worklist: an edge becomes ready when the count of its
/// unprocessed non-back parents reaches zero. Counts may go negative, which
/// suppresses duplicate enqueues.
struct Worklist {
    queue: VecDeque<EdgeIndex>,
    pending: FxHashMap<EdgeIndex, i64>,
}

impl Worklist {
    fn new(edges: &[EdgeNode], non_back: &IndexSet) -> Self {
        let mut pending = FxHashMap::default();
        for e in edges {
            let nbe_parents = e.parents.intersection(non_back).count() as i64;
            pending.insert(e.index, nbe_parents);
        }
        Worklist {
            queue: VecDeque::new(),
            pending,
        }
    }

    fn push(&mut self, e: EdgeIndex) {
        self.queue.push_back(e);
    }

    fn pop(&mut self) -> Option<EdgeIndex> {
        self.queue.pop_front()
    }

    fn push_ready(&mut self, children: &IndexSet) {
        for &c in children {
            let p = self.pending.entry(c).or_insert(0);
            *p -= 1;
            if *p == 0 {
                self.queue.push_back(c);
            }
        }
    }
}

// =============================================================================
// Per-function tree
// =============================================================================

/// Edge dominance for one function, indices starting at `first_edge`.
pub struct CfgEdgeDomTree {
    edges: Vec<EdgeNode>,
    first_edge: EdgeIndex,
    roots: IndexSet,
    non_back: IndexSet,
    ancestor_sets: FxHashMap<EdgeIndex, IndexSet>,
}

impl CfgEdgeDomTree {
    /// Build the tree for `func`. Declarations produce an empty tree.
    pub fn new(func: &Function, func_id: FuncId, first_edge: EdgeIndex) -> EdtResult<Self> {
        let mut tree = CfgEdgeDomTree {
            edges: Vec::new(),
            first_edge,
            roots: IndexSet::new(),
            non_back: IndexSet::new(),
            ancestor_sets: FxHashMap::default(),
        };
        if func.is_declaration || func.blocks.is_empty() {
            return Ok(tree);
        }

        let mut counter = first_edge;
        tree.edges.push(EdgeNode::new(
            None,
            BlockRef::new(func_id, func.entry()),
            counter,
        ));
        counter += 1;

        for (bid, block) in func.iter_blocks() {
            for succ in block.term.successors() {
                tree.edges.push(EdgeNode::new(
                    Some(BlockRef::new(func_id, bid)),
                    BlockRef::new(func_id, succ),
                    counter,
                ));
                counter += 1;
            }
        }

        tree.build_graph();
        tree.find_roots(&func.name)?;
        tree.find_non_back_edges();
        tree.compute_ancestor_sets();
        tree.compute_edge_dominance(&func.name)?;
        Ok(tree)
    }

    /// Enumerate edges without any dominance analysis; every edge
    /// self-dominates. Fallback used when construction fails, so global
    /// edge numbering stays contiguous.
    pub fn raw(func: &Function, func_id: FuncId, first_edge: EdgeIndex) -> Self {
        let mut tree = CfgEdgeDomTree {
            edges: Vec::new(),
            first_edge,
            roots: IndexSet::new(),
            non_back: IndexSet::new(),
            ancestor_sets: FxHashMap::default(),
        };
        if func.is_declaration || func.blocks.is_empty() {
            return tree;
        }
        let mut counter = first_edge;
        tree.edges.push(EdgeNode::new(
            None,
            BlockRef::new(func_id, func.entry()),
            counter,
        ));
        counter += 1;
        for (bid, block) in func.iter_blocks() {
            for succ in block.term.successors() {
                tree.edges.push(EdgeNode::new(
                    Some(BlockRef::new(func_id, bid)),
                    BlockRef::new(func_id, succ),
                    counter,
                ));
                counter += 1;
            }
        }
        tree
    }

    #[inline]
    fn node(&self, idx: EdgeIndex) -> &EdgeNode {
        &self.edges[(idx - self.first_edge) as usize]
    }

    #[inline]
    fn node_mut(&mut self, idx: EdgeIndex) -> &mut EdgeNode {
        let first = self.first_edge;
        &mut self.edges[(idx - first) as usize]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Surrender the edge nodes; the caller becomes their owner.
    pub fn into_edges(self) -> Vec<EdgeNode> {
        self.edges
    }

    /// Link parent/child edges: `p.target == c.source`.
    fn build_graph(&mut self) {
        let mut by_source: FxHashMap<BlockId, Vec<EdgeIndex>> = FxHashMap::default();
        for e in &self.edges {
            if let Some(src) = e.source {
                by_source.entry(src.block).or_default().push(e.index);
            }
        }
        let mut links: Vec<(EdgeIndex, EdgeIndex)> = Vec::new();
        for e in &self.edges {
            if let Some(children) = by_source.get(&e.target.block) {
                for &c in children {
                    links.push((e.index, c));
                }
            }
        }
        for (p, c) in links {
            self.node_mut(p).children.insert(c);
            self.node_mut(c).parents.insert(p);
        }
    }

    /// Roots are edges with no parents. Exactly one is expected per
    /// function; more than one is reported and tolerated.
    fn find_roots(&mut self, func_name: &str) -> EdtResult<()> {
        for e in &self.edges {
            if e.parents.is_empty() {
                self.roots.insert(e.index);
            }
        }
        if self.roots.is_empty() && !self.edges.is_empty() {
            return Err(EdtError::NoRoots {
                function: func_name.to_string(),
            });
        }
        if self.roots.len() > 1 {
            tracing::warn!(function = func_name, roots = self.roots.len(), "multiple roots in CFG");
        }
        Ok(())
    }

    /// Depth-first walk marking non-back edges reachable from the roots.
    fn find_non_back_edges(&mut self) {
        let mut visited = IndexSet::new();
        let mut path = IndexSet::new();
        for root in self.roots.clone() {
            self.walk_non_back(root, &mut visited, &mut path);
        }
    }

    fn walk_non_back(&mut self, idx: EdgeIndex, visited: &mut IndexSet, path: &mut IndexSet) {
        let node = self.node(idx);
        // a self-loop is trivially a back edge
        if node.source.is_some() && node.source.map(|s| s.block) == Some(node.target.block) {
            return;
        }
        if !visited.insert(idx) {
            return;
        }
        path.insert(idx);

        let children: Vec<EdgeIndex> = self.node(idx).children.iter().copied().collect();
        // any child on the current path makes this edge close a cycle
        if children.iter().any(|c| path.contains(c)) {
            path.remove(&idx);
            return;
        }

        self.non_back.insert(idx);
        for c in children {
            self.walk_non_back(c, visited, path);
        }
        path.remove(&idx);
    }

    /// Top-down worklist building each edge's non-strict ancestor set,
    /// restricted to non-back edges.
    fn compute_ancestor_sets(&mut self) {
        let mut wl = Worklist::new(&self.edges, &self.non_back);
        for &root in &self.roots {
            wl.push(root);
        }

        while let Some(curr) = wl.pop() {
            let node = self.node(curr);
            let mut ancestors = IndexSet::new();
            ancestors.insert(curr);
            for &p in &node.parents {
                if let Some(pset) = self.ancestor_sets.get(&p) {
                    ancestors.extend(pset.iter().copied());
                }
            }
            let reduced: IndexSet = ancestors.intersection(&self.non_back).copied().collect();
            self.ancestor_sets.insert(curr, reduced);

            let children = self.node(curr).children.clone();
            wl.push_ready(&children);
        }
    }

    /// Assign each edge's immediate dominator: roots self-dominate, a single
    /// non-back parent dominates trivially, otherwise the pruned LCA of all
    /// parents' ancestor sets must leave exactly one candidate.
    fn compute_edge_dominance(&mut self, func_name: &str) -> EdtResult<()> {
        if self.edges.is_empty() {
            return Ok(());
        }

        let mut wl = Worklist::new(&self.edges, &self.non_back);
        for root in self.roots.clone() {
            self.node_mut(root).dom_index = root;
            let children = self.node(root).children.clone();
            wl.push_ready(&children);
        }

        while let Some(curr) = wl.pop() {
            let parents = self.node(curr).parents.clone();
            let children = self.node(curr).children.clone();

            let nbe_parents: Vec<EdgeIndex> =
                parents.intersection(&self.non_back).copied().collect();
            if nbe_parents.len() == 1 {
                let dom = nbe_parents[0];
                self.node_mut(curr).dom_index = dom;
                self.node_mut(dom).dom_children.insert(curr);
                wl.push_ready(&children);
            }

            // intersect the ancestor sets of all parents; what survives are
            // the common (strict) ancestors
            let mut ancestors = self
                .ancestor_sets
                .get(&curr)
                .cloned()
                .unwrap_or_default();
            for p in &parents {
                let pset = self.ancestor_sets.get(p).cloned().unwrap_or_default();
                ancestors = ancestors.intersection(&pset).copied().collect();
            }
            // store the reduced set; the edge stays in its own set for its
            // descendants' computations
            let mut stored = ancestors.clone();
            stored.insert(curr);
            self.ancestor_sets.insert(curr, stored);

            // if one candidate is an ancestor of another, it is not the
            // closest; prune it (the stored sets are left untouched)
            let mut pruned = ancestors.clone();
            for a1 in &ancestors {
                for a2 in &ancestors {
                    if a1 == a2 {
                        continue;
                    }
                    if let Some(a2set) = self.ancestor_sets.get(a2) {
                        if a2set.contains(a1) {
                            pruned.remove(a1);
                        }
                    }
                }
            }

            if nbe_parents.len() == 1 {
                // dominator already assigned above; the set reduction was
                // still required for descendants
                continue;
            }
            if pruned.is_empty() {
                return Err(EdtError::NoDominator {
                    function: func_name.to_string(),
                    edge: curr,
                });
            }
            if pruned.len() > 1 {
                return Err(EdtError::AmbiguousDominator {
                    function: func_name.to_string(),
                    edge: curr,
                    candidates: pruned.into_iter().collect(),
                });
            }

            let dom = *pruned.iter().next().unwrap();
            self.node_mut(curr).dom_index = dom;
            self.node_mut(dom).dom_children.insert(curr);
            wl.push_ready(&children);
        }
        Ok(())
    }
}

// =============================================================================
// Module-wide tree
// =============================================================================

/// Edge dominance for a whole module; per-function trees are merged into
/// one dense edge vector over contiguous index ranges.
pub struct EdgeDominatorTree {
    edges: Vec<EdgeNode>,
}

impl EdgeDominatorTree {
    pub fn new(module: &Module) -> Self {
        let mut edges: Vec<EdgeNode> = Vec::new();
        for (fid, func) in module.iter_funcs() {
            let first = edges.len() as EdgeIndex;
            match CfgEdgeDomTree::new(func, fid, first) {
                Ok(tree) => edges.extend(tree.into_edges()),
                Err(e) => {
                    tracing::error!(error = %e, "edge dominance construction failed; \
                                     falling back to self-dominating edges");
                    edges.extend(CfgEdgeDomTree::raw(func, fid, first).into_edges());
                }
            }
        }
        EdgeDominatorTree { edges }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, e: EdgeIndex) -> &EdgeNode {
        &self.edges[e as usize]
    }

    pub fn dominator_index(&self, e: EdgeIndex) -> EdgeIndex {
        self.edges[e as usize].dom_index
    }

    /// Dominator-link distance from `e` to its root (which is depth 0).
    pub fn depth(&self, e: EdgeIndex) -> u32 {
        let mut depth = 0;
        let mut old = e;
        let mut new = self.dominator_index(e);
        while old != new {
            depth += 1;
            old = new;
            new = self.dominator_index(old);
        }
        depth
    }

    /// Write the dominance artifact: one little-endian u32 immediate
    /// dominator index per edge, in edge order.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let mut f = File::create(path)?;
        for e in &self.edges {
            f.write_all(&e.dom_index.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn print_dominance<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Dominance Relationships ({} edges)", self.edges.len())?;
        for e in &self.edges {
            writeln!(w, "  {} idoms {}", e.dom_index, e.index)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
