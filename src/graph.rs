//! The build graph: paths interned as nodes, and edges (build statements)
//! that produce nodes from other nodes.
//!
//! Nodes and edges live in arenas owned by the Graph and refer to one
//! another through stable integer ids, which keeps the cross-links (a node
//! knows its producing edge and its consuming edges; an edge knows its
//! inputs and outputs) free of lifetime knots and cheap to copy around.

use crate::densemap::{declare_index, DenseMap};
use crate::disk::MTime;
use crate::eval::EvalString;
use crate::smallmap::SmallMap;
use std::collections::HashMap;

declare_index!(NodeId);
declare_index!(EdgeId);
declare_index!(PoolId);

/// The unnamed pool with unlimited depth that edges use by default.
pub const DEFAULT_POOL: PoolId = PoolId(0);
/// The depth-1 "console" pool; edges in it own the terminal while running.
pub const CONSOLE_POOL: PoolId = PoolId(1);

/// A reusable command template, as bound by a `rule` declaration.
/// Bindings stay unevaluated until an edge instantiates them.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub vars: SmallMap<String, EvalString<String>>,
}

/// How discovered dependencies are extracted after a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsStyle {
    None,
    /// Read a Makefile-syntax depfile written by the compiler.
    Gcc,
    /// Parse `/showIncludes` lines out of the command's output.
    Msvc,
}

/// A response file to write before running a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RspFile {
    pub path: String,
    pub content: String,
}

/// One path in the build graph.
#[derive(Debug)]
pub struct Node {
    pub path: String,
    /// Which separators were originally backslashes; see canon.
    pub slash_bits: u64,
    /// The edge producing this node, if any.  At most one.
    pub in_edge: Option<EdgeId>,
    /// Edges consuming this node as an input.
    pub out_edges: Vec<EdgeId>,
    /// Edges naming this node as a validation.
    pub validation_out_edges: Vec<EdgeId>,

    // Transient per-build state, cleared by Graph::reset.
    /// stat() result; None until statted this build.
    pub mtime: Option<MTime>,
    pub dirty: bool,
    /// Set while this node is named by some edge's dyndep binding and the
    /// dyndep file has not been loaded yet.
    pub dyndep_pending: bool,
}

impl Node {
    pub fn status_known(&self) -> bool {
        self.mtime.is_some()
    }

    pub fn exists(&self) -> bool {
        matches!(self.mtime, Some(MTime::Stamp(_)))
    }

    /// The node's mtime as last statted; Missing when never statted.
    pub fn mtime(&self) -> MTime {
        self.mtime.unwrap_or(MTime::Missing)
    }
}

/// The inputs of an edge, ordered [explicit | implicit | order-only].
/// Deps discovered from the deps log, depfiles, or dyndep files splice into
/// the end of the implicit region.
#[derive(Debug, Default)]
pub struct EdgeIns {
    pub ids: Vec<NodeId>,
    pub explicit: usize,
    pub implicit: usize,
    pub order_only: usize,
}

impl EdgeIns {
    pub fn add_discovered(&mut self, id: NodeId) {
        self.ids.insert(self.explicit + self.implicit, id);
        self.implicit += 1;
    }

    pub fn is_order_only(&self, index: usize) -> bool {
        index >= self.explicit + self.implicit
    }
}

/// The outputs of an edge, ordered [explicit | implicit].
#[derive(Debug, Default)]
pub struct EdgeOuts {
    pub ids: Vec<NodeId>,
    pub explicit: usize,
}

/// One build statement: a command producing outputs from inputs.
#[derive(Debug)]
pub struct Edge {
    pub rule_name: String,
    /// None for phony edges.
    pub cmdline: Option<String>,
    pub desc: Option<String>,
    pub depfile: Option<String>,
    pub deps: DepsStyle,
    pub msvc_deps_prefix: Option<String>,
    pub rspfile: Option<RspFile>,
    pub pool: PoolId,
    /// Admission weight against the pool depth.
    pub weight: usize,
    pub restat: bool,
    pub generator: bool,
    pub phony: bool,
    pub dyndep: Option<NodeId>,
    pub ins: EdgeIns,
    pub validations: Vec<NodeId>,
    pub outs: EdgeOuts,

    // Transient per-build state, cleared by Graph::reset.
    pub outputs_ready: bool,
    pub deps_loaded: bool,
}

impl Edge {
    /// Inputs whose mtimes contribute to dirtiness: explicit + implicit
    /// (including discovered), but not order-only.
    pub fn dirtying_ins(&self) -> &[NodeId] {
        &self.ins.ids[..self.ins.explicit + self.ins.implicit]
    }

    pub fn order_only_ins(&self) -> &[NodeId] {
        &self.ins.ids[self.ins.explicit + self.ins.implicit..]
    }

    pub fn all_ins(&self) -> &[NodeId] {
        &self.ins.ids
    }

    pub fn outs(&self) -> &[NodeId] {
        &self.outs.ids
    }

    pub fn use_console(&self) -> bool {
        self.pool == CONSOLE_POOL
    }

    /// The string the build log hashes: the command, plus the response file
    /// content when one is declared (a changed rspfile must re-run the
    /// command even if the command line itself is unchanged).
    pub fn command_for_hash(&self) -> String {
        let cmd = self.cmdline.as_deref().unwrap_or("");
        match &self.rspfile {
            None => cmd.to_owned(),
            Some(rsp) => format!("{};rspfile={}", cmd, rsp.content),
        }
    }
}

/// A named admission-control bucket; scheduling state lives in the plan.
#[derive(Debug)]
pub struct Pool {
    pub name: String,
    /// 0 means unlimited.
    pub depth: usize,
}

#[derive(Default, Debug)]
pub struct Graph {
    nodes: DenseMap<NodeId, Node>,
    edges: DenseMap<EdgeId, Edge>,
    by_path: HashMap<String, NodeId>,
    pools: DenseMap<PoolId, Pool>,
    pool_by_name: HashMap<String, PoolId>,
    pub defaults: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph::default();
        graph.add_pool("".to_owned(), 0);
        graph.add_pool("console".to_owned(), 1);
        graph
    }

    /// Intern a canonicalized path, creating the node on first reference.
    pub fn node_id(&mut self, path: &str, slash_bits: u64) -> NodeId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        let id = self.nodes.push(Node {
            path: path.to_owned(),
            slash_bits,
            in_edge: None,
            out_edges: Vec::new(),
            validation_out_edges: Vec::new(),
            mtime: None,
            dirty: false,
            dyndep_pending: false,
        });
        self.by_path.insert(path.to_owned(), id);
        id
    }

    pub fn lookup_node(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(id)
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges.get_mut(id)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        self.edges.ids()
    }

    /// Add an edge whose ins/outs/validations are already interned.  The
    /// caller has checked the one-producer invariant for every output.
    pub fn add_edge(&mut self, edge: Edge) -> EdgeId {
        let id = self.edges.next_id();
        for &input in &edge.ins.ids {
            self.nodes.get_mut(input).out_edges.push(id);
        }
        for &out in &edge.outs.ids {
            let node = self.nodes.get_mut(out);
            assert!(node.in_edge.is_none(), "duplicate edge for {}", node.path);
            node.in_edge = Some(id);
        }
        for &validation in &edge.validations {
            self.nodes.get_mut(validation).validation_out_edges.push(id);
        }
        self.edges.push(edge)
    }

    /// Splice a discovered input onto an edge's implicit region, keeping the
    /// node's out_edges in sync.
    pub fn add_discovered_in(&mut self, edge: EdgeId, input: NodeId) {
        self.edges.get_mut(edge).ins.add_discovered(input);
        let out_edges = &mut self.nodes.get_mut(input).out_edges;
        if !out_edges.contains(&edge) {
            out_edges.push(edge);
        }
    }

    pub fn add_pool(&mut self, name: String, depth: usize) -> Option<PoolId> {
        if self.pool_by_name.contains_key(&name) {
            return None;
        }
        let id = self.pools.push(Pool {
            name: name.clone(),
            depth,
        });
        self.pool_by_name.insert(name, id);
        Some(id)
    }

    pub fn lookup_pool(&self, name: &str) -> Option<PoolId> {
        self.pool_by_name.get(name).copied()
    }

    pub fn pool(&self, id: PoolId) -> &Pool {
        self.pools.get(id)
    }

    pub fn pools(&self) -> impl Iterator<Item = (PoolId, &Pool)> {
        self.pools.iter()
    }

    /// All outputs of some edge that are not inputs to any other edge.
    pub fn root_nodes(&self) -> Vec<NodeId> {
        let mut roots = Vec::new();
        for edge in self.edges.values() {
            for &out in &edge.outs.ids {
                if self.nodes.get(out).out_edges.is_empty() {
                    roots.push(out);
                }
            }
        }
        roots
    }

    /// The declared default targets, or the graph roots if none declared.
    pub fn default_nodes(&self) -> anyhow::Result<Vec<NodeId>> {
        if !self.defaults.is_empty() {
            return Ok(self.defaults.clone());
        }
        let roots = self.root_nodes();
        if self.edges.len() > 0 && roots.is_empty() {
            anyhow::bail!("could not determine root nodes of build graph");
        }
        Ok(roots)
    }

    /// The interned path closest to `path` by edit distance, for "did you
    /// mean" suggestions on unknown targets.
    pub fn spellcheck_path(&self, path: &str) -> Option<&str> {
        crate::spellcheck::closest_match(path, self.by_path.keys().map(|k| k.as_str()))
    }

    /// Clear transient state so a fresh scan can run over the same graph.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.mtime = None;
            node.dirty = false;
        }
        for edge in self.edges.values_mut() {
            edge.outputs_ready = false;
            edge.deps_loaded = false;
        }
    }
}
