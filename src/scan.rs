//! The dependency scanner: walks a target's input cone, stats files, loads
//! recorded deps and dyndep files, and decides which outputs are dirty.

use crate::build_log::{self, BuildLog};
use crate::canon::canon_path;
use crate::deps_log::DepsLog;
use crate::disk::{DiskInterface, MTime};
use crate::dyndep::{self, DyndepFile};
use crate::graph::{EdgeId, Graph, NodeId};
use crate::scanner::Scanner;
use crate::status::Status;
use crate::{depfile, explain};
use std::collections::HashMap;
use std::path::Path;

/// Edge traversal state during one scan, kept out of the graph so a fresh
/// scan needs no reset sweep.
#[derive(Clone, Copy, PartialEq)]
enum VisitMark {
    InStack,
    Done,
}

/// One scan pass over the graph.  Holds borrows of everything the
/// dirtiness rules consult; create one per recompute entry point.
pub struct DependencyScan<'a> {
    pub graph: &'a mut Graph,
    pub build_log: &'a BuildLog,
    pub deps_log: &'a DepsLog,
    pub disk: &'a dyn DiskInterface,
    pub status: &'a mut dyn Status,
    pub explain: bool,
    marks: HashMap<EdgeId, VisitMark>,
}

impl<'a> DependencyScan<'a> {
    pub fn new(
        graph: &'a mut Graph,
        build_log: &'a BuildLog,
        deps_log: &'a DepsLog,
        disk: &'a dyn DiskInterface,
        status: &'a mut dyn Status,
        explain: bool,
    ) -> Self {
        DependencyScan {
            graph,
            build_log,
            deps_log,
            disk,
            status,
            explain,
            marks: HashMap::new(),
        }
    }

    /// Compute `dirty` for `node` and everything in its transitive input
    /// cone.  Validation targets encountered along the way are scanned too
    /// and reported so the caller can schedule them.
    pub fn recompute_dirty(
        &mut self,
        node: NodeId,
        validation_nodes: &mut Vec<NodeId>,
    ) -> anyhow::Result<()> {
        let mut pending = vec![node];
        let mut seen_validations = Vec::new();
        while let Some(node) = pending.pop() {
            let mut stack = Vec::new();
            let mut new_validations = Vec::new();
            self.recompute_node_dirty(node, &mut stack, &mut new_validations)?;
            for v in new_validations {
                if !seen_validations.contains(&v) {
                    seen_validations.push(v);
                    pending.push(v);
                    validation_nodes.push(v);
                }
            }
        }
        Ok(())
    }

    fn recompute_node_dirty(
        &mut self,
        node: NodeId,
        stack: &mut Vec<NodeId>,
        validation_nodes: &mut Vec<NodeId>,
    ) -> anyhow::Result<()> {
        let edge_id = match self.graph.node(node).in_edge {
            None => {
                // A leaf node is dirty iff it is missing.
                if self.graph.node(node).status_known() {
                    return Ok(());
                }
                self.stat_node(node)?;
                let exists = self.graph.node(node).exists();
                if !exists {
                    explain!(self, "{} has no in-edge and is missing", self.graph.node(node).path);
                }
                self.graph.node_mut(node).dirty = !exists;
                return Ok(());
            }
            Some(id) => id,
        };

        match self.marks.get(&edge_id) {
            Some(VisitMark::Done) => return Ok(()),
            Some(VisitMark::InStack) => return Err(self.cycle_error(node, stack)),
            None => {}
        }
        self.marks.insert(edge_id, VisitMark::InStack);
        stack.push(node);

        let mut dirty = false;
        self.graph.edge_mut(edge_id).outputs_ready = true;

        if !self.graph.edge(edge_id).deps_loaded {
            // First encounter with this edge.  A pending dyndep file is
            // visited (and loaded, if its own build steps are done) before
            // anything else so the extra inputs take part below.
            if let Some(dyndep_node) = self.graph.edge(edge_id).dyndep {
                if self.graph.node(dyndep_node).dyndep_pending {
                    self.recompute_node_dirty(dyndep_node, stack, validation_nodes)?;
                    let dyndep_ready = match self.graph.node(dyndep_node).in_edge {
                        None => true,
                        Some(producer) => self.graph.edge(producer).outputs_ready,
                    };
                    if dyndep_ready {
                        self.load_dyndeps(dyndep_node)?;
                    }
                }
            }
        }

        // Load output mtimes so we can compare them to the inputs below.
        for i in 0..self.graph.edge(edge_id).outs().len() {
            let out = self.graph.edge(edge_id).outs()[i];
            self.stat_if_necessary(out)?;
        }

        if !self.graph.edge(edge_id).deps_loaded {
            self.graph.edge_mut(edge_id).deps_loaded = true;
            if !self.load_deps(edge_id)? {
                // No usable recorded deps: rebuild to rediscover them.
                dirty = true;
            }
        }

        // Visit all inputs; we're dirty if any input is dirty.
        let mut most_recent_input: Option<NodeId> = None;
        for i in 0..self.graph.edge(edge_id).all_ins().len() {
            let input = self.graph.edge(edge_id).all_ins()[i];
            self.recompute_node_dirty(input, stack, validation_nodes)?;

            // If an input is not ready, neither are our outputs.
            if let Some(in_edge) = self.graph.node(input).in_edge {
                if !self.graph.edge(in_edge).outputs_ready {
                    self.graph.edge_mut(edge_id).outputs_ready = false;
                }
            }

            if !self.graph.edge(edge_id).ins.is_order_only(i) {
                if self.graph.node(input).dirty {
                    explain!(self, "{} is dirty", self.graph.node(input).path);
                    dirty = true;
                } else {
                    let newer = match most_recent_input {
                        None => true,
                        Some(prev) => {
                            self.graph.node(input).mtime() > self.graph.node(prev).mtime()
                        }
                    };
                    if newer {
                        most_recent_input = Some(input);
                    }
                }
            }
        }

        // We may also be dirty due to output state: missing outputs, out of
        // date outputs, a changed command, etc.
        if !dirty {
            dirty = self.outputs_dirty(edge_id, most_recent_input)?;
        }

        if dirty {
            for i in 0..self.graph.edge(edge_id).outs().len() {
                let out = self.graph.edge(edge_id).outs()[i];
                self.graph.node_mut(out).dirty = true;
            }
        }

        // A dirty edge's outputs are not ready, with one exception: a phony
        // edge with no inputs has nothing to run, so it is ready as-is.
        {
            let edge = self.graph.edge(edge_id);
            if dirty && !(edge.phony && edge.all_ins().is_empty()) {
                self.graph.edge_mut(edge_id).outputs_ready = false;
            }
        }

        self.marks.insert(edge_id, VisitMark::Done);
        debug_assert_eq!(stack.last(), Some(&node));
        stack.pop();

        validation_nodes.extend(self.graph.edge(edge_id).validations.iter().copied());
        Ok(())
    }

    /// Whether any of the edge's outputs is out of date with respect to
    /// `most_recent_input` and the build log.  Also used by the plan when
    /// restat cleaning reconsiders downstream edges.
    pub fn outputs_dirty(
        &mut self,
        edge_id: EdgeId,
        most_recent_input: Option<NodeId>,
    ) -> anyhow::Result<bool> {
        let command = self.graph.edge(edge_id).command_for_hash();
        for i in 0..self.graph.edge(edge_id).outs().len() {
            let out = self.graph.edge(edge_id).outs()[i];
            if self.output_dirty(edge_id, out, most_recent_input, &command)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn output_dirty(
        &mut self,
        edge_id: EdgeId,
        out: NodeId,
        most_recent_input: Option<NodeId>,
        command: &str,
    ) -> anyhow::Result<bool> {
        if self.graph.edge(edge_id).phony {
            // Phony edges don't write any output.  They are dirty only when
            // they have no inputs and the output doesn't exist on disk.
            if self.graph.edge(edge_id).all_ins().is_empty() && !self.graph.node(out).exists() {
                explain!(
                    self,
                    "output {} of phony edge with no inputs doesn't exist",
                    self.graph.node(out).path
                );
                return Ok(true);
            }
            // Fake the output mtime from the newest input, so that edges
            // depending on this alias see a meaningful timestamp.
            if let Some(input) = most_recent_input {
                let input_mtime = self.graph.node(input).mtime();
                if self.graph.node(out).mtime() < input_mtime {
                    self.graph.node_mut(out).mtime = Some(input_mtime);
                }
            }
            return Ok(false);
        }

        if !self.graph.node(out).exists() {
            explain!(self, "output {} doesn't exist", self.graph.node(out).path);
            return Ok(true);
        }

        let out_path = &self.graph.node(out).path;
        let mut log_entry = None;
        let mut output_mtime = self.graph.node(out).mtime();
        let mut used_restat = false;

        // A restat rule may have cleaned this output in a previous run, in
        // which case the build log remembers the input mtime the output was
        // current against; compare against that instead of the disk mtime.
        if self.graph.edge(edge_id).restat {
            if let Some(entry) = self.build_log.lookup(out_path) {
                output_mtime = MTime::from_raw(entry.mtime);
                used_restat = true;
                log_entry = Some(entry);
            }
        }

        if let Some(input) = most_recent_input {
            let input_mtime = self.graph.node(input).mtime();
            if output_mtime < input_mtime {
                explain!(
                    self,
                    "{}output {} older than most recent input {} ({} vs {})",
                    if used_restat { "restat of " } else { "" },
                    out_path,
                    self.graph.node(input).path,
                    output_mtime.raw(),
                    input_mtime.raw()
                );
                return Ok(true);
            }
        }

        match log_entry.or_else(|| self.build_log.lookup(out_path)) {
            Some(entry) => {
                if !self.graph.edge(edge_id).generator
                    && build_log::hash_command(command) != entry.command_hash
                {
                    // The command changing makes us dirty, unless the rule
                    // is a generator rule.
                    explain!(self, "command line changed for {}", out_path);
                    return Ok(true);
                }
                if let Some(input) = most_recent_input {
                    let input_mtime = self.graph.node(input).mtime();
                    if MTime::from_raw(entry.mtime) < input_mtime {
                        // The recorded mtime can lag the on-disk mtime when
                        // a previous run wrote the output without bumping
                        // its timestamp.
                        explain!(
                            self,
                            "recorded mtime of {} older than most recent input {} ({} vs {})",
                            out_path,
                            self.graph.node(input).path,
                            entry.mtime,
                            input_mtime.raw()
                        );
                        return Ok(true);
                    }
                }
            }
            None => {
                explain!(self, "command line not found in log for {}", out_path);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Splice recorded deps onto the edge before dirtiness is judged.
    /// Ok(false) means nothing usable was recorded and the edge must run.
    fn load_deps(&mut self, edge_id: EdgeId) -> anyhow::Result<bool> {
        use crate::graph::DepsStyle;
        if self.graph.edge(edge_id).deps != DepsStyle::None {
            return self.load_deps_from_log(edge_id);
        }
        if let Some(depfile) = self.graph.edge(edge_id).depfile.clone() {
            return self.load_depfile(edge_id, &depfile);
        }
        Ok(true)
    }

    fn load_deps_from_log(&mut self, edge_id: EdgeId) -> anyhow::Result<bool> {
        let output = self.graph.edge(edge_id).outs()[0];
        let deps = match self.deps_log.get_deps(output) {
            Some(deps) => deps,
            None => {
                explain!(self, "deps for '{}' are missing", self.graph.node(output).path);
                return Ok(false);
            }
        };

        // The record is only trustworthy while the output on disk is the
        // same file the deps were observed for; any mtime difference means
        // the output changed behind our back (e.g. got rolled back).
        let disk_mtime = self.graph.node(output).mtime();
        if disk_mtime.raw() != deps.mtime {
            explain!(
                self,
                "stored deps info out of date for '{}' ({} vs {})",
                self.graph.node(output).path,
                deps.mtime,
                disk_mtime.raw()
            );
            return Ok(false);
        }

        for &node in &deps.nodes {
            self.graph.add_discovered_in(edge_id, node);
        }
        Ok(true)
    }

    fn load_depfile(&mut self, edge_id: EdgeId, depfile_path: &str) -> anyhow::Result<bool> {
        let mut bytes = match self.disk.read_file(depfile_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                explain!(self, "depfile '{}' is missing", depfile_path);
                return Ok(false);
            }
            Err(err) => anyhow::bail!("loading '{}': {}", depfile_path, err),
        };
        bytes.push(0);
        let mut scanner = Scanner::new(&bytes);
        let parsed = depfile::parse(&mut scanner)
            .map_err(|err| anyhow::anyhow!(scanner.format_parse_error(Path::new(depfile_path), err)))?;

        let primary_out = self.graph.edge(edge_id).outs()[0];
        let primary_path = self.graph.node(primary_out).path.clone();
        let mut found = false;
        let mut discovered = Vec::new();
        for (target, deps) in parsed.iter() {
            if canon_path(*target)? != primary_path {
                continue;
            }
            found = true;
            for dep in deps {
                discovered.push(canon_path(*dep)?);
            }
        }
        if !found {
            anyhow::bail!(
                "expected depfile '{}' to mention '{}'",
                depfile_path,
                primary_path
            );
        }
        for dep in discovered {
            let node = self.graph.node_id(&dep, 0);
            self.stat_if_necessary(node)?;
            self.graph.add_discovered_in(edge_id, node);
        }
        Ok(true)
    }

    /// Load the dyndep file at `node` and apply it to the graph.
    pub fn load_dyndeps(&mut self, node: NodeId) -> anyhow::Result<DyndepFile> {
        self.status.build_load_dyndeps();
        dyndep::load(self.graph, self.disk, node)
    }

    /// Forget the visit state for an edge so a later recompute_dirty call
    /// in this scan walks it again; used when dyndep loading changes what
    /// the edge depends on.
    pub(crate) fn unmark_edge(&mut self, edge: EdgeId) {
        self.marks.remove(&edge);
    }

    pub fn stat_if_necessary(&mut self, node: NodeId) -> anyhow::Result<()> {
        if self.graph.node(node).status_known() {
            return Ok(());
        }
        self.stat_node(node)
    }

    /// stat() a node.  An error (not plain absence) is reported but treated
    /// like a missing file, so a build can proceed past unreadable corners
    /// of the tree and fail only if something actually depends on them.
    fn stat_node(&mut self, node: NodeId) -> anyhow::Result<()> {
        let mtime = match self.disk.stat(&self.graph.node(node).path) {
            Ok(mtime) => mtime,
            Err(err) => {
                self.status
                    .warning(&format!("stat {}: {}", self.graph.node(node).path, err));
                MTime::Missing
            }
        };
        self.graph.node_mut(node).mtime = Some(mtime);
        Ok(())
    }

    fn cycle_error(&self, node: NodeId, stack: &[NodeId]) -> anyhow::Error {
        let start = stack.iter().position(|&n| n == node).unwrap_or(0);
        let mut msg = String::from("dependency cycle: ");
        for &n in &stack[start..] {
            msg.push_str(&self.graph.node(n).path);
            msg.push_str(" -> ");
        }
        msg.push_str(&self.graph.node(node).path);
        anyhow::anyhow!(msg)
    }
}

/// Trace sink for `-d explain`: one line per dirtiness decision.
#[macro_export]
macro_rules! explain {
    ($scan:expr, $($arg:tt)*) => {
        if $scan.explain {
            eprintln!("ninja explain: {}", format!($($arg)*));
        }
    };
}
