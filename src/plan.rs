//! The build plan: tracks which edges still need to run and which are
//! ready to start, gating readiness through pool admission.

use crate::densemap::DenseMap;
use crate::graph::{EdgeId, Graph, NodeId, PoolId};
use crate::scan::DependencyScan;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

/// How much of an edge the plan wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
    /// Not wanted itself, but tracked because a dependent is.
    Nothing,
    /// Wanted, waiting on inputs.
    ToStart,
    /// Scheduled: queued in a pool or the ready set, or running.
    ToFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeResult {
    Failed,
    Succeeded,
    /// Succeeded, and restat found some outputs unchanged; the builder has
    /// already propagated cleanliness through clean_node.
    SucceededRestat,
}

/// Scheduling state for one pool; depths come from the graph.
struct PoolState {
    depth: usize,
    current_use: usize,
    /// Edges awaiting admission: heaviest first, then insertion order.
    delayed: BTreeSet<(Reverse<usize>, EdgeId)>,
}

impl PoolState {
    fn should_delay(&self) -> bool {
        // Depth 0 means unlimited; skip the queue and its accounting.
        self.depth != 0
    }

    fn edge_scheduled(&mut self, weight: usize) {
        if self.depth != 0 {
            self.current_use += weight;
        }
    }

    fn edge_finished(&mut self, weight: usize) {
        if self.depth != 0 {
            self.current_use = self.current_use.saturating_sub(weight);
        }
    }

    fn delay_edge(&mut self, weight: usize, id: EdgeId) {
        self.delayed.insert((Reverse(weight), id));
    }

    /// Admit delayed edges in queue order while capacity remains.
    fn retrieve_ready_edges(&mut self, ready: &mut BTreeSet<EdgeId>) {
        while let Some(&(Reverse(weight), id)) = self.delayed.iter().next() {
            if self.current_use + weight > self.depth {
                break;
            }
            self.delayed.remove(&(Reverse(weight), id));
            self.current_use += weight;
            ready.insert(id);
        }
    }
}

pub struct Plan {
    want: HashMap<EdgeId, Want>,
    /// Pool-admitted edges waiting for the runner, in id order.
    ready: BTreeSet<EdgeId>,
    pools: DenseMap<PoolId, PoolState>,
    /// Total remaining edges in the plan.
    wanted_edges: usize,
    /// Total non-phony edges the plan ever wanted; the status total.
    command_edges: usize,
}

impl Plan {
    pub fn new(graph: &Graph) -> Self {
        let mut pools = DenseMap::new();
        for (_id, pool) in graph.pools() {
            pools.push(PoolState {
                depth: pool.depth,
                current_use: 0,
                delayed: BTreeSet::new(),
            });
        }
        Plan {
            want: HashMap::new(),
            ready: BTreeSet::new(),
            pools,
            wanted_edges: 0,
            command_edges: 0,
        }
    }

    /// Enqueue everything dirty in `node`'s input cone.  Ok(false) means the
    /// target is already up to date; an error means it cannot be built.
    pub fn add_target(&mut self, graph: &Graph, node: NodeId) -> anyhow::Result<bool> {
        self.add_sub_target(graph, node, None, None)
    }

    fn add_sub_target(
        &mut self,
        graph: &Graph,
        node: NodeId,
        dependent: Option<NodeId>,
        mut dyndep_walk: Option<&mut HashSet<EdgeId>>,
    ) -> anyhow::Result<bool> {
        let edge_id = match graph.node(node).in_edge {
            None => {
                // A dirty leaf is a missing file nothing knows how to make.
                if graph.node(node).dirty {
                    let path = &graph.node(node).path;
                    match dependent {
                        Some(dep) => anyhow::bail!(
                            "'{}', needed by '{}', missing and no known rule to make it",
                            path,
                            graph.node(dep).path
                        ),
                        None => {
                            anyhow::bail!("'{}' missing and no known rule to make it", path)
                        }
                    }
                }
                return Ok(false);
            }
            Some(id) => id,
        };

        if graph.edge(edge_id).outputs_ready {
            return Ok(false);
        }

        let new_entry = !self.want.contains_key(&edge_id);
        if new_entry {
            self.want.insert(edge_id, Want::Nothing);
        }
        if let Some(walk) = dyndep_walk.as_deref_mut() {
            walk.insert(edge_id);
        }

        if graph.node(node).dirty && self.want[&edge_id] == Want::Nothing {
            *self.want.get_mut(&edge_id).unwrap() = Want::ToStart;
            self.edge_wanted(graph, edge_id);
            // During a dyndep refresh, scheduling is deferred to the caller.
            if dyndep_walk.is_none() && self.all_inputs_ready(graph, edge_id) {
                self.schedule_work(graph, edge_id);
            }
        }

        if !new_entry {
            return Ok(true);
        }

        for &input in graph.edge(edge_id).all_ins() {
            self.add_sub_target(graph, input, Some(node), dyndep_walk.as_deref_mut())?;
        }
        Ok(true)
    }

    fn edge_wanted(&mut self, graph: &Graph, edge_id: EdgeId) {
        self.wanted_edges += 1;
        if !graph.edge(edge_id).phony {
            self.command_edges += 1;
        }
    }

    fn all_inputs_ready(&self, graph: &Graph, edge_id: EdgeId) -> bool {
        graph
            .edge(edge_id)
            .all_ins()
            .iter()
            .all(|&input| match graph.node(input).in_edge {
                Some(in_edge) => graph.edge(in_edge).outputs_ready,
                None => true,
            })
    }

    /// Move a wanted edge whose inputs are all ready into the pool queue,
    /// and from there into the ready set once admitted.
    fn schedule_work(&mut self, graph: &Graph, edge_id: EdgeId) {
        if self.want[&edge_id] == Want::ToFinish {
            // Already scheduled.  Reachable when an edge and one of its
            // dependencies share an order-only input.
            return;
        }
        *self.want.get_mut(&edge_id).unwrap() = Want::ToFinish;

        let edge = graph.edge(edge_id);
        let pool = self.pools.get_mut(edge.pool);
        if pool.should_delay() {
            pool.delay_edge(edge.weight, edge_id);
            pool.retrieve_ready_edges(&mut self.ready);
        } else {
            pool.edge_scheduled(edge.weight);
            self.ready.insert(edge_id);
        }
    }

    /// The next pool-admitted edge, if any.
    pub fn find_ready_edge(&mut self) -> Option<EdgeId> {
        let id = *self.ready.iter().next()?;
        self.ready.remove(&id);
        Some(id)
    }

    pub fn more_to_do(&self) -> bool {
        self.wanted_edges > 0 && self.command_edges > 0
    }

    pub fn command_edge_count(&self) -> usize {
        self.command_edges
    }

    /// An edge completed (or was found not to need running); release its
    /// pool slot and fan readiness out to its dependents.
    pub fn edge_finished(&mut self, graph: &mut Graph, edge_id: EdgeId, result: EdgeResult) {
        let directly_wanted = matches!(self.want.get(&edge_id), Some(w) if *w != Want::Nothing);

        // See if this job frees up any delayed jobs.
        let (pool_id, weight) = {
            let edge = graph.edge(edge_id);
            (edge.pool, edge.weight)
        };
        if directly_wanted {
            self.pools.get_mut(pool_id).edge_finished(weight);
        }
        self.pools
            .get_mut(pool_id)
            .retrieve_ready_edges(&mut self.ready);

        // The rest only applies to successful completions: a failed edge
        // stays wanted, and the builder decides when to give up.
        if result == EdgeResult::Failed {
            return;
        }

        if directly_wanted {
            self.wanted_edges -= 1;
        }
        self.want.remove(&edge_id);
        graph.edge_mut(edge_id).outputs_ready = true;

        for i in 0..graph.edge(edge_id).outs().len() {
            let out = graph.edge(edge_id).outs()[i];
            self.node_finished(graph, out);
        }
    }

    fn node_finished(&mut self, graph: &mut Graph, node: NodeId) {
        for out_edge in graph.node(node).out_edges.clone() {
            if self.want.contains_key(&out_edge) {
                self.edge_maybe_ready(graph, out_edge);
            }
        }
    }

    fn edge_maybe_ready(&mut self, graph: &mut Graph, edge_id: EdgeId) {
        if !self.all_inputs_ready(graph, edge_id) {
            return;
        }
        if self.want[&edge_id] != Want::Nothing {
            self.schedule_work(graph, edge_id);
        } else {
            // We don't need to run this edge, but a dependent may be waiting
            // on its outputs being accounted for.
            self.edge_finished(graph, edge_id, EdgeResult::Succeeded);
        }
    }

    /// A restat command left `node` unchanged.  Propagate the cleanliness
    /// forward: dependent edges whose inputs are now all clean re-check
    /// their output state and may drop out of the plan without running.
    pub fn clean_node(&mut self, scan: &mut DependencyScan, node: NodeId) -> anyhow::Result<()> {
        scan.graph.node_mut(node).dirty = false;

        for out_edge in scan.graph.node(node).out_edges.clone() {
            let Some(&want) = self.want.get(&out_edge) else {
                continue;
            };
            if want != Want::ToStart {
                continue;
            }

            if scan
                .graph
                .edge(out_edge)
                .dirtying_ins()
                .iter()
                .any(|&input| scan.graph.node(input).dirty)
            {
                continue;
            }

            let most_recent_input = scan
                .graph
                .edge(out_edge)
                .dirtying_ins()
                .iter()
                .copied()
                .max_by_key(|&input| scan.graph.node(input).mtime());
            if scan.outputs_dirty(out_edge, most_recent_input)? {
                continue;
            }

            for i in 0..scan.graph.edge(out_edge).outs().len() {
                let out = scan.graph.edge(out_edge).outs()[i];
                self.clean_node(scan, out)?;
            }

            *self.want.get_mut(&out_edge).unwrap() = Want::Nothing;
            self.wanted_edges -= 1;
            if !scan.graph.edge(out_edge).phony {
                self.command_edges -= 1;
            }
        }
        Ok(())
    }

    /// The builder popped this edge but cannot run it yet (its dyndep file
    /// needed loading first).  Return it to the wanted state and release the
    /// pool slot it was holding; the dyndep refresh will reschedule it.
    pub fn edge_requeued(&mut self, graph: &Graph, edge_id: EdgeId) {
        if let Some(want) = self.want.get_mut(&edge_id) {
            if *want == Want::ToFinish {
                *want = Want::ToStart;
                let edge = graph.edge(edge_id);
                self.pools.get_mut(edge.pool).edge_finished(edge.weight);
                self.pools
                    .get_mut(edge.pool)
                    .retrieve_ready_edges(&mut self.ready);
            }
        }
    }

    /// A dyndep file loaded mid-build added inputs and outputs to edges
    /// already in the plan; rework the want set to match.
    pub fn dyndeps_loaded(
        &mut self,
        scan: &mut DependencyScan,
        node: NodeId,
        file: &crate::dyndep::DyndepFile,
    ) -> anyhow::Result<()> {
        self.refresh_dyndep_dependents(scan, node)?;

        let mut dyndep_walk: HashSet<EdgeId> = HashSet::new();
        for (edge_id, entry) in file {
            if scan.graph.edge(*edge_id).outputs_ready {
                continue;
            }
            if !self.want.contains_key(edge_id) {
                continue;
            }
            dyndep_walk.insert(*edge_id);
            let dependent_out = scan.graph.edge(*edge_id).outs()[0];
            for &input in &entry.implicit_ins {
                self.add_sub_target(
                    scan.graph,
                    input,
                    Some(dependent_out),
                    Some(&mut dyndep_walk),
                )?;
            }
        }

        // See if any encountered edges are now ready.
        let mut walked: Vec<EdgeId> = dyndep_walk.into_iter().collect();
        walked.sort();
        for edge_id in walked {
            if self.want.contains_key(&edge_id) {
                self.edge_maybe_ready(scan.graph, edge_id);
            }
        }
        Ok(())
    }

    /// Re-scan everything downstream of `node` with fresh visit marks, and
    /// pull edges that became dirty into the plan.
    fn refresh_dyndep_dependents(
        &mut self,
        scan: &mut DependencyScan,
        node: NodeId,
    ) -> anyhow::Result<()> {
        let mut dependents = Vec::new();
        let mut seen = HashSet::new();
        collect_dependents(scan.graph, node, &mut seen, &mut dependents);
        for &n in &dependents {
            if let Some(edge) = scan.graph.node(n).in_edge {
                scan.unmark_edge(edge);
            }
        }
        for &n in &dependents {
            let mut validations = Vec::new();
            scan.recompute_dirty(n, &mut validations)?;
            if !scan.graph.node(n).dirty {
                continue;
            }
            let Some(edge_id) = scan.graph.node(n).in_edge else {
                continue;
            };
            if self.want.get(&edge_id) == Some(&Want::Nothing) {
                *self.want.get_mut(&edge_id).unwrap() = Want::ToStart;
                self.edge_wanted(scan.graph, edge_id);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn wants_edge(&self, edge_id: EdgeId) -> bool {
        matches!(self.want.get(&edge_id), Some(w) if *w != Want::Nothing)
    }
}

fn collect_dependents(
    graph: &Graph,
    node: NodeId,
    seen: &mut HashSet<NodeId>,
    out: &mut Vec<NodeId>,
) {
    for &edge in &graph.node(node).out_edges {
        for &out_node in graph.edge(edge).outs() {
            if seen.insert(out_node) {
                out.push(out_node);
                collect_dependents(graph, out_node, seen, out);
            }
        }
    }
}
