//! The builder runloop: feeds ready edges to the command runner, harvests
//! results, parses discovered dependencies, and keeps the on-disk logs
//! current.

use crate::build_log::{self, BuildLog};
use crate::canon::{canon_path, canonicalize_path};
use crate::clparser;
use crate::deps_log::DepsLog;
use crate::disk::{DiskInterface, MTime};
use crate::graph::{DepsStyle, EdgeId, Graph, NodeId};
use crate::plan::{EdgeResult, Plan};
use crate::process::Termination;
use crate::scan::DependencyScan;
use crate::signal;
use crate::status::{Status, Verbosity};
use crate::task::{CommandRunner, FinishedCommand, StartedCommand};
use std::collections::HashMap;
use std::time::Instant;

pub struct BuildConfig {
    pub parallelism: usize,
    /// Stop launching new work after this many failures; 0 means never.
    pub failures_allowed: usize,
    /// Don't launch new work while the 1-minute load average exceeds this;
    /// 0 disables the gate.
    pub max_load_average: f64,
    pub verbosity: Verbosity,
    pub dry_run: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            parallelism: 1,
            failures_allowed: 1,
            max_load_average: 0.0,
            verbosity: Verbosity::Normal,
            dry_run: false,
        }
    }
}

/// The -d toggles, threaded explicitly to whoever consumes them.
#[derive(Default, Clone)]
pub struct DebugFlags {
    pub explain: bool,
    pub keep_depfile: bool,
    pub keep_rsp: bool,
    pub stats: bool,
}

pub struct Builder<'a> {
    config: &'a BuildConfig,
    debug: &'a DebugFlags,
    pub graph: Graph,
    pub build_log: BuildLog,
    pub deps_log: DepsLog,
    plan: Plan,
    disk: &'a dyn DiskInterface,
    status: &'a mut dyn Status,
    runner: Box<dyn CommandRunner>,
    start_time: Instant,
    /// Start times (millis since build start) of in-flight edges.
    running_edges: HashMap<EdgeId, i32>,
}

impl<'a> Builder<'a> {
    pub fn new(
        graph: Graph,
        build_log: BuildLog,
        deps_log: DepsLog,
        config: &'a BuildConfig,
        debug: &'a DebugFlags,
        disk: &'a dyn DiskInterface,
        status: &'a mut dyn Status,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        let plan = Plan::new(&graph);
        Builder {
            config,
            debug,
            graph,
            build_log,
            deps_log,
            plan,
            disk,
            status,
            runner,
            start_time: Instant::now(),
            running_edges: HashMap::new(),
        }
    }

    /// Give the graph and logs back, e.g. to close them or to build again
    /// with a fresh plan.
    pub fn into_parts(self) -> (Graph, BuildLog, DepsLog) {
        (self.graph, self.build_log, self.deps_log)
    }

    fn elapsed_millis(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }

    /// The node for `path` if some edge produces it; used to decide whether
    /// the manifest itself can be rebuilt.
    pub fn find_build_target(&self, path: &str) -> Option<NodeId> {
        let mut path = path.to_owned();
        canonicalize_path(&mut path).ok()?;
        let node = self.graph.lookup_node(&path)?;
        self.graph.node(node).in_edge.map(|_| node)
    }

    pub fn add_target_by_name(&mut self, name: &str) -> anyhow::Result<bool> {
        let mut path = name.to_owned();
        canonicalize_path(&mut path)?;
        let Some(node) = self.graph.lookup_node(&path) else {
            match self.graph.spellcheck_path(&path) {
                Some(suggestion) => anyhow::bail!(
                    "unknown target '{}', did you mean '{}'?",
                    name,
                    suggestion
                ),
                None => anyhow::bail!("unknown target '{}'", name),
            }
        };
        self.add_target(node)
    }

    /// Scan the target's cone and enqueue its dirty edges.  Ok(false) means
    /// there was nothing to do for it.
    pub fn add_target(&mut self, node: NodeId) -> anyhow::Result<bool> {
        let mut validation_nodes = Vec::new();
        let mut scan = DependencyScan::new(
            &mut self.graph,
            &self.build_log,
            &self.deps_log,
            self.disk,
            &mut *self.status,
            self.debug.explain,
        );
        scan.recompute_dirty(node, &mut validation_nodes)?;

        let mut added = self.plan.add_target(&self.graph, node)?;

        // Validations ride along as additional top-level targets.
        for validation in validation_nodes {
            if let Some(in_edge) = self.graph.node(validation).in_edge {
                if !self.graph.edge(in_edge).outputs_ready {
                    added |= self.plan.add_target(&self.graph, validation)?;
                }
            }
        }
        Ok(added)
    }

    pub fn already_up_to_date(&self) -> bool {
        !self.plan.more_to_do()
    }

    fn failures_ok(&self, failures: usize) -> bool {
        self.config.failures_allowed == 0 || failures < self.config.failures_allowed
    }

    /// Run the plan to completion.  Ok(Some(n)) is success after n commands;
    /// Ok(None) means some commands failed and their output has already been
    /// shown.  An interrupt surfaces as an error after aborting children.
    pub fn build(&mut self) -> anyhow::Result<Option<usize>> {
        self.status.build_started();
        self.status
            .plan_has_total_edges(self.plan.command_edge_count());

        let mut failures = 0usize;
        let mut commands_ran = 0usize;

        while self.plan.more_to_do() {
            if signal::was_interrupted() {
                self.runner.abort();
                self.status.build_finished();
                anyhow::bail!("interrupted by user");
            }

            if self.failures_ok(failures) && self.runner.can_run_more() {
                if let Some(edge_id) = self.plan.find_ready_edge() {
                    // A dyndep file produced earlier in this build: load it
                    // and let the refreshed plan decide about this edge.
                    if let Some(dyndep_node) = self.graph.edge(edge_id).dyndep {
                        if self.graph.node(dyndep_node).dyndep_pending {
                            self.plan.edge_requeued(&self.graph, edge_id);
                            self.load_dyndeps(dyndep_node)?;
                            continue;
                        }
                    }

                    if self.graph.edge(edge_id).phony {
                        self.plan
                            .edge_finished(&mut self.graph, edge_id, EdgeResult::Succeeded);
                        continue;
                    }

                    commands_ran += 1;
                    self.start_edge(edge_id)?;
                    continue;
                }
            }

            match self.runner.wait_for_command() {
                Some(result) => self.finish_command(result, &mut failures)?,
                None => {
                    if failures > 0 {
                        break;
                    }
                    anyhow::bail!("stuck: plan has work but nothing is ready [this is a bug]");
                }
            }
        }

        self.status.build_finished();
        if failures > 0 {
            return Ok(None);
        }
        Ok(Some(commands_ran))
    }

    fn start_edge(&mut self, edge_id: EdgeId) -> anyhow::Result<()> {
        let start_millis = self.elapsed_millis();
        self.running_edges.insert(edge_id, start_millis as i32);

        // Generator rules may rewrite manifests out from under the log.
        if self.graph.edge(edge_id).generator {
            self.build_log.close()?;
        }

        self.status
            .build_edge_started(&self.graph, edge_id, start_millis);

        if !self.config.dry_run {
            for i in 0..self.graph.edge(edge_id).outs().len() {
                let out = self.graph.edge(edge_id).outs()[i];
                self.disk.make_dirs_for(&self.graph.node(out).path)?;
            }
            if let Some(rspfile) = &self.graph.edge(edge_id).rspfile {
                self.disk.make_dirs_for(&rspfile.path)?;
                self.disk.write_file(&rspfile.path, &rspfile.content)?;
            }
        }

        let edge = self.graph.edge(edge_id);
        let command = StartedCommand {
            id: edge_id,
            cmdline: edge.cmdline.clone().unwrap(),
            depfile: match edge.deps {
                DepsStyle::Gcc => edge.depfile.clone(),
                _ => None,
            },
            showincludes_prefix: match edge.deps {
                DepsStyle::Msvc => Some(
                    edge.msvc_deps_prefix
                        .clone()
                        .unwrap_or_else(|| clparser::DEFAULT_SHOW_INCLUDES_PREFIX.to_owned()),
                ),
                _ => None,
            },
        };
        self.runner.start_command(command);
        Ok(())
    }

    fn finish_command(
        &mut self,
        result: FinishedCommand,
        failures: &mut usize,
    ) -> anyhow::Result<()> {
        let edge_id = result.id;
        let start_time = self.running_edges.remove(&edge_id).unwrap_or(0);
        let end_millis = self.elapsed_millis();
        let success = result.termination == Termination::Success;

        // Intern discovered deps first; the log write below wants node ids.
        let mut deps_nodes: Vec<NodeId> = Vec::new();
        if success && !self.config.dry_run {
            if let Some(dep_paths) = &result.discovered_deps {
                for path in dep_paths {
                    let canonical = canon_path(path.as_str())?;
                    deps_nodes.push(self.graph.node_id(&canonical, 0));
                }
            }
            if self.graph.edge(edge_id).deps == DepsStyle::Gcc && !self.debug.keep_depfile {
                if let Some(depfile) = self.graph.edge(edge_id).depfile.clone() {
                    self.disk.remove_file(&depfile)?;
                }
            }
            if !self.debug.keep_rsp {
                if let Some(rspfile) = self.graph.edge(edge_id).rspfile.clone() {
                    self.disk.remove_file(&rspfile.path)?;
                }
            }
        }

        self.status
            .build_edge_finished(&self.graph, edge_id, end_millis, success, &result.output);

        if !success {
            *failures += 1;
            self.plan
                .edge_finished(&mut self.graph, edge_id, EdgeResult::Failed);
            return Ok(());
        }

        // Restat the outputs.  A restat rule that left an output untouched
        // lets us clean dependent edges out of the plan without running
        // them, and records the newest input mtime instead so later scans
        // compare inputs against the point we proved the output current.
        let mut record_mtime = MTime::Missing;
        let mut result_kind = EdgeResult::Succeeded;
        if !self.config.dry_run {
            let restat = self.graph.edge(edge_id).restat;
            let mut cleaned_nodes = Vec::new();
            for i in 0..self.graph.edge(edge_id).outs().len() {
                let out = self.graph.edge(edge_id).outs()[i];
                let old_mtime = self.graph.node(out).mtime();
                let new_mtime = match self.disk.stat(&self.graph.node(out).path) {
                    Ok(mtime) => mtime,
                    Err(err) => {
                        self.status
                            .warning(&format!("stat {}: {}", self.graph.node(out).path, err));
                        MTime::Missing
                    }
                };
                self.graph.node_mut(out).mtime = Some(new_mtime);
                if new_mtime > record_mtime {
                    record_mtime = new_mtime;
                }
                if restat && new_mtime == old_mtime {
                    cleaned_nodes.push(out);
                }
            }

            if !cleaned_nodes.is_empty() {
                result_kind = EdgeResult::SucceededRestat;
                {
                    let mut scan = DependencyScan::new(
                        &mut self.graph,
                        &self.build_log,
                        &self.deps_log,
                        self.disk,
                        &mut *self.status,
                        self.debug.explain,
                    );
                    for out in cleaned_nodes {
                        self.plan.clean_node(&mut scan, out)?;
                    }
                }
                self.status
                    .plan_has_total_edges(self.plan.command_edge_count());

                record_mtime = self
                    .graph
                    .edge(edge_id)
                    .dirtying_ins()
                    .iter()
                    .map(|&input| self.graph.node(input).mtime())
                    .max()
                    .unwrap_or(MTime::Missing);
            }
        } else {
            // Dry run: pretend the outputs were freshly written.
            let now = MTime::Stamp(self.elapsed_millis().max(1));
            for i in 0..self.graph.edge(edge_id).outs().len() {
                let out = self.graph.edge(edge_id).outs()[i];
                self.graph.node_mut(out).mtime = Some(now);
            }
        }

        self.plan
            .edge_finished(&mut self.graph, edge_id, result_kind);

        if self.config.dry_run {
            return Ok(());
        }

        // Log writes land strictly after success is observed, before the
        // next wait.
        let command_hash = build_log::hash_command(&self.graph.edge(edge_id).command_for_hash());
        for i in 0..self.graph.edge(edge_id).outs().len() {
            let out = self.graph.edge(edge_id).outs()[i];
            let path = self.graph.node(out).path.clone();
            self.build_log.record(
                &path,
                command_hash,
                start_time,
                end_millis as i32,
                record_mtime,
            )?;
        }

        if self.graph.edge(edge_id).deps != DepsStyle::None {
            let out = self.graph.edge(edge_id).outs()[0];
            let deps_mtime = self.graph.node(out).mtime();
            self.deps_log
                .record_deps(&self.graph, out, deps_mtime, &deps_nodes)?;
        }

        Ok(())
    }

    fn load_dyndeps(&mut self, dyndep_node: NodeId) -> anyhow::Result<()> {
        let mut scan = DependencyScan::new(
            &mut self.graph,
            &self.build_log,
            &self.deps_log,
            self.disk,
            &mut *self.status,
            self.debug.explain,
        );
        let file = scan.load_dyndeps(dyndep_node)?;
        self.plan.dyndeps_loaded(&mut scan, dyndep_node, &file)?;
        drop(scan);
        self.status
            .plan_has_total_edges(self.plan.command_edge_count());
        Ok(())
    }
}
