//! The `-t clean` tool: removes files produced by the build.

use crate::canon::canonicalize_path;
use crate::disk::DiskInterface;
use crate::graph::{EdgeId, Graph};
use std::collections::HashSet;

pub struct Cleaner<'a> {
    graph: &'a Graph,
    disk: &'a dyn DiskInterface,
    verbose: bool,
    removed: HashSet<String>,
    cleaned_count: usize,
    failures: usize,
}

impl<'a> Cleaner<'a> {
    pub fn new(graph: &'a Graph, disk: &'a dyn DiskInterface, verbose: bool) -> Self {
        Cleaner {
            graph,
            disk,
            verbose,
            removed: HashSet::new(),
            cleaned_count: 0,
            failures: 0,
        }
    }

    fn remove(&mut self, path: &str) {
        if !self.removed.insert(path.to_owned()) {
            return;
        }
        match self.disk.remove_file(path) {
            Ok(true) => {
                if self.verbose {
                    println!("Remove {}", path);
                }
                self.cleaned_count += 1;
            }
            Ok(false) => {}
            Err(err) => {
                eprintln!("ninja: error: remove {}: {}", path, err);
                self.failures += 1;
            }
        }
    }

    fn clean_edge(&mut self, edge_id: EdgeId, generator: bool) {
        let edge = self.graph.edge(edge_id);
        if edge.phony {
            return;
        }
        if edge.generator && !generator {
            // Removing generator outputs would leave the project unable to
            // regenerate its own manifest; require the explicit flag.
            return;
        }
        for &out in edge.outs() {
            let path = self.graph.node(out).path.clone();
            self.remove(&path);
        }
        if let Some(depfile) = &edge.depfile {
            let depfile = depfile.clone();
            self.remove(&depfile);
        }
        if let Some(rspfile) = &edge.rspfile {
            let path = rspfile.path.clone();
            self.remove(&path);
        }
    }

    fn report(&self) -> i32 {
        println!("{} files.", self.cleaned_count);
        if self.failures > 0 {
            1
        } else {
            0
        }
    }

    /// Remove all built files; `generator` extends that to generator-rule
    /// outputs too.  Returns the process exit code.
    pub fn clean_all(&mut self, generator: bool) -> i32 {
        println!("Cleaning...");
        for edge_id in self.graph.edge_ids() {
            self.clean_edge(edge_id, generator);
        }
        self.report()
    }

    /// Remove the named targets and everything in their input cones.
    pub fn clean_targets(&mut self, targets: &[String]) -> i32 {
        println!("Cleaning...");
        let mut pending = Vec::new();
        for target in targets {
            let mut path = target.clone();
            if canonicalize_path(&mut path).is_err() {
                eprintln!("ninja: error: unknown target '{}'", target);
                self.failures += 1;
                continue;
            }
            match self.graph.lookup_node(&path) {
                Some(node) => pending.push(node),
                None => {
                    eprintln!("ninja: error: unknown target '{}'", target);
                    self.failures += 1;
                }
            }
        }

        let mut visited_edges = HashSet::new();
        while let Some(node) = pending.pop() {
            let Some(edge_id) = self.graph.node(node).in_edge else {
                continue;
            };
            if !visited_edges.insert(edge_id) {
                continue;
            }
            self.clean_edge(edge_id, false);
            pending.extend(self.graph.edge(edge_id).all_ins().iter().copied());
        }
        self.report()
    }
}
