//! The deps log: a binary, append-only store of dependencies discovered
//! from compiler output (depfiles or /showIncludes).
//!
//! Two record kinds share the file.  A path record assigns the next dense
//! integer id to a path and carries an inverted-id checksum to catch torn
//! writes; a deps record lists the input ids for one output id along with
//! the output's mtime at recording time.  Loading replays in order, newest
//! record per output winning.

use crate::disk::MTime;
use crate::graph::{DepsStyle, Graph, NodeId};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

const FILE_SIGNATURE: &[u8] = b"# ninjadeps\n";
const CURRENT_VERSION: u32 = 4;

/// Sanity bound on a single record; anything larger means corruption.
const MAX_RECORD_SIZE: usize = 1 << 19;

const MIN_COMPACTION_RECORD_COUNT: usize = 1000;
const COMPACTION_RATIO: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Deps {
    /// Output mtime when the deps were recorded, log-raw encoding.
    pub mtime: i64,
    pub nodes: Vec<NodeId>,
}

#[derive(Default)]
pub struct DepsLog {
    /// Maps deps-log id -> node; the index is the id.
    ids: Vec<NodeId>,
    node_to_id: HashMap<NodeId, usize>,
    deps: HashMap<NodeId, Deps>,
    path: Option<String>,
    file: Option<BufWriter<File>>,
    needs_recompaction: bool,
}

impl DepsLog {
    pub fn new() -> Self {
        DepsLog::default()
    }

    /// Replay the log at `path`, interning referenced paths into the graph.
    /// A malformed tail (torn write) is truncated away and the rest kept.
    pub fn load(&mut self, path: &str, graph: &mut Graph) -> anyhow::Result<()> {
        let contents = match std::fs::read(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => anyhow::bail!("read {}: {}", path, err),
        };

        if !contents.starts_with(FILE_SIGNATURE)
            || contents.len() < FILE_SIGNATURE.len() + 4
            || read_u32(&contents, FILE_SIGNATURE.len()) != CURRENT_VERSION
        {
            // Unreadable or from a different format era; start over.
            let _ = std::fs::remove_file(path);
            return Ok(());
        }

        let mut total_dep_records = 0;
        let mut unique_dep_records = 0;
        let mut ofs = FILE_SIGNATURE.len() + 4;
        let mut valid_up_to = ofs;
        loop {
            if ofs + 4 > contents.len() {
                break;
            }
            let header = read_u32(&contents, ofs);
            let is_deps = header & 0x8000_0000 != 0;
            let size = (header & 0x7FFF_FFFF) as usize;
            if size > MAX_RECORD_SIZE || ofs + 4 + size > contents.len() {
                break;
            }
            let record = &contents[ofs + 4..ofs + 4 + size];

            if is_deps {
                if size < 12 || size % 4 != 0 {
                    break;
                }
                let out_id = read_u32(record, 0) as usize;
                let mtime =
                    (read_u32(record, 4) as u64 | ((read_u32(record, 8) as u64) << 32)) as i64;
                let Some(&output) = self.ids.get(out_id) else {
                    break;
                };
                let mut nodes = Vec::with_capacity((size - 12) / 4);
                let mut bad_id = false;
                for i in (12..size).step_by(4) {
                    match self.ids.get(read_u32(record, i) as usize) {
                        Some(&node) => nodes.push(node),
                        None => {
                            bad_id = true;
                            break;
                        }
                    }
                }
                if bad_id {
                    break;
                }
                total_dep_records += 1;
                if self.deps.insert(output, Deps { mtime, nodes }).is_none() {
                    unique_dep_records += 1;
                }
            } else {
                if size < 4 {
                    break;
                }
                let checksum = read_u32(record, size - 4);
                let expected_id = !checksum as usize;
                if expected_id != self.ids.len() {
                    break;
                }
                let mut path_end = size - 4;
                while path_end > 0 && record[path_end - 1] == 0 {
                    path_end -= 1;
                }
                let path = String::from_utf8_lossy(&record[..path_end]).into_owned();
                let node = graph.node_id(&path, 0);
                self.node_to_id.insert(node, self.ids.len());
                self.ids.push(node);
            }

            ofs += 4 + size;
            valid_up_to = ofs;
        }

        if valid_up_to < contents.len() {
            // Tail damaged, probably a write interrupted mid-record.  Drop
            // it so the next append starts at a record boundary.
            let file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_up_to as u64)?;
        }

        if total_dep_records > MIN_COMPACTION_RECORD_COUNT
            && total_dep_records > unique_dep_records * COMPACTION_RATIO
        {
            self.needs_recompaction = true;
        }

        Ok(())
    }

    pub fn open_for_write(&mut self, path: &str, graph: &Graph) -> anyhow::Result<()> {
        if self.needs_recompaction {
            self.recompact(path, graph)?;
            self.needs_recompaction = false;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let write_header = file.metadata()?.len() == 0;
        let mut w = BufWriter::new(file);
        if write_header {
            w.write_all(FILE_SIGNATURE)?;
            w.write_all(&CURRENT_VERSION.to_le_bytes())?;
            w.flush()?;
        }
        self.path = Some(path.to_owned());
        self.file = Some(w);
        Ok(())
    }

    pub fn get_deps(&self, output: NodeId) -> Option<&Deps> {
        self.deps.get(&output)
    }

    /// Record deps for one output.  A no-op when the stored entry already
    /// matches, to keep no-op builds from growing the log.
    pub fn record_deps(
        &mut self,
        graph: &Graph,
        output: NodeId,
        mtime: MTime,
        deps: &[NodeId],
    ) -> anyhow::Result<()> {
        let mut made_change = false;
        for &node in deps.iter().chain(std::iter::once(&output)) {
            if !self.node_to_id.contains_key(&node) {
                self.write_path_record(graph, node)?;
                made_change = true;
            }
        }
        if !made_change {
            match self.deps.get(&output) {
                Some(existing) => {
                    if existing.mtime != mtime.raw() || existing.nodes != deps {
                        made_change = true;
                    }
                }
                None => made_change = true,
            }
        }
        if !made_change {
            return Ok(());
        }

        let size = 4 + 8 + 4 * deps.len();
        if let Some(w) = &mut self.file {
            w.write_all(&((size as u32) | 0x8000_0000).to_le_bytes())?;
            w.write_all(&(self.node_to_id[&output] as u32).to_le_bytes())?;
            let mtime = mtime.raw() as u64;
            w.write_all(&((mtime & 0xFFFF_FFFF) as u32).to_le_bytes())?;
            w.write_all(&((mtime >> 32) as u32).to_le_bytes())?;
            for dep in deps {
                w.write_all(&(self.node_to_id[dep] as u32).to_le_bytes())?;
            }
            w.flush()?;
        }

        self.deps.insert(
            output,
            Deps {
                mtime: mtime.raw(),
                nodes: deps.to_vec(),
            },
        );
        Ok(())
    }

    fn write_path_record(&mut self, graph: &Graph, node: NodeId) -> anyhow::Result<()> {
        let id = self.ids.len();
        if let Some(w) = &mut self.file {
            let path = graph.node(node).path.as_bytes();
            let padding = (4 - path.len() % 4) % 4;
            let size = path.len() + padding + 4;
            anyhow::ensure!(size <= MAX_RECORD_SIZE, "deps log path record too large");
            w.write_all(&(size as u32).to_le_bytes())?;
            w.write_all(path)?;
            w.write_all(&b"\0\0\0"[..padding])?;
            w.write_all(&(!(id as u32)).to_le_bytes())?;
        }
        self.node_to_id.insert(node, id);
        self.ids.push(node);
        Ok(())
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut w) = self.file.take() {
            w.flush()?;
        }
        Ok(())
    }

    /// Rewrite the log keeping only live entries, reassigning ids densely.
    /// An entry is live while its output is still produced by an edge that
    /// declares dependency discovery.
    pub fn recompact(&mut self, path: &str, graph: &Graph) -> anyhow::Result<()> {
        self.file = None;
        let temp_path = format!("{}.recompact", path);

        let mut new_log = DepsLog::new();
        new_log.open_for_write(&temp_path, graph)?;

        // Iterate in id order so replay order matches recording order.
        let old_ids = std::mem::take(&mut self.ids);
        for &output in &old_ids {
            let Some(deps) = self.deps.get(&output) else {
                continue;
            };
            let live = match graph.node(output).in_edge {
                Some(edge) => graph.edge(edge).deps != DepsStyle::None,
                None => false,
            };
            if !live {
                continue;
            }
            let (mtime, nodes) = (deps.mtime, deps.nodes.clone());
            new_log.record_deps(graph, output, MTime::from_raw(mtime), &nodes)?;
        }
        new_log.close()?;
        std::fs::rename(&temp_path, path)?;

        *self = new_log;
        self.path = Some(path.to_owned());
        Ok(())
    }
}

fn read_u32(buf: &[u8], ofs: usize) -> u32 {
    u32::from_le_bytes(buf[ofs..ofs + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DepsStyle, Edge, EdgeIns, EdgeOuts, DEFAULT_POOL};

    fn temp_path(dir: &tempfile::TempDir) -> String {
        dir.path().join(".ninja_deps").to_str().unwrap().to_owned()
    }

    fn deps_edge(out: NodeId, deps: DepsStyle) -> Edge {
        Edge {
            rule_name: "cc".to_owned(),
            cmdline: Some("cc".to_owned()),
            desc: None,
            depfile: None,
            deps,
            msvc_deps_prefix: None,
            rspfile: None,
            pool: DEFAULT_POOL,
            weight: 1,
            restat: false,
            generator: false,
            phony: false,
            dyndep: None,
            ins: EdgeIns::default(),
            validations: Vec::new(),
            outs: EdgeOuts {
                ids: vec![out],
                explicit: 1,
            },
            outputs_ready: false,
            deps_loaded: false,
        }
    }

    #[test]
    fn round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let out = graph.node_id("out.o", 0);
        let a = graph.node_id("a.h", 0);
        let b = graph.node_id("b.h", 0);

        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(5), &[a, b])?;
        log.close()?;

        let mut loaded = DepsLog::new();
        loaded.load(&path, &mut graph)?;
        let deps = loaded.get_deps(out).unwrap();
        assert_eq!(deps.mtime, 5);
        assert_eq!(deps.nodes, vec![a, b]);
        Ok(())
    }

    #[test]
    fn load_interns_unknown_paths() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let out = graph.node_id("out.o", 0);
        let hdr = graph.node_id("gen.h", 0);
        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(1), &[hdr])?;
        log.close()?;

        // Load into a fresh graph that has never heard of these paths.
        let mut fresh = Graph::new();
        let mut loaded = DepsLog::new();
        loaded.load(&path, &mut fresh)?;
        let out = fresh.lookup_node("out.o").expect("out.o interned");
        let deps = loaded.get_deps(out).unwrap();
        assert_eq!(deps.nodes, vec![fresh.lookup_node("gen.h").unwrap()]);
        Ok(())
    }

    #[test]
    fn latest_record_wins() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let out = graph.node_id("out.o", 0);
        let a = graph.node_id("a.h", 0);
        let b = graph.node_id("b.h", 0);

        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(1), &[a])?;
        log.record_deps(&graph, out, MTime::Stamp(2), &[b])?;
        log.close()?;

        let mut loaded = DepsLog::new();
        loaded.load(&path, &mut graph)?;
        let deps = loaded.get_deps(out).unwrap();
        assert_eq!(deps.mtime, 2);
        assert_eq!(deps.nodes, vec![b]);
        Ok(())
    }

    #[test]
    fn unchanged_deps_are_not_rewritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let out = graph.node_id("out.o", 0);
        let a = graph.node_id("a.h", 0);

        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(1), &[a])?;
        log.close()?;
        let size_after_first = std::fs::metadata(&path)?.len();

        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(1), &[a])?;
        log.close()?;
        assert_eq!(std::fs::metadata(&path)?.len(), size_after_first);
        Ok(())
    }

    #[test]
    fn torn_tail_is_recovered() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let out = graph.node_id("out.o", 0);
        let a = graph.node_id("a.h", 0);
        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, out, MTime::Stamp(1), &[a])?;
        log.close()?;

        // Simulate a write cut off mid-record.
        let good_size = std::fs::metadata(&path)?.len();
        let mut contents = std::fs::read(&path)?;
        contents.extend_from_slice(&[0x10, 0x00]);
        std::fs::write(&path, &contents)?;

        let mut loaded = DepsLog::new();
        loaded.load(&path, &mut graph)?;
        assert!(loaded.get_deps(out).is_some());
        assert_eq!(std::fs::metadata(&path)?.len(), good_size);
        Ok(())
    }

    #[test]
    fn recompact_keeps_only_live_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_path(&dir);

        let mut graph = Graph::new();
        let live = graph.node_id("live.o", 0);
        let dead = graph.node_id("dead.o", 0);
        let hdr = graph.node_id("x.h", 0);
        graph.add_edge(deps_edge(live, DepsStyle::Gcc));
        // "dead.o" has no producing edge any more.

        let mut log = DepsLog::new();
        log.open_for_write(&path, &graph)?;
        log.record_deps(&graph, dead, MTime::Stamp(1), &[hdr])?;
        log.record_deps(&graph, live, MTime::Stamp(2), &[hdr])?;
        log.close()?;

        log.recompact(&path, &graph)?;
        assert!(log.get_deps(dead).is_none());
        assert!(log.get_deps(live).is_some());

        let mut reloaded = DepsLog::new();
        reloaded.load(&path, &mut graph)?;
        assert!(reloaded.get_deps(dead).is_none());
        assert_eq!(reloaded.get_deps(live).unwrap().nodes, vec![hdr]);
        Ok(())
    }
}
