//! Loading of dyndep files: build-time discovered implicit inputs and
//! outputs, declared with a `dyndep = file` binding on an edge and loaded
//! just before the edge's dirtiness is decided.

use crate::canon::canon_path;
use crate::disk::DiskInterface;
use crate::graph::{EdgeId, Graph, NodeId};
use crate::parse::{Parser, Statement};
use std::path::Path;

/// What one dyndep file declared for one edge.
#[derive(Default)]
pub struct DyndepEntry {
    pub implicit_ins: Vec<NodeId>,
    pub implicit_outs: Vec<NodeId>,
    pub restat: bool,
}

/// Contents of a loaded dyndep file, per edge it updates.
pub type DyndepFile = Vec<(EdgeId, DyndepEntry)>;

/// Load the dyndep file named by `dyndep_node` and graft its declarations
/// onto the graph.  Any problem (missing file, bad syntax, entries that
/// don't line up with the graph) is an error; the edges using the file
/// cannot be built without it.
pub fn load(
    graph: &mut Graph,
    disk: &dyn DiskInterface,
    dyndep_node: NodeId,
) -> anyhow::Result<DyndepFile> {
    let path = graph.node(dyndep_node).path.clone();
    let mut bytes = disk
        .read_file(&path)
        .map_err(|err| anyhow::anyhow!("loading '{}': {}", path, err))?;
    bytes.push(0);

    let mut parser = Parser::new(&bytes);
    let mut file = DyndepFile::new();
    let mut saw_version = false;

    loop {
        let stmt = match parser.read() {
            Ok(None) => break,
            Ok(Some(stmt)) => stmt,
            Err(err) => anyhow::bail!(parser.format_parse_error(Path::new(&path), err)),
        };
        if !saw_version {
            // The version declaration must come first.
            match stmt {
                Statement::VarAssignment(("ninja_dyndep_version", val)) => {
                    let version = val.evaluate(&[]);
                    if version != "1" && version != "1.0" {
                        anyhow::bail!(
                            "{}: unsupported ninja_dyndep_version '{}'",
                            path,
                            version
                        );
                    }
                    saw_version = true;
                    continue;
                }
                _ => anyhow::bail!("{}: expected 'ninja_dyndep_version = ...'", path),
            }
        }

        let build = match stmt {
            Statement::Build(b) => b,
            _ => anyhow::bail!("{}: expected only 'build' statements", path),
        };
        if build.rule != "dyndep" {
            anyhow::bail!("{}: expected build statement with rule 'dyndep'", path);
        }
        if build.explicit_outs != 1
            || build.explicit_ins != 0
            || build.order_only_ins != 0
            || build.validation_ins != 0
        {
            anyhow::bail!(
                "{}: dyndep build statements declare one explicit output and only implicit inputs",
                path
            );
        }
        let mut entry = DyndepEntry::default();
        if let Some(restat) = build.vars.get("restat") {
            entry.restat = !restat.evaluate(&[]).is_empty();
        }

        let out_path = canon_path(build.outs[0].evaluate(&[]))?;
        let out_node = graph
            .lookup_node(&out_path)
            .ok_or_else(|| anyhow::anyhow!("{}: no build statement exists for '{}'", path, out_path))?;
        let edge_id = graph.node(out_node).in_edge.ok_or_else(|| {
            anyhow::anyhow!("{}: no build statement exists for '{}'", path, out_path)
        })?;
        if graph.edge(edge_id).dyndep != Some(dyndep_node) {
            anyhow::bail!(
                "{}: build statement for '{}' does not have a dyndep binding for this file",
                path,
                out_path
            );
        }
        if file.iter().any(|(e, _)| *e == edge_id) {
            anyhow::bail!("{}: multiple statements for '{}'", path, out_path);
        }

        for out in &build.outs[1..] {
            let extra_path = canon_path(out.evaluate(&[]))?;
            let extra = graph.node_id(&extra_path, 0);
            if graph.node(extra).in_edge.is_some() {
                anyhow::bail!("multiple rules generate {}", extra_path);
            }
            graph.node_mut(extra).in_edge = Some(edge_id);
            graph.edge_mut(edge_id).outs.ids.push(extra);
            entry.implicit_outs.push(extra);
        }
        for input in &build.ins {
            let in_path = canon_path(input.evaluate(&[]))?;
            let input = graph.node_id(&in_path, 0);
            graph.add_discovered_in(edge_id, input);
            entry.implicit_ins.push(input);
        }
        graph.edge_mut(edge_id).restat |= entry.restat;

        file.push((edge_id, entry));
    }

    if !saw_version {
        anyhow::bail!("{}: expected 'ninja_dyndep_version = ...'", path);
    }

    graph.node_mut(dyndep_node).dyndep_pending = false;
    Ok(file)
}
