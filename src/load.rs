//! Loads build.ninja files into a Graph: runs the parser, tracks variable
//! and rule scopes across include/subninja, evaluates edge bindings, and
//! enforces graph-level policies like the one-producer invariant.

use crate::canon::canonicalize_path;
use crate::disk::DiskInterface;
use crate::eval::{Env, EvalString, Vars};
use crate::graph::{
    DepsStyle, Edge, EdgeIns, EdgeOuts, Graph, NodeId, Rule, RspFile, DEFAULT_POOL,
};
use crate::parse::{self, Parser, Statement, VarList};
use crate::smallmap::SmallMap;
use crate::status::Status;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

/// Policy for the -w warning classes the loader enforces.
pub struct Warnings {
    pub dupbuild_err: bool,
    pub phonycycle_err: bool,
}

impl Default for Warnings {
    fn default() -> Self {
        Warnings {
            dupbuild_err: false,
            phonycycle_err: false,
        }
    }
}

/// Variable and rule bindings visible at a point in the manifest.
/// `include` shares the parent scope; `subninja` works on a copy.
#[derive(Clone)]
struct Scope {
    vars: Vars,
    rules: HashMap<String, Rule>,
}

impl Scope {
    fn new() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "phony".to_owned(),
            Rule {
                name: "phony".to_owned(),
                vars: SmallMap::default(),
            },
        );
        Scope {
            vars: Vars::default(),
            rules,
        }
    }
}

/// Provides $in, $out and $in_newline for edge binding evaluation.
struct BuildImplicitVars<'a> {
    graph: &'a Graph,
    explicit_ins: &'a [NodeId],
    explicit_outs: &'a [NodeId],
}

impl<'a> BuildImplicitVars<'a> {
    fn join(&self, ids: &[NodeId], sep: char) -> String {
        let mut out = String::new();
        for (i, &id) in ids.iter().enumerate() {
            if i > 0 {
                out.push(sep);
            }
            out.push_str(&self.graph.node(id).path);
        }
        out
    }
}

impl<'a> Env for BuildImplicitVars<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<'_, str>> {
        match var {
            "in" => Some(Cow::Owned(self.join(self.explicit_ins, ' '))),
            "in_newline" => Some(Cow::Owned(self.join(self.explicit_ins, '\n'))),
            "out" => Some(Cow::Owned(self.join(self.explicit_outs, ' '))),
            _ => None,
        }
    }
}

/// Build-statement bindings as an Env: values expand against $in/$out and
/// globals, but not against each other, which keeps lookup cycle-free.
struct ShallowBuildVars<'text, 'a> {
    vars: &'a VarList<'text>,
    implicit: Option<&'a BuildImplicitVars<'a>>,
    globals: &'a Vars,
}

impl<'text, 'a> Env for ShallowBuildVars<'text, 'a> {
    fn get_var(&self, var: &str) -> Option<Cow<'_, str>> {
        let es = self.vars.get(var)?;
        Some(Cow::Owned(match self.implicit {
            Some(implicit) => es.evaluate(&[implicit, self.globals]),
            None => es.evaluate(&[self.globals]),
        }))
    }
}

struct Loader<'a> {
    graph: Graph,
    disk: &'a dyn DiskInterface,
    warnings: &'a Warnings,
    status: &'a mut dyn Status,
}

/// Parse `build_filename` and everything it includes into a Graph.
pub fn read(
    build_filename: &str,
    disk: &dyn DiskInterface,
    warnings: &Warnings,
    status: &mut dyn Status,
) -> anyhow::Result<Graph> {
    let mut loader = Loader {
        graph: Graph::new(),
        disk,
        warnings,
        status,
    };
    let mut scope = Scope::new();
    loader.load_file(build_filename, &mut scope)?;
    Ok(loader.graph)
}

impl<'a> Loader<'a> {
    fn load_file(&mut self, path: &str, scope: &mut Scope) -> anyhow::Result<()> {
        let mut bytes = self
            .disk
            .read_file(path)
            .map_err(|err| anyhow::anyhow!("loading '{}': {}", path, err))?;
        bytes.push(0);

        let mut parser = Parser::new(&bytes);
        loop {
            let stmt = match parser.read() {
                Ok(None) => break,
                Ok(Some(stmt)) => stmt,
                Err(err) => anyhow::bail!(parser.format_parse_error(Path::new(path), err)),
            };
            match stmt {
                Statement::VarAssignment((name, val)) => {
                    let val = val.evaluate(&[&scope.vars]);
                    scope.vars.insert(name, val);
                }
                Statement::Rule(rule) => {
                    if scope.rules.contains_key(rule.name) {
                        anyhow::bail!("{}: duplicate rule '{}'", path, rule.name);
                    }
                    let mut vars = SmallMap::default();
                    for (name, val) in rule.vars.into_iter() {
                        vars.insert(name.to_owned(), val.into_owned());
                    }
                    scope.rules.insert(
                        rule.name.to_owned(),
                        Rule {
                            name: rule.name.to_owned(),
                            vars,
                        },
                    );
                }
                Statement::Pool(pool) => {
                    if self.graph.add_pool(pool.name.to_owned(), pool.depth).is_none() {
                        anyhow::bail!("{}: duplicate pool '{}'", path, pool.name);
                    }
                }
                Statement::Default(defaults) => {
                    for default in defaults {
                        let mut target = default.evaluate(&[&scope.vars]);
                        canonicalize_path(&mut target)?;
                        let node = self.graph.lookup_node(&target).ok_or_else(|| {
                            anyhow::anyhow!("{}: unknown target '{}'", path, target)
                        })?;
                        self.graph.defaults.push(node);
                    }
                }
                Statement::Include(file) => {
                    let file = file.evaluate(&[&scope.vars]);
                    self.load_file(&file, scope)?;
                }
                Statement::Subninja(file) => {
                    let file = file.evaluate(&[&scope.vars]);
                    let mut child_scope = scope.clone();
                    self.load_file(&file, &mut child_scope)?;
                }
                Statement::Build(build) => {
                    self.add_build(path, build, scope)?;
                }
            }
        }
        Ok(())
    }

    fn add_build(
        &mut self,
        file: &str,
        b: parse::Build<'_>,
        scope: &mut Scope,
    ) -> anyhow::Result<()> {
        let phony = b.rule == "phony";
        let rule = scope
            .rules
            .get(b.rule)
            .ok_or_else(|| anyhow::anyhow!("{}: unknown build rule '{}'", file, b.rule))?
            .clone();

        // Paths may reference build-level bindings and globals.
        let path_env = ShallowBuildVars {
            vars: &b.vars,
            implicit: None,
            globals: &scope.vars,
        };
        let eval_path = |p: &EvalString<&str>| -> anyhow::Result<(String, u64)> {
            let mut path = p.evaluate(&[&path_env, &scope.vars]);
            let slash_bits = canonicalize_path(&mut path)?;
            Ok((path, slash_bits))
        };

        let mut outs = Vec::new();
        let mut dropped_outs = 0usize;
        for (i, out) in b.outs.iter().enumerate() {
            let (path, slash_bits) = eval_path(out)?;
            let node = self.graph.node_id(&path, slash_bits);
            if self.graph.node(node).in_edge.is_some() || outs.contains(&node) {
                // Second producer for this output.
                if self.warnings.dupbuild_err {
                    anyhow::bail!("{}: multiple rules generate {}", file, path);
                }
                self.status.warning(&format!(
                    "multiple rules generate {}. builds involving this target will not be correct; continuing anyway",
                    path
                ));
                if i < b.explicit_outs {
                    dropped_outs += 1;
                }
                continue;
            }
            outs.push(node);
        }
        if outs.is_empty() {
            // Every output already had a producer; nothing left to declare.
            return Ok(());
        }
        let explicit_outs = b.explicit_outs - dropped_outs;

        let mut ins = Vec::new();
        for input in b.ins[..b.ins.len() - b.validation_ins].iter() {
            let (path, slash_bits) = eval_path(input)?;
            ins.push(self.graph.node_id(&path, slash_bits));
        }
        let mut validations = Vec::new();
        for validation in b.ins[b.ins.len() - b.validation_ins..].iter() {
            let (path, slash_bits) = eval_path(validation)?;
            validations.push(self.graph.node_id(&path, slash_bits));
        }
        let (mut explicit_ins, mut implicit_ins, order_only_ins) =
            (b.explicit_ins, b.implicit_ins, b.order_only_ins);

        if phony {
            // A phony edge that names its own output as an input would be a
            // trivial cycle; old CMake versions generate these.
            while let Some(pos) = ins.iter().position(|input| outs.contains(input)) {
                if self.warnings.phonycycle_err {
                    anyhow::bail!(
                        "{}: phony target '{}' names itself as an input",
                        file,
                        self.graph.node(ins[pos]).path
                    );
                }
                self.status.warning(&format!(
                    "phony target '{}' names itself as an input; ignoring [-w phonycycle=warn]",
                    self.graph.node(ins[pos]).path
                ));
                ins.remove(pos);
                if pos < explicit_ins {
                    explicit_ins -= 1;
                } else if pos < explicit_ins + implicit_ins {
                    implicit_ins -= 1;
                }
            }
        }

        // Bindings that configure the edge itself.
        let implicit_vars = BuildImplicitVars {
            graph: &self.graph,
            explicit_ins: &ins[..explicit_ins],
            explicit_outs: &outs[..explicit_outs],
        };
        let shallow_vars = ShallowBuildVars {
            vars: &b.vars,
            implicit: Some(&implicit_vars),
            globals: &scope.vars,
        };
        let binding = |name: &str| -> Option<String> {
            if let Some(es) = b.vars.get(name) {
                return Some(es.evaluate(&[&implicit_vars, &scope.vars]));
            }
            let es = rule.vars.get(name)?;
            Some(es.evaluate(&[&implicit_vars, &shallow_vars, &scope.vars]))
        };
        let bool_binding = |name: &str| -> bool {
            binding(name).map_or(false, |val| !val.is_empty())
        };

        let cmdline = binding("command");
        if !phony && cmdline.is_none() {
            anyhow::bail!("{}: rule '{}' is missing the 'command' binding", file, b.rule);
        }

        let deps = match binding("deps").as_deref() {
            None | Some("") => DepsStyle::None,
            Some("gcc") => DepsStyle::Gcc,
            Some("msvc") => DepsStyle::Msvc,
            Some(other) => anyhow::bail!("{}: unknown deps style '{}'", file, other),
        };

        let rspfile_path = binding("rspfile");
        let rspfile_content = binding("rspfile_content");
        let rspfile = match (rspfile_path, rspfile_content) {
            (None, None) => None,
            (Some(path), Some(content)) => Some(RspFile { path, content }),
            _ => anyhow::bail!(
                "{}: rspfile and rspfile_content need to be both specified",
                file
            ),
        };

        let pool = match binding("pool") {
            None => DEFAULT_POOL,
            Some(name) if name.is_empty() => DEFAULT_POOL,
            Some(name) => self
                .graph
                .lookup_pool(&name)
                .ok_or_else(|| anyhow::anyhow!("{}: unknown pool name '{}'", file, name))?,
        };

        let dyndep = match binding("dyndep") {
            None => None,
            Some(path) => {
                let mut path = path;
                canonicalize_path(&mut path)?;
                let node = self
                    .graph
                    .lookup_node(&path)
                    .filter(|node| ins.contains(node))
                    .ok_or_else(|| {
                        anyhow::anyhow!("{}: dyndep '{}' is not an input", file, path)
                    })?;
                Some(node)
            }
        };

        let edge = Edge {
            rule_name: b.rule.to_owned(),
            cmdline,
            desc: binding("description"),
            depfile: binding("depfile").filter(|d| !d.is_empty()),
            deps,
            msvc_deps_prefix: binding("msvc_deps_prefix"),
            rspfile,
            pool,
            weight: 1,
            restat: bool_binding("restat"),
            generator: bool_binding("generator"),
            phony,
            dyndep,
            ins: EdgeIns {
                ids: ins,
                explicit: explicit_ins,
                implicit: implicit_ins,
                order_only: order_only_ins,
            },
            validations,
            outs: EdgeOuts {
                ids: outs,
                explicit: explicit_outs,
            },
            outputs_ready: false,
            deps_loaded: false,
        };
        self.graph.add_edge(edge);

        if let Some(dyndep_node) = dyndep {
            self.graph.node_mut(dyndep_node).dyndep_pending = true;
        }
        Ok(())
    }
}
