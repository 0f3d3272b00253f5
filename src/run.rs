//! Command-line entry point: flag parsing, tool dispatch, and the
//! load/build loop including manifest regeneration.

use crate::build::{BuildConfig, Builder, DebugFlags};
use crate::build_log::{BuildLog, BuildLogUser};
use crate::clean::Cleaner;
use crate::deps_log::DepsLog;
use crate::disk::{DiskInterface, MTime, RealDiskInterface};
use crate::graph::Graph;
use crate::load::{self, Warnings};
use crate::metrics::Metrics;
use crate::signal;
use crate::spellcheck;
use crate::status::{Status, StatusPrinter, Verbosity};
use crate::task::{CommandRunner, DryRunCommandRunner, ParallelCommandRunner};
use anyhow::anyhow;

const BUILD_LOG_FILE: &str = ".ninja_log";
const DEPS_LOG_FILE: &str = ".ninja_deps";

/// Give up on a manifest that keeps regenerating itself after this many
/// cycles; the usual cause is a wildly wrong system clock.
const MANIFEST_REBUILD_LIMIT: usize = 100;

#[derive(argh::FromArgs)]
/// a low-overhead build executor
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input build file [default=build.ninja]
    #[argh(option, short = 'f', default = "(\"build.ninja\".into())")]
    build_file: String,

    /// parallel jobs (0 means no limit) [default derived from cpu count]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// keep going until N jobs fail (0 means infinity) [default=1]
    #[argh(option, short = 'k', default = "1")]
    keep_going: usize,

    /// do not start new jobs if the load average is greater than N
    #[argh(option, short = 'l', default = "0.0")]
    load_average: f64,

    /// dry run: don't run commands, but act like they succeeded
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// debugging flags; use '-d list' to list them
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    /// warning flags; use '-w list' to list them
    #[argh(option, short = 'w')]
    warning: Vec<String>,

    /// run a subtool; use '-t list' to list them
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// with '-t clean', also remove outputs of generator rules
    #[argh(switch, short = 'g')]
    generator: bool,

    /// show all command lines while building
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// don't show progress status, just command output
    #[argh(switch)]
    quiet: bool,

    /// print version and exit
    #[argh(switch)]
    version: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => match n.get() {
            0 | 1 => 2,
            2 => 3,
            cores => cores + 2,
        },
        Err(_) => 2,
    }
}

fn parse_debug_flags(flags: &[String]) -> anyhow::Result<Option<DebugFlags>> {
    const KNOWN: &[&str] = &["explain", "keepdepfile", "keeprsp", "nostatcache", "stats"];
    let mut debug = DebugFlags::default();
    for flag in flags {
        match flag.as_str() {
            "list" => {
                println!("debugging modes:");
                println!("  explain      explain what caused a command to execute");
                println!("  keepdepfile  don't delete depfiles after they're read");
                println!("  keeprsp      don't delete @response files on success");
                println!("  nostatcache  accepted for compatibility; no effect here");
                println!("  stats        print operation counts/timing info");
                println!("multiple modes can be enabled via -d FOO -d BAR");
                return Ok(None);
            }
            "explain" => debug.explain = true,
            "keepdepfile" => debug.keep_depfile = true,
            "keeprsp" => debug.keep_rsp = true,
            "stats" => debug.stats = true,
            "nostatcache" => {}
            other => match spellcheck::closest_match(other, KNOWN.iter().copied()) {
                Some(suggestion) => anyhow::bail!(
                    "unknown debug setting '{}', did you mean '{}'?",
                    other,
                    suggestion
                ),
                None => anyhow::bail!("unknown debug setting '{}', use '-d list' to list", other),
            },
        }
    }
    Ok(Some(debug))
}

fn parse_warning_flags(flags: &[String]) -> anyhow::Result<Option<Warnings>> {
    const KNOWN: &[&str] = &[
        "dupbuild=err",
        "dupbuild=warn",
        "phonycycle=err",
        "phonycycle=warn",
    ];
    let mut warnings = Warnings::default();
    for flag in flags {
        match flag.as_str() {
            "list" => {
                println!("warning flags:");
                println!("  dupbuild={{err,warn}}  multiple build lines for one target");
                println!("  phonycycle={{err,warn}}  phony build statement references itself");
                return Ok(None);
            }
            "dupbuild=err" => warnings.dupbuild_err = true,
            "dupbuild=warn" => warnings.dupbuild_err = false,
            "phonycycle=err" => warnings.phonycycle_err = true,
            "phonycycle=warn" => warnings.phonycycle_err = false,
            other => match spellcheck::closest_match(other, KNOWN.iter().copied()) {
                Some(suggestion) => anyhow::bail!(
                    "unknown warning flag '{}', did you mean '{}'?",
                    other,
                    suggestion
                ),
                None => anyhow::bail!("unknown warning flag '{}', use '-w list' to list", other),
            },
        }
    }
    Ok(Some(warnings))
}

/// Recompaction keeps entries only for outputs that still matter: either
/// the graph can produce them, or they are at least present on disk.
struct GraphLogUser<'a> {
    graph: &'a Graph,
    disk: &'a dyn DiskInterface,
}

impl BuildLogUser for GraphLogUser<'_> {
    fn is_path_dead(&self, path: &str) -> bool {
        let produced = self
            .graph
            .lookup_node(path)
            .and_then(|node| self.graph.node(node).in_edge)
            .is_some();
        !produced && matches!(self.disk.stat(path), Ok(MTime::Missing))
    }
}

enum BuildOutcome {
    NoWorkToDo,
    Success,
    Failed,
    /// The manifest rebuilt itself; reload everything and go again.
    Regenerated,
}

fn make_runner(config: &BuildConfig) -> Box<dyn CommandRunner> {
    if config.dry_run {
        Box::new(DryRunCommandRunner::new())
    } else {
        Box::new(ParallelCommandRunner::new(
            config.parallelism,
            config.max_load_average,
        ))
    }
}

fn build_once(
    opts: &Opts,
    config: &BuildConfig,
    debug: &DebugFlags,
    warnings: &Warnings,
    disk: &RealDiskInterface,
    status: &mut StatusPrinter,
    metrics: &mut Metrics,
) -> anyhow::Result<BuildOutcome> {
    let mut graph = metrics.measure("manifest load", || {
        load::read(&opts.build_file, disk, warnings, status)
    })?;

    let mut build_log = BuildLog::new();
    if let Err(err) = metrics.measure("build log load", || build_log.load(BUILD_LOG_FILE)) {
        status.warning(&err.to_string());
        build_log = BuildLog::new();
    }
    let mut deps_log = DepsLog::new();
    if let Err(err) = metrics.measure("deps log load", || {
        deps_log.load(DEPS_LOG_FILE, &mut graph)
    }) {
        status.warning(&err.to_string());
        deps_log = DepsLog::new();
    }

    // Opening may recompact; failures downgrade to in-memory-only logs.
    let log_user = GraphLogUser {
        graph: &graph,
        disk,
    };
    if let Err(err) = build_log.open_for_write(BUILD_LOG_FILE, &log_user) {
        status.warning(&format!("opening build log: {}", err));
    }
    if let Err(err) = deps_log.open_for_write(DEPS_LOG_FILE, &graph) {
        status.warning(&format!("opening deps log: {}", err));
    }

    // The manifest may describe how to rebuild itself; do that first.
    let mut builder = Builder::new(
        graph,
        build_log,
        deps_log,
        config,
        debug,
        disk,
        status,
        make_runner(config),
    );
    if let Some(manifest_node) = builder.find_build_target(&opts.build_file) {
        if builder.add_target(manifest_node)? && !builder.already_up_to_date() {
            match metrics.measure("manifest rebuild", || builder.build()) {
                Err(err) => {
                    let (_, mut build_log, mut deps_log) = builder.into_parts();
                    let _ = build_log.close();
                    let _ = deps_log.close();
                    return Err(err);
                }
                Ok(None) => {
                    let (_, mut build_log, mut deps_log) = builder.into_parts();
                    build_log.close()?;
                    deps_log.close()?;
                    return Ok(BuildOutcome::Failed);
                }
                Ok(Some(0)) => {}
                Ok(Some(_)) => {
                    let (_, mut build_log, mut deps_log) = builder.into_parts();
                    build_log.close()?;
                    deps_log.close()?;
                    return Ok(BuildOutcome::Regenerated);
                }
            }
        }
    }

    // Now the requested targets (or the declared defaults, or the roots).
    if !opts.targets.is_empty() {
        for name in &opts.targets {
            builder.add_target_by_name(name)?;
        }
    } else {
        for node in builder.graph.default_nodes()? {
            builder.add_target(node)?;
        }
    }

    if builder.already_up_to_date() {
        let (_, mut build_log, mut deps_log) = builder.into_parts();
        build_log.close()?;
        deps_log.close()?;
        return Ok(BuildOutcome::NoWorkToDo);
    }

    let result = metrics.measure("build", || builder.build());
    let (_, mut build_log, mut deps_log) = builder.into_parts();
    build_log.close()?;
    deps_log.close()?;
    match result? {
        None => Ok(BuildOutcome::Failed),
        Some(0) => Ok(BuildOutcome::NoWorkToDo),
        Some(_) => Ok(BuildOutcome::Success),
    }
}

fn run_tool(
    tool: &str,
    opts: &Opts,
    warnings: &Warnings,
    disk: &RealDiskInterface,
    status: &mut StatusPrinter,
) -> anyhow::Result<i32> {
    const KNOWN: &[&str] = &["clean", "restat"];
    match tool {
        "list" => {
            println!("subtools:");
            println!("  clean    remove built files");
            println!("  restat   restat the outputs in the build log");
            Ok(1)
        }
        "clean" => {
            let graph = load::read(&opts.build_file, disk, warnings, status)?;
            let mut cleaner = Cleaner::new(&graph, disk, opts.verbose);
            let code = if opts.targets.is_empty() {
                cleaner.clean_all(opts.generator)
            } else {
                cleaner.clean_targets(&opts.targets)
            };
            Ok(code)
        }
        "restat" => {
            let mut build_log = BuildLog::new();
            build_log.load(BUILD_LOG_FILE)?;
            build_log.restat(BUILD_LOG_FILE, disk, &opts.targets)?;
            Ok(0)
        }
        other => match spellcheck::closest_match(other, KNOWN.iter().copied()) {
            Some(suggestion) => {
                anyhow::bail!("unknown tool '{}', did you mean '{}'?", other, suggestion)
            }
            None => anyhow::bail!("unknown tool '{}', use '-t list' to list", other),
        },
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    if opts.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let Some(debug) = parse_debug_flags(&opts.debug)? else {
        return Ok(1);
    };
    let Some(warnings) = parse_warning_flags(&opts.warning)? else {
        return Ok(1);
    };

    if let Some(dir) = &opts.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
        println!("ninja: Entering directory `{}'", dir);
    }

    let config = BuildConfig {
        parallelism: match opts.parallelism {
            Some(0) => usize::MAX,
            Some(n) => n,
            None => default_parallelism(),
        },
        failures_allowed: opts.keep_going,
        max_load_average: opts.load_average,
        verbosity: if opts.quiet {
            Verbosity::Quiet
        } else if opts.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        },
        dry_run: opts.dry_run,
    };

    let disk = RealDiskInterface::new();
    let mut status = StatusPrinter::new(
        config.verbosity,
        config.parallelism.min(1024),
        std::env::var("NINJA_STATUS").ok(),
    )?;

    if let Some(tool) = &opts.tool {
        return run_tool(tool, &opts, &warnings, &disk, &mut status);
    }

    signal::register_sigint();
    let mut metrics = Metrics::new();

    let mut outcome = None;
    for _cycle in 0..MANIFEST_REBUILD_LIMIT {
        match build_once(
            &opts,
            &config,
            &debug,
            &warnings,
            &disk,
            &mut status,
            &mut metrics,
        )? {
            BuildOutcome::Regenerated => continue,
            other => {
                outcome = Some(other);
                break;
            }
        }
    }

    if debug.stats {
        metrics.report();
    }

    match outcome {
        None => anyhow::bail!(
            "manifest '{}' still dirty after {} tries, perhaps system time is not set",
            opts.build_file,
            MANIFEST_REBUILD_LIMIT
        ),
        Some(BuildOutcome::NoWorkToDo) => {
            println!("ninja: no work to do.");
            Ok(0)
        }
        Some(BuildOutcome::Success) => Ok(0),
        Some(BuildOutcome::Failed) => {
            if signal::was_interrupted() {
                return Ok(2);
            }
            status.error("build stopped: subcommand failed.");
            Ok(1)
        }
        Some(BuildOutcome::Regenerated) => unreachable!(),
    }
}

pub fn run() -> i32 {
    match run_impl() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ninja: error: {:#}", err);
            if signal::was_interrupted() {
                2
            } else {
                1
            }
        }
    }
}
