//! Runs build commands, potentially in parallel.  Unaware of the build
//! graph or pools; just command execution and result harvesting.

use crate::clparser;
use crate::depfile;
use crate::graph::EdgeId;
use crate::process::{self, Termination};
use crate::scanner::Scanner;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

/// Everything the runner needs to execute one edge's command.
pub struct StartedCommand {
    pub id: EdgeId,
    pub cmdline: String,
    /// For `deps = gcc` rules: the depfile to read back after success.
    pub depfile: Option<String>,
    /// For `deps = msvc` rules: the /showIncludes prefix to filter with.
    pub showincludes_prefix: Option<String>,
}

pub struct FinishedCommand {
    pub id: EdgeId,
    pub termination: Termination,
    /// Interleaved stdout+stderr, complete, delivered only after exit.
    pub output: Vec<u8>,
    /// Deps discovered from the depfile or /showIncludes output.
    pub discovered_deps: Option<Vec<String>>,
    pub span: (Instant, Instant),
}

/// The builder's view of parallel command execution.  The real
/// implementation runs subprocesses; the dry-run one pretends.
pub trait CommandRunner {
    fn can_run_more(&self) -> bool;
    fn start_command(&mut self, command: StartedCommand);
    /// Block until one started command completes; None if none are running.
    fn wait_for_command(&mut self) -> Option<FinishedCommand>;
    fn get_active_edges(&self) -> Vec<EdgeId>;
    /// Terminate everything in flight, for ctrl-c handling.
    fn abort(&mut self);
}

/// Reads dependencies from a depfile, flattening multi-target files.
fn read_depfile(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut bytes = std::fs::read(path)
        .map_err(|err| anyhow::anyhow!("read {}: {}", path.display(), err))?;
    bytes.push(0);
    let mut scanner = Scanner::new(&bytes);
    let parsed = depfile::parse(&mut scanner)
        .map_err(|err| anyhow::anyhow!(scanner.format_parse_error(path, err)))?;
    let mut deps = Vec::new();
    for (_target, target_deps) in parsed.iter() {
        deps.extend(target_deps.iter().map(|dep| dep.to_string()));
    }
    Ok(deps)
}

fn run_task(
    command: &StartedCommand,
    on_spawn: impl FnOnce(i64),
) -> anyhow::Result<(Termination, Vec<u8>, Option<Vec<String>>)> {
    let (termination, mut output) =
        process::run_command(&command.cmdline, |pid| on_spawn(pid as i64))?;
    let mut discovered_deps = None;
    if termination == Termination::Success {
        if let Some(prefix) = &command.showincludes_prefix {
            let parsed = clparser::parse(&output, prefix);
            output = parsed.filtered_output;
            discovered_deps = Some(parsed.includes);
        } else if let Some(depfile) = &command.depfile {
            discovered_deps = Some(read_depfile(Path::new(depfile))?);
        }
    }
    Ok((termination, output, discovered_deps))
}

/// Tracks integer slots assigned to running tasks; doubles as the key into
/// the active-pid registry.
#[derive(Default)]
struct TaskSlots {
    /// An entry is true when claimed.
    slots: Vec<bool>,
}

impl TaskSlots {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                self.slots.push(true);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

struct FinishedMessage {
    slot: usize,
    finished: FinishedCommand,
}

/// Executes commands on worker threads, one per running subprocess, and
/// harvests completions over a channel.  The threads spend their lives
/// blocked on the child, so they are cheap.
pub struct ParallelCommandRunner {
    finished_send: mpsc::Sender<FinishedMessage>,
    finished_recv: mpsc::Receiver<FinishedMessage>,
    /// Live tasks: slot -> (edge, child pid once spawned).
    active: Arc<Mutex<HashMap<usize, (EdgeId, Option<i64>)>>>,
    slots: TaskSlots,
    running: usize,
    parallelism: usize,
    max_load_average: f64,
}

impl ParallelCommandRunner {
    pub fn new(parallelism: usize, max_load_average: f64) -> Self {
        let (tx, rx) = mpsc::channel();
        ParallelCommandRunner {
            finished_send: tx,
            finished_recv: rx,
            active: Arc::new(Mutex::new(HashMap::new())),
            slots: TaskSlots::default(),
            running: 0,
            parallelism,
            max_load_average,
        }
    }

    fn load_average_ok(&self) -> bool {
        if self.max_load_average <= 0.0 {
            return true;
        }
        match get_load_average() {
            Some(load) => load < self.max_load_average,
            None => true,
        }
    }
}

impl CommandRunner for ParallelCommandRunner {
    fn can_run_more(&self) -> bool {
        if self.running >= self.parallelism {
            return false;
        }
        // The load gate only applies beyond the first job, or an overloaded
        // machine could wedge the build entirely.
        self.running == 0 || self.load_average_ok()
    }

    fn start_command(&mut self, command: StartedCommand) {
        let slot = self.slots.claim();
        self.active
            .lock()
            .unwrap()
            .insert(slot, (command.id, None));

        let tx = self.finished_send.clone();
        let active = self.active.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = run_task(&command, |pid| {
                if let Some(entry) = active.lock().unwrap().get_mut(&slot) {
                    entry.1 = Some(pid);
                }
            });
            let finish = Instant::now();

            let (termination, output, discovered_deps) = result.unwrap_or_else(|err| {
                (Termination::Failure, err.to_string().into_bytes(), None)
            });
            // The send only fails if the receiver is shutting down.
            let _ = tx.send(FinishedMessage {
                slot,
                finished: FinishedCommand {
                    id: command.id,
                    termination,
                    output,
                    discovered_deps,
                    span: (start, finish),
                },
            });
        });
        self.running += 1;
    }

    fn wait_for_command(&mut self) -> Option<FinishedCommand> {
        if self.running == 0 {
            return None;
        }
        let msg = self.finished_recv.recv().ok()?;
        self.slots.release(msg.slot);
        self.active.lock().unwrap().remove(&msg.slot);
        self.running -= 1;
        Some(msg.finished)
    }

    fn get_active_edges(&self) -> Vec<EdgeId> {
        self.active
            .lock()
            .unwrap()
            .values()
            .map(|(edge, _)| *edge)
            .collect()
    }

    fn abort(&mut self) {
        let active = self.active.lock().unwrap();
        for (_edge, pid) in active.values() {
            if let Some(pid) = pid {
                kill_process(*pid);
            }
        }
    }
}

#[cfg(unix)]
fn get_load_average() -> Option<f64> {
    let mut avgs = [0f64; 3];
    let loaded = unsafe { libc::getloadavg(avgs.as_mut_ptr(), 3) };
    if loaded < 1 {
        return None;
    }
    Some(avgs[0])
}

#[cfg(not(unix))]
fn get_load_average() -> Option<f64> {
    None
}

#[cfg(unix)]
fn kill_process(pid: i64) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGINT);
    }
}

#[cfg(not(unix))]
fn kill_process(_pid: i64) {}

/// Runner for -n: every command "succeeds" instantly with no output.
#[derive(Default)]
pub struct DryRunCommandRunner {
    queue: VecDeque<StartedCommand>,
}

impl DryRunCommandRunner {
    pub fn new() -> Self {
        DryRunCommandRunner::default()
    }
}

impl CommandRunner for DryRunCommandRunner {
    fn can_run_more(&self) -> bool {
        true
    }

    fn start_command(&mut self, command: StartedCommand) {
        self.queue.push_back(command);
    }

    fn wait_for_command(&mut self) -> Option<FinishedCommand> {
        let command = self.queue.pop_front()?;
        let now = Instant::now();
        Some(FinishedCommand {
            id: command.id,
            termination: Termination::Success,
            output: Vec::new(),
            discovered_deps: None,
            span: (now, now),
        })
    }

    fn get_active_edges(&self) -> Vec<EdgeId> {
        self.queue.iter().map(|c| c.id).collect()
    }

    fn abort(&mut self) {
        self.queue.clear();
    }
}
