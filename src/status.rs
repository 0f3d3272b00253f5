//! Build progress reporting: the Status trait consumed by the builder, and
//! the console implementation with $NINJA_STATUS formatting.

use crate::graph::{EdgeId, Graph};
use crate::line_printer::{strip_ansi_escape_codes, LinePrinter, LineType};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

/// Callbacks the builder reports progress through.
pub trait Status {
    fn plan_has_total_edges(&mut self, total: usize);
    fn build_edge_started(&mut self, graph: &Graph, edge: EdgeId, start_time_millis: i64);
    fn build_edge_finished(
        &mut self,
        graph: &Graph,
        edge: EdgeId,
        end_time_millis: i64,
        success: bool,
        output: &[u8],
    );
    /// About to load a dyndep file mid-build; gives the printer a chance to
    /// drop to a fresh line before explain output appears.
    fn build_load_dyndeps(&mut self);
    fn build_started(&mut self);
    fn build_finished(&mut self);

    fn info(&mut self, msg: &str);
    fn warning(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Finished-edges-per-second over the last N completions.
struct SlidingRateInfo {
    rate: f64,
    max_len: usize,
    times: VecDeque<f64>,
    last_update: isize,
}

impl SlidingRateInfo {
    fn new(n: usize) -> Self {
        SlidingRateInfo {
            rate: -1.0,
            max_len: n.max(1),
            times: VecDeque::new(),
            last_update: -1,
        }
    }

    fn update(&mut self, update_hint: usize, time_millis: i64) {
        if update_hint as isize == self.last_update {
            return;
        }
        self.last_update = update_hint as isize;
        if self.times.len() == self.max_len {
            self.times.pop_front();
        }
        self.times.push_back(time_millis as f64 / 1e3);
        let (front, back) = (self.times.front().copied(), self.times.back().copied());
        if let (Some(front), Some(back)) = (front, back) {
            if back != front {
                self.rate = self.times.len() as f64 / (back - front);
            }
        }
    }
}

fn format_rate(rate: f64) -> String {
    if rate < 0.0 {
        "?".to_owned()
    } else {
        format!("{:.1}", rate)
    }
}

/// The default progress template when $NINJA_STATUS is unset.
const DEFAULT_STATUS_FORMAT: &str = "[%f/%t] ";

pub struct StatusPrinter {
    verbosity: Verbosity,
    printer: LinePrinter,
    progress_status_format: String,

    started_edges: usize,
    finished_edges: usize,
    total_edges: usize,
    running_edges: usize,
    /// Most recent edge start or finish time, relative to the build start.
    time_millis: i64,
    current_rate: SlidingRateInfo,
}

impl StatusPrinter {
    /// `status_format` is the $NINJA_STATUS value; placeholders are checked
    /// here so a typo fails the build up front rather than mid-print.
    pub fn new(
        verbosity: Verbosity,
        parallelism: usize,
        status_format: Option<String>,
    ) -> anyhow::Result<Self> {
        let progress_status_format =
            status_format.unwrap_or_else(|| DEFAULT_STATUS_FORMAT.to_owned());
        validate_status_format(&progress_status_format)?;

        let mut printer = LinePrinter::new();
        if verbosity != Verbosity::Normal {
            // Don't do anything fancy in verbose or quiet modes.
            printer.set_smart_terminal(false);
        }

        Ok(StatusPrinter {
            verbosity,
            printer,
            progress_status_format,
            started_edges: 0,
            finished_edges: 0,
            total_edges: 0,
            running_edges: 0,
            time_millis: 0,
            current_rate: SlidingRateInfo::new(parallelism),
        })
    }

    fn format_progress_status(&mut self, time_millis: i64) -> String {
        let mut out = String::new();
        let mut chars = self.progress_status_format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some('s') => out.push_str(&self.started_edges.to_string()),
                Some('t') => out.push_str(&self.total_edges.to_string()),
                Some('r') => out.push_str(&self.running_edges.to_string()),
                Some('u') => out.push_str(
                    &self
                        .total_edges
                        .saturating_sub(self.started_edges)
                        .to_string(),
                ),
                Some('f') => out.push_str(&self.finished_edges.to_string()),
                Some('o') => {
                    let rate = if time_millis > 0 {
                        self.finished_edges as f64 / (time_millis as f64 / 1e3)
                    } else {
                        -1.0
                    };
                    out.push_str(&format_rate(rate));
                }
                Some('c') => {
                    self.current_rate.update(self.finished_edges, time_millis);
                    out.push_str(&format_rate(self.current_rate.rate));
                }
                Some('p') => {
                    let percent = if self.total_edges > 0 {
                        100 * self.finished_edges / self.total_edges
                    } else {
                        0
                    };
                    out.push_str(&format!("{:3}%", percent));
                }
                Some('e') => out.push_str(&format!("{:.3}", time_millis as f64 / 1e3)),
                // Unreachable after validation, but keep the printer total.
                _ => {}
            }
        }
        out
    }

    fn print_status(&mut self, graph: &Graph, edge: EdgeId, time_millis: i64) {
        if self.verbosity == Verbosity::Quiet {
            return;
        }
        let force_full_command = self.verbosity == Verbosity::Verbose;
        let edge = graph.edge(edge);
        let mut to_print = match (&edge.desc, force_full_command) {
            (Some(desc), false) if !desc.is_empty() => desc.clone(),
            _ => edge.cmdline.clone().unwrap_or_default(),
        };
        to_print = format!("{}{}", self.format_progress_status(time_millis), to_print);
        self.printer.print(
            &to_print,
            if force_full_command {
                LineType::Full
            } else {
                LineType::Elide
            },
        );
    }
}

impl Status for StatusPrinter {
    fn plan_has_total_edges(&mut self, total: usize) {
        self.total_edges = total;
    }

    fn build_edge_started(&mut self, graph: &Graph, edge: EdgeId, start_time_millis: i64) {
        self.started_edges += 1;
        self.running_edges += 1;
        self.time_millis = start_time_millis;

        let use_console = graph.edge(edge).use_console();
        if use_console || self.printer.is_smart_terminal() {
            self.print_status(graph, edge, start_time_millis);
        }
        if use_console {
            self.printer.set_console_locked(true);
        }
    }

    fn build_edge_finished(
        &mut self,
        graph: &Graph,
        edge_id: EdgeId,
        end_time_millis: i64,
        success: bool,
        output: &[u8],
    ) {
        self.time_millis = end_time_millis;
        self.finished_edges += 1;

        let edge = graph.edge(edge_id);
        if edge.use_console() {
            self.printer.set_console_locked(false);
        }
        if self.verbosity == Verbosity::Quiet {
            return;
        }
        if !edge.use_console() {
            self.print_status(graph, edge_id, end_time_millis);
        }
        self.running_edges -= 1;

        // Print the command that is spewing before printing its output.
        if !success {
            let mut outputs = String::new();
            for &out in edge.outs() {
                outputs.push_str(&graph.node(out).path);
                outputs.push(' ');
            }
            if self.printer.supports_color() {
                self.printer
                    .print_on_new_line(&format!("\x1B[31mFAILED: \x1B[0m{}\n", outputs));
            } else {
                self.printer
                    .print_on_new_line(&format!("FAILED: {}\n", outputs));
            }
            self.printer
                .print_on_new_line(&format!("{}\n", edge.cmdline.as_deref().unwrap_or("")));
        }

        if !output.is_empty() {
            // Subprocess stdout/stderr went to a pipe, so anything colored
            // carries raw escape codes; strip them unless our own stdout can
            // render them.
            let output = String::from_utf8_lossy(output);
            let final_output = if !self.printer.supports_color() {
                strip_ansi_escape_codes(&output)
            } else {
                output.into_owned()
            };
            self.printer.print_on_new_line(&final_output);
        }
    }

    fn build_load_dyndeps(&mut self) {
        // Explain output may follow; make sure it starts on its own line
        // rather than appending to the status line.
        self.printer.print_on_new_line("");
    }

    fn build_started(&mut self) {
        self.started_edges = 0;
        self.finished_edges = 0;
        self.running_edges = 0;
    }

    fn build_finished(&mut self) {
        self.printer.set_console_locked(false);
        self.printer.print_on_new_line("");
    }

    fn info(&mut self, msg: &str) {
        self.printer.print_on_new_line(&format!("ninja: {}\n", msg));
    }

    fn warning(&mut self, msg: &str) {
        eprintln!("ninja: warning: {}", msg);
    }

    fn error(&mut self, msg: &str) {
        eprintln!("ninja: error: {}", msg);
    }
}

fn validate_status_format(format: &str) -> anyhow::Result<()> {
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match chars.next() {
            Some('s' | 't' | 'r' | 'u' | 'f' | 'o' | 'c' | 'p' | 'e' | '%') => {}
            Some(other) => {
                anyhow::bail!("unknown placeholder '%{}' in $NINJA_STATUS", other)
            }
            None => anyhow::bail!("unterminated placeholder in $NINJA_STATUS"),
        }
    }
    Ok(())
}

/// A Status that swallows everything; used by tools and tests.
pub struct SilentStatus;

impl Status for SilentStatus {
    fn plan_has_total_edges(&mut self, _total: usize) {}
    fn build_edge_started(&mut self, _graph: &Graph, _edge: EdgeId, _start_time_millis: i64) {}
    fn build_edge_finished(
        &mut self,
        _graph: &Graph,
        _edge: EdgeId,
        _end_time_millis: i64,
        _success: bool,
        _output: &[u8],
    ) {
    }
    fn build_load_dyndeps(&mut self) {}
    fn build_started(&mut self) {}
    fn build_finished(&mut self) {}
    fn info(&mut self, _msg: &str) {}
    fn warning(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}
