pub mod build;
pub mod build_log;
pub mod canon;
pub mod clean;
pub mod clparser;
mod densemap;
pub mod depfile;
pub mod deps_log;
pub mod disk;
pub mod dyndep;
pub mod eval;
pub mod graph;
pub mod line_printer;
pub mod load;
pub mod metrics;
pub mod parse;
pub mod plan;
pub mod process;
#[cfg(unix)]
mod process_posix;
#[cfg(windows)]
mod process_win;
pub mod run;
pub mod scan;
pub mod scanner;
pub mod signal;
mod smallmap;
pub mod spellcheck;
pub mod status;
pub mod task;
pub mod terminal;

#[cfg(not(windows))]
use jemallocator::Jemalloc;

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
