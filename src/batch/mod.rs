//! Directory-level processing: output layout, the text run log and the
//! runner that ties them to the aligner.

pub mod output;
pub mod run_log;
pub mod runner;

pub use output::{default_output_root, directory_basename, OutputLayout};
pub use run_log::{log_file_name, LogRecord, RunHeader, RunLog};
pub use runner::{BatchRunner, BatchSummary, Progress};
