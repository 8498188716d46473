//! Plain-text run log
//!
//! One header describing the run, one line per processed pair, and a footer
//! with the finishing time. Every line is flushed as soon as it is written.

use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::config::ScaleBounds;
use crate::error::{AlignError, AlignResult};

pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d %H_%M_%S";

/// `<target dir basename>_Log YYYY_MM_DD HH_MM_SS.txt`
pub fn log_file_name(target_basename: &str, at: &DateTime<Local>) -> String {
    format!("{}_Log {}.txt", target_basename, at.format(TIMESTAMP_FORMAT))
}

/// Outcome line for one pair.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Aligned {
        name: String,
        reference_threshold: u8,
        target_threshold: u8,
        rotation_degrees: f64,
        scale_factor: f64,
    },
    Unsuccessful {
        name: String,
    },
    Error {
        name: String,
        message: String,
    },
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Aligned {
                name,
                reference_threshold,
                target_threshold,
                rotation_degrees,
                scale_factor,
            } => write!(
                f,
                "{}; Used threshold reference image: {}; Used threshold target image: {}; Rotation angle: {}; Scale factor: {}",
                name, reference_threshold, target_threshold, rotation_degrees, scale_factor
            ),
            LogRecord::Unsuccessful { name } => write!(f, "{} alignment unsuccessful", name),
            LogRecord::Error { name, message } => {
                write!(f, "Error aligning image {}, error: {}", name, message)
            }
        }
    }
}

/// Everything the header reports about a run.
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub command_line: String,
    pub working_directory: PathBuf,
    pub reference_directory: PathBuf,
    pub target_directory: PathBuf,
    pub output_directory: PathBuf,
    pub reference_threshold: u8,
    pub target_threshold: u8,
    pub reference_thresholds: Vec<u8>,
    pub target_thresholds: Vec<u8>,
    pub scale_bounds: ScaleBounds,
    pub run_id: Uuid,
    pub started: DateTime<Local>,
}

fn join_thresholds(values: &[u8]) -> String {
    values
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl RunHeader {
    fn render(&self, log_path: &Path) -> String {
        let lines = [
            format!("    {}", self.command_line),
            format!("    Working directory: {}", self.working_directory.display()),
            format!("    Reference files directory: {}", self.reference_directory.display()),
            format!("    Target files directory: {}", self.target_directory.display()),
            format!("    Output directory: {}", self.output_directory.display()),
            format!("    Logfile location: {}", log_path.display()),
            format!("    Default threshold reference images: {}", self.reference_threshold),
            format!("    Default threshold target images: {}", self.target_threshold),
            format!(
                "    Threshold range reference images: {}",
                join_thresholds(&self.reference_thresholds)
            ),
            format!(
                "    Threshold range target images: {}",
                join_thresholds(&self.target_thresholds)
            ),
            format!(
                "    Scale factor boundaries: {}, {}",
                self.scale_bounds.low, self.scale_bounds.high
            ),
            format!("    {} version: {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            format!("    Run id: {}", self.run_id),
            format!("    Start: {}", self.started.format(TIMESTAMP_FORMAT)),
        ];
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    /// Open `file_name` in `requested_dir` (or `default_dir`), retrying once
    /// in `default_dir` when the requested location fails.
    pub fn create(requested_dir: Option<&Path>, default_dir: &Path, file_name: &str) -> AlignResult<Self> {
        let first_dir = requested_dir.unwrap_or(default_dir);
        match Self::open(first_dir, file_name) {
            Ok(log) => Ok(log),
            Err(e) if requested_dir.is_some() && first_dir != default_dir => {
                warn!(
                    requested = %first_dir.display(),
                    fallback = %default_dir.display(),
                    error = %e,
                    "Cannot open log file, using default location"
                );
                Self::open(default_dir, file_name).map_err(|e| {
                    AlignError::Setup(format!(
                        "cannot open log file '{}': {}",
                        default_dir.join(file_name).display(),
                        e
                    ))
                })
            }
            Err(e) => Err(AlignError::Setup(format!(
                "cannot open log file '{}': {}",
                first_dir.join(file_name).display(),
                e
            ))),
        }
    }

    fn open(dir: &Path, file_name: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, text: &str) -> AlignResult<()> {
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| AlignError::Output {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Header text as written, so callers can echo it.
    pub fn write_header(&mut self, header: &RunHeader) -> AlignResult<String> {
        let text = header.render(&self.path);
        self.write_line(&text)?;
        Ok(text)
    }

    pub fn write_record(&mut self, record: &LogRecord) -> AlignResult<()> {
        self.write_line(&format!("{}\n", record))
    }

    pub fn finish(mut self, at: &DateTime<Local>) -> AlignResult<PathBuf> {
        self.write_line(&format!("    Finished: {}", at.format(TIMESTAMP_FORMAT)))?;
        Ok(self.path)
    }
}
