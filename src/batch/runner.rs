use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::output::OutputLayout;
use crate::batch::run_log::{LogRecord, RunLog};
use crate::data::{PairListing, PairPaths};
use crate::error::{AlignError, AlignResult};
use crate::logging::PairSpan;
use crate::pipeline::Aligner;

/// Pairs handed to the worker pool at once, per worker.
const CHUNK_PER_JOB: usize = 2;

/// Snapshot passed to the progress callback after each pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub current: String,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub aligned: usize,
    pub unsuccessful: usize,
    pub errors: usize,
    /// Reference files without a same-named target.
    pub skipped: usize,
}

impl BatchSummary {
    fn count(&mut self, record: &LogRecord) {
        match record {
            LogRecord::Aligned { .. } => self.aligned += 1,
            LogRecord::Unsuccessful { .. } => self.unsuccessful += 1,
            LogRecord::Error { .. } => self.errors += 1,
        }
    }
}

/// Aligns every pair of a listing, writing outputs and one log record per pair.
pub struct BatchRunner {
    aligner: Aligner,
    layout: OutputLayout,
    jobs: usize,
    run_id: Option<Uuid>,
}

impl BatchRunner {
    pub fn new(aligner: Aligner, layout: OutputLayout) -> Self {
        let jobs = aligner.config().output.jobs.max(1);
        Self {
            aligner,
            layout,
            jobs,
            run_id: None,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Load, align and write one pair. Every failure becomes a record.
    pub fn process_pair(&self, pair: &PairPaths) -> LogRecord {
        let span = PairSpan::new(&pair.identifier, self.run_id);
        let _entered = span.span().enter();

        let outcome = pair.load().and_then(|images| {
            let result = self.aligner.align_pair(&images)?;
            self.layout.write(&pair.identifier, &result)?;
            Ok(result)
        });

        match outcome {
            Ok(result) => {
                span.finish("aligned", result.attempts);
                LogRecord::Aligned {
                    name: pair.identifier.clone(),
                    reference_threshold: result.accepted.reference_threshold,
                    target_threshold: result.accepted.target_threshold,
                    rotation_degrees: result.accepted.transform.rotation_degrees,
                    scale_factor: result.accepted.transform.scale_factor,
                }
            }
            Err(AlignError::AlignmentUnsuccessful { attempts }) => {
                span.finish("unsuccessful", attempts);
                LogRecord::Unsuccessful {
                    name: pair.identifier.clone(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Pair failed");
                span.finish("error", 0);
                LogRecord::Error {
                    name: pair.identifier.clone(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Process the listing in input order. Per-pair failures are recorded and
    /// the batch goes on; only a failing log write stops it.
    pub fn run<F>(&self, listing: &PairListing, log: &mut RunLog, progress: F) -> AlignResult<BatchSummary>
    where
        F: Fn(&Progress) + Sync,
    {
        let mut summary = BatchSummary {
            skipped: listing.unmatched.len(),
            ..BatchSummary::default()
        };
        for name in &listing.unmatched {
            warn!(file = %name, "No target image with this name, skipping");
        }

        let total = listing.pairs.len();
        let completed = AtomicUsize::new(0);
        let report = |pair: &PairPaths| {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(&Progress {
                completed: done,
                total,
                current: pair.identifier.clone(),
            });
        };

        info!(pairs = total, jobs = self.jobs, "Batch started");

        if self.jobs <= 1 {
            for pair in &listing.pairs {
                let record = self.process_pair(pair);
                log.write_record(&record)?;
                summary.count(&record);
                report(pair);
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.jobs)
                .build()
                .map_err(|e| AlignError::Setup(format!("cannot start worker pool: {}", e)))?;

            for chunk in listing.pairs.chunks(self.jobs * CHUNK_PER_JOB) {
                let records: Vec<LogRecord> = pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|pair| {
                            let record = self.process_pair(pair);
                            report(pair);
                            record
                        })
                        .collect()
                });
                for record in &records {
                    log.write_record(record)?;
                    summary.count(record);
                }
            }
        }

        info!(
            aligned = summary.aligned,
            unsuccessful = summary.unsuccessful,
            errors = summary.errors,
            skipped = summary.skipped,
            "Batch finished"
        );
        Ok(summary)
    }
}
