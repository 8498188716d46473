//! Span wrapper for one reference/target pair
//!
//! Holds the `pair` span open and times the pair so the outcome can be
//! recorded with its elapsed time once the pair is resolved.

use instant::Instant;
use tracing::{field, info_span, Span};
use uuid::Uuid;

pub struct PairSpan {
    span: Span,
    start_time: Instant,
}

impl PairSpan {
    pub fn new(identifier: &str, run_id: Option<Uuid>) -> Self {
        let span = info_span!(
            "pair",
            identifier = identifier,
            run_id = field::Empty,
            attempts = field::Empty,
            outcome = field::Empty,
            elapsed_ms = field::Empty,
        );
        if let Some(id) = run_id {
            span.record("run_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    /// Record the terminal outcome of the pair and emit one summary event.
    pub fn finish(&self, outcome: &str, attempts: usize) {
        let elapsed_ms = self.elapsed_ms();
        self.span.record("attempts", attempts);
        self.span.record("outcome", outcome);
        self.span.record("elapsed_ms", elapsed_ms);
        tracing::info!(
            parent: &self.span,
            outcome,
            attempts,
            elapsed_ms,
            "Pair resolved"
        );
    }
}
