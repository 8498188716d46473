use crate::config::{ScaleBounds, SearchConfig};
use crate::error::{AlignError, AlignResult};
use crate::pipeline::traits::ThresholdProbe;
use crate::pipeline::types::{AcceptedAttempt, AlignmentAttempt, AttemptOutcome};

/// Offsets applied to one base threshold, in search order.
///
/// The ascending half is `0, s, 2s, ...` strictly below
/// `min(255 - base, max_change)`, the descending half `-s, -2s, ...` strictly
/// above `-min(base, max_change)`, so every effective threshold stays inside
/// `0..=255`. At base 255 there is no ascending half, offset 0 included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdGrid {
    base: u8,
    offsets: Vec<i32>,
}

impl ThresholdGrid {
    pub fn new(base: u8, step: u32, max_change: u32) -> Self {
        if step == 0 {
            return Self {
                base,
                offsets: vec![0],
            };
        }

        let step = step as i64;
        let max_increase = (255 - base as i64).min(max_change as i64);
        let max_decrease = (base as i64).min(max_change as i64);

        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset < max_increase {
            offsets.push(offset as i32);
            offset += step;
        }

        let mut offset = step;
        while offset < max_decrease {
            offsets.push(-offset as i32);
            offset += step;
        }

        Self { base, offsets }
    }

    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Effective thresholds `base + offset`, in search order.
    pub fn thresholds(&self) -> impl Iterator<Item = u8> + '_ {
        let base = self.base as i32;
        self.offsets
            .iter()
            .map(move |offset| (base + offset).clamp(0, 255) as u8)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStatus {
    Searching,
    Accepted(AcceptedAttempt),
    Failed,
}

/// Every attempt made so far and where the search stands.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub attempts: Vec<AlignmentAttempt>,
    pub status: SearchStatus,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            attempts: Vec::new(),
            status: SearchStatus::Searching,
        }
    }
}

impl SearchState {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, SearchStatus::Searching)
    }

    pub fn accepted(&self) -> Option<&AcceptedAttempt> {
        match &self.status {
            SearchStatus::Accepted(accepted) => Some(accepted),
            _ => None,
        }
    }

    /// Record one attempt; the first transform whose scale lies inside
    /// `bounds` ends the search.
    fn record(&mut self, attempt: AlignmentAttempt, bounds: &ScaleBounds) {
        if let AttemptOutcome::Estimated(transform) = &attempt.outcome {
            if bounds.contains(transform.scale_factor) {
                self.status = SearchStatus::Accepted(AcceptedAttempt {
                    reference_threshold: attempt.reference_threshold,
                    target_threshold: attempt.target_threshold,
                    transform: *transform,
                });
            }
        }
        self.attempts.push(attempt);
    }
}

/// First-fit search over reference offsets (outer) and target offsets (inner).
#[derive(Debug, Clone)]
pub struct ThresholdSearchController {
    reference_grid: ThresholdGrid,
    target_grid: ThresholdGrid,
    bounds: ScaleBounds,
}

impl ThresholdSearchController {
    pub fn new(config: &SearchConfig) -> Self {
        Self::from_grids(
            ThresholdGrid::new(
                config.reference_threshold,
                config.threshold_step,
                config.threshold_max_change,
            ),
            ThresholdGrid::new(
                config.target_threshold,
                config.threshold_step,
                config.threshold_max_change,
            ),
            config.scale_factor_bounds,
        )
    }

    pub fn from_grids(
        reference_grid: ThresholdGrid,
        target_grid: ThresholdGrid,
        bounds: ScaleBounds,
    ) -> Self {
        Self {
            reference_grid,
            target_grid,
            bounds,
        }
    }

    pub fn reference_grid(&self) -> &ThresholdGrid {
        &self.reference_grid
    }

    pub fn target_grid(&self) -> &ThresholdGrid {
        &self.target_grid
    }

    /// All threshold combinations in evaluation order.
    pub fn combinations(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.reference_grid
            .thresholds()
            .flat_map(move |r| self.target_grid.thresholds().map(move |t| (r, t)))
    }

    /// Run the search to a terminal state.
    ///
    /// Estimation failures only invalidate their combination. Any other probe
    /// error is returned immediately.
    pub fn run<P: ThresholdProbe + ?Sized>(&self, probe: &P) -> AlignResult<SearchState> {
        let mut state = SearchState::default();

        for (reference_threshold, target_threshold) in self.combinations() {
            let outcome = match probe.probe(reference_threshold, target_threshold) {
                Ok(transform) => {
                    tracing::debug!(
                        reference_threshold,
                        target_threshold,
                        rotation = transform.rotation_degrees,
                        scale = transform.scale_factor,
                        "Transform estimated"
                    );
                    AttemptOutcome::Estimated(transform)
                }
                Err(AlignError::Estimation(failure)) => {
                    tracing::debug!(
                        reference_threshold,
                        target_threshold,
                        reason = %failure,
                        "Threshold combination invalid"
                    );
                    AttemptOutcome::Invalid(failure)
                }
                Err(other) => return Err(other),
            };

            state.record(
                AlignmentAttempt {
                    reference_threshold,
                    target_threshold,
                    outcome,
                },
                &self.bounds,
            );
            if state.is_terminal() {
                return Ok(state);
            }
        }

        state.status = SearchStatus::Failed;
        Ok(state)
    }
}
