//! Closed-form transition probabilities of the illness-death process.
//!
//! Out of `Healthy` the two competing transitions are combined as if they were
//! conditionally independent given the covariate profile:
//!
//! ```text
//! S1(t)  = exp(-(H12(t) + H13(t)))
//! P12(t) = (1 - exp(-H12(t))) * exp(-H13(t))
//! P13(t) = 1 - S1(t) - P12(t)
//! S2(t)  = exp(-H23(t))          (t measured from entry into Relapsed)
//! P23(t) = 1 - S2(t)
//! ```
//!
//! This is an approximation, not the exact multi-state solution: `P12` lets a
//! relapsed subject die at the direct-death rate, so it is exact only when the
//! 1->3 and 2->3 hazards coincide. The Monte Carlo path in
//! [`crate::simulate`] needs no such assumption, and the two agree only
//! approximately.

use crate::errors::{EngineError, validate_evaluation_times};
use crate::hazard::ProfileHazards;
use crate::occupancy::{OccupancyCurve, StateOccupancy};
use crate::transition::{State, Transition};
use log::warn;
use ndarray::{Array2, ArrayView1};

/// Row-stochastic 3x3 matrix `P[from, to]` at one elapsed time.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionProbabilityMatrix {
    time: f64,
    probabilities: Array2<f64>,
}

impl TransitionProbabilityMatrix {
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    pub fn probabilities(&self) -> &Array2<f64> {
        &self.probabilities
    }

    #[inline]
    pub fn get(&self, from: State, to: State) -> f64 {
        self.probabilities[[from.index(), to.index()]]
    }

    #[inline]
    pub fn row(&self, from: State) -> ArrayView1<'_, f64> {
        self.probabilities.row(from.index())
    }

    /// State occupancy for a subject who starts healthy.
    pub fn occupancy_from_healthy(&self) -> StateOccupancy {
        StateOccupancy {
            healthy: self.get(State::Healthy, State::Healthy),
            relapsed: self.get(State::Healthy, State::Relapsed),
            dead: self.get(State::Healthy, State::Dead),
        }
    }
}

/// Closed-form matrix at `t`, with the number of entries that had to be clipped.
fn matrix_at(hazards: &ProfileHazards, t: f64) -> (TransitionProbabilityMatrix, usize) {
    let h12 = hazards.curve(Transition::Relapse).at(t);
    let h13 = hazards.curve(Transition::DirectDeath).at(t);
    let h23 = hazards.curve(Transition::DeathAfterRelapse).at(t);

    let stay_healthy = (-(h12 + h13)).exp();
    let relapse = (1.0 - (-h12).exp()) * (-h13).exp();
    let mut from_healthy = [stay_healthy, relapse, 1.0 - stay_healthy - relapse];
    let stay_relapsed = (-h23).exp();
    let mut from_relapsed = [0.0, stay_relapsed, 1.0 - stay_relapsed];

    let clipped = clip_and_renormalize(&mut from_healthy, State::Healthy)
        + clip_and_renormalize(&mut from_relapsed, State::Relapsed);

    let mut probabilities = Array2::<f64>::zeros((3, 3));
    for (column, value) in from_healthy.into_iter().enumerate() {
        probabilities[[State::Healthy.index(), column]] = value;
    }
    for (column, value) in from_relapsed.into_iter().enumerate() {
        probabilities[[State::Relapsed.index(), column]] = value;
    }
    probabilities[[State::Dead.index(), State::Dead.index()]] = 1.0;

    (
        TransitionProbabilityMatrix {
            time: t,
            probabilities,
        },
        clipped,
    )
}

/// Clamps each entry to `[0, 1]` and rescales the row to sum to 1. A row with
/// no usable mass keeps the subject in `origin`. Returns how many entries were
/// out of range.
pub fn clip_and_renormalize(row: &mut [f64; 3], origin: State) -> usize {
    let mut clipped = 0;
    for value in row.iter_mut() {
        if !(0.0..=1.0).contains(value) {
            clipped += 1;
            *value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        }
    }
    let sum: f64 = row.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for value in row.iter_mut() {
            *value /= sum;
        }
    } else {
        *row = [0.0; 3];
        row[origin.index()] = 1.0;
    }
    clipped
}

/// Transition probability matrix at a single elapsed time.
pub fn closed_form_matrix(hazards: &ProfileHazards, t: f64) -> TransitionProbabilityMatrix {
    let (matrix, clipped) = matrix_at(hazards, t);
    if clipped > 0 {
        warn!(
            "Profile [{}]: clipped {clipped} closed-form probabilities at t={t}.",
            hazards.profile()
        );
    }
    matrix
}

/// Transition probability matrices at ascending, non-negative evaluation times.
pub fn closed_form_matrices(
    hazards: &ProfileHazards,
    times: &[f64],
) -> Result<Vec<TransitionProbabilityMatrix>, EngineError> {
    validate_evaluation_times(times)?;
    let mut total_clipped = 0usize;
    let mut examples = Vec::new();
    let matrices: Vec<TransitionProbabilityMatrix> = times
        .iter()
        .map(|&t| {
            let (matrix, clipped) = matrix_at(hazards, t);
            if clipped > 0 {
                total_clipped += clipped;
                if examples.len() < 5 {
                    examples.push(t);
                }
            }
            matrix
        })
        .collect();
    if total_clipped > 0 {
        warn!(
            "Profile [{}]: clipped {total_clipped} closed-form probabilities across {} times. Example times: {:?}.",
            hazards.profile(),
            times.len(),
            examples
        );
    }
    Ok(matrices)
}

/// Occupancy from `Healthy` read off the first row of the closed-form matrices.
pub fn closed_form_occupancy(
    hazards: &ProfileHazards,
    times: &[f64],
) -> Result<OccupancyCurve, EngineError> {
    let matrices = closed_form_matrices(hazards, times)?;
    Ok(OccupancyCurve::from_matrices(&matrices))
}
