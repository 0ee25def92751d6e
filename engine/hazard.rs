use crate::curve::TimeGrid;
use crate::profile::{CovariateProfile, ResolvedCoefficientVector};
use crate::table::TransitionModel;
use crate::transition::Transition;
use log::{debug, warn};
use ndarray::Array1;

/// Outcome of inverting a cumulative hazard curve at a target value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HazardInversion {
    /// First grid time at which the curve reaches the target.
    Reached(f64),
    /// The curve stays below the target over the whole observed range; the
    /// event is treated as not occurring within the horizon.
    Unreached,
}

impl HazardInversion {
    #[inline]
    pub fn time(self) -> Option<f64> {
        match self {
            HazardInversion::Reached(t) => Some(t),
            HazardInversion::Unreached => None,
        }
    }

    #[inline]
    pub fn time_or_infinity(self) -> f64 {
        self.time().unwrap_or(f64::INFINITY)
    }

    #[inline]
    pub fn is_reached(self) -> bool {
        matches!(self, HazardInversion::Reached(_))
    }
}

/// Cumulative hazard of one transition for one covariate profile, precomputed
/// on the transition's grid so that repeated queries are lookups.
#[derive(Debug, Clone)]
pub struct HazardCurve {
    transition: Transition,
    grid: TimeGrid,
    values: Array1<f64>,
    envelope: Vec<f64>,
    variances: Array1<f64>,
}

impl HazardCurve {
    pub fn from_model(model: &TransitionModel, weights: &ResolvedCoefficientVector) -> Self {
        let values = model.hazard_values(weights);
        let variances = model.hazard_variances(weights);
        Self::from_parts(model.transition(), model.grid().clone(), values, variances)
    }

    fn from_parts(
        transition: Transition,
        grid: TimeGrid,
        values: Array1<f64>,
        variances: Array1<f64>,
    ) -> Self {
        let mut envelope = values.to_vec();
        let mut running = f64::NEG_INFINITY;
        let mut negative_steps = 0usize;
        let mut examples: Vec<(f64, f64)> = Vec::new();
        for (idx, value) in envelope.iter_mut().enumerate() {
            if *value < running {
                negative_steps += 1;
                if examples.len() < 5 {
                    examples.push((grid.time(idx), *value - running));
                }
            }
            running = running.max(*value);
            *value = running;
        }
        if negative_steps > 0 {
            warn!(
                "Transition {transition}: cumulative hazard decreases at {negative_steps} of {} grid times. Example (time, drop): {:?}.",
                grid.len(),
                examples
            );
        }
        debug!(
            "Transition {transition}: hazard precomputed on {} grid times, H(end)={:.6}",
            grid.len(),
            values[values.len() - 1]
        );
        Self {
            transition,
            grid,
            values,
            envelope,
            variances,
        }
    }

    #[inline]
    pub fn transition(&self) -> Transition {
        self.transition
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Cumulative hazard at each grid time.
    #[inline]
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    /// `H(t)` by step lookup: the value at the greatest grid time `<= t`.
    #[inline]
    pub fn at(&self, t: f64) -> f64 {
        self.values[self.grid.locate(t)]
    }

    /// Running maximum of `H` at `t`: the curve inversion actually crosses.
    #[inline]
    pub fn envelope_at(&self, t: f64) -> f64 {
        self.envelope[self.grid.locate(t)]
    }

    /// Standard error of `H(t)` from the coefficient variances.
    #[inline]
    pub fn standard_error_at(&self, t: f64) -> f64 {
        self.variances[self.grid.locate(t)].sqrt()
    }

    #[inline]
    pub fn standard_errors(&self) -> Array1<f64> {
        self.variances.mapv(f64::sqrt)
    }

    /// Smallest grid time at which `H` reaches or exceeds `target`.
    ///
    /// Uses a binary search over the running maximum, which finds the first
    /// crossing even where the estimated curve dips.
    pub fn invert(&self, target: f64) -> HazardInversion {
        self.first_crossing(0, target)
    }

    /// Smallest time `t >= origin` with `H(t) - H(origin) >= increment`.
    pub fn invert_from(&self, origin: f64, increment: f64) -> HazardInversion {
        let start = self.grid.locate(origin);
        let target = self.values[start] + increment;
        if origin < self.grid.time(start) {
            return self.first_crossing(0, target);
        }
        if increment <= 0.0 {
            return HazardInversion::Reached(origin);
        }
        self.first_crossing(start + 1, target)
    }

    fn first_crossing(&self, from: usize, target: f64) -> HazardInversion {
        if from >= self.envelope.len() {
            return HazardInversion::Unreached;
        }
        // The running maximum only locates the first crossing after `from`
        // while everything before `from` stays below the target.
        if from > 0 && self.envelope[from - 1] >= target {
            return self.scan(from, target);
        }
        let tail = &self.envelope[from..];
        let offset = tail.partition_point(|&h| h < target);
        if offset < tail.len() {
            HazardInversion::Reached(self.grid.time(from + offset))
        } else {
            HazardInversion::Unreached
        }
    }

    fn scan(&self, from: usize, target: f64) -> HazardInversion {
        (from..self.values.len())
            .find(|&idx| self.values[idx] >= target)
            .map_or(HazardInversion::Unreached, |idx| {
                HazardInversion::Reached(self.grid.time(idx))
            })
    }

    /// Number of grid steps where the curve decreases.
    pub fn negative_increments(&self) -> usize {
        self.values
            .iter()
            .zip(self.values.iter().skip(1))
            .filter(|(previous, next)| next < previous)
            .count()
    }
}

/// The three transition hazards resolved for one covariate profile.
#[derive(Debug, Clone)]
pub struct ProfileHazards {
    profile: CovariateProfile,
    curves: [HazardCurve; 3],
}

impl ProfileHazards {
    pub(crate) fn new(profile: CovariateProfile, curves: [HazardCurve; 3]) -> Self {
        debug_assert!(
            curves
                .iter()
                .enumerate()
                .all(|(idx, curve)| curve.transition().index() == idx)
        );
        Self { profile, curves }
    }

    #[inline]
    pub fn profile(&self) -> &CovariateProfile {
        &self.profile
    }

    #[inline]
    pub fn curve(&self, transition: Transition) -> &HazardCurve {
        &self.curves[transition.index()]
    }

    /// Sum of the hazards of every transition leaving the origin state of
    /// `transition`, evaluated at `t` on each curve's running maximum.
    pub fn total_exit_hazard(&self, transition: Transition, t: f64) -> f64 {
        transition
            .competing()
            .iter()
            .map(|&other| self.curve(other).envelope_at(t))
            .sum()
    }
}
