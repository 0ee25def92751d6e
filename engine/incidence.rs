//! Cumulative incidence per transition, and pointwise bands on the fitted
//! coefficient curves.
//!
//! Bands are a normal approximation built from the coefficient-level
//! variances (`H ± 2·SE`), then pushed through the same recursion as the
//! estimate. They are not a delta-method variance of the CIF itself.

use crate::errors::{EngineError, validate_evaluation_times};
use crate::hazard::{HazardCurve, ProfileHazards};
use crate::table::TransitionModel;
use crate::transition::Transition;
use log::warn;
use ndarray::Array1;
use serde::Serialize;

/// Multiplier on the standard error for every band in this module.
pub const BAND_WIDTH: f64 = 2.0;

/// CIF estimate with its band at one time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CifPoint {
    pub time: f64,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Cumulative incidence of one transition on its own time grid, for a
/// subject starting in the transition's origin state.
#[derive(Debug, Clone)]
pub struct CumulativeIncidence {
    transition: Transition,
    times: Vec<f64>,
    estimate: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl CumulativeIncidence {
    #[inline]
    pub fn transition(&self) -> Transition {
        self.transition
    }

    #[inline]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[inline]
    pub fn estimate(&self) -> &Array1<f64> {
        &self.estimate
    }

    #[inline]
    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    #[inline]
    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Step lookup at the greatest grid time `<= t`.
    pub fn at(&self, t: f64) -> CifPoint {
        let idx = self.times.partition_point(|&x| x <= t).saturating_sub(1);
        CifPoint {
            time: t,
            estimate: self.estimate[idx],
            lower: self.lower[idx],
            upper: self.upper[idx],
        }
    }

    pub fn at_times(&self, times: &[f64]) -> Result<Vec<CifPoint>, EngineError> {
        validate_evaluation_times(times)?;
        Ok(times.iter().map(|&t| self.at(t)).collect())
    }
}

/// Runs `CIF_i = CIF_{i-1} + (M_i - M_{i-1}) * S(t_{i-1})` where `M` is the
/// running maximum of `H` and `S` is survival from every competing exit.
/// Returns the curve and the number of grid times where `H` sat below `M`.
fn accumulate(hazard: &Array1<f64>, survival_before: &[f64]) -> (Array1<f64>, usize) {
    let mut clipped = 0usize;
    let mut peak = 0.0f64;
    let mut running = 0.0f64;
    let values = hazard
        .iter()
        .zip(survival_before)
        .map(|(&value, &survival)| {
            if value < peak {
                clipped += 1;
            } else {
                running += (value - peak) * survival;
                peak = value;
            }
            running.clamp(0.0, 1.0)
        })
        .collect();
    (values, clipped)
}

/// CIF of `transition` with total exit survival from `hazards`.
pub fn cumulative_incidence(hazards: &ProfileHazards, transition: Transition) -> CumulativeIncidence {
    let curve: &HazardCurve = hazards.curve(transition);
    let times = curve.grid().times().to_vec();

    // S(t_{i-1}), with S = 1 before the origin.
    let survival_before: Vec<f64> = std::iter::once(1.0)
        .chain(
            times
                .iter()
                .map(|&t| (-hazards.total_exit_hazard(transition, t)).exp().min(1.0)),
        )
        .take(times.len())
        .collect();

    let (estimate, clipped) = accumulate(curve.values(), &survival_before);
    if clipped > 0 {
        warn!(
            "Transition {transition}, profile [{}]: hazard below its running maximum at {clipped} of {} grid times; the cumulative incidence follows the maximum.",
            hazards.profile(),
            times.len()
        );
    }

    let spread = curve.standard_errors() * BAND_WIDTH;
    let (low_path, _) = accumulate(&(curve.values() - &spread), &survival_before);
    let (high_path, _) = accumulate(&(curve.values() + &spread), &survival_before);
    let lower = ndarray::Zip::from(&estimate)
        .and(&low_path)
        .map_collect(|&e, &l| e.min(l));
    let upper = ndarray::Zip::from(&estimate)
        .and(&high_path)
        .map_collect(|&e, &u| e.max(u));

    CumulativeIncidence {
        transition,
        times,
        estimate,
        lower,
        upper,
    }
}

/// CIFs of all three transitions, in `Transition::ALL` order.
pub fn all_cumulative_incidences(hazards: &ProfileHazards) -> [CumulativeIncidence; 3] {
    Transition::ALL.map(|transition| cumulative_incidence(hazards, transition))
}

/// Pointwise band for one cumulative coefficient curve.
#[derive(Debug, Clone)]
pub struct CoefficientBand {
    pub label: String,
    pub times: Vec<f64>,
    pub estimate: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// `coefficient ± 2·SE` for every column of a transition's table.
pub fn coefficient_bands(model: &TransitionModel) -> Vec<CoefficientBand> {
    let times = model.grid().times().to_vec();
    model
        .columns()
        .labels()
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            let estimate = model.coefficients().column(idx).to_owned();
            let spread = model.variances().column(idx).mapv(|v| BAND_WIDTH * v.sqrt());
            CoefficientBand {
                label: label.clone(),
                times: times.clone(),
                lower: &estimate - &spread,
                upper: &estimate + &spread,
                estimate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::test_support::{curve, curve_with_variance, linear_hazards};
    use crate::profile::CovariateProfile;
    use crate::table::CurveTable;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn single_exit_cif_tracks_one_minus_survival() {
        let hazards = linear_hazards([0.1, 0.1, 0.3], 5.0, 500);
        let cif = cumulative_incidence(&hazards, Transition::DeathAfterRelapse);
        for t in [0.5, 2.0, 5.0] {
            let expected = 1.0 - (-0.3f64 * t).exp();
            assert_abs_diff_eq!(cif.at(t).estimate, expected, epsilon = 5e-3);
        }
    }

    #[test]
    fn competing_cifs_partition_exits() {
        let hazards = linear_hazards([0.2, 0.1, 0.3], 5.0, 500);
        let [relapse, direct_death, _] = all_cumulative_incidences(&hazards);
        let t = 4.0;
        let exited = 1.0 - (-0.3f64 * t).exp();
        assert_abs_diff_eq!(
            relapse.at(t).estimate + direct_death.at(t).estimate,
            exited,
            epsilon = 5e-3
        );
        assert_abs_diff_eq!(
            relapse.at(t).estimate / direct_death.at(t).estimate,
            2.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn negative_increments_are_clipped_to_keep_monotone() {
        let times = [0.0, 1.0, 2.0, 3.0];
        let curves = [
            curve(Transition::Relapse, &times, &[0.0, 0.4, 0.2, 0.5]),
            curve(Transition::DirectDeath, &times, &[0.0, 0.0, 0.0, 0.0]),
            curve(Transition::DeathAfterRelapse, &times, &[0.0, 0.1, 0.2, 0.3]),
        ];
        let hazards = ProfileHazards::new(CovariateProfile::new(), curves);
        let cif = cumulative_incidence(&hazards, Transition::Relapse);
        let values = cif.estimate();
        assert!(values.iter().zip(values.iter().skip(1)).all(|(a, b)| b >= a));
        // The rise from 0.2 back to 0.4 adds nothing; only 0.4 -> 0.5 counts.
        let expected = [0.0, 0.4, 0.4, 0.4 + 0.1 * (-0.4f64).exp()];
        for (value, expected) in values.iter().zip(expected) {
            assert_abs_diff_eq!(*value, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn dipping_hazards_match_their_running_maximum() {
        let times = [0.0, 1.0, 2.0, 3.0, 4.0];
        let with_dips = ProfileHazards::new(
            CovariateProfile::new(),
            [
                curve(Transition::Relapse, &times, &[0.0, 0.4, 0.2, 0.5, 0.45]),
                curve(Transition::DirectDeath, &times, &[0.0, 0.1, 0.05, 0.2, 0.3]),
                curve(Transition::DeathAfterRelapse, &times, &[0.0, 0.3, 0.1, 0.2, 0.6]),
            ],
        );
        let envelopes = ProfileHazards::new(
            CovariateProfile::new(),
            [
                curve(Transition::Relapse, &times, &[0.0, 0.4, 0.4, 0.5, 0.5]),
                curve(Transition::DirectDeath, &times, &[0.0, 0.1, 0.1, 0.2, 0.3]),
                curve(Transition::DeathAfterRelapse, &times, &[0.0, 0.3, 0.3, 0.3, 0.6]),
            ],
        );
        for transition in Transition::ALL {
            let dipping = cumulative_incidence(&with_dips, transition);
            let smooth = cumulative_incidence(&envelopes, transition);
            for (a, b) in dipping.estimate().iter().zip(smooth.estimate()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn bands_enclose_the_estimate() {
        let times = [0.0, 1.0, 2.0];
        let curves = [
            curve_with_variance(Transition::Relapse, &times, &[0.0, 0.3, 0.6], &[0.0, 0.01, 0.04]),
            curve(Transition::DirectDeath, &times, &[0.0, 0.1, 0.2]),
            curve(Transition::DeathAfterRelapse, &times, &[0.0, 0.1, 0.2]),
        ];
        let hazards = ProfileHazards::new(CovariateProfile::new(), curves);
        assert_abs_diff_eq!(
            hazards.curve(Transition::Relapse).standard_error_at(1.5),
            0.1,
            epsilon = 1e-12
        );
        let cif = cumulative_incidence(&hazards, Transition::Relapse);
        let points = cif.at_times(&[0.0, 1.5, 2.0]).unwrap();
        for point in &points {
            assert!(point.lower <= point.estimate && point.estimate <= point.upper);
            assert!(point.lower >= 0.0 && point.upper <= 1.0);
        }
        assert!(points[2].upper > points[2].estimate);
        assert!(cif.at_times(&[2.0, 1.0]).is_err());
    }

    #[test]
    fn coefficient_bands_use_two_standard_errors() {
        let labels = vec!["(Intercept)".to_string(), "Stage2".to_string()];
        let model = TransitionModel::new(
            Transition::Relapse,
            "A",
            &["Stage".to_string()],
            CurveTable {
                times: vec![0.0, 1.0],
                labels: labels.clone(),
                values: array![[0.0, 0.0], [0.5, 0.2]],
            },
            CurveTable {
                times: vec![0.0, 1.0],
                labels,
                values: array![[0.0, 0.0], [0.04, 0.01]],
            },
        )
        .unwrap();
        let bands = coefficient_bands(&model);
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[1].label, "Stage2");
        assert_abs_diff_eq!(bands[0].upper[1], 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(bands[1].lower[1], 0.0, epsilon = 1e-12);
    }
}
