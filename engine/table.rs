use crate::curve::{GridDefect, StepFunctionCurve, TimeGrid};
use crate::errors::EngineError;
use crate::profile::{ColumnIndex, CovariateProfile, ResolvedCoefficientVector};
use crate::transition::Transition;
use log::warn;
use ndarray::{Array1, Array2};

/// Cumulative regression coefficients on a time grid as delivered by the
/// model fitting service: one row per time point, one column per dummy.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveTable {
    pub times: Vec<f64>,
    pub labels: Vec<String>,
    pub values: Array2<f64>,
}

pub type CoefficientTable = CurveTable;

/// Variances of the cumulative coefficients, same shape as the coefficient table.
pub type VarianceTable = CurveTable;

/// A validated coefficient/variance pair for one transition and study stratum.
///
/// Coefficients are allowed to decrease over time; negative hazard increments
/// are an estimation artefact and are tolerated downstream.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    transition: Transition,
    stratum: String,
    columns: ColumnIndex,
    coefficients: StepFunctionCurve,
    variances: StepFunctionCurve,
}

impl TransitionModel {
    pub fn new(
        transition: Transition,
        stratum: impl Into<String>,
        covariates: &[String],
        coefficients: CoefficientTable,
        variances: VarianceTable,
    ) -> Result<Self, EngineError> {
        let stratum = stratum.into();
        let mismatch = |detail: String| EngineError::InputShapeMismatch {
            transition,
            stratum: stratum.clone(),
            detail,
        };
        let grid_error = |defect: GridDefect| EngineError::InvalidTimeGrid {
            transition,
            stratum: stratum.clone(),
            detail: defect.to_string(),
        };

        if coefficients.times != variances.times {
            return Err(mismatch(format!(
                "time grids differ ({} vs {} points)",
                coefficients.times.len(),
                variances.times.len()
            )));
        }
        if coefficients.labels != variances.labels {
            return Err(mismatch(format!(
                "column sets differ ({:?} vs {:?})",
                coefficients.labels, variances.labels
            )));
        }
        if coefficients.values.dim() != variances.values.dim() {
            return Err(mismatch(format!(
                "value shapes differ ({:?} vs {:?})",
                coefficients.values.dim(),
                variances.values.dim()
            )));
        }
        if coefficients.values.ncols() != coefficients.labels.len() {
            return Err(mismatch(format!(
                "{} labels for {} coefficient columns",
                coefficients.labels.len(),
                coefficients.values.ncols()
            )));
        }

        let columns = ColumnIndex::build(transition, &stratum, &coefficients.labels, covariates)?;
        let grid = TimeGrid::new(coefficients.times).map_err(grid_error)?;
        let coefficient_curve =
            StepFunctionCurve::new(grid.clone(), coefficients.values).map_err(grid_error)?;

        let negative_variances = variances.values.iter().filter(|&&v| v < 0.0).count();
        if negative_variances > 0 {
            warn!(
                "Transition {transition} (stratum {stratum}): {negative_variances} negative variance entries treated as 0."
            );
        }
        let variance_curve = StepFunctionCurve::new(grid, variances.values.mapv(|v| v.max(0.0)))
            .map_err(grid_error)?;

        Ok(Self {
            transition,
            stratum,
            columns,
            coefficients: coefficient_curve,
            variances: variance_curve,
        })
    }

    #[inline]
    pub fn transition(&self) -> Transition {
        self.transition
    }

    #[inline]
    pub fn stratum(&self) -> &str {
        &self.stratum
    }

    #[inline]
    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    #[inline]
    pub fn coefficients(&self) -> &StepFunctionCurve {
        &self.coefficients
    }

    #[inline]
    pub fn variances(&self) -> &StepFunctionCurve {
        &self.variances
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        self.coefficients.grid()
    }

    pub fn resolve(
        &self,
        profile: &CovariateProfile,
    ) -> Result<ResolvedCoefficientVector, EngineError> {
        self.columns.resolve(self.transition, profile)
    }

    /// Cumulative hazard per grid row for a resolved design vector.
    pub fn hazard_values(&self, weights: &ResolvedCoefficientVector) -> Array1<f64> {
        self.coefficients.combine(weights.weights())
    }

    /// Variance of the cumulative hazard per grid row, summing the variances of
    /// the active columns. Covariances are not supplied, so they are ignored.
    pub fn hazard_variances(&self, weights: &ResolvedCoefficientVector) -> Array1<f64> {
        let squared = weights.weights().mapv(|w| w * w);
        self.variances.combine(squared.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels() -> Vec<String> {
        vec!["(Intercept)".to_string(), "Stage2".to_string()]
    }

    fn table(times: Vec<f64>, values: Array2<f64>) -> CurveTable {
        CurveTable {
            times,
            labels: labels(),
            values,
        }
    }

    #[test]
    fn builds_and_combines() {
        let model = TransitionModel::new(
            Transition::Relapse,
            "A",
            &["Stage".to_string()],
            table(vec![0.0, 1.0, 2.0], array![[0.0, 0.0], [0.1, 0.05], [0.3, 0.1]]),
            table(vec![0.0, 1.0, 2.0], array![[0.0, 0.0], [0.01, 0.02], [0.04, -1e-9]]),
        )
        .unwrap();
        let profile = CovariateProfile::new().with("Stage", "2");
        let weights = model.resolve(&profile).unwrap();
        let hazard = model.hazard_values(&weights);
        assert_eq!(hazard.len(), 3);
        assert!((hazard[2] - 0.4).abs() < 1e-12);
        let variance = model.hazard_variances(&weights);
        assert!((variance[1] - 0.03).abs() < 1e-12);
        assert!((variance[2] - 0.04).abs() < 1e-12);
    }

    #[test]
    fn mismatched_grids_are_rejected_at_construction() {
        let err = TransitionModel::new(
            Transition::DirectDeath,
            "B",
            &["Stage".to_string()],
            table(vec![0.0, 1.0], Array2::zeros((2, 2))),
            table(vec![0.0, 1.5], Array2::zeros((2, 2))),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InputShapeMismatch { transition: Transition::DirectDeath, ref stratum, .. } if stratum == "B"
        ));
    }

    #[test]
    fn mismatched_columns_are_rejected_at_construction() {
        let mut variances = table(vec![0.0, 1.0], Array2::zeros((2, 2)));
        variances.labels = vec!["(Intercept)".to_string(), "Stage3".to_string()];
        let err = TransitionModel::new(
            Transition::DeathAfterRelapse,
            "B",
            &["Stage".to_string()],
            table(vec![0.0, 1.0], Array2::zeros((2, 2))),
            variances,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InputShapeMismatch { .. }));
    }

    #[test]
    fn grid_without_origin_is_rejected() {
        let err = TransitionModel::new(
            Transition::Relapse,
            "A",
            &["Stage".to_string()],
            table(vec![0.5, 1.0], Array2::zeros((2, 2))),
            table(vec![0.5, 1.0], Array2::zeros((2, 2))),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTimeGrid { .. }));
    }
}
