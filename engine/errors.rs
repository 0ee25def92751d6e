use crate::transition::Transition;
use std::fmt;
use thiserror::Error;

/// Errors surfaced while building tables, resolving profiles or validating inputs.
///
/// Unreached hazard inversions and slightly negative probabilities are not
/// errors and never travel through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transition {transition}, profile [{profile}]: {reason}")]
    ProfileResolution {
        transition: Transition,
        profile: String,
        reason: ProfileResolutionReason,
    },
    #[error(
        "transition {transition}, stratum {stratum}: coefficient and variance tables disagree ({detail})"
    )]
    InputShapeMismatch {
        transition: Transition,
        stratum: String,
        detail: String,
    },
    #[error("transition {transition}, stratum {stratum}: invalid time grid ({detail})")]
    InvalidTimeGrid {
        transition: Transition,
        stratum: String,
        detail: String,
    },
    #[error(
        "transition {transition}, stratum {stratum}: column '{label}' matches no declared covariate"
    )]
    UnrecognizedColumn {
        transition: Transition,
        stratum: String,
        label: String,
    },
    #[error(
        "transition {transition}, stratum {stratum}: column '{label}' matches several covariates {candidates:?}"
    )]
    AmbiguousColumn {
        transition: Transition,
        stratum: String,
        label: String,
        candidates: Vec<String>,
    },
    #[error(
        "transition {transition}, stratum {stratum}: columns '{first}' and '{second}' encode the same covariate level"
    )]
    DuplicateColumn {
        transition: Transition,
        stratum: String,
        first: String,
        second: String,
    },
    #[error("stratum {stratum}: table for {transition} belongs to stratum {found}")]
    ForeignStratum {
        stratum: String,
        found: String,
        transition: Transition,
    },
    #[error(
        "stratum {stratum}, profile [{profile}]: covariate '{covariate}' is declared by none of the transitions 1->2, 1->3, 2->3"
    )]
    UnknownCovariate {
        stratum: String,
        profile: String,
        covariate: String,
    },
    #[error("stratum {stratum}: no table for transition {transition}")]
    MissingTransition {
        stratum: String,
        transition: Transition,
    },
    #[error("stratum {stratum}: transition {transition} supplied more than once")]
    DuplicateTransition {
        stratum: String,
        transition: Transition,
    },
    #[error("start-stop record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("evaluation times must be finite, non-negative and ascending (offending value {value})")]
    InvalidEvaluationTimes { value: f64 },
    #[error("invalid simulation configuration: {0}")]
    InvalidSimulationConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Why a covariate profile could not be mapped onto a transition's dummy columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileResolutionReason {
    /// The transition model declares a covariate the profile leaves unset.
    MissingCovariate(String),
    /// The level for this covariate is blank.
    EmptyLevel(String),
}

impl fmt::Display for ProfileResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileResolutionReason::MissingCovariate(name) => {
                write!(f, "covariate '{name}' has no level in the profile")
            }
            ProfileResolutionReason::EmptyLevel(name) => {
                write!(f, "covariate '{name}' has an empty level")
            }
        }
    }
}

/// Checks that evaluation times are finite, non-negative and ascending.
pub fn validate_evaluation_times(times: &[f64]) -> Result<(), EngineError> {
    let mut previous = f64::NEG_INFINITY;
    for &value in times {
        if !value.is_finite() || value < 0.0 || value < previous {
            return Err(EngineError::InvalidEvaluationTimes { value });
        }
        previous = value;
    }
    Ok(())
}
