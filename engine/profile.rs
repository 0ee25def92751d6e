use crate::errors::{EngineError, ProfileResolutionReason};
use crate::transition::Transition;
use ahash::AHashMap;
use log::debug;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const INTERCEPT_LABELS: [&str; 4] = ["(Intercept)", "Intercept", "intercept", "const"];

/// One discrete level per covariate, e.g. `Age = ">4 yrs"`, `Stage = "2"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CovariateProfile {
    levels: BTreeMap<String, String>,
}

impl CovariateProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, covariate: impl Into<String>, level: impl Into<String>) -> Self {
        self.levels.insert(covariate.into(), level.into());
        self
    }

    pub fn level(&self, covariate: &str) -> Option<&str> {
        self.levels.get(covariate).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.levels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CovariateProfile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            levels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for CovariateProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.levels.is_empty() {
            return f.write_str("<reference>");
        }
        let mut first = true;
        for (name, level) in &self.levels {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}={level}")?;
            first = false;
        }
        Ok(())
    }
}

/// Structured meaning of one coefficient-table column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Intercept,
    Dummy { covariate: String, level: String },
}

/// Column labels parsed once into `(covariate, level)` keys, so profile
/// resolution is a map lookup rather than a pattern search.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    labels: Vec<String>,
    keys: Vec<ColumnKey>,
    covariates: Vec<String>,
    lookup: AHashMap<(String, String), usize>,
    intercept: Option<usize>,
}

impl ColumnIndex {
    /// Parses labels written as covariate name followed by level label
    /// (`"Age>4 yrs"`, `"Stage2"`). Each label must start with exactly one of
    /// the declared covariate names, and no two labels may encode the same level.
    pub fn build(
        transition: Transition,
        stratum: &str,
        labels: &[String],
        covariates: &[String],
    ) -> Result<Self, EngineError> {
        let mut keys = Vec::with_capacity(labels.len());
        let mut lookup: AHashMap<(String, String), usize> = AHashMap::new();
        let mut intercept: Option<usize> = None;

        for (position, label) in labels.iter().enumerate() {
            let key = parse_label(transition, stratum, label, covariates)?;
            match &key {
                ColumnKey::Intercept => {
                    if let Some(previous) = intercept {
                        return Err(EngineError::DuplicateColumn {
                            transition,
                            stratum: stratum.to_string(),
                            first: labels[previous].clone(),
                            second: label.clone(),
                        });
                    }
                    intercept = Some(position);
                }
                ColumnKey::Dummy { covariate, level } => {
                    let entry = (covariate.clone(), level.clone());
                    if let Some(&previous) = lookup.get(&entry) {
                        return Err(EngineError::DuplicateColumn {
                            transition,
                            stratum: stratum.to_string(),
                            first: labels[previous].clone(),
                            second: label.clone(),
                        });
                    }
                    lookup.insert(entry, position);
                }
            }
            keys.push(key);
        }

        debug!(
            "Transition {transition} (stratum {stratum}): {} columns, intercept={}, covariates={:?}",
            labels.len(),
            intercept.is_some(),
            covariates
        );

        Ok(Self {
            labels: labels.to_vec(),
            keys,
            covariates: covariates.to_vec(),
            lookup,
            intercept,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn keys(&self) -> &[ColumnKey] {
        &self.keys
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    pub fn intercept(&self) -> Option<usize> {
        self.intercept
    }

    pub fn position(&self, covariate: &str, level: &str) -> Option<usize> {
        self.lookup
            .get(&(covariate.to_string(), level.to_string()))
            .copied()
    }

    /// Builds the 0/1 vector for `profile`: the intercept and every matched
    /// dummy are set, a level with no column is the reference level and stays 0.
    /// Profile entries for covariates this transition does not declare are skipped.
    pub fn resolve(
        &self,
        transition: Transition,
        profile: &CovariateProfile,
    ) -> Result<ResolvedCoefficientVector, EngineError> {
        let fail = |reason| EngineError::ProfileResolution {
            transition,
            profile: profile.to_string(),
            reason,
        };

        let mut weights = Array1::<f64>::zeros(self.labels.len());
        let mut active = Vec::new();
        if let Some(position) = self.intercept {
            weights[position] = 1.0;
            active.push(position);
        }

        for covariate in &self.covariates {
            let level = profile
                .level(covariate)
                .ok_or_else(|| fail(ProfileResolutionReason::MissingCovariate(covariate.clone())))?
                .trim();
            if level.is_empty() {
                return Err(fail(ProfileResolutionReason::EmptyLevel(covariate.clone())));
            }
            match self.position(covariate, level) {
                Some(position) => {
                    weights[position] = 1.0;
                    active.push(position);
                }
                None => debug!(
                    "Transition {transition}: {covariate}={level} has no dummy column, using reference level"
                ),
            }
        }

        for (name, _) in profile.iter() {
            if !self.covariates.iter().any(|c| c == name) {
                debug!("Transition {transition}: covariate {name} is not in this model, skipped");
            }
        }

        active.sort_unstable();
        Ok(ResolvedCoefficientVector { weights, active })
    }
}

fn parse_label(
    transition: Transition,
    stratum: &str,
    label: &str,
    covariates: &[String],
) -> Result<ColumnKey, EngineError> {
    let trimmed = label.trim();
    if INTERCEPT_LABELS.contains(&trimmed) {
        return Ok(ColumnKey::Intercept);
    }
    let candidates: Vec<&String> = covariates
        .iter()
        .filter(|name| trimmed.len() > name.len() && trimmed.starts_with(name.as_str()))
        .collect();
    match candidates.as_slice() {
        [] => Err(EngineError::UnrecognizedColumn {
            transition,
            stratum: stratum.to_string(),
            label: label.to_string(),
        }),
        [covariate] => Ok(ColumnKey::Dummy {
            covariate: (*covariate).clone(),
            level: trimmed[covariate.len()..].trim().to_string(),
        }),
        many => Err(EngineError::AmbiguousColumn {
            transition,
            stratum: stratum.to_string(),
            label: label.to_string(),
            candidates: many.iter().map(|c| (*c).clone()).collect(),
        }),
    }
}

/// Dense 0/1 design row aligned with a table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCoefficientVector {
    weights: Array1<f64>,
    active: Vec<usize>,
}

impl ResolvedCoefficientVector {
    #[inline]
    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Column positions set to 1, ascending.
    #[inline]
    pub fn active_columns(&self) -> &[usize] {
        &self.active
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
