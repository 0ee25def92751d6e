use crate::errors::EngineError;
use crate::model::IllnessDeathModel;
use crate::profile::CovariateProfile;
use crate::simulate::SimulationConfig;
use crate::table::{CurveTable, TransitionModel};
use crate::transition::Transition;
use itertools::Itertools;
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One fitted transition as stored on disk: rows follow `times`, columns follow `labels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub transition: Transition,
    pub stratum: String,
    pub covariates: Vec<String>,
    pub labels: Vec<String>,
    pub times: Vec<f64>,
    pub coefficients: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
}

impl TableEntry {
    pub fn from_model(model: &TransitionModel) -> Self {
        let rows = |values: &Array2<f64>| -> Vec<Vec<f64>> {
            values.rows().into_iter().map(|r| r.to_vec()).collect()
        };
        Self {
            transition: model.transition(),
            stratum: model.stratum().to_string(),
            covariates: model.columns().covariates().to_vec(),
            labels: model.columns().labels().to_vec(),
            times: model.grid().times().to_vec(),
            coefficients: rows(model.coefficients().values()),
            variances: rows(model.variances().values()),
        }
    }

    pub fn to_model(&self) -> Result<TransitionModel, EngineError> {
        let coefficients = self.matrix(&self.coefficients, "coefficient")?;
        let variances = self.matrix(&self.variances, "variance")?;
        TransitionModel::new(
            self.transition,
            self.stratum.as_str(),
            &self.covariates,
            CurveTable {
                times: self.times.clone(),
                labels: self.labels.clone(),
                values: coefficients,
            },
            CurveTable {
                times: self.times.clone(),
                labels: self.labels.clone(),
                values: variances,
            },
        )
    }

    fn matrix(&self, rows: &[Vec<f64>], kind: &str) -> Result<Array2<f64>, EngineError> {
        let width = self.labels.len();
        let mismatch = |detail: String| EngineError::InputShapeMismatch {
            transition: self.transition,
            stratum: self.stratum.clone(),
            detail,
        };
        if rows.len() != self.times.len() {
            return Err(mismatch(format!(
                "{} {kind} rows for {} time points",
                rows.len(),
                self.times.len()
            )));
        }
        if let Some((row, values)) = rows.iter().find_position(|r| r.len() != width) {
            return Err(mismatch(format!(
                "{kind} row {row} has {} values for {width} columns",
                values.len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), width), flat).map_err(|e| mismatch(e.to_string()))
    }
}

/// Output of the model fitting service for one or more study strata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    #[serde(rename = "table", default)]
    pub tables: Vec<TableEntry>,
}

impl ModelBundle {
    pub fn from_models<'m>(models: impl IntoIterator<Item = &'m IllnessDeathModel>) -> Self {
        let tables = models
            .into_iter()
            .flat_map(|model| {
                Transition::ALL.map(|transition| TableEntry::from_model(model.transition(transition)))
            })
            .collect();
        Self { tables }
    }

    /// Distinct stratum labels, sorted.
    pub fn strata(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|t| t.stratum.clone())
            .sorted()
            .dedup()
            .collect()
    }

    /// Assembles the model for `stratum` from its three tables.
    pub fn model(&self, stratum: &str) -> Result<IllnessDeathModel, EngineError> {
        let models = self
            .tables
            .iter()
            .filter(|t| t.stratum == stratum)
            .map(TableEntry::to_model)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Stratum {stratum}: {} tables in bundle", models.len());
        IllnessDeathModel::new(stratum, models)
    }

    /// Saves the bundle as pretty-printed TOML.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let toml_string = fs::read_to_string(path)?;
        let bundle: ModelBundle = toml::from_str(&toml_string)?;
        info!(
            "Loaded {} tables across strata {:?} from {}",
            bundle.tables.len(),
            bundle.strata(),
            path.display()
        );
        Ok(bundle)
    }
}

/// One evaluation request: which model, which profile, which times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Bundle path. Relative paths are resolved against the config file's directory on load.
    pub bundle: PathBuf,
    pub stratum: String,
    pub times: Vec<f64>,
    #[serde(default)]
    pub profile: CovariateProfile,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RunConfig {
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let toml_string = fs::read_to_string(path)?;
        let mut config: RunConfig = toml::from_str(&toml_string)?;
        if config.bundle.is_relative() {
            if let Some(dir) = path.parent() {
                config.bundle = dir.join(&config.bundle);
            }
        }
        Ok(config)
    }
}
