use crate::errors::EngineError;
use crate::hazard::{HazardCurve, ProfileHazards};
use crate::profile::CovariateProfile;
use crate::table::TransitionModel;
use crate::transition::Transition;
use log::debug;

/// The three fitted transitions of one study stratum.
#[derive(Debug, Clone)]
pub struct IllnessDeathModel {
    stratum: String,
    transitions: [TransitionModel; 3],
}

impl IllnessDeathModel {
    /// Assembles a model from exactly one table per transition, all from `stratum`.
    pub fn new(
        stratum: impl Into<String>,
        models: impl IntoIterator<Item = TransitionModel>,
    ) -> Result<Self, EngineError> {
        let stratum = stratum.into();
        let mut slots: [Option<TransitionModel>; 3] = [None, None, None];
        for model in models {
            let transition = model.transition();
            if model.stratum() != stratum {
                return Err(EngineError::ForeignStratum {
                    stratum: stratum.clone(),
                    found: model.stratum().to_string(),
                    transition,
                });
            }
            let slot = &mut slots[transition.index()];
            if slot.is_some() {
                return Err(EngineError::DuplicateTransition {
                    stratum: stratum.clone(),
                    transition,
                });
            }
            *slot = Some(model);
        }

        let [relapse, direct_death, death_after_relapse] = slots;
        let take = |slot: Option<TransitionModel>, transition: Transition| {
            slot.ok_or_else(|| EngineError::MissingTransition {
                stratum: stratum.clone(),
                transition,
            })
        };
        let transitions = [
            take(relapse, Transition::Relapse)?,
            take(direct_death, Transition::DirectDeath)?,
            take(death_after_relapse, Transition::DeathAfterRelapse)?,
        ];

        Ok(Self {
            stratum,
            transitions,
        })
    }

    #[inline]
    pub fn stratum(&self) -> &str {
        &self.stratum
    }

    #[inline]
    pub fn transition(&self, transition: Transition) -> &TransitionModel {
        &self.transitions[transition.index()]
    }

    /// Resolves `profile` against all three transitions and precomputes their
    /// cumulative hazards. A covariate must be declared by at least one transition.
    pub fn resolve(&self, profile: &CovariateProfile) -> Result<ProfileHazards, EngineError> {
        for (name, _) in profile.iter() {
            let known = self
                .transitions
                .iter()
                .any(|m| m.columns().covariates().iter().any(|c| c == name));
            if !known {
                return Err(EngineError::UnknownCovariate {
                    stratum: self.stratum.clone(),
                    profile: profile.to_string(),
                    covariate: name.to_string(),
                });
            }
        }

        let relapse = self.hazard_curve(Transition::Relapse, profile)?;
        let direct_death = self.hazard_curve(Transition::DirectDeath, profile)?;
        let death_after_relapse = self.hazard_curve(Transition::DeathAfterRelapse, profile)?;
        Ok(ProfileHazards::new(
            profile.clone(),
            [relapse, direct_death, death_after_relapse],
        ))
    }

    /// One-off evaluation of `H(t)` for a single transition and profile. Use
    /// [`IllnessDeathModel::resolve`] for repeated queries.
    pub fn cumulative_hazard(
        &self,
        transition: Transition,
        profile: &CovariateProfile,
        t: f64,
    ) -> Result<f64, EngineError> {
        let model = self.transition(transition);
        let weights = model.resolve(profile)?;
        Ok(model.coefficients().evaluate(t).dot(&weights.weights()))
    }

    fn hazard_curve(
        &self,
        transition: Transition,
        profile: &CovariateProfile,
    ) -> Result<HazardCurve, EngineError> {
        let model = self.transition(transition);
        let weights = model.resolve(profile)?;
        debug!(
            "Transition {transition}, profile [{profile}]: active columns {:?}",
            weights
                .active_columns()
                .iter()
                .map(|&idx| model.columns().labels()[idx].as_str())
                .collect::<Vec<_>>()
        );
        Ok(HazardCurve::from_model(model, &weights))
    }
}
