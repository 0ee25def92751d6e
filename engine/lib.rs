#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod bundle;
pub mod curve;
pub mod errors;
pub mod hazard;
pub mod incidence;
pub mod matrix;
pub mod model;
pub mod occupancy;
pub mod profile;
pub mod risk_set;
pub mod simulate;
pub mod table;
pub mod transition;

pub use errors::EngineError;
pub use hazard::{HazardCurve, HazardInversion, ProfileHazards};
pub use model::IllnessDeathModel;
pub use occupancy::{OccupancyCurve, StateOccupancy};
pub use profile::{CovariateProfile, ResolvedCoefficientVector};
pub use simulate::{SimulationConfig, TrajectorySimulator};
pub use transition::{State, Transition};
