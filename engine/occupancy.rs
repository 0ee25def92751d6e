use crate::matrix::TransitionProbabilityMatrix;
use crate::transition::State;
use serde::{Deserialize, Serialize};

/// Probability of occupying each state at one time, starting from `Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateOccupancy {
    pub healthy: f64,
    pub relapsed: f64,
    pub dead: f64,
}

impl StateOccupancy {
    /// Everyone starts healthy.
    pub const fn initial() -> Self {
        Self {
            healthy: 1.0,
            relapsed: 0.0,
            dead: 0.0,
        }
    }

    pub fn from_array(values: [f64; 3]) -> Self {
        Self {
            healthy: values[0],
            relapsed: values[1],
            dead: values[2],
        }
    }

    #[inline]
    pub fn as_array(&self) -> [f64; 3] {
        [self.healthy, self.relapsed, self.dead]
    }

    #[inline]
    pub fn get(&self, state: State) -> f64 {
        self.as_array()[state.index()]
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.healthy + self.relapsed + self.dead
    }
}

/// Occupancy probabilities at a list of ascending evaluation times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyCurve {
    times: Vec<f64>,
    values: Vec<StateOccupancy>,
}

impl OccupancyCurve {
    pub(crate) fn new(times: Vec<f64>, values: Vec<StateOccupancy>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        Self { times, values }
    }

    /// First rows of closed-form matrices, i.e. occupancy starting healthy.
    pub fn from_matrices(matrices: &[TransitionProbabilityMatrix]) -> Self {
        Self {
            times: matrices.iter().map(TransitionProbabilityMatrix::time).collect(),
            values: matrices
                .iter()
                .map(TransitionProbabilityMatrix::occupancy_from_healthy)
                .collect(),
        }
    }

    #[inline]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[inline]
    pub fn values(&self) -> &[StateOccupancy] {
        &self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &StateOccupancy)> {
        self.times.iter().copied().zip(self.values.iter())
    }

    /// Expected time spent in each state over `[0, horizon]`.
    ///
    /// The curve is read as a step function: each value holds from its time
    /// until the next evaluation time, the last value holds to the horizon,
    /// and the initial occupancy holds before the first evaluation time.
    pub fn restricted_mean_time(&self, horizon: f64) -> StateOccupancy {
        let mut totals = [0.0; 3];
        let mut current = StateOccupancy::initial().as_array();
        let mut previous = 0.0;
        for (time, value) in self.iter() {
            if time >= horizon {
                break;
            }
            let width = time - previous;
            if width > 0.0 {
                for (total, occupancy) in totals.iter_mut().zip(current) {
                    *total += width * occupancy;
                }
                previous = time;
            }
            current = value.as_array();
        }
        let width = horizon - previous;
        if width > 0.0 {
            for (total, occupancy) in totals.iter_mut().zip(current) {
                *total += width * occupancy;
            }
        }
        StateOccupancy::from_array(totals)
    }
}
