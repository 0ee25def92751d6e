use crate::errors::{EngineError, validate_evaluation_times};
use crate::hazard::{HazardInversion, ProfileHazards};
use crate::occupancy::{OccupancyCurve, StateOccupancy};
use crate::transition::{State, Transition};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time scale on which the 2->3 hazard is read after a relapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockScale {
    /// Semi-Markov: the 2->3 curve is indexed by time since relapse.
    #[default]
    Reset,
    /// Markov: the 2->3 curve is indexed by time since origin, starting from
    /// its value at the relapse time.
    Forward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub replicates: usize,
    pub seed: u64,
    /// Events after this time are censored.
    pub horizon: Option<f64>,
    pub clock: ClockScale,
    /// Replicates per parallel work unit. Each block owns one random stream.
    pub block_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            replicates: 10_000,
            seed: 42,
            horizon: None,
            clock: ClockScale::Reset,
            block_size: 4096,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.replicates == 0 {
            return Err(EngineError::InvalidSimulationConfig(
                "replicates must be positive".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(EngineError::InvalidSimulationConfig(
                "block_size must be positive".to_string(),
            ));
        }
        if let Some(horizon) = self.horizon {
            if !horizon.is_finite() || horizon <= 0.0 {
                return Err(EngineError::InvalidSimulationConfig(format!(
                    "horizon must be finite and positive, got {horizon}"
                )));
            }
        }
        Ok(())
    }
}

/// Route taken by one simulated subject within the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathLabel {
    StayHealthy,
    DirectDeath,
    RelapseThenDeath,
    /// Relapsed, but death after relapse was not reached within the horizon.
    RelapseCensored,
}

impl PathLabel {
    pub const ALL: [PathLabel; 4] = [
        PathLabel::StayHealthy,
        PathLabel::DirectDeath,
        PathLabel::RelapseThenDeath,
        PathLabel::RelapseCensored,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            PathLabel::StayHealthy => 0,
            PathLabel::DirectDeath => 1,
            PathLabel::RelapseThenDeath => 2,
            PathLabel::RelapseCensored => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PathLabel::StayHealthy => "stay-healthy",
            PathLabel::DirectDeath => "direct-death",
            PathLabel::RelapseThenDeath => "relapse-then-death",
            PathLabel::RelapseCensored => "relapse-censored",
        }
    }
}

impl fmt::Display for PathLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Event times of one replicate. `None` means the event was not reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedTrajectory {
    relapse_time: Option<f64>,
    death_time: Option<f64>,
}

impl SimulatedTrajectory {
    #[inline]
    pub fn relapse_time(&self) -> Option<f64> {
        self.relapse_time
    }

    #[inline]
    pub fn death_time(&self) -> Option<f64> {
        self.death_time
    }

    pub fn path(&self) -> PathLabel {
        match (self.relapse_time, self.death_time) {
            (None, None) => PathLabel::StayHealthy,
            (None, Some(_)) => PathLabel::DirectDeath,
            (Some(_), Some(_)) => PathLabel::RelapseThenDeath,
            (Some(_), None) => PathLabel::RelapseCensored,
        }
    }

    /// State occupied at `t`; an event at exactly `t` has already happened.
    pub fn state_at(&self, t: f64) -> State {
        if self.death_time.is_some_and(|d| d <= t) {
            State::Dead
        } else if self.relapse_time.is_some_and(|r| r <= t) {
            State::Relapsed
        } else {
            State::Healthy
        }
    }

    /// Time the subject first leaves `Healthy`, if it does.
    fn exit_time(&self) -> Option<f64> {
        self.relapse_time.or(self.death_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathCounts {
    counts: [u64; 4],
}

impl PathCounts {
    #[inline]
    pub fn get(&self, label: PathLabel) -> u64 {
        self.counts[label.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn fraction(&self, label: PathLabel) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.get(label) as f64 / total as f64
        }
    }

    fn record(&mut self, label: PathLabel) {
        self.counts[label.index()] += 1;
    }

    fn merge(&mut self, other: &PathCounts) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
    }
}

/// Monte Carlo estimate of state occupancy plus path tallies.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    occupancy: OccupancyCurve,
    paths: PathCounts,
    replicates: usize,
}

impl SimulationSummary {
    #[inline]
    pub fn occupancy(&self) -> &OccupancyCurve {
        &self.occupancy
    }

    #[inline]
    pub fn paths(&self) -> &PathCounts {
        &self.paths
    }

    #[inline]
    pub fn replicates(&self) -> usize {
        self.replicates
    }
}

/// Source of independent random streams, one per replicate block.
pub trait RandomStreams: Sync {
    type Stream: Rng;

    fn stream(&self, block: usize) -> Self::Stream;
}

/// `StdRng` streams derived from a base seed and the block index, so the
/// outcome does not depend on how blocks are scheduled across threads.
#[derive(Debug, Clone, Copy)]
pub struct SeededStreams {
    seed: u64,
}

impl SeededStreams {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl RandomStreams for SeededStreams {
    type Stream = StdRng;

    fn stream(&self, block: usize) -> StdRng {
        let offset = (block as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(self.seed ^ offset)
    }
}

/// Per-block integer tallies. Occupancy is rebuilt from these so merged
/// results are exact regardless of block order.
#[derive(Debug, Clone)]
struct Tally {
    exits: Vec<u64>,
    deaths: Vec<u64>,
    paths: PathCounts,
    replicates: usize,
}

impl Tally {
    fn new(times: usize) -> Self {
        Self {
            exits: vec![0; times + 1],
            deaths: vec![0; times + 1],
            paths: PathCounts::default(),
            replicates: 0,
        }
    }

    fn record(&mut self, trajectory: &SimulatedTrajectory, times: &[f64]) {
        // First evaluation index at which the event is visible.
        let visible_from = |event: f64| times.partition_point(|&t| t < event);
        if let Some(exit) = trajectory.exit_time() {
            self.exits[visible_from(exit)] += 1;
        }
        if let Some(death) = trajectory.death_time() {
            self.deaths[visible_from(death)] += 1;
        }
        self.paths.record(trajectory.path());
        self.replicates += 1;
    }

    fn merge(&mut self, other: &Tally) {
        for (mine, theirs) in self.exits.iter_mut().zip(&other.exits) {
            *mine += theirs;
        }
        for (mine, theirs) in self.deaths.iter_mut().zip(&other.deaths) {
            *mine += theirs;
        }
        self.paths.merge(&other.paths);
        self.replicates += other.replicates;
    }

    fn into_summary(self, times: &[f64]) -> SimulationSummary {
        let n = self.replicates as f64;
        let mut exited = 0u64;
        let mut dead = 0u64;
        let values = (0..times.len())
            .map(|idx| {
                exited += self.exits[idx];
                dead += self.deaths[idx];
                let healthy = self.replicates as u64 - exited;
                let relapsed = exited - dead;
                StateOccupancy {
                    healthy: healthy as f64 / n,
                    relapsed: relapsed as f64 / n,
                    dead: dead as f64 / n,
                }
            })
            .collect();
        SimulationSummary {
            occupancy: OccupancyCurve::new(times.to_vec(), values),
            paths: self.paths,
            replicates: self.replicates,
        }
    }
}

/// Draws illness-death trajectories by inverting the three cumulative hazards.
#[derive(Debug, Clone)]
pub struct TrajectorySimulator<'a> {
    hazards: &'a ProfileHazards,
    config: SimulationConfig,
}

impl<'a> TrajectorySimulator<'a> {
    pub fn new(hazards: &'a ProfileHazards, config: SimulationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { hazards, config })
    }

    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// One replicate. Consumes two exponential draws, plus a third when the
    /// subject relapses.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> SimulatedTrajectory {
        let relapse_draw: f64 = rng.sample(Exp1);
        let direct_death_draw: f64 = rng.sample(Exp1);
        let relapse = self.event_time(
            self.hazards
                .curve(Transition::Relapse)
                .invert(relapse_draw),
        );
        let direct_death = self.event_time(
            self.hazards
                .curve(Transition::DirectDeath)
                .invert(direct_death_draw),
        );

        if relapse < direct_death {
            let death_draw: f64 = rng.sample(Exp1);
            let curve = self.hazards.curve(Transition::DeathAfterRelapse);
            let death = match self.config.clock {
                ClockScale::Reset => curve.invert(death_draw).time().map(|d| relapse + d),
                ClockScale::Forward => curve.invert_from(relapse, death_draw).time(),
            };
            SimulatedTrajectory {
                relapse_time: Some(relapse),
                death_time: death.filter(|&t| self.within_horizon(t)),
            }
        } else if direct_death.is_finite() {
            SimulatedTrajectory {
                relapse_time: None,
                death_time: Some(direct_death),
            }
        } else {
            SimulatedTrajectory {
                relapse_time: None,
                death_time: None,
            }
        }
    }

    /// Runs every replicate on the caller's generator, in order, on the current thread.
    pub fn simulate_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        times: &[f64],
    ) -> Result<SimulationSummary, EngineError> {
        validate_evaluation_times(times)?;
        let mut tally = Tally::new(times.len());
        for _ in 0..self.config.replicates {
            let trajectory = self.draw(rng);
            tally.record(&trajectory, times);
        }
        let summary = tally.into_summary(times);
        self.log_summary(&summary);
        Ok(summary)
    }

    /// Parallel run with one `StdRng` stream per block, seeded from the config.
    pub fn simulate(&self, times: &[f64]) -> Result<SimulationSummary, EngineError> {
        self.simulate_with_streams(&SeededStreams::new(self.config.seed), times)
    }

    /// Parallel run over fixed-size replicate blocks. Block tallies are merged
    /// in block order, so the result depends only on the streams and the config.
    pub fn simulate_with_streams<S: RandomStreams>(
        &self,
        streams: &S,
        times: &[f64],
    ) -> Result<SimulationSummary, EngineError> {
        validate_evaluation_times(times)?;
        let replicates = self.config.replicates;
        let block_size = self.config.block_size;
        let blocks = replicates.div_ceil(block_size);
        info!(
            "Simulating {replicates} trajectories for profile [{}] in {blocks} blocks (seed {}, clock {:?})",
            self.hazards.profile(),
            self.config.seed,
            self.config.clock
        );

        let tallies: Vec<Tally> = (0..blocks)
            .into_par_iter()
            .map(|block| {
                let start = block * block_size;
                let count = block_size.min(replicates - start);
                let mut rng = streams.stream(block);
                let mut tally = Tally::new(times.len());
                for _ in 0..count {
                    let trajectory = self.draw(&mut rng);
                    tally.record(&trajectory, times);
                }
                tally
            })
            .collect();

        let mut merged = Tally::new(times.len());
        for tally in &tallies {
            merged.merge(tally);
        }
        let summary = merged.into_summary(times);
        self.log_summary(&summary);
        Ok(summary)
    }

    fn within_horizon(&self, t: f64) -> bool {
        self.config.horizon.is_none_or(|h| t <= h)
    }

    /// Reached inversions inside the horizon become event times, all else is infinity.
    fn event_time(&self, inversion: HazardInversion) -> f64 {
        match inversion {
            HazardInversion::Reached(t) if self.within_horizon(t) => t,
            _ => f64::INFINITY,
        }
    }

    fn log_summary(&self, summary: &SimulationSummary) {
        let paths = summary.paths();
        info!(
            "Simulation finished: {} replicates, {}",
            summary.replicates(),
            PathLabel::ALL
                .iter()
                .map(|&label| format!("{label}={}", paths.get(label)))
                .collect::<Vec<_>>()
                .join(", ")
        );
        debug!(
            "Final occupancy {:?}",
            summary.occupancy().values().last().map(StateOccupancy::as_array)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::test_support::linear_hazards;
    use approx::assert_abs_diff_eq;

    fn config(replicates: usize) -> SimulationConfig {
        SimulationConfig {
            replicates,
            block_size: 256,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn config_rejects_empty_runs() {
        assert!(SimulationConfig::default().validate().is_ok());
        assert!(config(0).validate().is_err());
        let bad_horizon = SimulationConfig {
            horizon: Some(f64::NAN),
            ..SimulationConfig::default()
        };
        assert!(bad_horizon.validate().is_err());
    }

    #[test]
    fn zero_hazards_never_leave_healthy() {
        let hazards = linear_hazards([0.0, 0.0, 0.0], 5.0, 5);
        let simulator = TrajectorySimulator::new(&hazards, config(500)).unwrap();
        let summary = simulator.simulate(&[0.0, 1.0, 10.0]).unwrap();
        for (_, value) in summary.occupancy().iter() {
            assert_eq!(value.as_array(), [1.0, 0.0, 0.0]);
        }
        assert_eq!(summary.paths().get(PathLabel::StayHealthy), 500);
    }

    #[test]
    fn occupancy_partitions_replicates() {
        let hazards = linear_hazards([0.3, 0.1, 0.4], 8.0, 80);
        let simulator = TrajectorySimulator::new(&hazards, config(2000)).unwrap();
        let summary = simulator.simulate(&[0.0, 0.5, 2.0, 4.0, 8.0]).unwrap();
        assert_eq!(summary.replicates(), 2000);
        assert_eq!(summary.paths().total(), 2000);
        for (_, value) in summary.occupancy().iter() {
            assert_abs_diff_eq!(value.total(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(summary.occupancy().values()[0], StateOccupancy::initial());
    }

    #[test]
    fn parallel_runs_do_not_depend_on_thread_count() {
        let hazards = linear_hazards([0.3, 0.1, 0.4], 8.0, 80);
        let simulator = TrajectorySimulator::new(&hazards, config(3000)).unwrap();
        let times = [1.0, 3.0, 6.0];
        let run_on = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| simulator.simulate(&times))
                .unwrap()
        };
        let single = run_on(1);
        assert_eq!(single, run_on(4));
        assert_eq!(single, simulator.simulate(&times).unwrap());
    }

    #[test]
    fn injected_rng_drives_sequential_run() {
        let hazards = linear_hazards([0.3, 0.1, 0.4], 8.0, 80);
        let simulator = TrajectorySimulator::new(&hazards, config(1000)).unwrap();
        let times = [2.0, 5.0];
        let a = simulator
            .simulate_with_rng(&mut StdRng::seed_from_u64(7), &times)
            .unwrap();
        let b = simulator
            .simulate_with_rng(&mut StdRng::seed_from_u64(7), &times)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trajectories_are_consistent() {
        let hazards = linear_hazards([0.5, 0.2, 0.5], 6.0, 60);
        let simulator = TrajectorySimulator::new(&hazards, config(1)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let trajectory = simulator.draw(&mut rng);
            if let (Some(relapse), Some(death)) = (trajectory.relapse_time(), trajectory.death_time())
            {
                assert!(relapse < death);
                assert_eq!(trajectory.state_at(relapse), State::Relapsed);
                assert_eq!(trajectory.path(), PathLabel::RelapseThenDeath);
            }
            if let Some(death) = trajectory.death_time() {
                assert_eq!(trajectory.state_at(death), State::Dead);
            }
            assert_eq!(trajectory.state_at(-1.0), State::Healthy);
        }
    }

    #[test]
    fn horizon_censors_late_events() {
        let hazards = linear_hazards([0.5, 0.5, 0.5], 10.0, 100);
        let config = SimulationConfig {
            replicates: 400,
            horizon: Some(1.0),
            block_size: 64,
            ..SimulationConfig::default()
        };
        let simulator = TrajectorySimulator::new(&hazards, config).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..400 {
            let trajectory = simulator.draw(&mut rng);
            assert!(trajectory.relapse_time().is_none_or(|t| t <= 1.0));
            assert!(trajectory.death_time().is_none_or(|t| t <= 1.0));
        }
    }
}
