use crate::errors::{EngineError, validate_evaluation_times};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of transition data in counting-process form: at risk on
/// `(start, stop]`, with `event = 1` when the transition happened at `stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStopRecord {
    pub start: f64,
    pub stop: f64,
    pub event: u8,
    pub study: String,
    #[serde(default)]
    pub covariates: BTreeMap<String, String>,
}

impl StartStopRecord {
    pub fn new(start: f64, stop: f64, event: u8, study: impl Into<String>) -> Self {
        Self {
            start,
            stop,
            event,
            study: study.into(),
            covariates: BTreeMap::new(),
        }
    }

    fn validate(&self, index: usize) -> Result<(), EngineError> {
        let invalid = |reason: String| EngineError::InvalidRecord { index, reason };
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(invalid(format!("start {} must be finite and >= 0", self.start)));
        }
        if !self.stop.is_finite() || self.stop <= self.start {
            return Err(invalid(format!(
                "stop {} must be finite and greater than start {}",
                self.stop, self.start
            )));
        }
        if self.event > 1 {
            return Err(invalid(format!("event must be 0 or 1, got {}", self.event)));
        }
        Ok(())
    }
}

/// At-risk and event counts at one time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskSetRow {
    pub at_risk: usize,
    pub cumulative_events: usize,
}

/// Counts over a fixed set of start-stop records, answered by binary search.
#[derive(Debug, Clone)]
pub struct RiskSetCounter {
    starts: Vec<f64>,
    stops: Vec<f64>,
    event_stops: Vec<f64>,
}

impl RiskSetCounter {
    pub fn new(records: &[StartStopRecord]) -> Result<Self, EngineError> {
        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        Ok(Self::from_valid(records.iter()))
    }

    /// Counter restricted to the records of one study.
    pub fn for_study(records: &[StartStopRecord], study: &str) -> Result<Self, EngineError> {
        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        let counter = Self::from_valid(records.iter().filter(|r| r.study == study));
        debug!(
            "Study {study}: {} of {} records",
            counter.total_records(),
            records.len()
        );
        Ok(counter)
    }

    /// One counter per study label, in label order.
    pub fn by_study(
        records: &[StartStopRecord],
    ) -> Result<BTreeMap<String, RiskSetCounter>, EngineError> {
        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        let mut groups: BTreeMap<String, Vec<&StartStopRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.study.clone()).or_default().push(record);
        }
        Ok(groups
            .into_iter()
            .map(|(study, group)| (study, Self::from_valid(group.into_iter())))
            .collect())
    }

    fn from_valid<'r>(records: impl Iterator<Item = &'r StartStopRecord>) -> Self {
        let mut starts = Vec::new();
        let mut stops = Vec::new();
        let mut event_stops = Vec::new();
        for record in records {
            starts.push(record.start);
            stops.push(record.stop);
            if record.event == 1 {
                event_stops.push(record.stop);
            }
        }
        starts.sort_by(f64::total_cmp);
        stops.sort_by(f64::total_cmp);
        event_stops.sort_by(f64::total_cmp);
        Self {
            starts,
            stops,
            event_stops,
        }
    }

    /// Records with `start <= t < stop`.
    pub fn at_risk(&self, t: f64) -> usize {
        let started = self.starts.partition_point(|&s| s <= t);
        let stopped = self.stops.partition_point(|&s| s <= t);
        started - stopped
    }

    /// Records with `event = 1` and `stop <= t`.
    pub fn cumulative_events(&self, t: f64) -> usize {
        self.event_stops.partition_point(|&s| s <= t)
    }

    #[inline]
    pub fn total_records(&self) -> usize {
        self.starts.len()
    }

    #[inline]
    pub fn total_events(&self) -> usize {
        self.event_stops.len()
    }

    pub fn tabulate(&self, times: &[f64]) -> Result<Vec<RiskSetRow>, EngineError> {
        validate_evaluation_times(times)?;
        Ok(times
            .iter()
            .map(|&t| RiskSetRow {
                at_risk: self.at_risk(t),
                cumulative_events: self.cumulative_events(t),
            })
            .collect())
    }
}
