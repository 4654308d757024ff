//! Survival observations with right censoring and optional left truncation.
//!
//! Under a piecewise-constant hazard the likelihood contribution of a cell
//! depends on the data only through the number of events in the cell and the
//! person-time spent at risk inside it.

use super::{
    AggregationError, CellStatistics, GridAggregate, LikelihoodFamily, check_time,
    locate_or_reject,
};
use crate::grid::TimeGrid;
use serde::{Deserialize, Serialize};

/// One individual followed from `entry` until an event or censoring at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalRecord {
    pub time: f64,
    pub event: bool,
    #[serde(default)]
    pub entry: f64,
}

impl SurvivalRecord {
    pub fn observed(time: f64) -> Self {
        Self {
            time,
            event: true,
            entry: 0.0,
        }
    }

    pub fn censored(time: f64) -> Self {
        Self {
            time,
            event: false,
            entry: 0.0,
        }
    }

    pub fn entering_at(mut self, entry: f64) -> Self {
        self.entry = entry;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SurvivalData {
    pub records: Vec<SurvivalRecord>,
}

impl SurvivalData {
    pub fn new(records: Vec<SurvivalRecord>) -> Self {
        Self { records }
    }

    pub fn total_events(&self) -> usize {
        self.records.iter().filter(|r| r.event).count()
    }
}

impl GridAggregate for SurvivalData {
    fn family(&self) -> LikelihoodFamily {
        LikelihoodFamily::Survival
    }

    fn validate(&self) -> Result<(), AggregationError> {
        for record in &self.records {
            check_time(record.time, "event/censoring time")?;
            check_time(record.entry, "entry time")?;
            if record.entry >= record.time {
                return Err(AggregationError::InvalidObservation(format!(
                    "entry time {} must precede exit time {}",
                    record.entry, record.time
                )));
            }
        }
        Ok(())
    }

    fn informative_times(&self) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.event)
            .map(|r| r.time)
            .collect()
    }

    fn max_time(&self) -> f64 {
        self.records.iter().map(|r| r.time).fold(0.0, f64::max)
    }

    fn aggregate_cells(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError> {
        let mut at_risk = vec![0usize; grid.cells()];
        let mut events = vec![0usize; grid.cells()];
        let mut exposure = vec![0.0f64; grid.cells()];

        for record in &self.records {
            if record.event {
                events[locate_or_reject(grid, record.time)?] += 1;
            }
            for cell in 0..grid.cells() {
                let (lower, upper) = grid.cell_bounds(cell);
                if record.entry < upper && record.time > lower {
                    at_risk[cell] += 1;
                    exposure[cell] += grid.overlap(cell, record.entry, record.time);
                }
            }
        }

        Ok((0..grid.cells())
            .map(|cell| CellStatistics::Survival {
                at_risk: at_risk[cell],
                events: events[cell],
                exposure: exposure[cell],
            })
            .collect())
    }
}
