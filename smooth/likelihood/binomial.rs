//! Binomial proportions: successes out of a number of trials per interval.

use super::{
    AggregationError, CellStatistics, GridAggregate, LikelihoodFamily, check_time,
    locate_or_reject,
};
use crate::grid::TimeGrid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinomialRecord {
    pub time: f64,
    pub trials: u64,
    pub successes: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BinomialData {
    pub records: Vec<BinomialRecord>,
}

impl BinomialData {
    pub fn new(records: Vec<BinomialRecord>) -> Self {
        Self { records }
    }
}

impl GridAggregate for BinomialData {
    fn family(&self) -> LikelihoodFamily {
        LikelihoodFamily::Binomial
    }

    fn validate(&self) -> Result<(), AggregationError> {
        for record in &self.records {
            check_time(record.time, "observation time")?;
            if record.successes > record.trials {
                return Err(AggregationError::InvalidObservation(format!(
                    "{} successes exceed {} trials at t = {}",
                    record.successes, record.trials, record.time
                )));
            }
        }
        Ok(())
    }

    fn informative_times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.time).collect()
    }

    fn max_time(&self) -> f64 {
        self.records.iter().map(|r| r.time).fold(0.0, f64::max)
    }

    fn aggregate_cells(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError> {
        let mut cells = vec![
            CellStatistics::Binomial {
                successes: 0,
                trials: 0
            };
            grid.cells()
        ];
        for record in &self.records {
            let index = locate_or_reject(grid, record.time)?;
            if let CellStatistics::Binomial { successes, trials } = &mut cells[index] {
                *successes += record.successes;
                *trials += record.trials;
            }
        }
        Ok(cells)
    }
}
