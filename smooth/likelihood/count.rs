//! Poisson counts observed over intervals of known exposure.

use super::{
    AggregationError, CellStatistics, GridAggregate, LikelihoodFamily, check_time,
    locate_or_reject,
};
use crate::grid::TimeGrid;
use serde::{Deserialize, Serialize};

/// Events observed at `time` over an interval of length `exposure`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountRecord {
    pub time: f64,
    pub exposure: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CountData {
    pub records: Vec<CountRecord>,
}

impl CountData {
    pub fn new(records: Vec<CountRecord>) -> Self {
        Self { records }
    }

    pub fn total_events(&self) -> u64 {
        self.records.iter().map(|r| r.count).sum()
    }
}

impl GridAggregate for CountData {
    fn family(&self) -> LikelihoodFamily {
        LikelihoodFamily::Count
    }

    fn validate(&self) -> Result<(), AggregationError> {
        for record in &self.records {
            check_time(record.time, "observation time")?;
            if !record.exposure.is_finite() || record.exposure <= 0.0 {
                return Err(AggregationError::InvalidObservation(format!(
                    "exposure must be positive, got {} at t = {}",
                    record.exposure, record.time
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
        let mut events = vec![0u64; grid.cells()];
        let mut exposure = vec![0.0f64; grid.cells()];
        for record in &self.records {
            let cell = locate_or_reject(grid, record.time)?;
            events[cell] += record.count;
            exposure[cell] += record.exposure;
        }
        Ok(events
            .into_iter()
            .zip(exposure)
            .map(|(events, exposure)| CellStatistics::Count { events, exposure })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record(time: f64, exposure: f64, count: u64) -> CountRecord {
        CountRecord {
            time,
            exposure,
            count,
        }
    }

    #[test]
    fn sums_counts_and_exposure_per_cell() {
        let data = CountData::new(vec![
            record(0.5, 1.0, 3),
            record(1.5, 1.0, 0),
            record(2.5, 0.5, 7),
            record(3.0, 0.5, 1),
        ]);
        let grid = TimeGrid::equal_width(4.0, 2).unwrap();
        let cells = data.aggregate(&grid).unwrap();
        assert_eq!(
            cells[0],
            CellStatistics::Count {
                events: 3,
                exposure: 2.0
            }
        );
        assert_eq!(cells[1].events(), 8.0);
        assert_abs_diff_eq!(cells[1].support(), 1.0);
        let total: f64 = cells.iter().map(CellStatistics::events).sum();
        assert_eq!(total as u64, data.total_events());
    }

    #[test]
    fn empty_cell_is_invalid_grid() {
        let data = CountData::new(vec![record(0.5, 1.0, 3), record(3.5, 1.0, 2)]);
        let grid = TimeGrid::equal_width(4.0, 4).unwrap();
        assert!(matches!(
            data.aggregate(&grid),
            Err(AggregationError::InvalidGrid { cell: 1, .. })
        ));
    }

    #[test]
    fn non_positive_exposure_is_rejected() {
        let data = CountData::new(vec![record(0.5, 0.0, 3)]);
        assert!(matches!(
            data.validate(),
            Err(AggregationError::InvalidObservation(_))
        ));
    }
}
