//! Coalescent (phylodynamic) observations.
//!
//! Lineages enter backwards in time at sampling events and leave at
//! coalescent events. Between events the number of lineages `n` is constant
//! and pairs coalesce at rate `C(n) / Ne(t)` with `C(n) = n(n-1)/2`, so the
//! per-cell sufficient statistics are the number of coalescent events and the
//! integral of `C(n)` over the cell.

use super::{
    AggregationError, CellStatistics, GridAggregate, LikelihoodFamily, check_time,
    locate_or_reject,
};
use crate::grid::TimeGrid;
use serde::{Deserialize, Serialize};

/// Heterochronous sampling times with counts, plus the genealogy's coalescent times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalescentData {
    pub sampling_times: Vec<f64>,
    pub sampling_counts: Vec<usize>,
    pub coalescent_times: Vec<f64>,
}

/// Interval `[start, end)` with a constant number of lineages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageSegment {
    pub start: f64,
    pub end: f64,
    pub lineages: usize,
}

impl LineageSegment {
    /// Pairwise coalescence factor `C(n)`.
    pub fn pair_factor(&self) -> f64 {
        let n = self.lineages as f64;
        0.5 * n * (n - 1.0)
    }
}

impl CoalescentData {
    pub fn new(
        sampling_times: Vec<f64>,
        sampling_counts: Vec<usize>,
        coalescent_times: Vec<f64>,
    ) -> Self {
        Self {
            sampling_times,
            sampling_counts,
            coalescent_times,
        }
    }

    /// All tips sampled at the present.
    pub fn isochronous(samples: usize, coalescent_times: Vec<f64>) -> Self {
        Self::new(vec![0.0], vec![samples], coalescent_times)
    }

    pub fn total_sampled(&self) -> usize {
        self.sampling_counts.iter().sum()
    }

    /// Piecewise-constant lineage count implied by the sampling and coalescent events.
    ///
    /// Segments cover the span from the first to the last event; zero-length
    /// segments are skipped. Fails when a coalescence happens with fewer than two
    /// lineages present.
    pub fn lineage_segments(&self) -> Result<Vec<LineageSegment>, AggregationError> {
        let mut events: Vec<(f64, i64)> = self
            .sampling_times
            .iter()
            .zip(&self.sampling_counts)
            .map(|(&time, &count)| (time, count as i64))
            .chain(self.coalescent_times.iter().map(|&time| (time, -1)))
            .collect();
        // Samples entering at the same instant as a coalescence are available to it.
        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut segments = Vec::with_capacity(events.len());
        let mut lineages: i64 = 0;
        let mut previous = match events.first() {
            Some(&(time, _)) => time,
            None => return Ok(segments),
        };

        for (time, delta) in events {
            if time > previous {
                if lineages > 0 {
                    segments.push(LineageSegment {
                        start: previous,
                        end: time,
                        lineages: lineages as usize,
                    });
                }
                previous = time;
            }
            if delta < 0 && lineages < 2 {
                return Err(AggregationError::InvalidObservation(format!(
                    "coalescent event at t = {time} with only {lineages} lineage(s) present"
                )));
            }
            lineages += delta;
        }
        Ok(segments)
    }
}

impl GridAggregate for CoalescentData {
    fn family(&self) -> LikelihoodFamily {
        LikelihoodFamily::Coalescent
    }

    fn validate(&self) -> Result<(), AggregationError> {
        if self.sampling_times.is_empty() {
            return Err(AggregationError::InvalidObservation(
                "at least one sampling time is required".into(),
            ));
        }
        if self.sampling_times.len() != self.sampling_counts.len() {
            return Err(AggregationError::InvalidObservation(format!(
                "{} sampling times but {} sampling counts",
                self.sampling_times.len(),
                self.sampling_counts.len()
            )));
        }
        if self.sampling_counts.contains(&0) {
            return Err(AggregationError::InvalidObservation(
                "sampling counts must be positive".into(),
            ));
        }
        for &time in &self.sampling_times {
            check_time(time, "sampling time")?;
        }
        for &time in &self.coalescent_times {
            check_time(time, "coalescent time")?;
        }
        if self.coalescent_times.windows(2).any(|w| w[1] < w[0]) {
            return Err(AggregationError::InvalidObservation(
                "coalescent times must be sorted".into(),
            ));
        }
        let expected = self.total_sampled().saturating_sub(1);
        if self.coalescent_times.len() != expected {
            return Err(AggregationError::InvalidObservation(format!(
                "{} samples require {} coalescent events, found {}",
                self.total_sampled(),
                expected,
                self.coalescent_times.len()
            )));
        }
        self.lineage_segments().map(|_| ())
    }

    fn informative_times(&self) -> Vec<f64> {
        self.coalescent_times.clone()
    }

    fn max_time(&self) -> f64 {
        self.sampling_times
            .iter()
            .chain(&self.coalescent_times)
            .copied()
            .fold(0.0, f64::max)
    }

    fn aggregate_cells(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError> {
        let mut events = vec![0usize; grid.cells()];
        for &time in &self.coalescent_times {
            events[locate_or_reject(grid, time)?] += 1;
        }

        let mut opportunity = vec![0.0f64; grid.cells()];
        for segment in self.lineage_segments()? {
            let factor = segment.pair_factor();
            if factor == 0.0 {
                continue;
            }
            for (cell, total) in opportunity.iter_mut().enumerate() {
                let overlap = grid.overlap(cell, segment.start, segment.end);
                if overlap > 0.0 {
                    *total += factor * overlap;
                }
            }
        }

        Ok(events
            .into_iter()
            .zip(opportunity)
            .map(|(events, opportunity)| CellStatistics::Coalescent {
                events,
                opportunity,
            })
            .collect())
    }
}
