//! # Likelihood Aggregation
//!
//! Maps raw observations onto a [`TimeGrid`] and reduces them to per-cell
//! sufficient statistics. Each observation shape lives in its own submodule and
//! implements [`GridAggregate`]; [`Observations`] is the closed sum type that
//! the rest of the crate works with.

pub mod binomial;
pub mod coalescent;
pub mod count;
pub mod survival;

pub use binomial::{BinomialData, BinomialRecord};
pub use coalescent::CoalescentData;
pub use count::{CountData, CountRecord};
pub use survival::{SurvivalData, SurvivalRecord};

use crate::grid::{GridBuilder, GridError, TimeGrid};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Substituted for a zero event or success count when forming the skyline estimate.
pub const NAIVE_COUNT_FLOOR: f64 = 0.5;

/// Errors surfaced while validating observations or mapping them onto a grid.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Grid cell {cell} has no statistical support: {reason}")]
    InvalidGrid { cell: usize, reason: &'static str },
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),
    #[error("Observation at time {time} lies outside the grid.")]
    OutOfGrid { time: f64 },
    #[error("Aggregation produced {found} cells but the grid has {expected}.")]
    CellCountMismatch { expected: usize, found: usize },
}

/// Observation process linking the latent trajectory to the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikelihoodFamily {
    /// Coalescent times of a genealogy; the trajectory is effective population size.
    Coalescent,
    /// Poisson counts with exposure; the trajectory is an event rate.
    Count,
    /// Binomial successes out of trials; the trajectory is a probability.
    Binomial,
    /// Right-censored, optionally left-truncated event times; the trajectory is a hazard.
    Survival,
}

impl LikelihoodFamily {
    pub fn tag(self) -> &'static str {
        match self {
            LikelihoodFamily::Coalescent => "coalescent",
            LikelihoodFamily::Count => "count",
            LikelihoodFamily::Binomial => "binomial",
            LikelihoodFamily::Survival => "survival",
        }
    }

    /// Link between the trajectory and the unconstrained field parameter.
    pub fn link(self) -> Link {
        match self {
            LikelihoodFamily::Binomial => Link::Logit,
            LikelihoodFamily::Coalescent | LikelihoodFamily::Count | LikelihoodFamily::Survival => {
                Link::Log
            }
        }
    }

    fn support_reason(self) -> &'static str {
        match self {
            LikelihoodFamily::Coalescent => "no surviving lineage pairs (zero opportunity)",
            LikelihoodFamily::Count => "no exposure",
            LikelihoodFamily::Binomial => "zero trials",
            LikelihoodFamily::Survival => "no person-time at risk",
        }
    }
}

impl fmt::Display for LikelihoodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Link function of a likelihood family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    Log,
    Logit,
}

impl Link {
    /// Maps the trajectory scale onto the field scale.
    #[inline]
    pub fn forward(self, value: f64) -> f64 {
        match self {
            Link::Log => value.ln(),
            Link::Logit => (value / (1.0 - value)).ln(),
        }
    }

    /// Maps a field value back onto the trajectory scale.
    #[inline]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Link::Log => eta.exp(),
            Link::Logit => {
                if eta >= 0.0 {
                    1.0 / (1.0 + (-eta).exp())
                } else {
                    let e = eta.exp();
                    e / (1.0 + e)
                }
            }
        }
    }
}

/// Sufficient statistics of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum CellStatistics {
    /// Coalescent events in the cell and the integral of `C(n) = n(n-1)/2` over it.
    Coalescent { events: usize, opportunity: f64 },
    Count { events: u64, exposure: f64 },
    Binomial { successes: u64, trials: u64 },
    Survival {
        at_risk: usize,
        events: usize,
        exposure: f64,
    },
}

impl CellStatistics {
    pub fn family(&self) -> LikelihoodFamily {
        match self {
            CellStatistics::Coalescent { .. } => LikelihoodFamily::Coalescent,
            CellStatistics::Count { .. } => LikelihoodFamily::Count,
            CellStatistics::Binomial { .. } => LikelihoodFamily::Binomial,
            CellStatistics::Survival { .. } => LikelihoodFamily::Survival,
        }
    }

    /// Opportunity, exposure or trial count backing the cell.
    pub fn support(&self) -> f64 {
        match *self {
            CellStatistics::Coalescent { opportunity, .. } => opportunity,
            CellStatistics::Count { exposure, .. } => exposure,
            CellStatistics::Binomial { trials, .. } => trials as f64,
            CellStatistics::Survival { exposure, .. } => exposure,
        }
    }

    /// Number of events (successes for binomial cells).
    pub fn events(&self) -> f64 {
        match *self {
            CellStatistics::Coalescent { events, .. } => events as f64,
            CellStatistics::Count { events, .. } => events as f64,
            CellStatistics::Binomial { successes, .. } => successes as f64,
            CellStatistics::Survival { events, .. } => events as f64,
        }
    }

    /// Skyline estimate of the trajectory on the link scale.
    ///
    /// Zero counts are floored at [`NAIVE_COUNT_FLOOR`] so the estimate stays
    /// finite whenever the cell has support.
    pub fn naive_estimate(&self) -> f64 {
        let floored = self.events().max(NAIVE_COUNT_FLOOR);
        match *self {
            CellStatistics::Coalescent { opportunity, .. } => (opportunity / floored).ln(),
            CellStatistics::Count { exposure, .. } | CellStatistics::Survival { exposure, .. } => {
                (floored / exposure).ln()
            }
            CellStatistics::Binomial { trials, .. } => {
                let trials = trials as f64;
                let successes = floored.min(trials - NAIVE_COUNT_FLOOR);
                Link::Logit.forward(successes / trials)
            }
        }
    }
}

/// Capability shared by every observation shape: it can be mapped onto a grid.
pub trait GridAggregate {
    fn family(&self) -> LikelihoodFamily;

    /// Checks record-level invariants.
    fn validate(&self) -> Result<(), AggregationError>;

    /// Times of the events that carry signal about the trajectory.
    fn informative_times(&self) -> Vec<f64>;

    /// Largest time present anywhere in the data.
    fn max_time(&self) -> f64;

    /// Per-cell statistics in grid order, without support checks.
    fn aggregate_cells(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError>;

    /// Validates, aggregates and checks that every cell is present and supported.
    fn aggregate(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError> {
        self.validate()?;
        let cells = self.aggregate_cells(grid)?;
        check_cells(grid, &cells)?;
        Ok(cells)
    }
}

fn check_cells(grid: &TimeGrid, cells: &[CellStatistics]) -> Result<(), AggregationError> {
    if cells.len() != grid.cells() {
        return Err(AggregationError::CellCountMismatch {
            expected: grid.cells(),
            found: cells.len(),
        });
    }
    for (index, cell) in cells.iter().enumerate() {
        let support = cell.support();
        if !support.is_finite() || support <= 0.0 {
            return Err(AggregationError::InvalidGrid {
                cell: index,
                reason: cell.family().support_reason(),
            });
        }
    }
    Ok(())
}

fn locate_or_reject(grid: &TimeGrid, time: f64) -> Result<usize, AggregationError> {
    grid.locate(time)
        .ok_or(AggregationError::OutOfGrid { time })
}

fn check_time(time: f64, what: &str) -> Result<(), AggregationError> {
    if !time.is_finite() || time < 0.0 {
        return Err(AggregationError::InvalidObservation(format!(
            "{what} must be finite and non-negative, got {time}"
        )));
    }
    Ok(())
}

/// A complete observation set of one of the supported shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum Observations {
    Coalescent(CoalescentData),
    Count(CountData),
    Binomial(BinomialData),
    Survival(SurvivalData),
}

impl Observations {
    fn inner(&self) -> &dyn GridAggregate {
        match self {
            Observations::Coalescent(data) => data,
            Observations::Count(data) => data,
            Observations::Binomial(data) => data,
            Observations::Survival(data) => data,
        }
    }

    pub fn family(&self) -> LikelihoodFamily {
        self.inner().family()
    }

    pub fn validate(&self) -> Result<(), AggregationError> {
        self.inner().validate()
    }

    pub fn informative_times(&self) -> Vec<f64> {
        self.inner().informative_times()
    }

    pub fn max_time(&self) -> f64 {
        self.inner().max_time()
    }

    /// Builds a grid from this dataset's informative events.
    pub fn build_grid(&self, builder: &GridBuilder) -> Result<TimeGrid, GridError> {
        builder.build(&self.informative_times(), self.max_time())
    }

    pub fn aggregate(&self, grid: &TimeGrid) -> Result<Vec<CellStatistics>, AggregationError> {
        self.inner().aggregate(grid)
    }
}
