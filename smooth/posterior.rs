//! Maps engine draws of the link-scale field back onto the trajectory scale.
//!
//! Draws are kept in `[chain, draw, cell]` order exactly as the engine returned
//! them; nothing is thinned, reordered or dropped.

use crate::engine::{ChainDraws, TRAJECTORY_PARAMETER};
use crate::grid::TimeGrid;
use crate::likelihood::Link;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Posterior draws have {found} columns but the grid has {expected} cells.")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("Chain {chain} returned no draws of '{parameter}'.")]
    MissingParameter { chain: usize, parameter: String },

    #[error("Chain {chain} has {found} draws while chain 0 has {expected}.")]
    InconsistentChains {
        chain: usize,
        expected: usize,
        found: usize,
    },

    #[error("At least one chain of draws is required.")]
    NoChains,

    #[error("The {chains} chains hold no draws to summarise.")]
    NoDraws { chains: usize },

    #[error("Credible level must lie strictly between 0 and 1, got {0}.")]
    InvalidLevel(f64),
}

/// Applies the inverse link to `[draws, cells]` field draws.
pub fn extract_trajectory(
    draws: ArrayView2<f64>,
    grid: &TimeGrid,
    link: Link,
) -> Result<Array2<f64>, ExtractionError> {
    check_cells(draws.ncols(), grid)?;
    Ok(draws.mapv(|eta| link.inverse(eta)))
}

/// Applies the inverse link to `[chains, draws, cells]` field draws.
pub fn extract_by_chain(
    draws: ArrayView3<f64>,
    grid: &TimeGrid,
    link: Link,
) -> Result<Array3<f64>, ExtractionError> {
    check_cells(draws.len_of(Axis(2)), grid)?;
    Ok(draws.mapv(|eta| link.inverse(eta)))
}

fn check_cells(found: usize, grid: &TimeGrid) -> Result<(), ExtractionError> {
    if found != grid.cells() {
        return Err(ExtractionError::ShapeMismatch {
            expected: grid.cells(),
            found,
        });
    }
    Ok(())
}

/// Posterior draws of the trajectory on its natural scale, grouped by chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorTrajectory {
    draws: Array3<f64>,
    midpoints: Array1<f64>,
    link: Link,
}

impl PosteriorTrajectory {
    /// Builds the trajectory from link-scale `[chains, draws, cells]` draws.
    pub fn from_draws(
        draws: ArrayView3<f64>,
        grid: &TimeGrid,
        link: Link,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            draws: extract_by_chain(draws, grid, link)?,
            midpoints: grid.midpoints(),
            link,
        })
    }

    /// Builds the trajectory from the field draws of every engine chain.
    pub fn from_chains(
        chains: &[ChainDraws],
        grid: &TimeGrid,
        link: Link,
    ) -> Result<Self, ExtractionError> {
        let first = chains.first().ok_or(ExtractionError::NoChains)?;
        let per_chain = trajectory_of(first)?.nrows();

        let mut stacked = Array3::<f64>::zeros((chains.len(), per_chain, grid.cells()));
        for (index, chain) in chains.iter().enumerate() {
            let theta = trajectory_of(chain)?;
            if theta.nrows() != per_chain {
                return Err(ExtractionError::InconsistentChains {
                    chain: index,
                    expected: per_chain,
                    found: theta.nrows(),
                });
            }
            stacked
                .index_axis_mut(Axis(0), index)
                .assign(&extract_trajectory(theta, grid, link)?);
        }

        log::debug!(
            "Extracted {} chains x {} draws over {} cells",
            chains.len(),
            per_chain,
            grid.cells()
        );
        Ok(Self {
            draws: stacked,
            midpoints: grid.midpoints(),
            link,
        })
    }

    pub fn n_chains(&self) -> usize {
        self.draws.len_of(Axis(0))
    }

    pub fn draws_per_chain(&self) -> usize {
        self.draws.len_of(Axis(1))
    }

    pub fn n_cells(&self) -> usize {
        self.draws.len_of(Axis(2))
    }

    pub fn link(&self) -> Link {
        self.link
    }

    /// Grid midpoints for aligning cells with time.
    pub fn midpoints(&self) -> ArrayView1<'_, f64> {
        self.midpoints.view()
    }

    pub fn draws(&self) -> ArrayView3<'_, f64> {
        self.draws.view()
    }

    pub fn chain(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.n_chains()).then(|| self.draws.index_axis(Axis(0), index))
    }

    /// All draws, chain after chain, as one `[chains * draws, cells]` matrix.
    pub fn pooled(&self) -> Array2<f64> {
        let per_chain = self.draws_per_chain();
        Array2::from_shape_fn(
            (self.n_chains() * per_chain, self.n_cells()),
            |(row, cell)| self.draws[[row / per_chain, row % per_chain, cell]],
        )
    }

    /// The draws mapped back to the link scale.
    pub fn link_scale(&self) -> Array3<f64> {
        self.draws.mapv(|value| self.link.forward(value))
    }

    /// Per-cell posterior median and equal-tailed credible band at `level`.
    pub fn summary(&self, level: f64) -> Result<TrajectorySummary, ExtractionError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(ExtractionError::InvalidLevel(level));
        }
        let pooled = self.pooled();
        if pooled.nrows() == 0 {
            return Err(ExtractionError::NoDraws {
                chains: self.n_chains(),
            });
        }

        let tail = 0.5 * (1.0 - level);
        let cells = self.n_cells();
        let mut median = Array1::zeros(cells);
        let mut lower = Array1::zeros(cells);
        let mut upper = Array1::zeros(cells);
        for (cell, column) in pooled.axis_iter(Axis(1)).enumerate() {
            let mut sorted = column.to_vec();
            sorted.sort_unstable_by(f64::total_cmp);
            median[cell] = quantile(&sorted, 0.5);
            lower[cell] = quantile(&sorted, tail);
            upper[cell] = quantile(&sorted, 1.0 - tail);
        }

        Ok(TrajectorySummary {
            level,
            midpoints: self.midpoints.clone(),
            median,
            lower,
            upper,
        })
    }
}

fn trajectory_of(chain: &ChainDraws) -> Result<ArrayView2<'_, f64>, ExtractionError> {
    chain
        .trajectory()
        .ok_or_else(|| ExtractionError::MissingParameter {
            chain: chain.chain(),
            parameter: TRAJECTORY_PARAMETER.to_string(),
        })
}

/// Linear interpolation between order statistics (R type 7).
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * p;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    if below == above {
        sorted[below]
    } else {
        let fraction = position - below as f64;
        sorted[below] * (1.0 - fraction) + sorted[above] * fraction
    }
}

/// Pointwise posterior summary of the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySummary {
    pub level: f64,
    pub midpoints: Array1<f64>,
    pub median: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// One row of a [`TrajectorySummary`] as written to CSV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub midpoint: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

impl TrajectorySummary {
    pub fn rows(&self) -> impl Iterator<Item = SummaryRow> + '_ {
        (0..self.midpoints.len()).map(|cell| SummaryRow {
            midpoint: self.midpoints[cell],
            median: self.median[cell],
            lower: self.lower[cell],
            upper: self.upper[cell],
        })
    }
}
