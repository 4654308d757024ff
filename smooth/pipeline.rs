//! # Pipeline Orchestration
//!
//! `prepare` runs the synchronous core end to end: grid construction,
//! aggregation, calibration and model assembly. `fit` hands the prepared model
//! to an engine and maps the returned draws back onto the trajectory scale.
//! Both are all-or-nothing: an error at any stage returns no partial result.

use crate::calibrate::{Calibration, CalibrationError};
use crate::config::{ConfigError, RunConfig};
use crate::data::{DataError, split_chains};
use crate::engine::{ChainDraws, EngineError, SamplerControls, SamplingEngine, run_chains};
use crate::grid::{GridError, TimeGrid};
use crate::likelihood::{AggregationError, CellStatistics, Observations};
use crate::model::{AssemblyError, ModelSpec};
use crate::posterior::{ExtractionError, PosteriorTrajectory};
use crate::types::{NaiveEstimate, Zeta};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Grid construction failed: {0}")]
    Grid(#[from] GridError),
    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Model assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Posterior extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Everything produced before the engine runs.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub grid: TimeGrid,
    pub statistics: Vec<CellStatistics>,
    pub calibration: Calibration,
    pub spec: ModelSpec,
}

impl PreparedModel {
    pub fn naive(&self) -> &NaiveEstimate {
        &self.calibration.naive
    }

    pub fn zeta(&self) -> Zeta {
        self.calibration.zeta
    }

    /// Maps externally produced `[draws, cells]` field draws, stored chain after chain.
    pub fn extract(
        &self,
        draws: ArrayView2<f64>,
        chains: usize,
    ) -> Result<PosteriorTrajectory, PipelineError> {
        if draws.ncols() != self.grid.cells() {
            return Err(ExtractionError::ShapeMismatch {
                expected: self.grid.cells(),
                found: draws.ncols(),
            }
            .into());
        }
        let grouped = split_chains(draws, chains)?;
        Ok(PosteriorTrajectory::from_draws(
            grouped.view(),
            &self.grid,
            self.spec.link(),
        )?)
    }
}

/// A prepared model together with its posterior.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub prepared: PreparedModel,
    pub chains: Vec<ChainDraws>,
    pub trajectory: PosteriorTrajectory,
}

/// Builds the grid, aggregates, calibrates `ζ` and assembles the engine input.
pub fn prepare(
    observations: &Observations,
    config: &RunConfig,
    covariates: Option<Array2<f64>>,
) -> Result<PreparedModel, PipelineError> {
    config.validate()?;
    if observations.family() != config.likelihood {
        return Err(AssemblyError::ConfigMismatch {
            expected: config.likelihood,
            found: observations.family(),
            cell: 0,
        }
        .into());
    }

    let grid = observations.build_grid(&config.grid_builder())?;
    let statistics = observations.aggregate(&grid)?;
    let calibration = config
        .calibration
        .calibrate(&statistics, config.order, config.prior)?;
    let spec = ModelSpec::assemble(
        config.prior,
        config.likelihood,
        config.order,
        &grid,
        &statistics,
        calibration.zeta,
        covariates,
    )?;

    log::info!(
        "Prepared {} / {} model over {} cells on [{}, {}]",
        config.prior,
        config.likelihood,
        grid.cells(),
        grid.lower(),
        grid.upper()
    );
    Ok(PreparedModel {
        grid,
        statistics,
        calibration,
        spec,
    })
}

/// Runs the engine on a prepared model and extracts the trajectory.
pub fn fit(
    engine: &dyn SamplingEngine,
    prepared: PreparedModel,
    controls: &SamplerControls,
) -> Result<FittedModel, PipelineError> {
    let chains = run_chains(engine, &prepared.spec, controls)?;
    let trajectory = PosteriorTrajectory::from_chains(&chains, &prepared.grid, prepared.spec.link())?;
    Ok(FittedModel {
        prepared,
        chains,
        trajectory,
    })
}
