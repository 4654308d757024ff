//! Contract with the external sampling engine.
//!
//! The engine receives a fully assembled [`ModelSpec`] plus [`SamplerControls`]
//! and returns, per chain, named matrices of posterior draws. Chains share no
//! mutable state and are run in parallel by [`run_chains`].

use crate::model::ModelSpec;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the field parameter on the link scale.
pub const TRAJECTORY_PARAMETER: &str = "theta";
/// Name of the per-difference local scales.
pub const LOCAL_SCALE_PARAMETER: &str = "tau";
/// Name of the global scale.
pub const GLOBAL_SCALE_PARAMETER: &str = "gam";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid sampler controls: {0}")]
    InvalidControls(String),

    #[error("Sampling engine failed on chain {chain}: {message}")]
    Failed { chain: usize, message: String },

    #[error(
        "Chain {chain} returned {found} draws of '{parameter}', but {expected} were requested."
    )]
    DrawCount {
        chain: usize,
        parameter: String,
        expected: usize,
        found: usize,
    },
}

/// Sampler settings forwarded to the engine unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerControls {
    pub chains: usize,
    /// Warmup iterations per chain; discarded by the engine.
    pub warmup: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    pub thin: usize,
    pub adapt_delta: f64,
    pub max_treedepth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplerControls {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            iterations: 2000,
            thin: 1,
            adapt_delta: 0.95,
            max_treedepth: 12,
            seed: None,
        }
    }
}

impl SamplerControls {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chains == 0 {
            return Err(EngineError::InvalidControls(
                "at least one chain is required".into(),
            ));
        }
        if self.iterations <= self.warmup {
            return Err(EngineError::InvalidControls(format!(
                "iterations ({}) must exceed warmup ({})",
                self.iterations, self.warmup
            )));
        }
        if self.thin == 0 {
            return Err(EngineError::InvalidControls("thin must be positive".into()));
        }
        if !(self.adapt_delta > 0.0 && self.adapt_delta < 1.0) {
            return Err(EngineError::InvalidControls(format!(
                "adapt_delta must lie in (0, 1), got {}",
                self.adapt_delta
            )));
        }
        if self.max_treedepth == 0 {
            return Err(EngineError::InvalidControls(
                "max_treedepth must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Retained post-warmup draws in each chain.
    pub fn draws_per_chain(&self) -> usize {
        self.iterations
            .saturating_sub(self.warmup)
            .div_ceil(self.thin.max(1))
    }

    /// Distinct, reproducible seed for one chain.
    pub fn chain_seed(&self, chain: usize) -> Option<u64> {
        self.seed.map(|seed| seed.wrapping_add(chain as u64))
    }
}

/// Posterior draws of one chain: parameter name -> `[draws, dim]` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDraws {
    chain: usize,
    parameters: BTreeMap<String, Array2<f64>>,
}

impl ChainDraws {
    pub fn new(chain: usize) -> Self {
        Self {
            chain,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, draws: Array2<f64>) -> Self {
        self.insert(name, draws);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, draws: Array2<f64>) {
        self.parameters.insert(name.into(), draws);
    }

    pub fn chain(&self) -> usize {
        self.chain
    }

    pub fn get(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.parameters.get(name).map(Array2::view)
    }

    /// Field draws on the link scale, if the engine returned them.
    pub fn trajectory(&self) -> Option<ArrayView2<'_, f64>> {
        self.get(TRAJECTORY_PARAMETER)
    }

    fn check_draws(&self, expected: usize) -> Result<(), EngineError> {
        for (name, draws) in &self.parameters {
            if draws.nrows() != expected {
                return Err(EngineError::DrawCount {
                    chain: self.chain,
                    parameter: name.clone(),
                    expected,
                    found: draws.nrows(),
                });
            }
        }
        Ok(())
    }
}

/// An engine able to draw one chain from the posterior of a [`ModelSpec`].
pub trait SamplingEngine: Sync {
    fn sample_chain(
        &self,
        spec: &ModelSpec,
        controls: &SamplerControls,
        chain: usize,
    ) -> Result<ChainDraws, EngineError>;
}

/// Runs every chain in parallel and returns them in chain order.
///
/// Fails as a whole if any chain fails or returns the wrong number of draws.
pub fn run_chains(
    engine: &dyn SamplingEngine,
    spec: &ModelSpec,
    controls: &SamplerControls,
) -> Result<Vec<ChainDraws>, EngineError> {
    controls.validate()?;
    let expected = controls.draws_per_chain();
    log::info!(
        "Running {} chains ({} warmup, {} iterations, thin {}) for a {} / {} model",
        controls.chains,
        controls.warmup,
        controls.iterations,
        controls.thin,
        spec.prior(),
        spec.likelihood()
    );

    (0..controls.chains)
        .into_par_iter()
        .map(|chain| {
            let draws = engine.sample_chain(spec, controls, chain)?;
            draws.check_draws(expected)?;
            log::debug!("Chain {chain} finished with {expected} draws");
            Ok(draws)
        })
        .collect()
}
