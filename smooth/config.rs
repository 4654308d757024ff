//! Run configuration read from and written to TOML.

use crate::calibrate::ZetaCalibrator;
use crate::difference::DifferenceOrder;
use crate::engine::SamplerControls;
use crate::grid::GridBuilder;
use crate::likelihood::LikelihoodFamily;
use crate::model::PriorFamily;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_min_events() -> usize {
    1
}

/// Everything needed to go from observations to an engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub likelihood: LikelihoodFamily,
    pub prior: PriorFamily,
    pub order: DifferenceOrder,
    /// Requested number of grid cells.
    pub cells: usize,
    #[serde(default = "default_min_events")]
    pub min_events_per_cell: usize,
    /// Upper end of the grid; the largest observed time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,
    #[serde(default)]
    pub calibration: ZetaCalibrator,
    #[serde(default)]
    pub sampler: SamplerControls,
}

impl RunConfig {
    pub fn new(
        likelihood: LikelihoodFamily,
        prior: PriorFamily,
        order: DifferenceOrder,
        cells: usize,
    ) -> Self {
        Self {
            likelihood,
            prior,
            order,
            cells,
            min_events_per_cell: default_min_events(),
            max_time: None,
            calibration: ZetaCalibrator::default(),
            sampler: SamplerControls::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cells == 0 {
            return Err(ConfigError::Invalid("cells must be at least 1".into()));
        }
        if let Some(max_time) = self.max_time {
            if !(max_time.is_finite() && max_time > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "max_time must be positive and finite, got {max_time}"
                )));
            }
        }
        let calibration = &self.calibration;
        if !(calibration.lower > 0.0 && calibration.lower < calibration.upper)
            || !calibration.upper.is_finite()
        {
            return Err(ConfigError::Invalid(format!(
                "calibration bracket [{}, {}] must be positive, finite and ordered",
                calibration.lower, calibration.upper
            )));
        }
        if !(calibration.tolerance > 0.0) || calibration.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "calibration tolerance and max_iterations must be positive".into(),
            ));
        }
        self.sampler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn grid_builder(&self) -> GridBuilder {
        let builder = GridBuilder::new(self.cells).with_min_events(self.min_events_per_cell);
        match self.max_time {
            Some(max_time) => builder.with_max_time(max_time),
            None => builder,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        log::debug!("Loaded run configuration from '{}'", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
likelihood = "coalescent"
prior = "horseshoe"
order = 1
cells = 30
min_events_per_cell = 2
max_time = 120.0

[calibration]
alpha = 0.1
lower = 1e-6
upper = 1e3
max_iterations = 100
tolerance = 1e-10

[sampler]
chains = 2
warmup = 500
iterations = 1500
thin = 2
adapt_delta = 0.9
max_treedepth = 10
seed = 42
"#;

    #[test]
    fn parses_full_configuration() {
        let config: RunConfig = toml::from_str(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.likelihood, LikelihoodFamily::Coalescent);
        assert_eq!(config.prior, PriorFamily::Horseshoe);
        assert_eq!(config.order, DifferenceOrder::First);
        assert_eq!(config.min_events_per_cell, 2);
        assert_eq!(config.max_time, Some(120.0));
        assert_eq!(config.calibration.alpha.value(), 0.1);
        assert_eq!(config.sampler.seed, Some(42));
        assert_eq!(config.sampler.draws_per_chain(), 500);

        let builder = config.grid_builder();
        assert_eq!(builder.cells, 30);
        assert_eq!(builder.max_time, Some(120.0));
    }

    #[test]
    fn optional_sections_take_defaults() {
        let config: RunConfig =
            toml::from_str("likelihood = \"binomial\"\nprior = \"laplace\"\norder = 2\ncells = 12")
                .unwrap();
        assert_eq!(config.min_events_per_cell, 1);
        assert_eq!(config.max_time, None);
        assert_eq!(config.calibration, ZetaCalibrator::default());
        assert_eq!(config.sampler, SamplerControls::default());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(toml::from_str::<RunConfig>(&FULL.replace("order = 1", "order = 3")).is_err());
        assert!(toml::from_str::<RunConfig>(&FULL.replace("alpha = 0.1", "alpha = 1.0")).is_err());
        assert!(
            toml::from_str::<RunConfig>(&FULL.replace("\"horseshoe\"", "\"cauchy\"")).is_err()
        );

        let no_cells: RunConfig = toml::from_str(&FULL.replace("cells = 30", "cells = 0")).unwrap();
        assert!(matches!(no_cells.validate(), Err(ConfigError::Invalid(_))));

        let short: RunConfig =
            toml::from_str(&FULL.replace("iterations = 1500", "iterations = 400")).unwrap();
        assert!(matches!(short.validate(), Err(ConfigError::Invalid(_))));

        let bracket: RunConfig = toml::from_str(&FULL.replace("upper = 1e3", "upper = 1e-7")).unwrap();
        assert!(matches!(bracket.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut config = RunConfig::new(
            LikelihoodFamily::Survival,
            PriorFamily::Gaussian,
            DifferenceOrder::Second,
            8,
        );
        config.max_time = Some(5.0);
        config.sampler.seed = Some(7);

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = RunConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
