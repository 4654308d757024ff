use crate::difference::{DifferenceError, DifferenceOrder, DifferenceStructure};
use crate::engine::{GLOBAL_SCALE_PARAMETER, LOCAL_SCALE_PARAMETER, TRAJECTORY_PARAMETER};
use crate::grid::TimeGrid;
use crate::likelihood::CellStatistics;
use crate::types::Zeta;
use itertools::izip;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

pub use crate::likelihood::{LikelihoodFamily, Link};

// --- Public Data Structures ---
// These types define the self-describing input handed to the sampling engine.

/// Shrinkage prior placed on the k-th order differences of the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorFamily {
    /// Gaussian increments with a common half-Cauchy scale.
    Gaussian,
    /// Laplace (double-exponential) increments with a common half-Cauchy scale.
    Laplace,
    /// Horseshoe increments: local half-Cauchy scales times a global one.
    Horseshoe,
}

impl PriorFamily {
    pub const ALL: [PriorFamily; 3] = [
        PriorFamily::Gaussian,
        PriorFamily::Laplace,
        PriorFamily::Horseshoe,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            PriorFamily::Gaussian => "gaussian",
            PriorFamily::Laplace => "laplace",
            PriorFamily::Horseshoe => "horseshoe",
        }
    }

    /// Whether the engine should expect per-difference local scale parameters.
    pub fn has_local_scales(self) -> bool {
        matches!(self, PriorFamily::Horseshoe)
    }
}

impl fmt::Display for PriorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Errors raised while assembling a [`ModelSpec`].
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Model is configured for {expected} data but cell {cell} carries {found} statistics.")]
    ConfigMismatch {
        expected: LikelihoodFamily,
        found: LikelihoodFamily,
        cell: usize,
    },
    #[error("The grid has {grid} cells but {statistics} cell statistics were supplied.")]
    CellCountMismatch { grid: usize, statistics: usize },
    #[error("Cell {cell} cannot inform the trajectory: {reason}.")]
    InvalidCell { cell: usize, reason: &'static str },
    #[error("Data field '{field}' has {found} entries but '{reference}' has {expected}.")]
    RaggedData {
        field: &'static str,
        reference: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Covariate matrix has {rows} rows but the grid has {cells} cells.")]
    CovariateShape { rows: usize, cells: usize },
    #[error("Covariate values must be finite.")]
    NonFiniteCovariate,
    #[error("Invalid field structure: {0}")]
    Difference(#[from] DifferenceError),
}

/// Per-cell data vectors of one likelihood family, in grid order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum FamilyData {
    Coalescent {
        events: Vec<usize>,
        opportunity: Vec<f64>,
    },
    Count {
        events: Vec<u64>,
        exposure: Vec<f64>,
    },
    Binomial {
        successes: Vec<u64>,
        trials: Vec<u64>,
    },
    Survival {
        at_risk: Vec<usize>,
        events: Vec<usize>,
        exposure: Vec<f64>,
    },
}

impl FamilyData {
    fn empty(family: LikelihoodFamily, capacity: usize) -> Self {
        match family {
            LikelihoodFamily::Coalescent => FamilyData::Coalescent {
                events: Vec::with_capacity(capacity),
                opportunity: Vec::with_capacity(capacity),
            },
            LikelihoodFamily::Count => FamilyData::Count {
                events: Vec::with_capacity(capacity),
                exposure: Vec::with_capacity(capacity),
            },
            LikelihoodFamily::Binomial => FamilyData::Binomial {
                successes: Vec::with_capacity(capacity),
                trials: Vec::with_capacity(capacity),
            },
            LikelihoodFamily::Survival => FamilyData::Survival {
                at_risk: Vec::with_capacity(capacity),
                events: Vec::with_capacity(capacity),
                exposure: Vec::with_capacity(capacity),
            },
        }
    }

    /// Appends one cell; returns the cell's family when it does not match.
    fn push(&mut self, cell: &CellStatistics) -> Result<(), LikelihoodFamily> {
        match (self, *cell) {
            (
                FamilyData::Coalescent {
                    events,
                    opportunity,
                },
                CellStatistics::Coalescent {
                    events: e,
                    opportunity: o,
                },
            ) => {
                events.push(e);
                opportunity.push(o);
            }
            (
                FamilyData::Count { events, exposure },
                CellStatistics::Count {
                    events: e,
                    exposure: x,
                },
            ) => {
                events.push(e);
                exposure.push(x);
            }
            (
                FamilyData::Binomial { successes, trials },
                CellStatistics::Binomial {
                    successes: s,
                    trials: t,
                },
            ) => {
                successes.push(s);
                trials.push(t);
            }
            (
                FamilyData::Survival {
                    at_risk,
                    events,
                    exposure,
                },
                CellStatistics::Survival {
                    at_risk: r,
                    events: e,
                    exposure: x,
                },
            ) => {
                at_risk.push(r);
                events.push(e);
                exposure.push(x);
            }
            (_, other) => return Err(other.family()),
        }
        Ok(())
    }

    /// Splits the column vectors back into per-cell statistics.
    fn into_cells(self) -> Result<Vec<CellStatistics>, AssemblyError> {
        let cells = match self {
            FamilyData::Coalescent {
                events,
                opportunity,
            } => {
                same_length("opportunity", opportunity.len(), "events", events.len())?;
                izip!(events, opportunity)
                    .map(|(events, opportunity)| CellStatistics::Coalescent {
                        events,
                        opportunity,
                    })
                    .collect()
            }
            FamilyData::Count { events, exposure } => {
                same_length("exposure", exposure.len(), "events", events.len())?;
                izip!(events, exposure)
                    .map(|(events, exposure)| CellStatistics::Count { events, exposure })
                    .collect()
            }
            FamilyData::Binomial { successes, trials } => {
                same_length("trials", trials.len(), "successes", successes.len())?;
                izip!(successes, trials)
                    .map(|(successes, trials)| CellStatistics::Binomial { successes, trials })
                    .collect()
            }
            FamilyData::Survival {
                at_risk,
                events,
                exposure,
            } => {
                same_length("events", events.len(), "at_risk", at_risk.len())?;
                same_length("exposure", exposure.len(), "at_risk", at_risk.len())?;
                izip!(at_risk, events, exposure)
                    .map(|(at_risk, events, exposure)| CellStatistics::Survival {
                        at_risk,
                        events,
                        exposure,
                    })
                    .collect()
            }
        };
        Ok(cells)
    }

    /// Named per-cell vectors as they appear in the engine payload.
    fn fields(&self) -> Vec<(&'static str, Value)> {
        match self {
            FamilyData::Coalescent {
                events,
                opportunity,
            } => vec![("events", json!(events)), ("opportunity", json!(opportunity))],
            FamilyData::Count { events, exposure } => {
                vec![("events", json!(events)), ("exposure", json!(exposure))]
            }
            FamilyData::Binomial { successes, trials } => {
                vec![("successes", json!(successes)), ("trials", json!(trials))]
            }
            FamilyData::Survival {
                at_risk,
                events,
                exposure,
            } => vec![
                ("at_risk", json!(at_risk)),
                ("events", json!(events)),
                ("exposure", json!(exposure)),
            ],
        }
    }

    /// Log of the per-cell offset multiplying the rate, for log-linked families.
    fn log_offset(&self) -> Option<Vec<f64>> {
        match self {
            FamilyData::Coalescent { opportunity, .. } => {
                Some(opportunity.iter().map(|o| o.ln()).collect())
            }
            FamilyData::Count { exposure, .. } | FamilyData::Survival { exposure, .. } => {
                Some(exposure.iter().map(|x| x.ln()).collect())
            }
            FamilyData::Binomial { .. } => None,
        }
    }
}

fn same_length(
    field: &'static str,
    found: usize,
    reference: &'static str,
    expected: usize,
) -> Result<(), AssemblyError> {
    if found != expected {
        return Err(AssemblyError::RaggedData {
            field,
            reference,
            expected,
            found,
        });
    }
    Ok(())
}

/// Reason a cell cannot inform the trajectory, if any.
fn unusable_cell(stats: &CellStatistics) -> Option<&'static str> {
    let support = stats.support();
    if !(support.is_finite() && support > 0.0) {
        return Some("it has no opportunity, exposure or trials");
    }
    match *stats {
        CellStatistics::Binomial { successes, trials } if successes > trials => {
            Some("successes exceed trials")
        }
        CellStatistics::Survival {
            at_risk, events, ..
        } if events > at_risk => Some("events exceed the number at risk"),
        _ => None,
    }
}

/// Fixed hyperparameters consumed by the prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub zeta: Zeta,
}

/// The complete, immutable input of the external sampling engine.
///
/// Deserialization runs the same checks as [`ModelSpec::assemble`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModelSpec")]
pub struct ModelSpec {
    prior: PriorFamily,
    likelihood: LikelihoodFamily,
    order: DifferenceOrder,
    grid: TimeGrid,
    hyperparameters: Hyperparameters,
    data: FamilyData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    covariates: Option<Array2<f64>>,
}

/// Serialized form of a [`ModelSpec`] before validation.
#[derive(Deserialize)]
struct RawModelSpec {
    prior: PriorFamily,
    likelihood: LikelihoodFamily,
    order: DifferenceOrder,
    grid: TimeGrid,
    hyperparameters: Hyperparameters,
    data: FamilyData,
    #[serde(default)]
    covariates: Option<Array2<f64>>,
}

impl TryFrom<RawModelSpec> for ModelSpec {
    type Error = AssemblyError;

    fn try_from(raw: RawModelSpec) -> Result<Self, Self::Error> {
        let statistics = raw.data.into_cells()?;
        ModelSpec::assemble(
            raw.prior,
            raw.likelihood,
            raw.order,
            &raw.grid,
            &statistics,
            raw.hyperparameters.zeta,
            raw.covariates,
        )
    }
}

impl ModelSpec {
    /// Validates the cell statistics and covariates against the grid and builds the engine input.
    ///
    /// # Arguments
    /// * `statistics`: one entry per grid cell, all of the `likelihood` family,
    ///   each with positive support.
    /// * `covariates`: optional `[cells, p]` matrix of per-cell covariates.
    pub fn assemble(
        prior: PriorFamily,
        likelihood: LikelihoodFamily,
        order: DifferenceOrder,
        grid: &TimeGrid,
        statistics: &[CellStatistics],
        zeta: Zeta,
        covariates: Option<Array2<f64>>,
    ) -> Result<Self, AssemblyError> {
        if statistics.len() != grid.cells() {
            return Err(AssemblyError::CellCountMismatch {
                grid: grid.cells(),
                statistics: statistics.len(),
            });
        }
        DifferenceStructure::new(order, grid.cells())?;

        let mut data = FamilyData::empty(likelihood, statistics.len());
        for (cell, stats) in statistics.iter().enumerate() {
            data.push(stats)
                .map_err(|found| AssemblyError::ConfigMismatch {
                    expected: likelihood,
                    found,
                    cell,
                })?;
            if let Some(reason) = unusable_cell(stats) {
                return Err(AssemblyError::InvalidCell { cell, reason });
            }
        }

        if let Some(matrix) = &covariates {
            if matrix.nrows() != grid.cells() {
                return Err(AssemblyError::CovariateShape {
                    rows: matrix.nrows(),
                    cells: grid.cells(),
                });
            }
            if matrix.iter().any(|v| !v.is_finite()) {
                return Err(AssemblyError::NonFiniteCovariate);
            }
        }

        log::debug!(
            "Assembled {} / {} model of order {} over {} cells (zeta = {})",
            prior,
            likelihood,
            order,
            grid.cells(),
            zeta
        );

        Ok(Self {
            prior,
            likelihood,
            order,
            grid: grid.clone(),
            hyperparameters: Hyperparameters { zeta },
            data,
            covariates,
        })
    }

    pub fn prior(&self) -> PriorFamily {
        self.prior
    }

    pub fn likelihood(&self) -> LikelihoodFamily {
        self.likelihood
    }

    pub fn order(&self) -> DifferenceOrder {
        self.order
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn zeta(&self) -> Zeta {
        self.hyperparameters.zeta
    }

    pub fn link(&self) -> Link {
        self.likelihood.link()
    }

    pub fn n_cells(&self) -> usize {
        self.grid.cells()
    }

    /// Number of k-th order differences given independent scales.
    pub fn n_differences(&self) -> usize {
        self.n_cells() - self.order.as_usize()
    }

    /// Parameters the engine is expected to return draws of.
    pub fn parameters(&self) -> Vec<&'static str> {
        let mut names = vec![TRAJECTORY_PARAMETER, GLOBAL_SCALE_PARAMETER];
        if self.prior.has_local_scales() {
            names.push(LOCAL_SCALE_PARAMETER);
        }
        names
    }

    /// Flat, self-describing data payload for the engine.
    pub fn payload(&self) -> Value {
        let cells = self.n_cells();
        let mut payload = json!({
            "prior": self.prior.tag(),
            "likelihood": self.likelihood.tag(),
            "link": self.link(),
            "J": cells,
            "order": self.order.as_usize(),
            "n_diff": self.n_differences(),
            "zeta": self.zeta().value(),
            "boundaries": self.grid.boundaries().to_vec(),
            "midpoints": self.grid.midpoints().to_vec(),
            "parameters": self.parameters(),
        });

        for (name, values) in self.data.fields() {
            payload[name] = values;
        }
        if let Some(offset) = self.data.log_offset() {
            payload["log_offset"] = json!(offset);
        }

        let (p, rows): (usize, Vec<Vec<f64>>) = match &self.covariates {
            Some(matrix) => (
                matrix.ncols(),
                matrix.rows().into_iter().map(|row| row.to_vec()).collect(),
            ),
            None => (0, vec![Vec::new(); cells]),
        };
        payload["P"] = json!(p);
        payload["X"] = json!(rows);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid() -> TimeGrid {
        TimeGrid::equal_width(3.0, 3).unwrap()
    }

    fn coalescent_stats() -> Vec<CellStatistics> {
        vec![
            CellStatistics::Coalescent {
                events: 2,
                opportunity: 6.0,
            },
            CellStatistics::Coalescent {
                events: 1,
                opportunity: 3.0,
            },
            CellStatistics::Coalescent {
                events: 1,
                opportunity: 1.0,
            },
        ]
    }

    fn zeta() -> Zeta {
        Zeta::new(0.5).unwrap()
    }

    #[test]
    fn assembles_coalescent_payload() {
        let spec = ModelSpec::assemble(
            PriorFamily::Horseshoe,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &coalescent_stats(),
            zeta(),
            None,
        )
        .unwrap();
        assert_eq!(spec.n_differences(), 2);
        assert_eq!(spec.link(), Link::Log);

        let payload = spec.payload();
        assert_eq!(payload["prior"], "horseshoe");
        assert_eq!(payload["likelihood"], "coalescent");
        assert_eq!(payload["link"], "log");
        assert_eq!(payload["J"], 3);
        assert_eq!(payload["n_diff"], 2);
        assert_eq!(payload["zeta"], 0.5);
        assert_eq!(payload["events"], json!([2, 1, 1]));
        assert_eq!(payload["opportunity"], json!([6.0, 3.0, 1.0]));
        assert_eq!(payload["log_offset"][2], 0.0);
        assert_eq!(payload["P"], 0);
        assert_eq!(payload["X"].as_array().map(Vec::len), Some(3));
        assert!(payload.get("family").is_none());
    }

    #[test]
    fn mismatched_family_is_config_mismatch() {
        let binomial = vec![
            CellStatistics::Binomial {
                successes: 1,
                trials: 2,
            };
            3
        ];
        let result = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &binomial,
            zeta(),
            None,
        );
        match result {
            Err(AssemblyError::ConfigMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, LikelihoodFamily::Coalescent);
                assert_eq!(found, LikelihoodFamily::Binomial);
            }
            other => panic!("expected ConfigMismatch, got {other:?}"),
        }
    }

    #[test]
    fn order_must_leave_differences() {
        let small = TimeGrid::equal_width(2.0, 2).unwrap();
        let result = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::Second,
            &small,
            &coalescent_stats()[..2],
            zeta(),
            None,
        );
        assert!(matches!(result, Err(AssemblyError::Difference(_))));
    }

    #[test]
    fn covariates_must_match_cells() {
        let wrong = array![[1.0], [2.0]];
        let result = ModelSpec::assemble(
            PriorFamily::Laplace,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &coalescent_stats(),
            zeta(),
            Some(wrong),
        );
        assert!(matches!(
            result,
            Err(AssemblyError::CovariateShape { rows: 2, cells: 3 })
        ));

        let spec = ModelSpec::assemble(
            PriorFamily::Laplace,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &coalescent_stats(),
            zeta(),
            Some(array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0]]),
        )
        .unwrap();
        let payload = spec.payload();
        assert_eq!(payload["P"], 2);
        assert_eq!(payload["X"][1], json!([2.0, 1.0]));
    }

    #[test]
    fn binomial_payload_has_no_offset() {
        let stats = vec![
            CellStatistics::Binomial {
                successes: 0,
                trials: 4,
            },
            CellStatistics::Binomial {
                successes: 2,
                trials: 5,
            },
            CellStatistics::Binomial {
                successes: 5,
                trials: 5,
            },
        ];
        let spec = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Binomial,
            DifferenceOrder::First,
            &grid(),
            &stats,
            zeta(),
            None,
        )
        .unwrap();
        let payload = spec.payload();
        assert_eq!(payload["successes"], json!([0, 2, 5]));
        assert_eq!(payload["trials"], json!([4, 5, 5]));
        assert!(payload.get("log_offset").is_none());
        assert_eq!(payload["link"], "logit");
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = ModelSpec::assemble(
            PriorFamily::Horseshoe,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::Second,
            &grid(),
            &coalescent_stats(),
            zeta(),
            None,
        )
        .unwrap();
        let text = serde_json::to_string(&spec).unwrap();
        let back: ModelSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(back, spec);
    }

    fn serialized_coalescent_spec() -> Value {
        let spec = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &coalescent_stats(),
            zeta(),
            None,
        )
        .unwrap();
        serde_json::to_value(&spec).unwrap()
    }

    #[test]
    fn deserialization_revalidates_family_and_cells() {
        let mut relabelled = serialized_coalescent_spec();
        relabelled["likelihood"] = json!("binomial");
        let err = serde_json::from_value::<ModelSpec>(relabelled).unwrap_err();
        assert!(err.to_string().contains("configured for binomial"), "{err}");

        let mut truncated = serialized_coalescent_spec();
        truncated["data"]["events"] = json!([1]);
        truncated["data"]["opportunity"] = json!([2.0]);
        let err = serde_json::from_value::<ModelSpec>(truncated).unwrap_err();
        assert!(err.to_string().contains("3 cells but 1"), "{err}");

        let mut ragged = serialized_coalescent_spec();
        ragged["data"]["events"] = json!([1]);
        let err = serde_json::from_value::<ModelSpec>(ragged).unwrap_err();
        assert!(err.to_string().contains("'opportunity' has 3"), "{err}");

        let mut unsupported = serialized_coalescent_spec();
        unsupported["data"]["opportunity"] = json!([6.0, 0.0, 1.0]);
        let err = serde_json::from_value::<ModelSpec>(unsupported).unwrap_err();
        assert!(err.to_string().contains("Cell 1"), "{err}");
    }

    #[test]
    fn cells_without_support_are_rejected() {
        let mut stats = coalescent_stats();
        stats[2] = CellStatistics::Coalescent {
            events: 1,
            opportunity: 0.0,
        };
        let result = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Coalescent,
            DifferenceOrder::First,
            &grid(),
            &stats,
            zeta(),
            None,
        );
        assert!(matches!(
            result,
            Err(AssemblyError::InvalidCell { cell: 2, .. })
        ));

        let overfull = vec![
            CellStatistics::Binomial {
                successes: 6,
                trials: 5,
            };
            3
        ];
        let result = ModelSpec::assemble(
            PriorFamily::Gaussian,
            LikelihoodFamily::Binomial,
            DifferenceOrder::First,
            &grid(),
            &overfull,
            zeta(),
            None,
        );
        assert!(matches!(
            result,
            Err(AssemblyError::InvalidCell { cell: 0, .. })
        ));
    }

    #[test]
    fn payload_names_expected_parameters() {
        let build = |prior| {
            ModelSpec::assemble(
                prior,
                LikelihoodFamily::Coalescent,
                DifferenceOrder::First,
                &grid(),
                &coalescent_stats(),
                zeta(),
                None,
            )
            .unwrap()
        };
        assert_eq!(
            build(PriorFamily::Horseshoe).payload()["parameters"],
            json!(["theta", "gam", "tau"])
        );
        assert_eq!(
            build(PriorFamily::Laplace).payload()["parameters"],
            json!(["theta", "gam"])
        );
    }
}
