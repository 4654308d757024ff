//! # Global Shrinkage Calibration
//!
//! The global scale `ζ` of the Markov random field prior is fixed before
//! sampling rather than estimated jointly. It is chosen so that the prior
//! agrees with the variability of a naive skyline estimate of the trajectory:
//!
//! 1.  Form the skyline estimate from the per-cell statistics.
//! 2.  Take its order-k differences and their sample variance `V`.
//! 3.  Let `S` be the prior-predictive standard deviation of one difference
//!     (`γ` for the Gaussian field, `√2·γ` for the Laplace field and `τ·γ` for
//!     the horseshoe field, with `τ ~ C⁺(0, 1)` and `γ ~ C⁺(0, ζ)`). Solve
//!     `P(S ≤ √V) = α` for `ζ`: `α` is the prior mass of difference scales at
//!     or below the empirical one, so a larger `α` means a smaller `ζ`.
//!
//! `P(S ≤ √V)` is strictly decreasing in `ζ`, so the root is unique and found
//! with Brent's method on `ln ζ`. Because the target depends only on the data,
//! different prior families calibrated on the same data sit on comparable
//! smoothing scales.

use crate::difference::{DifferenceOrder, differences};
use crate::likelihood::CellStatistics;
use crate::model::PriorFamily;
use crate::quadrature::integrate;
use crate::types::{ExceedanceProbability, NaiveEstimate, Zeta};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_2_PI, PI, SQRT_2};
use thiserror::Error;

const DEFAULT_LOWER: f64 = 1e-8;
const DEFAULT_UPPER: f64 = 1e4;
const DEFAULT_MAX_ITERATIONS: usize = 200;
const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Minimum number of finite differences needed for a sample variance.
const MIN_DIFFERENCES: usize = 2;

/// Half-width, in units of `ln τ`, of the horseshoe mixing integral beyond its bulk.
const MIXING_HALF_WIDTH: f64 = 40.0;
const MIXING_PANEL_WIDTH: f64 = 0.5;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("The skyline estimate yields only {found} finite differences; at least two are required.")]
    TooFewDifferences { found: usize },
    #[error("The skyline differences have degenerate variance ({0}); the data carry no scale information.")]
    DegenerateVariance(f64),
    #[error("Exceedance probability must lie strictly between 0 and 1, got {0}.")]
    InvalidProbability(f64),
    #[error("Invalid search bracket [{lower}, {upper}]: bounds must be positive, finite and ordered.")]
    InvalidBracket { lower: f64, upper: f64 },
    #[error("No sign change of the calibration objective over zeta in [{lower:e}, {upper:e}].")]
    NoSignChange { lower: f64, upper: f64 },
    #[error("The calibration objective became non-finite during root finding.")]
    NonFiniteObjective,
    #[error("Root finding did not converge within {iterations} iterations.")]
    DidNotConverge { iterations: usize },
}

/// Solver settings for [`ZetaCalibrator::calibrate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZetaCalibrator {
    pub alpha: ExceedanceProbability,
    pub lower: f64,
    pub upper: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ZetaCalibrator {
    fn default() -> Self {
        Self {
            alpha: ExceedanceProbability::default(),
            lower: DEFAULT_LOWER,
            upper: DEFAULT_UPPER,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Outcome of a calibration, kept for reporting alongside the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub zeta: Zeta,
    /// Sample variance `V` of the skyline differences.
    pub variance: f64,
    /// Number of finite differences behind `variance`.
    pub differences: usize,
    pub iterations: usize,
    pub naive: NaiveEstimate,
}

impl ZetaCalibrator {
    pub fn with_alpha(alpha: f64) -> Result<Self, CalibrationError> {
        let alpha =
            ExceedanceProbability::new(alpha).ok_or(CalibrationError::InvalidProbability(alpha))?;
        Ok(Self {
            alpha,
            ..Self::default()
        })
    }

    /// Calibrates `ζ` for the given statistics, field order and prior family.
    pub fn calibrate(
        &self,
        statistics: &[CellStatistics],
        order: DifferenceOrder,
        prior: PriorFamily,
    ) -> Result<Calibration, CalibrationError> {
        let naive = naive_estimate(statistics);
        log::debug!(
            "Skyline estimate is finite in {} of {} cells",
            naive.finite_cells(),
            naive.len()
        );
        let (variance, count) = difference_variance(&naive, order)?;
        let (zeta, iterations) = self.solve(variance, prior)?;
        log::info!(
            "Calibrated zeta = {} for {} prior (order {}, alpha = {}, V = {:.6e}, {} differences, {} iterations)",
            zeta,
            prior,
            order,
            self.alpha.value(),
            variance,
            count,
            iterations
        );
        Ok(Calibration {
            zeta,
            variance,
            differences: count,
            iterations,
            naive,
        })
    }

    /// Solves `P(S ≤ √V) = α` for `ζ` given the empirical variance `V`.
    pub fn solve(&self, variance: f64, prior: PriorFamily) -> Result<(Zeta, usize), CalibrationError> {
        if !variance.is_finite() || variance <= 0.0 {
            return Err(CalibrationError::DegenerateVariance(variance));
        }
        if !(self.lower.is_finite() && self.upper.is_finite())
            || self.lower <= 0.0
            || self.lower >= self.upper
        {
            return Err(CalibrationError::InvalidBracket {
                lower: self.lower,
                upper: self.upper,
            });
        }

        let alpha = self.alpha.value();
        let objective = |log_zeta: f64| exceedance(prior, log_zeta.exp(), variance) - alpha;
        let root = brent_root(
            objective,
            self.lower.ln(),
            self.upper.ln(),
            self.tolerance,
            self.max_iterations,
        )
        .map_err(|err| match err {
            CalibrationError::NoSignChange { .. } => CalibrationError::NoSignChange {
                lower: self.lower,
                upper: self.upper,
            },
            other => other,
        })?;

        let zeta = Zeta::new(root.value.exp()).ok_or(CalibrationError::NonFiniteObjective)?;
        Ok((zeta, root.iterations))
    }
}

/// Skyline estimate of every cell on the link scale.
pub fn naive_estimate(statistics: &[CellStatistics]) -> NaiveEstimate {
    NaiveEstimate::new(statistics.iter().map(CellStatistics::naive_estimate).collect())
}

/// Sample variance of the finite order-k differences of the skyline estimate.
pub fn difference_variance(
    naive: &NaiveEstimate,
    order: DifferenceOrder,
) -> Result<(f64, usize), CalibrationError> {
    let finite: Array1<f64> = differences(naive.as_view(), order)
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .collect();
    if finite.len() < MIN_DIFFERENCES {
        return Err(CalibrationError::TooFewDifferences {
            found: finite.len(),
        });
    }
    let variance = finite.var(1.0);
    if !variance.is_finite() || variance <= 0.0 {
        return Err(CalibrationError::DegenerateVariance(variance));
    }
    Ok((variance, finite.len()))
}

/// CDF of the prior-predictive difference scale at `x`, for unit `ζ`.
pub fn scale_cdf(prior: PriorFamily, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_infinite() {
        return 1.0;
    }
    match prior {
        PriorFamily::Gaussian => FRAC_2_PI * x.atan(),
        PriorFamily::Laplace => FRAC_2_PI * (x / SQRT_2).atan(),
        PriorFamily::Horseshoe => {
            // Mix the half-Cauchy CDF of γ over w = ln τ, whose density is sech(w) / π.
            let centre = x.ln();
            let lower = centre.min(0.0) - MIXING_HALF_WIDTH;
            let upper = centre.max(0.0) + MIXING_HALF_WIDTH;
            let panels = ((upper - lower) / MIXING_PANEL_WIDTH).ceil() as usize;
            let mixed = integrate(|w| (x * (-w).exp()).atan() / w.cosh(), lower, upper, panels);
            (2.0 / (PI * PI) * mixed).clamp(0.0, 1.0)
        }
    }
}

/// `P(S ≤ √V)` under global scale `zeta`.
pub fn exceedance(prior: PriorFamily, zeta: f64, variance: f64) -> f64 {
    scale_cdf(prior, variance.sqrt() / zeta)
}

#[derive(Debug, Clone, Copy)]
struct Root {
    value: f64,
    iterations: usize,
}

/// Brent's method for a bracketed root of a continuous scalar function.
fn brent_root<F>(
    f: F,
    lower: f64,
    upper: f64,
    tolerance: f64,
    max_iterations: usize,
) -> Result<Root, CalibrationError>
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = (lower, upper);
    let (mut fa, mut fb) = (f(a), f(b));
    if !fa.is_finite() || !fb.is_finite() {
        return Err(CalibrationError::NonFiniteObjective);
    }
    if fa == 0.0 {
        return Ok(Root {
            value: a,
            iterations: 0,
        });
    }
    if fb == 0.0 {
        return Ok(Root {
            value: b,
            iterations: 0,
        });
    }
    if (fa > 0.0) == (fb > 0.0) {
        return Err(CalibrationError::NoSignChange { lower, upper });
    }

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for iteration in 1..=max_iterations {
        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * tolerance;
        let midpoint = 0.5 * (c - b);
        if midpoint.abs() <= tol || fb == 0.0 {
            return Ok(Root {
                value: b,
                iterations: iteration,
            });
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when only two points differ.
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * midpoint * s, 1.0 - s)
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * midpoint * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let bound = (3.0 * midpoint * q - (tol * q).abs()).min((e * q).abs());
            if 2.0 * p < bound {
                e = d;
                d = p / q;
            } else {
                d = midpoint;
                e = d;
            }
        } else {
            d = midpoint;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(midpoint) };
        fb = f(b);
        if !fb.is_finite() {
            return Err(CalibrationError::NonFiniteObjective);
        }
    }

    Err(CalibrationError::DidNotConverge {
        iterations: max_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::FRAC_PI_2;

    fn coalescent_cells(opportunities: &[f64]) -> Vec<CellStatistics> {
        opportunities
            .iter()
            .map(|&opportunity| CellStatistics::Coalescent {
                events: 1,
                opportunity,
            })
            .collect()
    }

    #[test]
    fn brent_finds_cubic_root() {
        let root = brent_root(|x| x * x * x - 2.0 * x - 5.0, 2.0, 3.0, 1e-14, 100).unwrap();
        assert_abs_diff_eq!(root.value, 2.094_551_481_542_326_5, epsilon = 1e-12);
        assert!(root.iterations < 20);
    }

    #[test]
    fn brent_requires_a_sign_change() {
        assert!(matches!(
            brent_root(|x| x * x + 1.0, -1.0, 1.0, 1e-12, 50),
            Err(CalibrationError::NoSignChange { .. })
        ));
    }

    #[test]
    fn scale_cdfs_are_proper_distributions() {
        for prior in PriorFamily::ALL {
            assert_eq!(scale_cdf(prior, 0.0), 0.0);
            assert_eq!(scale_cdf(prior, f64::INFINITY), 1.0);
            let mut previous = 0.0;
            for i in 1..50 {
                let value = scale_cdf(prior, 0.1 * i as f64);
                assert!(value > previous, "{prior} CDF must increase");
                assert!(value < 1.0);
                previous = value;
            }
        }
        // The product of two standard half-Cauchy variables has median one.
        assert_abs_diff_eq!(scale_cdf(PriorFamily::Horseshoe, 1.0), 0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(scale_cdf(PriorFamily::Gaussian, 1.0), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn horseshoe_cdf_matches_independent_mixture() {
        // Brute-force midpoint rule over τ = tan(u), u ~ U(0, π/2).
        let x: f64 = 0.37;
        let n = 200_000;
        let brute: f64 = (0..n)
            .map(|i| {
                let u = (i as f64 + 0.5) / n as f64 * FRAC_PI_2;
                (x / u.tan()).atan()
            })
            .sum::<f64>()
            * (FRAC_PI_2 / n as f64)
            * 4.0
            / (PI * PI);
        assert_abs_diff_eq!(scale_cdf(PriorFamily::Horseshoe, x), brute, epsilon = 1e-8);
    }

    #[test]
    fn gaussian_solution_matches_closed_form() {
        let calibrator = ZetaCalibrator::with_alpha(0.05).unwrap();
        let variance = 0.3;
        let (zeta, _) = calibrator.solve(variance, PriorFamily::Gaussian).unwrap();
        let expected = variance.sqrt() / (PI * 0.05 / 2.0).tan();
        assert_relative_eq!(zeta.value(), expected, max_relative = 1e-9);

        let (laplace, _) = calibrator.solve(variance, PriorFamily::Laplace).unwrap();
        assert_relative_eq!(laplace.value(), expected / SQRT_2, max_relative = 1e-9);
    }

    #[test]
    fn horseshoe_median_calibration_recovers_empirical_scale() {
        let calibrator = ZetaCalibrator::with_alpha(0.5).unwrap();
        let (zeta, _) = calibrator.solve(2.25, PriorFamily::Horseshoe).unwrap();
        assert_relative_eq!(zeta.value(), 1.5, max_relative = 1e-8);
    }

    #[test]
    fn larger_alpha_gives_smaller_zeta() {
        let cells = coalescent_cells(&[40.0, 12.0, 30.0, 5.0, 18.0, 9.0, 22.0, 3.0]);
        for prior in PriorFamily::ALL {
            for order in [DifferenceOrder::First, DifferenceOrder::Second] {
                let mut previous = f64::INFINITY;
                for alpha in [0.01, 0.05, 0.1, 0.3, 0.6] {
                    let zeta = ZetaCalibrator::with_alpha(alpha)
                        .unwrap()
                        .calibrate(&cells, order, prior)
                        .unwrap()
                        .zeta
                        .value();
                    assert!(zeta < previous, "{prior}/{order}: alpha {alpha} gave {zeta}");
                    previous = zeta;
                }
            }
        }
    }

    #[test]
    fn variance_uses_finite_differences_of_skyline() {
        let cells = coalescent_cells(&[1.0, std::f64::consts::E, 1.0, std::f64::consts::E]);
        let naive = naive_estimate(&cells);
        let (variance, count) = difference_variance(&naive, DifferenceOrder::First).unwrap();
        // Differences are +1, -1, +1.
        assert_eq!(count, 3);
        assert_abs_diff_eq!(variance, 4.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn single_cell_fails_calibration() {
        let cells = coalescent_cells(&[10.0]);
        let result = ZetaCalibrator::default().calibrate(&cells, DifferenceOrder::First, PriorFamily::Horseshoe);
        assert!(matches!(result, Err(CalibrationError::TooFewDifferences { found: 0 })));
    }

    #[test]
    fn constant_skyline_has_degenerate_variance() {
        let cells = coalescent_cells(&[4.0, 4.0, 4.0, 4.0]);
        let result = ZetaCalibrator::default().calibrate(&cells, DifferenceOrder::First, PriorFamily::Gaussian);
        assert!(matches!(result, Err(CalibrationError::DegenerateVariance(_))));
    }

    #[test]
    fn unreachable_target_reports_no_sign_change() {
        let calibrator = ZetaCalibrator {
            upper: 1e-3,
            ..ZetaCalibrator::default()
        };
        assert!(matches!(
            calibrator.solve(1.0, PriorFamily::Gaussian),
            Err(CalibrationError::NoSignChange { .. })
        ));
    }

    #[test]
    fn invalid_alpha_is_rejected() {
        assert!(matches!(
            ZetaCalibrator::with_alpha(1.0),
            Err(CalibrationError::InvalidProbability(_))
        ));
    }
}
