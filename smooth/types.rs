use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Calibrated global shrinkage scale of the Markov random field prior.
///
/// A `Zeta` is always strictly positive and finite. It is produced once per
/// dataset, grid and order by the calibrator and never changed afterwards.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Zeta(f64);

impl Zeta {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Zeta {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("zeta must be positive and finite, got {value}"))
    }
}

impl From<Zeta> for f64 {
    fn from(zeta: Zeta) -> Self {
        zeta.0
    }
}

impl fmt::Display for Zeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6e}", self.0)
    }
}

/// Probability in the open interval (0, 1) targeted by the calibrator.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ExceedanceProbability(f64);

impl ExceedanceProbability {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0 && value < 1.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for ExceedanceProbability {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
            .ok_or_else(|| format!("exceedance probability must lie in (0, 1), got {value}"))
    }
}

impl From<ExceedanceProbability> for f64 {
    fn from(alpha: ExceedanceProbability) -> Self {
        alpha.0
    }
}

impl Default for ExceedanceProbability {
    fn default() -> Self {
        Self(0.05)
    }
}

/// Closed-form skyline estimate of the trajectory on the link scale, one value per cell.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct NaiveEstimate(pub Array1<f64>);

impl NaiveEstimate {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Number of cells whose estimate is finite.
    pub fn finite_cells(&self) -> usize {
        self.0.iter().filter(|v| v.is_finite()).count()
    }
}

impl Deref for NaiveEstimate {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn zeta_rejects_non_positive_values() {
        assert!(Zeta::new(0.0).is_none());
        assert!(Zeta::new(-1.0).is_none());
        assert!(Zeta::new(f64::NAN).is_none());
        assert!(Zeta::new(f64::INFINITY).is_none());
        assert_eq!(Zeta::new(0.25).map(Zeta::value), Some(0.25));
    }

    #[test]
    fn exceedance_probability_is_open_interval() {
        assert!(ExceedanceProbability::new(0.0).is_none());
        assert!(ExceedanceProbability::new(1.0).is_none());
        assert!(ExceedanceProbability::new(0.5).is_some());
        assert_eq!(ExceedanceProbability::default().value(), 0.05);
    }

    #[test]
    fn deserialization_validates_values() {
        let zeta: Zeta = serde_json::from_str("0.5").unwrap();
        assert_eq!(zeta.value(), 0.5);
        assert!(serde_json::from_str::<Zeta>("-0.5").is_err());
        assert!(serde_json::from_str::<ExceedanceProbability>("1.5").is_err());
        assert_eq!(serde_json::to_string(&zeta).unwrap(), "0.5");
    }

    #[test]
    fn naive_estimate_counts_finite_cells() {
        let estimate = NaiveEstimate::new(array![1.0, f64::NAN, -2.0, f64::NEG_INFINITY]);
        assert_eq!(estimate.finite_cells(), 2);
        assert_eq!(estimate.len(), 4);
    }
}
