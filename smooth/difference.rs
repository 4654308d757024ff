use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DifferenceError {
    #[error("Difference order must be 1 or 2, but was {0}.")]
    InvalidOrder(usize),

    #[error("An order-{order} field needs more than {order} cells, but the grid has {cells}.")]
    TooFewCells { order: usize, cells: usize },
}

/// Order of the Markov random field: first or second differences of the log-trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum DifferenceOrder {
    First,
    Second,
}

impl DifferenceOrder {
    pub fn as_usize(self) -> usize {
        match self {
            DifferenceOrder::First => 1,
            DifferenceOrder::Second => 2,
        }
    }
}

impl TryFrom<usize> for DifferenceOrder {
    type Error = DifferenceError;

    fn try_from(order: usize) -> Result<Self, Self::Error> {
        match order {
            1 => Ok(DifferenceOrder::First),
            2 => Ok(DifferenceOrder::Second),
            other => Err(DifferenceError::InvalidOrder(other)),
        }
    }
}

impl From<DifferenceOrder> for usize {
    fn from(order: DifferenceOrder) -> Self {
        order.as_usize()
    }
}

impl fmt::Display for DifferenceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_usize())
    }
}

/// Neighbour structure of an order-k field over `cells` grid cells.
///
/// The first `k` values of the field are left free; every later value enters
/// through one k-th order difference, and those differences receive the
/// independent scale parameters of the shrinkage prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceStructure {
    order: DifferenceOrder,
    cells: usize,
}

impl DifferenceStructure {
    pub fn new(order: DifferenceOrder, cells: usize) -> Result<Self, DifferenceError> {
        if cells <= order.as_usize() {
            return Err(DifferenceError::TooFewCells {
                order: order.as_usize(),
                cells,
            });
        }
        Ok(Self { order, cells })
    }

    pub fn order(&self) -> DifferenceOrder {
        self.order
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    /// Number of k-th order differences, `cells - k`.
    pub fn n_differences(&self) -> usize {
        self.cells - self.order.as_usize()
    }

    /// Values removed from the differenced chain at the start of the field.
    pub fn initial_values(&self) -> usize {
        self.order.as_usize()
    }

    /// The `(cells - k) x cells` matrix `D` with `D θ` the k-th differences of `θ`.
    pub fn weights(&self) -> Array2<f64> {
        let mut d = Array2::<f64>::eye(self.cells);
        // Each pass differences adjacent rows and drops one row.
        for _ in 0..self.order.as_usize() {
            d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
        }
        d
    }

    /// k-th order differences of `theta` without materialising `D`.
    pub fn apply(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        differences(theta, self.order)
    }
}

/// k-th order differences of an arbitrary-length vector; empty when too short.
pub fn differences(values: ArrayView1<f64>, order: DifferenceOrder) -> Array1<f64> {
    let n = values.len();
    match order {
        DifferenceOrder::First if n >= 2 => {
            &values.slice(s![1..]) - &values.slice(s![..n - 1])
        }
        DifferenceOrder::Second if n >= 3 => {
            &values.slice(s![2..]) - &(2.0 * &values.slice(s![1..n - 1])) + values.slice(s![..n - 2])
        }
        _ => Array1::zeros(0),
    }
}
