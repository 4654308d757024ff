//! # Time Grid Construction
//!
//! The latent trajectory is piecewise constant over a partition of the
//! observation window `[0, max_time]`. This module owns that partition
//! ([`TimeGrid`]) and the policy used to build it from the informative event
//! times of a dataset ([`GridBuilder`]).
//!
//! Cell `i` covers the half-open interval `(b_i, b_{i+1}]`. The first cell also
//! contains its lower boundary, so every time in `[b_0, b_m]` belongs to
//! exactly one cell.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while validating or constructing a grid.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("At least {required} informative events are needed to build a grid, but only {found} were found.")]
    DataInsufficient { found: usize, required: usize },
    #[error("The time domain is invalid: {0}")]
    InvalidDomain(String),
    #[error("Event and boundary times must be finite.")]
    NonFiniteTime,
    #[error("A grid must contain at least one cell.")]
    ZeroCells,
    #[error("Grid boundaries must be strictly increasing (violated at index {index}).")]
    NonIncreasingBoundaries { index: usize },
    #[error("A grid needs at least two boundaries, but {0} were provided.")]
    TooFewBoundaries(usize),
}

/// Ordered, strictly increasing cell boundaries over the observation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct TimeGrid {
    boundaries: Array1<f64>,
}

impl TimeGrid {
    /// Validates and wraps an explicit boundary vector.
    pub fn from_boundaries(boundaries: Vec<f64>) -> Result<Self, GridError> {
        if boundaries.len() < 2 {
            return Err(GridError::TooFewBoundaries(boundaries.len()));
        }
        if boundaries.iter().any(|b| !b.is_finite()) {
            return Err(GridError::NonFiniteTime);
        }
        if let Some(index) = boundaries.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(GridError::NonIncreasingBoundaries { index: index + 1 });
        }
        Ok(Self {
            boundaries: Array1::from_vec(boundaries),
        })
    }

    /// `cells` equal-width cells over `[0, max_time]`.
    pub fn equal_width(max_time: f64, cells: usize) -> Result<Self, GridError> {
        if cells == 0 {
            return Err(GridError::ZeroCells);
        }
        if !max_time.is_finite() {
            return Err(GridError::NonFiniteTime);
        }
        if max_time <= 0.0 {
            return Err(GridError::InvalidDomain(format!(
                "maximum time must be positive, got {max_time}"
            )));
        }
        let width = max_time / cells as f64;
        let mut boundaries: Vec<f64> = (0..cells).map(|i| i as f64 * width).collect();
        // Pin the last boundary exactly so the maximum observed time stays inside.
        boundaries.push(max_time);
        Self::from_boundaries(boundaries)
    }

    pub fn cells(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn boundaries(&self) -> ArrayView1<'_, f64> {
        self.boundaries.view()
    }

    pub fn lower(&self) -> f64 {
        self.boundaries[0]
    }

    pub fn upper(&self) -> f64 {
        self.boundaries[self.cells()]
    }

    pub fn span(&self) -> f64 {
        self.upper() - self.lower()
    }

    /// Lower and upper boundary of cell `index`.
    pub fn cell_bounds(&self, index: usize) -> (f64, f64) {
        (self.boundaries[index], self.boundaries[index + 1])
    }

    pub fn widths(&self) -> Array1<f64> {
        Array1::from_iter(self.boundaries.windows(2).into_iter().map(|w| w[1] - w[0]))
    }

    /// Cell midpoints, used to align posterior summaries on a time axis.
    pub fn midpoints(&self) -> Array1<f64> {
        Array1::from_iter(
            self.boundaries
                .windows(2)
                .into_iter()
                .map(|w| 0.5 * (w[0] + w[1])),
        )
    }

    /// Index of the cell containing `time`, or `None` outside the grid.
    pub fn locate(&self, time: f64) -> Option<usize> {
        if !time.is_finite() || time < self.lower() || time > self.upper() {
            return None;
        }
        if time == self.lower() {
            return Some(0);
        }
        self.boundaries
            .iter()
            .skip(1)
            .position(|&upper| time <= upper)
    }

    /// Length of the overlap between `[start, end]` and cell `index`.
    pub fn overlap(&self, index: usize, start: f64, end: f64) -> f64 {
        let (lower, upper) = self.cell_bounds(index);
        (end.min(upper) - start.max(lower)).max(0.0)
    }
}

impl TryFrom<Vec<f64>> for TimeGrid {
    type Error = GridError;

    fn try_from(boundaries: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_boundaries(boundaries)
    }
}

impl From<TimeGrid> for Vec<f64> {
    fn from(grid: TimeGrid) -> Self {
        grid.boundaries.to_vec()
    }
}

/// Builds a [`TimeGrid`] whose cells each hold a minimum number of informative events.
///
/// The builder starts from equal-width cells over `[0, max_time]`. Cells that
/// fall short of `min_events_per_cell` are merged into their left neighbour (the
/// first cell merges rightwards). The requested cell count is then restored by
/// repeatedly splitting the widest cell that can be split without starving
/// either half. When no such cell exists the grid keeps fewer cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBuilder {
    pub cells: usize,
    pub min_events_per_cell: usize,
    pub max_time: Option<f64>,
}

impl GridBuilder {
    pub fn new(cells: usize) -> Self {
        Self {
            cells,
            min_events_per_cell: 1,
            max_time: None,
        }
    }

    pub fn with_min_events(mut self, min_events_per_cell: usize) -> Self {
        self.min_events_per_cell = min_events_per_cell.max(1);
        self
    }

    pub fn with_max_time(mut self, max_time: f64) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Builds the grid from informative event times.
    ///
    /// `observed_max` is the largest time present anywhere in the dataset; it is
    /// used as the upper boundary unless the builder carries an explicit
    /// `max_time`.
    pub fn build(&self, informative: &[f64], observed_max: f64) -> Result<TimeGrid, GridError> {
        if self.cells == 0 {
            return Err(GridError::ZeroCells);
        }
        if informative.iter().any(|t| !t.is_finite()) || !observed_max.is_finite() {
            return Err(GridError::NonFiniteTime);
        }
        if let Some(&negative) = informative.iter().find(|&&t| t < 0.0) {
            return Err(GridError::InvalidDomain(format!(
                "event time {negative} precedes the present (0)"
            )));
        }

        let min_events = self.min_events_per_cell.max(1);
        let required = min_events.max(2);
        if informative.len() < required {
            return Err(GridError::DataInsufficient {
                found: informative.len(),
                required,
            });
        }

        let mut sorted = informative.to_vec();
        sorted.sort_by(f64::total_cmp);
        let last_event = sorted[sorted.len() - 1];

        let max_time = self.max_time.unwrap_or(observed_max.max(last_event));
        if max_time < last_event {
            return Err(GridError::InvalidDomain(format!(
                "maximum time {max_time} lies before the last informative event at {last_event}"
            )));
        }

        let initial = TimeGrid::equal_width(max_time, self.cells)?;
        let merged = merge_sparse_cells(&sorted, &initial.boundaries.to_vec(), min_events);
        if merged.len() - 1 < self.cells {
            log::debug!(
                "Merged sparse cells: {} equal-width cells reduced to {}",
                self.cells,
                merged.len() - 1
            );
        }
        let restored = restore_cell_count(&sorted, merged, self.cells, min_events);

        let grid = TimeGrid::from_boundaries(restored)?;
        if grid.cells() < self.cells {
            log::warn!(
                "Only {} of the requested {} cells could hold at least {} informative event(s) each",
                grid.cells(),
                self.cells,
                min_events
            );
        }
        log::info!(
            "Built grid with {} cells over [{:.4}, {:.4}] from {} informative events",
            grid.cells(),
            grid.lower(),
            grid.upper(),
            sorted.len()
        );
        Ok(grid)
    }
}

/// Number of sorted events inside a cell with the grid's inclusion convention.
fn events_in(sorted: &[f64], lower: f64, upper: f64, includes_lower: bool) -> usize {
    let end = sorted.partition_point(|&e| e <= upper);
    let start = if includes_lower {
        sorted.partition_point(|&e| e < lower)
    } else {
        sorted.partition_point(|&e| e <= lower)
    };
    end.saturating_sub(start)
}

fn merge_sparse_cells(sorted: &[f64], boundaries: &[f64], min_events: usize) -> Vec<f64> {
    let last = boundaries.len() - 1;
    let mut kept = vec![boundaries[0]];

    for &candidate in &boundaries[1..last] {
        let lower = kept[kept.len() - 1];
        if events_in(sorted, lower, candidate, kept.len() == 1) >= min_events {
            kept.push(candidate);
        }
    }
    kept.push(boundaries[last]);

    let tail = kept.len() - 1;
    if kept.len() > 2 && events_in(sorted, kept[tail - 1], kept[tail], tail == 1) < min_events {
        kept.remove(tail - 1);
    }
    kept
}

fn restore_cell_count(
    sorted: &[f64],
    mut boundaries: Vec<f64>,
    target: usize,
    min_events: usize,
) -> Vec<f64> {
    while boundaries.len() - 1 < target {
        let best = (0..boundaries.len() - 1)
            .filter_map(|cell| {
                let (lower, upper) = (boundaries[cell], boundaries[cell + 1]);
                split_point(sorted, lower, upper, cell == 0, min_events)
                    .map(|point| (cell, upper - lower, point))
            })
            .fold(None, |best: Option<(usize, f64, f64)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            });

        match best {
            Some((cell, _, point)) => {
                log::debug!("Splitting cell {cell} at t = {point:.6}");
                boundaries.insert(cell + 1, point);
            }
            None => break,
        }
    }
    boundaries
}

/// Interior point at which a cell can be split so both halves keep `min_events`.
fn split_point(
    sorted: &[f64],
    lower: f64,
    upper: f64,
    includes_lower: bool,
    min_events: usize,
) -> Option<f64> {
    let start = if includes_lower {
        sorted.partition_point(|&e| e < lower)
    } else {
        sorted.partition_point(|&e| e <= lower)
    };
    let end = sorted.partition_point(|&e| e <= upper);
    let inside = &sorted[start..end.max(start)];
    if inside.len() < 2 * min_events {
        return None;
    }

    let midpoint = 0.5 * (lower + upper);
    let left = events_in(sorted, lower, midpoint, includes_lower);
    let right = events_in(sorted, midpoint, upper, false);
    if midpoint > lower && midpoint < upper && left >= min_events && right >= min_events {
        return Some(midpoint);
    }

    // Fall back to a boundary between two distinct events near the median,
    // searching outwards so ties do not block the split.
    let half = inside.len() / 2;
    let admissible = |k: usize| k >= min_events && inside.len() - k >= min_events;
    (0..inside.len())
        .flat_map(|offset| [half.checked_sub(offset), half.checked_add(offset)])
        .flatten()
        .filter(|&k| k > 0 && k < inside.len() && admissible(k))
        .find(|&k| inside[k - 1] < inside[k])
        .map(|k| 0.5 * (inside[k - 1] + inside[k]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_strictly_increasing(grid: &TimeGrid) {
        let b = grid.boundaries();
        assert_eq!(b.len(), grid.cells() + 1);
        for i in 1..b.len() {
            assert!(b[i] > b[i - 1], "boundary {i} is not increasing: {:?}", b);
        }
    }

    #[test]
    fn equal_width_grid_has_expected_boundaries() {
        let grid = TimeGrid::equal_width(10.0, 4).unwrap();
        assert_eq!(grid.cells(), 4);
        assert_eq!(grid.boundaries().to_vec(), vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        assert_eq!(grid.midpoints().to_vec(), vec![1.25, 3.75, 6.25, 8.75]);
        assert_abs_diff_eq!(grid.widths().sum(), 10.0, epsilon = 1e-12);
        assert_strictly_increasing(&grid);
    }

    #[test]
    fn explicit_boundaries_are_validated() {
        assert!(matches!(
            TimeGrid::from_boundaries(vec![0.0]),
            Err(GridError::TooFewBoundaries(1))
        ));
        assert!(matches!(
            TimeGrid::from_boundaries(vec![0.0, 1.0, 1.0]),
            Err(GridError::NonIncreasingBoundaries { index: 2 })
        ));
        assert!(matches!(
            TimeGrid::from_boundaries(vec![0.0, f64::NAN]),
            Err(GridError::NonFiniteTime)
        ));
        assert!(matches!(TimeGrid::equal_width(5.0, 0), Err(GridError::ZeroCells)));
    }

    #[test]
    fn locate_uses_right_closed_cells() {
        let grid = TimeGrid::equal_width(3.0, 3).unwrap();
        assert_eq!(grid.locate(0.0), Some(0));
        assert_eq!(grid.locate(1.0), Some(0));
        assert_eq!(grid.locate(1.0 + 1e-9), Some(1));
        assert_eq!(grid.locate(3.0), Some(2));
        assert_eq!(grid.locate(3.5), None);
        assert_eq!(grid.locate(-0.1), None);
        assert_eq!(grid.locate(f64::NAN), None);
    }

    #[test]
    fn overlap_is_clipped_to_cell() {
        let grid = TimeGrid::equal_width(4.0, 2).unwrap();
        assert_abs_diff_eq!(grid.overlap(0, 1.0, 3.0), 1.0);
        assert_abs_diff_eq!(grid.overlap(1, 1.0, 3.0), 1.0);
        assert_abs_diff_eq!(grid.overlap(1, 0.0, 1.0), 0.0);
    }

    #[test]
    fn serde_round_trip_validates_boundaries() {
        let grid = TimeGrid::equal_width(2.0, 2).unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(json, "[0.0,1.0,2.0]");
        let back: TimeGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grid);
        assert!(serde_json::from_str::<TimeGrid>("[0.0,2.0,1.0]").is_err());
    }

    #[test]
    fn builder_keeps_equal_width_when_every_cell_is_informative() {
        let events: Vec<f64> = (0..10).map(|i| i as f64 + 0.5).collect();
        let grid = GridBuilder::new(5).build(&events, 10.0).unwrap();
        assert_eq!(grid.boundaries().to_vec(), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn builder_merges_and_resplits_sparse_cells() {
        let events = [0.1, 0.2, 0.3, 0.4, 9.5];
        let grid = GridBuilder::new(5).build(&events, 10.0).unwrap();
        assert_eq!(grid.cells(), 5);
        assert_strictly_increasing(&grid);
        let expected = [0.0, 0.125, 0.25, 0.35, 2.0, 10.0];
        for (actual, expected) in grid.boundaries().iter().zip(expected) {
            assert_abs_diff_eq!(*actual, expected, epsilon = 1e-12);
        }
        for cell in 0..grid.cells() {
            let (lower, upper) = grid.cell_bounds(cell);
            assert!(events_in(&events, lower, upper, cell == 0) >= 1);
        }
    }

    #[test]
    fn builder_reduces_cell_count_when_infeasible() {
        let events: Vec<f64> = (1..=9).map(f64::from).collect();
        let grid = GridBuilder::new(10).build(&events, 9.0).unwrap();
        assert_eq!(grid.cells(), 9);
        assert_strictly_increasing(&grid);
        for cell in 0..grid.cells() {
            let (lower, upper) = grid.cell_bounds(cell);
            assert_eq!(events_in(&events, lower, upper, cell == 0), 1);
        }
    }

    #[test]
    fn builder_honours_minimum_events_per_cell() {
        let events: Vec<f64> = (0..12).map(|i| 0.1 + i as f64 * 0.05).chain([7.0, 8.0]).collect();
        let grid = GridBuilder::new(4)
            .with_min_events(2)
            .build(&events, 8.0)
            .unwrap();
        assert_strictly_increasing(&grid);
        for cell in 0..grid.cells() {
            let (lower, upper) = grid.cell_bounds(cell);
            assert!(events_in(&events, lower, upper, cell == 0) >= 2);
        }
    }

    #[test]
    fn degenerate_input_is_data_insufficient() {
        assert!(matches!(
            GridBuilder::new(3).build(&[], 1.0),
            Err(GridError::DataInsufficient { found: 0, .. })
        ));
        assert!(matches!(
            GridBuilder::new(3).build(&[0.5], 1.0),
            Err(GridError::DataInsufficient { found: 1, .. })
        ));
    }

    #[test]
    fn builder_rejects_maximum_before_last_event() {
        let result = GridBuilder::new(2).with_max_time(1.0).build(&[0.5, 2.0], 2.0);
        assert!(matches!(result, Err(GridError::InvalidDomain(_))));
    }
}
