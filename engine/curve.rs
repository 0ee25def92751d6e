use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

/// Reasons a time grid is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridDefect {
    #[error("grid has no time points")]
    Empty,
    #[error("grid time {value} at row {index} is not finite")]
    NonFinite { index: usize, value: f64 },
    #[error("grid must start at time 0, found {0}")]
    NonZeroOrigin(f64),
    #[error("grid time {value} at row {index} does not exceed the previous time {previous}")]
    NotAscending {
        index: usize,
        previous: f64,
        value: f64,
    },
    #[error("curve has {rows} rows but the grid has {grid} time points")]
    RowCount { rows: usize, grid: usize },
    #[error("value {value} at row {row}, column {column} is not finite")]
    NonFiniteValue { row: usize, column: usize, value: f64 },
}

/// Strictly ascending time points starting at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    pub fn new(times: Vec<f64>) -> Result<Self, GridDefect> {
        let first = *times.first().ok_or(GridDefect::Empty)?;
        for (index, &value) in times.iter().enumerate() {
            if !value.is_finite() {
                return Err(GridDefect::NonFinite { index, value });
            }
        }
        if first != 0.0 {
            return Err(GridDefect::NonZeroOrigin(first));
        }
        if let Some((index, (previous, value))) = times
            .iter()
            .copied()
            .tuple_windows()
            .enumerate()
            .find(|(_, (previous, value))| value <= previous)
        {
            return Err(GridDefect::NotAscending {
                index: index + 1,
                previous,
                value,
            });
        }
        Ok(Self { times })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[inline]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[inline]
    pub fn time(&self, index: usize) -> f64 {
        self.times[index]
    }

    #[inline]
    pub fn last_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    /// Row holding the greatest grid time `<= t`. Times before the first grid
    /// point map to row 0 and times past the end map to the last row.
    #[inline]
    pub fn locate(&self, t: f64) -> usize {
        self.times.partition_point(|&x| x <= t).saturating_sub(1)
    }
}

/// Right-continuous piecewise-constant curves sharing one time grid, one column
/// per covariate dummy.
#[derive(Debug, Clone)]
pub struct StepFunctionCurve {
    grid: TimeGrid,
    values: Array2<f64>,
}

impl StepFunctionCurve {
    pub fn new(grid: TimeGrid, values: Array2<f64>) -> Result<Self, GridDefect> {
        if values.nrows() != grid.len() {
            return Err(GridDefect::RowCount {
                rows: values.nrows(),
                grid: grid.len(),
            });
        }
        if let Some(((row, column), &value)) =
            values.indexed_iter().find(|(_, value)| !value.is_finite())
        {
            return Err(GridDefect::NonFiniteValue { row, column, value });
        }
        Ok(Self { grid, values })
    }

    #[inline]
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    #[inline]
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.values.ncols()
    }

    /// Value of every column at the greatest grid time `<= t`, without any
    /// growth beyond the last grid time.
    #[inline]
    pub fn evaluate(&self, t: f64) -> ArrayView1<'_, f64> {
        self.values.row(self.grid.locate(t))
    }

    #[inline]
    pub fn column(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.column(index)
    }

    /// Collapses the columns into a single curve `values · weights`, one entry per grid row.
    pub fn combine(&self, weights: ArrayView1<'_, f64>) -> Array1<f64> {
        self.values.dot(&weights)
    }
}
