use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::State;

/// Represents errors that can occur within grid world operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({row}, {col}) are out of bounds for grid shape ({rows}, {cols})")]
    OutOfBounds {
        row: isize,
        col: isize,
        rows: usize,
        cols: usize,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order.
/// Elements are addressed by `(row, col)`, or by a [`State`].
///
/// Deserialized grids go through the same shape check as [`Grid::from_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "GridParts<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

/// Unchecked serialized form of a [`Grid`].
#[derive(Deserialize)]
struct GridParts<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T> TryFrom<GridParts<T>> for Grid<T> {
    type Error = GridError;

    fn try_from(parts: GridParts<T>) -> Result<Self, Self::Error> {
        Grid::from_parts(parts.rows, parts.cols, parts.cells)
    }
}

impl<T> Grid<T> {
    /// Creates a grid of the given shape with every cell set to `value`.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self
    where
        T: Clone,
    {
        Grid {
            rows,
            cols,
            cells: vec![value; rows * cols],
        }
    }

    /// Builds a grid from nested rows.
    ///
    /// Fails with [`GridError::InvalidArgument`] unless there is at least one
    /// row, the first row is non-empty, and every row has the same length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, GridError> {
        let height = rows.len();
        let width = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            Some(_) => {
                return Err(GridError::InvalidArgument(
                    "grid has zero columns".to_string(),
                ));
            }
            None => return Err(GridError::InvalidArgument("grid has zero rows".to_string())),
        };

        let mut cells = Vec::with_capacity(height * width);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != width {
                return Err(GridError::InvalidArgument(format!(
                    "grid is not rectangular: row {} has {} columns, expected {}",
                    row,
                    values.len(),
                    width
                )));
            }
            cells.extend(values);
        }

        Ok(Grid {
            rows: height,
            cols: width,
            cells,
        })
    }

    /// Builds a grid from its shape and row-major cells.
    ///
    /// Fails with [`GridError::InvalidArgument`] if either dimension is zero or
    /// `cells.len() != rows * cols`.
    pub fn from_parts(rows: usize, cols: usize, cells: Vec<T>) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::InvalidArgument(format!(
                "grid needs at least one row and column, got {}x{}",
                rows, cols
            )));
        }
        if rows.checked_mul(cols) != Some(cells.len()) {
            return Err(GridError::InvalidArgument(format!(
                "grid of shape {}x{} cannot hold {} cells",
                rows,
                cols,
                cells.len()
            )));
        }
        Ok(Grid { rows, cols, cells })
    }

    /// Returns the number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, cols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Converts a state to a flat vector index.
    ///
    /// Returns `None` if the state is out of bounds.
    #[inline]
    pub fn state_to_index(&self, state: State) -> Option<usize> {
        if self.is_valid(state) {
            Some(state.row * self.cols + state.col)
        } else {
            None
        }
    }

    /// Converts a flat vector index back to a state.
    #[inline]
    pub fn index_to_state(&self, index: usize) -> Option<State> {
        if index < self.cells.len() {
            Some(State::new(index / self.cols, index % self.cols))
        } else {
            None
        }
    }

    /// Checks if the given state lies within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, state: State) -> bool {
        state.row < self.rows && state.col < self.cols
    }

    /// Like [`Grid::state_to_index`], but reports an out-of-bounds state as an error.
    pub fn checked_index(&self, state: State) -> Result<usize, GridError> {
        self.state_to_index(state).ok_or_else(|| {
            self.out_of_bounds(saturating_isize(state.row), saturating_isize(state.col))
        })
    }

    pub(crate) fn out_of_bounds(&self, row: isize, col: isize) -> GridError {
        GridError::OutOfBounds {
            row,
            col,
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Gets an immutable reference to the cell at the given state.
    pub fn get(&self, state: State) -> Option<&T> {
        self.cells.get(self.state_to_index(state)?)
    }

    /// Gets a mutable reference to the cell at the given state.
    pub fn get_mut(&mut self, state: State) -> Option<&mut T> {
        let index = self.state_to_index(state)?;
        self.cells.get_mut(index)
    }

    /// Sets the value of the cell at the given state.
    pub fn set(&mut self, state: State, value: T) -> Result<(), GridError> {
        let index = self.checked_index(state)?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator over every state of the grid in row-major order.
    pub fn states(&self) -> impl Iterator<Item = State> + use<T> {
        let cols = self.cols;
        (0..self.rows).flat_map(move |row| (0..cols).map(move |col| State::new(row, col)))
    }

    /// Returns an iterator over the cells of the grid in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Returns an iterator that yields `(State, &T)` for each cell.
    pub fn enumerate(&self) -> impl Iterator<Item = (State, &T)> {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (State::new(index / cols, index % cols), cell))
    }

    /// Returns the cells of one row, or `None` if `row` is out of range.
    pub fn row(&self, row: usize) -> Option<&[T]> {
        if row < self.rows {
            Some(&self.cells[row * self.cols..(row + 1) * self.cols])
        } else {
            None
        }
    }

    /// Returns a slice containing all cells in the grid.
    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }
}

fn saturating_isize(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

impl<T> Index<State> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, state: State) -> &Self::Output {
        match self.state_to_index(state) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid shape ({}, {})",
                state.row, state.col, self.rows, self.cols
            ),
        }
    }
}

impl<T> IndexMut<State> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, state: State) -> &mut Self::Output {
        let (rows, cols) = (self.rows, self.cols);
        match self.state_to_index(state) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid shape ({}, {})",
                state.row, state.col, rows, cols
            ),
        }
    }
}
