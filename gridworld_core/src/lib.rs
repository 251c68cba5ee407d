use std::fmt;

use serde::{Deserialize, Serialize};

pub mod environment;
pub mod map;

pub use environment::{
    ACTION_COUNT, Action, CellType, GOAL_REWARD, GridWorld, HAZARD_REWARD, OPEN_REWARD,
    RewardTable, Step, WALL_REWARD, load_grid_world_from_str,
};
pub use map::{Grid, GridError};

/// A `(row, col)` coordinate in the grid.
///
/// A `State` on its own is not bound to any grid; operations that take one
/// check it against the grid's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct State {
    pub row: usize,
    pub col: usize,
}

impl State {
    pub const fn new(row: usize, col: usize) -> Self {
        State { row, col }
    }
}

impl From<(usize, usize)> for State {
    fn from((row, col): (usize, usize)) -> Self {
        State { row, col }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}
