use std::{fmt, ops::Index, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    State,
    map::{Grid, GridError},
};

/// Number of actions available in every state.
pub const ACTION_COUNT: usize = 4;

pub const OPEN_REWARD: f64 = -1.0;
pub const WALL_REWARD: f64 = -1.0;
pub const GOAL_REWARD: f64 = 50.0;
pub const HAZARD_REWARD: f64 = -50.0;

/// Represents the static type of a cell in the environment grid.
///
/// Discriminants are stable and double as the numeric map codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellType {
    Open = 0,
    Wall = 1,
    Goal = 2,
    Hazard = 3,
}

impl Default for CellType {
    fn default() -> Self {
        CellType::Open
    }
}

impl CellType {
    /// The one-character symbol used by the text dump.
    pub fn symbol(self) -> char {
        match self {
            CellType::Open => ' ',
            CellType::Wall => '#',
            CellType::Goal => 'o',
            CellType::Hazard => 'x',
        }
    }

    /// Goal and hazard cells end an episode.
    pub fn is_terminal(self) -> bool {
        matches!(self, CellType::Goal | CellType::Hazard)
    }

    /// Parses a single map-file token. Accepts the symbol form (`.` for open)
    /// and the numeric code.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "." | "0" => Some(CellType::Open),
            "#" | "1" => Some(CellType::Wall),
            "o" | "2" => Some(CellType::Goal),
            "x" | "3" => Some(CellType::Hazard),
            _ => None,
        }
    }
}

impl TryFrom<u8> for CellType {
    type Error = GridError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CellType::Open),
            1 => Ok(CellType::Wall),
            2 => Ok(CellType::Goal),
            3 => Ok(CellType::Hazard),
            other => Err(GridError::InvalidArgument(format!(
                "invalid cell type code {}",
                other
            ))),
        }
    }
}

/// One of the four cardinal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Action {
    /// All actions, in ordinal order.
    pub const ALL: [Action; ACTION_COUNT] = [Action::Up, Action::Right, Action::Down, Action::Left];

    /// Position of this action in a Q-value row.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// `(row, col)` offset of a single move.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Action::Up => (-1, 0),
            Action::Right => (0, 1),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
        }
    }

    /// Picks an action uniformly at random.
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        Action::ALL[rng.random_range(0..ACTION_COUNT)]
    }
}

impl TryFrom<u8> for Action {
    type Error = GridError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Action::ALL
            .get(usize::from(code))
            .copied()
            .ok_or_else(|| GridError::InvalidArgument(format!("invalid action code {}", code)))
    }
}

impl FromStr for Action {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u" | "up" => Ok(Action::Up),
            "r" | "right" => Ok(Action::Right),
            "d" | "down" => Ok(Action::Down),
            "l" | "left" => Ok(Action::Left),
            other => Err(GridError::InvalidArgument(format!(
                "invalid action '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Up => "up",
            Action::Right => "right",
            Action::Down => "down",
            Action::Left => "left",
        };
        f.write_str(name)
    }
}

/// Reward granted for being in a cell of each type.
///
/// Deserializing a partial table fills the missing entries from the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    pub open: f64,
    pub wall: f64,
    pub goal: f64,
    pub hazard: f64,
}

impl Default for RewardTable {
    fn default() -> Self {
        RewardTable {
            open: OPEN_REWARD,
            wall: WALL_REWARD,
            goal: GOAL_REWARD,
            hazard: HAZARD_REWARD,
        }
    }
}

impl RewardTable {
    pub fn for_cell(&self, cell: CellType) -> f64 {
        match cell {
            CellType::Open => self.open,
            CellType::Wall => self.wall,
            CellType::Goal => self.goal,
            CellType::Hazard => self.hazard,
        }
    }
}

/// Outcome of a single move, as seen by an episode driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub state: State,
    pub reward: f64,
    pub terminal: bool,
}

/// A deterministic grid MDP: a fixed map plus the V and Q tables.
///
/// The environment holds no current position. Callers pass the state they
/// are tracking into every query.
#[derive(Debug, Clone)]
pub struct GridWorld {
    map: Grid<CellType>,
    values: Grid<f64>,
    action_values: Grid<[f64; ACTION_COUNT]>,
    rewards: RewardTable,
}

impl GridWorld {
    /// Creates an environment from nested rows of cells.
    ///
    /// Fails with [`GridError::InvalidArgument`] if `rows` is empty or not rectangular.
    pub fn new(rows: Vec<Vec<CellType>>) -> Result<Self, GridError> {
        Self::from_grid(Grid::from_rows(rows)?)
    }

    /// Creates an environment from an already-built map.
    pub fn from_grid(map: Grid<CellType>) -> Result<Self, GridError> {
        let (rows, cols) = map.shape();
        if rows == 0 || cols == 0 {
            return Err(GridError::InvalidArgument(format!(
                "grid world needs at least one row and column, got {}x{}",
                rows, cols
            )));
        }
        debug!(rows, cols, "created grid world");
        Ok(GridWorld {
            map,
            values: Grid::filled(rows, cols, 0.0),
            action_values: Grid::filled(rows, cols, [0.0; ACTION_COUNT]),
            rewards: RewardTable::default(),
        })
    }

    /// Replaces the reward table.
    pub fn with_rewards(mut self, rewards: RewardTable) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn rewards(&self) -> &RewardTable {
        &self.rewards
    }

    /// Returns a copy of the map.
    pub fn map(&self) -> Grid<CellType> {
        self.map.clone()
    }

    /// Returns a copy of the value table.
    pub fn values(&self) -> Grid<f64> {
        self.values.clone()
    }

    /// Returns a copy of the action-value table.
    pub fn action_values(&self) -> Grid<[f64; ACTION_COUNT]> {
        self.action_values.clone()
    }

    /// Every state in row-major order. Each call starts a fresh sequence.
    pub fn states(&self) -> impl Iterator<Item = State> + use<> {
        self.map.states()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.map.shape()
    }

    /// Builds a state from signed coordinates, checking both bounds.
    pub fn state(&self, row: isize, col: isize) -> Result<State, GridError> {
        let (rows, cols) = self.shape();
        match (usize::try_from(row), usize::try_from(col)) {
            (Ok(r), Ok(c)) if r < rows && c < cols => Ok(State::new(r, c)),
            _ => Err(GridError::OutOfBounds {
                row,
                col,
                rows,
                cols,
            }),
        }
    }

    pub fn cell_at(&self, state: State) -> Result<CellType, GridError> {
        let index = self.map.checked_index(state)?;
        Ok(self.map.as_slice()[index])
    }

    pub fn value(&self, state: State) -> Result<f64, GridError> {
        let index = self.values.checked_index(state)?;
        Ok(self.values.as_slice()[index])
    }

    pub fn action_value(&self, state: State, action: Action) -> Result<f64, GridError> {
        let index = self.action_values.checked_index(state)?;
        Ok(self.action_values.as_slice()[index][action.index()])
    }

    /// Overwrites `V[state]` without touching Q.
    ///
    /// This does not keep V consistent with Q; use [`GridWorld::set_action_value`]
    /// for that.
    pub fn set_value(&mut self, state: State, value: f64) -> Result<(), GridError> {
        self.values.set(state, value)
    }

    /// Overwrites `Q[state][action]` and sets `V[state]` to the new row maximum.
    pub fn set_action_value(
        &mut self,
        state: State,
        action: Action,
        q: f64,
    ) -> Result<(), GridError> {
        self.action_values.checked_index(state)?;
        let q_row = &mut self.action_values[state];
        q_row[action.index()] = q;
        self.values[state] = row_max(q_row);
        Ok(())
    }

    /// Reward for being in `state`. Depends only on the cell type.
    pub fn reward(&self, state: State) -> Result<f64, GridError> {
        Ok(self.rewards.for_cell(self.cell_at(state)?))
    }

    /// Moves one cell in the direction of `action`.
    ///
    /// Moves that would leave the grid or enter a wall return `state` unchanged.
    pub fn transition(&self, state: State, action: Action) -> Result<State, GridError> {
        self.map.checked_index(state)?;
        let (dr, dc) = action.delta();
        let candidate = state
            .row
            .checked_add_signed(dr)
            .zip(state.col.checked_add_signed(dc))
            .map(|(row, col)| State::new(row, col));

        match candidate.and_then(|next| self.map.get(next).map(|cell| (next, *cell))) {
            Some((next, CellType::Wall)) => {
                trace!(%state, %action, %next, "move blocked by wall");
                Ok(state)
            }
            Some((next, _)) => Ok(next),
            None => {
                trace!(%state, %action, "move blocked by grid edge");
                Ok(state)
            }
        }
    }

    pub fn is_terminal(&self, state: State) -> Result<bool, GridError> {
        Ok(self.cell_at(state)?.is_terminal())
    }

    /// Applies `action` and reports where it lands, the reward there and
    /// whether the episode is over.
    pub fn step(&self, state: State, action: Action) -> Result<Step, GridError> {
        let next = self.transition(state, action)?;
        Ok(Step {
            state: next,
            reward: self.reward(next)?,
            terminal: self.is_terminal(next)?,
        })
    }

    /// Text dump of the map. Same output as the `Display` impl.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// Largest entry of a Q row. NaN anywhere in the row makes the result NaN.
fn row_max(q_row: &[f64; ACTION_COUNT]) -> f64 {
    q_row.iter().copied().fold(f64::NEG_INFINITY, |best, q| {
        if best.is_nan() || q.is_nan() {
            f64::NAN
        } else {
            best.max(q)
        }
    })
}

impl Index<State> for GridWorld {
    type Output = CellType;

    fn index(&self, state: State) -> &Self::Output {
        &self.map[state]
    }
}

impl fmt::Display for GridWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols = self.map.cols();
        let border = vec!["+"; cols + 1].join("-");
        writeln!(f, "{}", border)?;
        for row in self.map.as_slice().chunks(cols) {
            let symbols: Vec<String> = row.iter().map(|cell| cell.symbol().to_string()).collect();
            writeln!(f, "|{}|", symbols.join("|"))?;
            writeln!(f, "{}", border)?;
        }
        Ok(())
    }
}

impl FromStr for GridWorld {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        load_grid_world_from_str(s)
    }
}

/// Loads a grid world from its text map format.
///
/// One row per line, cells separated by whitespace. Blank lines and lines
/// starting with `;` are skipped.
pub fn load_grid_world_from_str(map_string: &str) -> Result<GridWorld, GridError> {
    let mut rows: Vec<Vec<CellType>> = Vec::new();

    for (line_no, line) in map_string.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let row = line
            .split_whitespace()
            .enumerate()
            .map(|(col, token)| {
                CellType::from_token(token).ok_or_else(|| {
                    GridError::InvalidArgument(format!(
                        "unknown map code '{}' at line {}, column {}",
                        token,
                        line_no + 1,
                        col + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    GridWorld::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::CellType::{Goal, Hazard, Open, Wall};

    fn scenario() -> GridWorld {
        GridWorld::new(vec![
            vec![Open, Open, Open],
            vec![Open, Wall, Goal],
            vec![Open, Open, Hazard],
        ])
        .unwrap()
    }

    #[test]
    fn scenario_transitions_rewards_and_terminals() {
        let env = scenario();
        assert_eq!(
            env.transition(State::new(1, 0), Action::Right).unwrap(),
            State::new(1, 0)
        );
        assert_eq!(
            env.transition(State::new(0, 0), Action::Up).unwrap(),
            State::new(0, 0)
        );
        assert_eq!(env.reward(State::new(1, 2)).unwrap(), GOAL_REWARD);
        assert!(env.is_terminal(State::new(2, 2)).unwrap());
    }

    #[test]
    fn transition_moves_into_open_cells() {
        let env = scenario();
        assert_eq!(
            env.transition(State::new(0, 0), Action::Right).unwrap(),
            State::new(0, 1)
        );
        assert_eq!(
            env.transition(State::new(0, 2), Action::Down).unwrap(),
            State::new(1, 2)
        );
        assert_eq!(
            env.transition(State::new(2, 1), Action::Left).unwrap(),
            State::new(2, 0)
        );
        assert_eq!(
            env.transition(State::new(2, 0), Action::Up).unwrap(),
            State::new(1, 0)
        );
    }

    #[test]
    fn transition_checks_lower_bounds_without_wrapping() {
        let env = scenario();
        // (0, 0) Left would wrap to the far column with unchecked arithmetic.
        assert_eq!(
            env.transition(State::new(0, 0), Action::Left).unwrap(),
            State::new(0, 0)
        );
        assert_eq!(
            env.transition(State::new(2, 2), Action::Down).unwrap(),
            State::new(2, 2)
        );
        assert_eq!(
            env.transition(State::new(1, 2), Action::Right).unwrap(),
            State::new(1, 2)
        );
    }

    #[test]
    fn transition_rejects_invalid_start() {
        let env = scenario();
        assert!(matches!(
            env.transition(State::new(3, 0), Action::Up),
            Err(GridError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn set_action_value_keeps_value_at_row_max() {
        let mut env = scenario();
        let s = State::new(0, 1);
        env.set_action_value(s, Action::Up, 3.0).unwrap();
        assert_eq!(env.value(s).unwrap(), 3.0);
        env.set_action_value(s, Action::Left, 7.5).unwrap();
        assert_eq!(env.value(s).unwrap(), 7.5);
        env.set_action_value(s, Action::Left, -2.0).unwrap();
        assert_eq!(env.value(s).unwrap(), 3.0);
        assert_eq!(env.action_value(s, Action::Left).unwrap(), -2.0);
        assert_eq!(env.action_values()[s], [3.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn set_action_value_with_all_negative_row() {
        let mut env = scenario();
        let s = State::new(2, 0);
        for (i, action) in Action::ALL.into_iter().enumerate() {
            env.set_action_value(s, action, -10.0 + i as f64).unwrap();
        }
        assert_eq!(env.values()[s], -7.0);
    }

    #[test]
    fn nan_action_value_propagates_to_value() {
        let mut env = GridWorld::new(vec![vec![Open]]).unwrap();
        let s = State::new(0, 0);
        env.set_action_value(s, Action::Up, 4.0).unwrap();
        env.set_action_value(s, Action::Down, f64::NAN).unwrap();
        assert!(env.value(s).unwrap().is_nan());

        for action in Action::ALL {
            env.set_action_value(s, action, f64::NAN).unwrap();
        }
        assert!(env.value(s).unwrap().is_nan());

        for action in Action::ALL {
            env.set_action_value(s, action, -1.0).unwrap();
        }
        assert_eq!(env.value(s).unwrap(), -1.0);
    }

    #[test]
    fn deserialized_map_must_match_its_shape() {
        let bad = serde_json::from_str::<Grid<CellType>>(
            r#"{"rows":2,"cols":2,"cells":["Open"]}"#,
        );
        assert!(bad.is_err());

        let map: Grid<CellType> = serde_json::from_str(
            r#"{"rows":2,"cols":2,"cells":["Open","Wall","Goal","Hazard"]}"#,
        )
        .unwrap();
        let env = GridWorld::from_grid(map).unwrap();
        assert_eq!(env.cell_at(State::new(1, 1)).unwrap(), Hazard);
        assert_eq!(env.render(), "+-+-+\n| |#|\n+-+-+\n|o|x|\n+-+-+\n");
    }

    #[test]
    fn from_grid_rejects_empty_map() {
        assert!(matches!(
            GridWorld::from_grid(Grid::filled(0, 3, Open)),
            Err(GridError::InvalidArgument(_))
        ));
    }

    #[test]
    fn set_value_bypasses_q() {
        let mut env = scenario();
        let s = State::new(1, 1);
        env.set_value(s, 42.0).unwrap();
        assert_eq!(env.value(s).unwrap(), 42.0);
        assert_eq!(env.action_values()[s], [0.0; ACTION_COUNT]);
    }

    #[test]
    fn mutators_fail_before_writing() {
        let mut env = scenario();
        let outside = State::new(0, 3);
        assert!(matches!(
            env.set_value(outside, 1.0),
            Err(GridError::OutOfBounds { .. })
        ));
        assert!(matches!(
            env.set_action_value(outside, Action::Down, 1.0),
            Err(GridError::OutOfBounds { .. })
        ));
        assert!(env.values().iter().all(|v| *v == 0.0));
        assert!(
            env.action_values()
                .iter()
                .all(|row| *row == [0.0; ACTION_COUNT])
        );
    }

    #[test]
    fn accessors_return_copies() {
        let env = scenario();
        let mut values = env.values();
        values[State::new(0, 0)] = 99.0;
        let mut map = env.map();
        map[State::new(0, 0)] = Wall;
        assert_eq!(env.value(State::new(0, 0)).unwrap(), 0.0);
        assert_eq!(env.cell_at(State::new(0, 0)).unwrap(), Open);
    }

    #[test]
    fn reward_depends_only_on_cell_type() {
        let env = scenario();
        assert_eq!(env.reward(State::new(0, 0)).unwrap(), OPEN_REWARD);
        assert_eq!(
            env.reward(State::new(0, 0)).unwrap(),
            env.reward(State::new(2, 1)).unwrap()
        );
        assert_eq!(env.reward(State::new(1, 1)).unwrap(), WALL_REWARD);
        assert_eq!(env.reward(State::new(2, 2)).unwrap(), HAZARD_REWARD);
    }

    #[test]
    fn custom_reward_table() {
        let env = scenario().with_rewards(RewardTable {
            goal: 1.0,
            ..RewardTable::default()
        });
        assert_eq!(env.reward(State::new(1, 2)).unwrap(), 1.0);
        assert_eq!(env.reward(State::new(2, 2)).unwrap(), HAZARD_REWARD);
    }

    #[test]
    fn reward_table_partial_json() {
        let table: RewardTable = serde_json::from_str(r#"{"hazard": -5.0}"#).unwrap();
        assert_eq!(table.hazard, -5.0);
        assert_eq!(table.goal, GOAL_REWARD);
        assert_eq!(table.open, OPEN_REWARD);
    }

    #[test]
    fn terminal_only_for_goal_and_hazard() {
        let env = scenario();
        for state in env.states() {
            let expected = matches!(env[state], Goal | Hazard);
            assert_eq!(env.is_terminal(state).unwrap(), expected, "{}", state);
        }
    }

    #[test]
    fn state_checks_both_bounds() {
        let env = scenario();
        assert_eq!(env.state(2, 1).unwrap(), State::new(2, 1));
        assert_eq!(
            env.state(-1, 0),
            Err(GridError::OutOfBounds {
                row: -1,
                col: 0,
                rows: 3,
                cols: 3
            })
        );
        assert!(matches!(env.state(0, -1), Err(GridError::OutOfBounds { .. })));
        assert!(matches!(env.state(3, 0), Err(GridError::OutOfBounds { .. })));
        assert!(matches!(
            env.cell_at(State::new(3, 0)),
            Err(GridError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn step_combines_transition_reward_and_terminal() {
        let env = scenario();
        let step = env.step(State::new(0, 2), Action::Down).unwrap();
        assert_eq!(
            step,
            Step {
                state: State::new(1, 2),
                reward: GOAL_REWARD,
                terminal: true,
            }
        );
        let blocked = env.step(State::new(1, 0), Action::Right).unwrap();
        assert_eq!(blocked.state, State::new(1, 0));
        assert_eq!(blocked.reward, OPEN_REWARD);
        assert!(!blocked.terminal);
    }

    #[test]
    fn render_matches_text_dump() {
        let expected = "\
+-+-+-+
| | | |
+-+-+-+
| |#|o|
+-+-+-+
| | |x|
+-+-+-+
";
        let env = scenario();
        assert_eq!(env.render(), expected);
        assert_eq!(format!("{}", env), expected);
    }

    #[test]
    fn load_from_string() {
        let env: GridWorld = "\
; scenario map
. . .
. # o

0 0 3
"
        .parse()
        .unwrap();
        assert_eq!(env.shape(), (3, 3));
        assert_eq!(env.map().as_slice(), scenario().map().as_slice());
    }

    #[test]
    fn load_rejects_bad_maps() {
        assert!(matches!(
            load_grid_world_from_str(". .\n."),
            Err(GridError::InvalidArgument(_))
        ));
        assert!(matches!(
            load_grid_world_from_str("; only a comment\n\n"),
            Err(GridError::InvalidArgument(_))
        ));
        let err = load_grid_world_from_str(". ?").unwrap_err();
        assert_eq!(
            err,
            GridError::InvalidArgument("unknown map code '?' at line 1, column 2".to_string())
        );
    }

    #[test]
    fn codes_convert_to_enums() {
        assert_eq!(Action::try_from(0).unwrap(), Action::Up);
        assert_eq!(Action::try_from(3).unwrap(), Action::Left);
        assert!(matches!(
            Action::try_from(4),
            Err(GridError::InvalidArgument(_))
        ));
        assert_eq!(CellType::try_from(2).unwrap(), Goal);
        assert!(matches!(
            CellType::try_from(9),
            Err(GridError::InvalidArgument(_))
        ));
        assert_eq!("R".parse::<Action>().unwrap(), Action::Right);
        assert!("north".parse::<Action>().is_err());
    }

    #[test]
    fn sampled_actions_are_reproducible() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let first: Vec<Action> = (0..32).map(|_| Action::sample(&mut a)).collect();
        let second: Vec<Action> = (0..32).map(|_| Action::sample(&mut b)).collect();
        assert_eq!(first, second);
    }
}
