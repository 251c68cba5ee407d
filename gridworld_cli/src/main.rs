use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use gridworld_core::{Action, GridWorld, RewardTable, State, Step, load_grid_world_from_str};
use rand::{SeedableRng, rngs::StdRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridworld", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the text dump of a map
    Show(MapArgs),
    /// Walk an episode through a map, printing every step
    Walk(WalkArgs),
}

#[derive(Args, Debug)]
struct MapArgs {
    /// Map file to load
    #[arg(short, long, value_name = "MAP_FILE", default_value = "maps/scenario.txt")]
    map: PathBuf,
}

#[derive(Args, Debug)]
struct WalkArgs {
    #[command(flatten)]
    map: MapArgs,

    /// Starting state as ROW,COL
    #[arg(
        short,
        long,
        value_parser = parse_state,
        default_value = "0,0",
        allow_hyphen_values = true
    )]
    start: (isize, isize),

    /// Comma-separated moves (u, r, d, l)
    #[arg(short, long, value_delimiter = ',', conflicts_with = "random")]
    actions: Vec<Action>,

    /// Take N uniformly random moves instead of a fixed list
    #[arg(long, value_name = "N")]
    random: Option<usize>,

    /// Seed for --random
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// JSON file overriding entries of the reward table
    #[arg(long, value_name = "JSON_FILE")]
    rewards: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Show(args) => {
            let env = load_map(&args.map)?;
            let (rows, cols) = env.shape();
            print!("{}", env.render());
            println!("{} rows x {} cols", rows, cols);
        }
        Command::Walk(args) => walk(args)?,
    }

    Ok(())
}

/// Logs go to stderr so stdout only carries the map and episode output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_state(s: &str) -> Result<(isize, isize), String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{}'", s))?;
    let row = row.trim().parse().map_err(|e| format!("bad row: {}", e))?;
    let col = col.trim().parse().map_err(|e| format!("bad column: {}", e))?;
    Ok((row, col))
}

fn load_map(path: &Path) -> Result<GridWorld> {
    if !path.exists() {
        return Err(anyhow!("Map file does not exist: {}", path.display()));
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read map file {}", path.display()))?;
    let env = load_grid_world_from_str(&text)
        .with_context(|| format!("Failed to load map {}", path.display()))?;
    debug!(path = %path.display(), "loaded map");
    Ok(env)
}

fn load_rewards(path: &Path) -> Result<RewardTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read reward file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse reward file {}", path.display()))
}

/// Drives an episode from the start state until the moves run out or a
/// terminal cell is reached.
fn walk(args: WalkArgs) -> Result<()> {
    let mut env = load_map(&args.map.map)?;
    if let Some(path) = &args.rewards {
        env = env.with_rewards(load_rewards(path)?);
    }

    let (row, col) = args.start;
    let start = env.state(row, col)?;

    let actions: Vec<Action> = match args.random {
        Some(n) => {
            let mut rng = StdRng::seed_from_u64(args.seed);
            (0..n).map(|_| Action::sample(&mut rng)).collect()
        }
        None => args.actions,
    };

    print!("{}", env.render());
    let (steps, total) = run_episode(&env, start, &actions)?;
    for (i, (from, action, step)) in steps.iter().enumerate() {
        println!(
            "{:>3}: {} --{}--> {}  reward {:+}{}",
            i + 1,
            from,
            action,
            step.state,
            step.reward,
            if step.terminal { "  [terminal]" } else { "" }
        );
    }
    info!(steps = steps.len(), total, "episode finished");
    println!("return: {}", total);
    Ok(())
}

/// Applies `actions` in order from `start`, stopping early at a terminal
/// state. Returns each step taken and the undiscounted return.
fn run_episode(
    env: &GridWorld,
    start: State,
    actions: &[Action],
) -> Result<(Vec<(State, Action, Step)>, f64)> {
    let mut state = start;
    let mut steps = Vec::with_capacity(actions.len());
    let mut total = 0.0;

    if env.is_terminal(state)? {
        return Ok((steps, total));
    }

    for &action in actions {
        let step = env.step(state, action)?;
        total += step.reward;
        steps.push((state, action, step));
        state = step.state;
        if step.terminal {
            break;
        }
    }
    Ok((steps, total))
}
