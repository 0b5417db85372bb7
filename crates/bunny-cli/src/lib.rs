//! bunny-ctl
//!
//! Operator front end for the bunny-rail tools. Most subcommands talk to
//! the switch agent directly over the control protocol; `upload` goes
//! through the upload proxy instead.
//!
//! # Usage
//!
//! ```bash
//! # Install a trajectory from scratch and park the robot at its end
//! bunny-ctl load path.csv
//!
//! # Stream a looping trajectory for one minute
//! bunny-ctl play path.csv --episodes 60
//!
//! # Install the speed scaling tables
//! bunny-ctl weights --actual 1.0 --target 0.5 --difference 2.0
//!
//! # Send an append batch through the proxy
//! bunny-ctl upload more.csv --append
//! ```

use std::path::PathBuf;

use bunny_rail::trajectory::JOINTS;
use bunny_rail::TrajectoryPoint;
use clap::{Args, Parser, Subcommand};

pub mod ops;

/// Default address of the switch agent.
pub const DEFAULT_CONTROL_PLANE: &str = "127.0.0.1:5555";

/// Default address of the upload proxy.
pub const DEFAULT_PROXY: &str = "127.0.0.1:10000";

/// Largest `--precision` accepted by `weights`; each step doubles the tables.
pub const MAX_PRECISION: u32 = 16;

/// bunny-rail operator CLI
#[derive(Parser, Debug)]
#[command(name = "bunny-ctl")]
#[command(author, version, about = "Drive the trajectory tables of a match-table robot controller")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Address:port of the switch agent
    #[arg(long, global = true, env = "BUNNY_CONTROL_PLANE", default_value = DEFAULT_CONTROL_PLANE)]
    pub control_plane: String,

    /// Robot path to act on
    #[arg(long, global = true, env = "BUNNY_ROBOT_ID", default_value_t = 0, allow_negative_numbers = true)]
    pub robot_id: i32,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add the points of a CSV file without touching anything else
    Add(TrajectoryArgs),

    /// Add a single point given field by field
    AddPoint(PointArgs),

    /// Delete an inclusive range of point ids
    Delete {
        first: u32,
        last: u32,
    },

    /// Remove every point and redirect
    Clear,

    /// Clear the tables, install a CSV file at ids 0.. and park the robot at its end
    Load(TrajectoryArgs),

    /// Ask the agent to log its tables
    Dump,

    /// Stream a looping CSV trajectory in real time
    Play(PlayArgs),

    /// Remove every function-table entry
    ClearFunctions,

    /// Install the three speed scaling tables
    Weights(WeightsArgs),

    /// Print the robot's execution cursor
    ActualId,

    /// Redirect the successor of a point
    SetRedirect {
        from: u32,
        to: u32,
    },

    /// Remove the redirect of a point
    UnsetRedirect {
        from: u32,
    },

    /// Overwrite the robot's execution cursor
    SetActualId {
        id: u32,
    },

    /// Send a CSV file to the upload proxy
    Upload(UploadArgs),

    /// Open and immediately close a control connection
    Close,

    /// Stop the switch agent
    Shutdown,
}

/// Arguments shared by `add` and `load`
#[derive(Args, Debug)]
pub struct TrajectoryArgs {
    /// CSV trajectory file
    pub file: PathBuf,

    /// Shift every id by this many slots
    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Ring capacity the ids wrap at
    #[arg(long, default_value_t = bunny_rail::ring::DEFAULT_CAPACITY)]
    pub capacity: u32,

    /// Link the last point back to the first
    #[arg(long)]
    pub looping: bool,

    /// Duration of the last point (ms)
    #[arg(long, default_value_t = bunny_rail::trajectory::DEFAULT_LAST_DURATION_MS)]
    pub last_duration_ms: u64,
}

/// Arguments for `add-point`
#[derive(Args, Debug)]
pub struct PointArgs {
    /// Point id
    pub id: u32,

    /// Id of the successor point
    pub next: u32,

    /// Time spent on this point (ms)
    pub duration_ms: u64,

    /// Six joint positions, comma separated
    #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true, required = true)]
    pub positions: Vec<f64>,

    /// Six joint speeds, comma separated
    #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true, required = true)]
    pub speeds: Vec<f64>,
}

impl PointArgs {
    /// Build the point, checking that every joint has a value.
    pub fn to_point(&self) -> anyhow::Result<TrajectoryPoint> {
        Ok(TrajectoryPoint {
            id: self.id,
            next_id: self.next,
            duration_ms: self.duration_ms,
            positions: joints("positions", &self.positions)?,
            speeds: joints("speeds", &self.speeds)?,
        })
    }
}

fn joints(name: &str, values: &[f64]) -> anyhow::Result<[f64; JOINTS]> {
    <[f64; JOINTS]>::try_from(values)
        .map_err(|_| anyhow::anyhow!("--{name} needs {JOINTS} values, got {}", values.len()))
}

/// Arguments for `play`
#[derive(Args, Debug)]
pub struct PlayArgs {
    /// CSV trajectory file (played in a loop)
    pub file: PathBuf,

    /// Number of refill cycles after the initial batch
    #[arg(short, long, default_value_t = 60)]
    pub episodes: usize,

    /// JSON playback settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Shift every id by this many slots (overrides the config file)
    #[arg(long)]
    pub offset: Option<u32>,
}

/// Arguments for `weights`
#[derive(Args, Debug)]
pub struct WeightsArgs {
    /// Scale of the actual-speed table
    #[arg(long, allow_negative_numbers = true)]
    pub actual: f64,

    /// Scale of the target-speed table
    #[arg(long, allow_negative_numbers = true)]
    pub target: f64,

    /// Scale of the position-difference table
    #[arg(long, allow_negative_numbers = true)]
    pub difference: f64,

    /// Significant bits kept per rule
    #[arg(
        short,
        long,
        default_value_t = bunny_rail::ternary::DEFAULT_PRECISION,
        value_parser = clap::value_parser!(u32).range(0..=MAX_PRECISION as i64)
    )]
    pub precision: u32,
}

/// Arguments for `upload`
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// CSV payload file
    pub file: PathBuf,

    /// Continue the current sequence instead of resetting it
    #[arg(long)]
    pub append: bool,

    /// Address:port of the upload proxy
    #[arg(long, env = "BUNNY_LISTEN", default_value = DEFAULT_PROXY)]
    pub proxy: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_weights() {
        let cli = Cli::try_parse_from([
            "bunny-ctl", "--robot-id", "2", "weights", "--actual", "1.5", "--target", "-0.5",
            "--difference", "2", "-p", "6",
        ])
        .unwrap();
        assert_eq!(cli.robot_id, 2);
        match cli.command {
            Commands::Weights(args) => {
                assert_eq!(args.target, -0.5);
                assert_eq!(args.precision, 6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_delete_and_defaults() {
        let cli = Cli::try_parse_from(["bunny-ctl", "delete", "10", "39"]).unwrap();
        assert_eq!(cli.control_plane, DEFAULT_CONTROL_PLANE);
        assert!(matches!(cli.command, Commands::Delete { first: 10, last: 39 }));
    }

    #[test]
    fn test_parse_upload_append() {
        let cli = Cli::try_parse_from(["bunny-ctl", "upload", "batch.csv", "--append"]).unwrap();
        match cli.command {
            Commands::Upload(args) => {
                assert!(args.append);
                assert_eq!(args.file, PathBuf::from("batch.csv"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_precision_is_capped() {
        let base = ["bunny-ctl", "weights", "--actual", "1", "--target", "1", "--difference", "1"];
        let parse = |p: &str| Cli::try_parse_from(base.iter().copied().chain(["-p", p]));
        assert!(parse("16").is_ok());
        assert!(parse("17").is_err());
        assert!(parse("40").is_err());
    }

    #[test]
    fn test_parse_add_point() {
        let cli = Cli::try_parse_from([
            "bunny-ctl", "--robot-id", "1", "add-point", "7", "8", "250", "--positions",
            "0.1,-0.2,0.3,0,0,1.5", "--speeds", "1,1,1,1,1,-1",
        ])
        .unwrap();
        let Commands::AddPoint(args) = cli.command else {
            panic!("expected add-point");
        };
        let point = args.to_point().unwrap();
        assert_eq!((point.id, point.next_id, point.duration_ms), (7, 8, 250));
        assert_eq!(point.positions, [0.1, -0.2, 0.3, 0.0, 0.0, 1.5]);
        assert_eq!(point.speeds[5], -1.0);
    }

    #[test]
    fn test_add_point_needs_six_joints() {
        let cli = Cli::try_parse_from([
            "bunny-ctl", "add-point", "0", "1", "100", "--positions", "1,2,3", "--speeds", "0,0,0,0,0,0",
        ])
        .unwrap();
        let Commands::AddPoint(args) = cli.command else {
            panic!("expected add-point");
        };
        assert!(args.to_point().is_err());
    }

    #[test]
    fn test_missing_argument_rejected() {
        assert!(Cli::try_parse_from(["bunny-ctl", "set-redirect", "4"]).is_err());
    }
}
