//! Trajectory points and the CSV format they are uploaded in.
//!
//! An upload payload is newline-delimited text. Blank lines are ignored and
//! the first remaining line is a header. Every other line holds at least 15
//! comma-separated floats:
//!
//! ```text
//! Column  Field
//! ------  -----
//! 0       timestamp (seconds)
//! 1..3    unused
//! 3..9    joint positions 1-6
//! 9..15   joint speeds 1-6
//! ```
//!
//! A point lasts until the timestamp of the following row. The last row has
//! no successor and gets a fallback duration instead.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RailError, Result};

/// Number of joints on the arm.
pub const JOINTS: usize = 6;

/// Duration given to the last point of a batch.
pub const DEFAULT_LAST_DURATION_MS: u64 = 2000;

const POSITION_COLUMNS: std::ops::Range<usize> = 3..9;
const SPEED_COLUMNS: std::ops::Range<usize> = 9..15;
const MIN_COLUMNS: usize = 15;

/// One waypoint for all six joints plus the link to its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Index of this point in the cyclic id space.
    pub id: u32,
    /// Point to execute once this one elapses.
    pub next_id: u32,
    /// Time until the next point, in milliseconds.
    pub duration_ms: u64,
    /// Target positions per joint (rad).
    pub positions: [f64; JOINTS],
    /// Target speeds per joint (rad/s).
    pub speeds: [f64; JOINTS],
}

impl TrajectoryPoint {
    /// Copy of this point moved `offset` slots forward in a ring of `modulus` ids.
    pub fn shifted(&self, offset: u32, modulus: u32) -> Self {
        Self {
            id: ring_add(self.id, offset, modulus),
            next_id: ring_add(self.next_id, offset, modulus),
            ..self.clone()
        }
    }

    /// Whether the point links to itself.
    pub fn is_self_loop(&self) -> bool {
        self.id == self.next_id
    }
}

fn ring_add(id: u32, offset: u32, modulus: u32) -> u32 {
    ((id as u64 + offset as u64) % modulus.max(1) as u64) as u32
}

/// How the `next_id` of each parsed row is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Row `i` links to `i + 1`; the last row links past the batch.
    #[default]
    Forward,
    /// Like `Forward`, but the last row links back to row 0.
    Looping,
}

impl std::str::FromStr for Linkage {
    type Err = RailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Linkage::Forward),
            "looping" => Ok(Linkage::Looping),
            other => Err(RailError::Config(format!("unknown linkage '{other}'"))),
        }
    }
}

impl Linkage {
    fn next(self, index: usize, len: usize) -> u32 {
        match self {
            Linkage::Forward => (index + 1) as u32,
            Linkage::Looping if index + 1 < len => (index + 1) as u32,
            Linkage::Looping => 0,
        }
    }
}

/// Options for turning CSV rows into points.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub linkage: Linkage,
    pub last_duration_ms: u64,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            linkage: Linkage::Forward,
            last_duration_ms: DEFAULT_LAST_DURATION_MS,
        }
    }
}

/// A parsed CSV row before ids and durations are assigned.
#[derive(Debug, Clone, PartialEq)]
struct Row {
    timestamp: f64,
    positions: [f64; JOINTS],
    speeds: [f64; JOINTS],
}

/// Parse a full upload payload (header line included).
pub fn parse_payload(text: &str, options: ParseOptions) -> Result<Vec<TrajectoryPoint>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    // Header
    if lines.next().is_none() {
        return Ok(Vec::new());
    }

    let rows = lines
        .map(|(line, l)| parse_row(line, l))
        .collect::<Result<Vec<_>>>()?;

    Ok(build_points(&rows, options))
}

/// Load a trajectory CSV file from disk.
pub fn load_file(path: impl AsRef<Path>, options: ParseOptions) -> Result<Vec<TrajectoryPoint>> {
    let text = std::fs::read_to_string(path)?;
    parse_payload(&text, options)
}

fn parse_row(line: usize, text: &str) -> Result<Row> {
    let fields = text
        .split(',')
        .enumerate()
        .map(|(column, raw)| {
            let raw = raw.trim();
            raw.parse::<f64>().map_err(|_| RailError::BadFloat {
                line,
                column,
                value: raw.to_string(),
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    if fields.len() < MIN_COLUMNS {
        return Err(RailError::MissingColumns {
            line,
            needed: MIN_COLUMNS,
            got: fields.len(),
        });
    }

    let mut positions = [0.0; JOINTS];
    positions.copy_from_slice(&fields[POSITION_COLUMNS]);
    let mut speeds = [0.0; JOINTS];
    speeds.copy_from_slice(&fields[SPEED_COLUMNS]);

    Ok(Row {
        timestamp: fields[0],
        positions,
        speeds,
    })
}

fn build_points(rows: &[Row], options: ParseOptions) -> Vec<TrajectoryPoint> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let duration_ms = match rows.get(i + 1) {
                // Truncates like the controller's integer field; negative gaps clamp to 0.
                Some(next) => (1000.0 * (next.timestamp - row.timestamp)) as u64,
                None => options.last_duration_ms,
            };
            TrajectoryPoint {
                id: i as u32,
                next_id: options.linkage.next(i, rows.len()),
                duration_ms,
                positions: row.positions,
                speeds: row.speeds,
            }
        })
        .collect()
}
