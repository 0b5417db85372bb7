//! Upload sessions: turn reset/append requests into control-plane traffic.
//!
//! One [`SessionManager`] owns the occupancy state of every robot path it
//! serves. A request is parsed completely, planned on a copy of the robot's
//! [`RingState`] and sent over a fresh control-plane connection; the copy
//! replaces the stored state only once every command went out. A request
//! that fails half-way can therefore be retried as a whole.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::control::{ControlPlane, Connector};
use crate::error::{RailError, Result};
use crate::ring::RingState;
use crate::trajectory::{self, ParseOptions, TrajectoryPoint};

/// What an upload does with the points already on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Drop everything and start over at id 0.
    Reset,
    /// Continue the current sequence.
    Append,
}

impl UploadMode {
    /// Mode for a wire code: 0 resets, anything else appends.
    pub fn from_code(code: u32) -> Self {
        if code == 0 {
            UploadMode::Reset
        } else {
            UploadMode::Append
        }
    }

    pub fn code(self) -> u32 {
        match self {
            UploadMode::Reset => 0,
            UploadMode::Append => 1,
        }
    }
}

/// Per-robot occupancy plus the control plane to apply it to.
pub struct SessionManager<C> {
    connector: C,
    capacity: u32,
    parse: ParseOptions,
    rings: HashMap<i32, RingState>,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, capacity: u32, parse: ParseOptions) -> Result<Self> {
        // Fail early on a capacity the ring cannot use.
        RingState::new(capacity)?;
        Ok(Self {
            connector,
            capacity,
            parse,
            rings: HashMap::new(),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Committed occupancy of a robot path, if it was ever uploaded to.
    pub fn ring(&self, robot_id: i32) -> Option<&RingState> {
        self.rings.get(&robot_id)
    }

    /// Parse a CSV payload and apply it.
    ///
    /// Nothing is sent when the payload does not parse.
    pub fn upload(&mut self, robot_id: i32, mode: UploadMode, payload: &str) -> Result<RingState> {
        let points = trajectory::parse_payload(payload, self.parse)?;
        self.upload_points(robot_id, mode, &points)
    }

    /// Apply already parsed points.
    pub fn upload_points(
        &mut self,
        robot_id: i32,
        mode: UploadMode,
        points: &[TrajectoryPoint],
    ) -> Result<RingState> {
        if points.len() > self.capacity as usize {
            return Err(RailError::BatchTooLarge {
                len: points.len(),
                capacity: self.capacity,
            });
        }

        let mut ring = match self.rings.get(&robot_id) {
            Some(ring) => *ring,
            None => RingState::new(self.capacity)?,
        };

        let mut plane = self.connector.connect()?;
        match mode {
            UploadMode::Reset => {
                let commands = ring.reset(robot_id, points)?;
                plane.send_all(&commands)?;
            }
            UploadMode::Append => {
                let actual = plane.actual_position(robot_id)?;
                debug!(robot_id, actual, start = ring.start(), "execution cursor");
                if let Some(delete) = ring.evict(robot_id, actual) {
                    plane.send(&delete)?;
                }
                let commands = ring.append(robot_id, points)?;
                plane.send_all(&commands)?;
            }
        }
        plane.close()?;

        self.rings.insert(robot_id, ring);
        info!(
            robot_id,
            ?mode,
            points = points.len(),
            start = ring.start(),
            end = ring.end(),
            size = ring.size(),
            stop = ?ring.stop(),
            "upload applied"
        );
        Ok(ring)
    }
}
