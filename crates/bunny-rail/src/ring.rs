//! Occupancy bookkeeping for the cyclic point-id space of one robot.
//!
//! The controller holds at most `modulus` points per robot, addressed by ids
//! `0..modulus`. Uploads write consecutive ids starting at `end` and wrap;
//! points the robot has already passed are deleted to make room. The last
//! uploaded point always carries a self-loop redirect (the *stop*) so the
//! robot halts there if no further points arrive.
//!
//! `RingState` only plans: each transition returns the commands that realise
//! it and updates the bookkeeping. Sending them is the caller's job.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::PointRecord;
use crate::command::Command;
use crate::error::{RailError, Result};
use crate::trajectory::TrajectoryPoint;

/// Default capacity of the controller's point table, per robot.
pub const DEFAULT_CAPACITY: u32 = 1000;

/// Ring occupancy of one robot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingState {
    start: u32,
    end: u32,
    size: u32,
    stop: Option<u32>,
    modulus: u32,
}

impl RingState {
    /// Empty ring holding `modulus` ids.
    pub fn new(modulus: u32) -> Result<Self> {
        if modulus == 0 {
            return Err(RailError::Config("ring capacity must be > 0".into()));
        }
        Ok(Self {
            start: 0,
            end: 0,
            size: 0,
            stop: None,
            modulus,
        })
    }

    /// Oldest point still needed.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last uploaded point.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Highest id in use plus one, capped at the capacity.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Point carrying the self-loop redirect.
    pub fn stop(&self) -> Option<u32> {
        self.stop
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        if len > self.modulus as usize {
            return Err(RailError::BatchTooLarge {
                len,
                capacity: self.modulus,
            });
        }
        Ok(())
    }

    fn add_commands(&self, robot_id: i32, points: &[TrajectoryPoint], offset: u32) -> Vec<Command> {
        points
            .iter()
            .map(|p| {
                Command::AddPoint(PointRecord {
                    robot_id,
                    point: p.shifted(offset, self.modulus),
                })
            })
            .collect()
    }

    /// Replace everything on the controller with `points` at ids `0..len`.
    pub fn reset(&mut self, robot_id: i32, points: &[TrajectoryPoint]) -> Result<Vec<Command>> {
        self.check_batch(points.len())?;
        let len = points.len() as u32;

        let mut commands = Vec::with_capacity(points.len() + 3);
        commands.push(Command::ClearAll);
        commands.push(Command::SetActualPosition {
            robot_id,
            point_id: 0,
        });
        commands.extend(self.add_commands(robot_id, points, 0));

        self.start = 0;
        self.end = len % self.modulus;
        self.size = len;
        self.stop = len.checked_sub(1);

        if let Some(stop) = self.stop {
            commands.push(Command::SetRedirect {
                robot_id,
                from_id: stop,
                to_id: stop,
            });
        }
        Ok(commands)
    }

    /// Reclaim points the robot has passed, given its reported cursor.
    ///
    /// Returns the range delete to issue, if any. Calling it again with the
    /// same cursor is a no-op.
    pub fn evict(&mut self, robot_id: i32, actual: u32) -> Option<Command> {
        if actual > self.start {
            let cmd = Command::DeleteRange {
                robot_id,
                first: self.start,
                last: actual - 1,
            };
            self.start = actual;
            Some(cmd)
        } else if actual < self.start {
            // Cursor is behind us: it wrapped past the top of the ring, or
            // the robot restarted. Drop the tail and resync to the new lap.
            let cmd = Command::DeleteRange {
                robot_id,
                first: self.start,
                last: self.size,
            };
            self.start = 0;
            self.size = self.end;
            Some(cmd)
        } else {
            None
        }
    }

    /// Points between `start` and `end`, i.e. uploaded and not yet reclaimed.
    ///
    /// `start == end` is ambiguous on its own; it is a full ring once every id
    /// has been written and an empty one before that.
    pub fn live(&self) -> u32 {
        if self.start == self.end {
            if self.size == self.modulus {
                self.modulus
            } else {
                0
            }
        } else {
            ((self.end as u64 + self.modulus as u64 - self.start as u64) % self.modulus as u64) as u32
        }
    }

    /// Number of ids that are neither required nor free, i.e. would be
    /// overwritten by writing `len` more points.
    pub fn overrun(&self, len: usize) -> usize {
        let free = self.modulus - self.live();
        len.saturating_sub(free as usize)
    }

    /// Continue the sequence with `points` after the current end.
    ///
    /// Run [`RingState::evict`] first so freed ids are available.
    pub fn append(&mut self, robot_id: i32, points: &[TrajectoryPoint]) -> Result<Vec<Command>> {
        self.check_batch(points.len())?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let len = points.len() as u32;

        let overrun = self.overrun(points.len());
        if overrun > 0 {
            warn!(
                robot_id,
                overrun,
                start = self.start,
                end = self.end,
                "append wraps over points that were not reclaimed"
            );
        }

        let mut commands = self.add_commands(robot_id, points, self.end);
        if let Some(old) = self.stop {
            commands.push(Command::UnsetRedirect {
                robot_id,
                from_id: old,
            });
        }
        let last = ((self.end as u64 + len as u64 - 1) % self.modulus as u64) as u32;
        commands.push(Command::SetRedirect {
            robot_id,
            from_id: last,
            to_id: last,
        });

        self.end = ((self.end as u64 + len as u64) % self.modulus as u64) as u32;
        self.size = (self.size + len).min(self.modulus);
        self.stop = Some(last);
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<TrajectoryPoint> {
        (0..n)
            .map(|i| TrajectoryPoint {
                id: i as u32,
                next_id: i as u32 + 1,
                duration_ms: 100,
                positions: [0.0; 6],
                speeds: [0.0; 6],
            })
            .collect()
    }

    fn added_ids(commands: &[Command]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::AddPoint(r) => Some(r.point.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(RingState::new(0), Err(RailError::Config(_))));
    }

    #[test]
    fn test_reset_sequence() {
        let mut ring = RingState::new(1000).unwrap();
        let commands = ring.reset(4, &points(5)).unwrap();

        assert_eq!(commands[0], Command::ClearAll);
        assert_eq!(commands[1], Command::SetActualPosition { robot_id: 4, point_id: 0 });
        assert_eq!(added_ids(&commands), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            commands.last(),
            Some(&Command::SetRedirect { robot_id: 4, from_id: 4, to_id: 4 })
        );
        assert_eq!((ring.start(), ring.end(), ring.size(), ring.stop()), (0, 5, 5, Some(4)));
    }

    #[test]
    fn test_reset_empty_has_no_stop() {
        let mut ring = RingState::new(10).unwrap();
        let commands = ring.reset(0, &[]).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(ring.stop(), None);
    }

    #[test]
    fn test_reset_then_append_moves_stop() {
        let mut ring = RingState::new(1000).unwrap();
        ring.reset(0, &points(10)).unwrap();
        let commands = ring.append(0, &points(4)).unwrap();

        assert_eq!(added_ids(&commands), vec![10, 11, 12, 13]);
        let tail = &commands[4..];
        assert_eq!(tail[0], Command::UnsetRedirect { robot_id: 0, from_id: 9 });
        assert_eq!(tail[1], Command::SetRedirect { robot_id: 0, from_id: 13, to_id: 13 });
        assert_eq!((ring.start(), ring.end(), ring.size(), ring.stop()), (0, 14, 14, Some(13)));
    }

    #[test]
    fn test_append_shifts_links() {
        let mut ring = RingState::new(1000).unwrap();
        ring.reset(0, &points(3)).unwrap();
        let commands = ring.append(0, &points(2)).unwrap();
        match &commands[1] {
            Command::AddPoint(r) => {
                assert_eq!(r.point.id, 4);
                assert_eq!(r.point.next_id, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_append_wraps_and_saturates() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(8)).unwrap();
        let commands = ring.append(0, &points(4)).unwrap();

        assert_eq!(added_ids(&commands), vec![8, 9, 0, 1]);
        assert_eq!(ring.end(), 2);
        assert_eq!(ring.size(), 10);
        assert_eq!(ring.stop(), Some(1));
    }

    #[test]
    fn test_append_ending_on_boundary_keeps_stop() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(6)).unwrap();
        ring.append(0, &points(4)).unwrap();
        assert_eq!(ring.end(), 0);
        assert_eq!(ring.stop(), Some(9));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(3)).unwrap();
        let before = ring;
        assert!(ring.append(0, &[]).unwrap().is_empty());
        assert_eq!(ring, before);
    }

    #[test]
    fn test_batch_larger_than_ring() {
        let mut ring = RingState::new(4).unwrap();
        assert!(matches!(
            ring.reset(0, &points(5)),
            Err(RailError::BatchTooLarge { len: 5, capacity: 4 })
        ));
        assert_eq!(ring, RingState::new(4).unwrap());
    }

    #[test]
    fn test_evict_forward() {
        let mut ring = RingState::new(1000).unwrap();
        ring.reset(0, &points(50)).unwrap();
        ring.evict(0, 10);
        assert_eq!(ring.start(), 10);

        let cmd = ring.evict(0, 40);
        assert_eq!(cmd, Some(Command::DeleteRange { robot_id: 0, first: 10, last: 39 }));
        assert_eq!(ring.start(), 40);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let mut ring = RingState::new(1000).unwrap();
        ring.reset(0, &points(50)).unwrap();
        ring.evict(0, 20);
        let after_first = ring;
        assert_eq!(ring.evict(0, 20), None);
        assert_eq!(ring, after_first);
    }

    #[test]
    fn test_evict_behind_start_resyncs() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(8)).unwrap();
        ring.evict(0, 6);
        ring.append(0, &points(4)).unwrap();
        assert_eq!((ring.start(), ring.end(), ring.size()), (6, 2, 10));

        let cmd = ring.evict(0, 1);
        assert_eq!(cmd, Some(Command::DeleteRange { robot_id: 0, first: 6, last: 10 }));
        assert_eq!((ring.start(), ring.size()), (0, 2));
    }

    #[test]
    fn test_overrun_counts_unreclaimed() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(8)).unwrap();
        assert_eq!(ring.overrun(2), 0);
        assert_eq!(ring.overrun(5), 3);
    }

    #[test]
    fn test_overrun_after_wrap_uses_live_window() {
        let mut ring = RingState::new(10).unwrap();
        ring.reset(0, &points(8)).unwrap();
        ring.evict(0, 6);
        ring.append(0, &points(4)).unwrap();
        ring.evict(0, 9);
        assert_eq!((ring.start(), ring.end(), ring.size()), (9, 2, 10));

        // Ids 9, 0 and 1 are still needed; the other seven are free.
        assert_eq!(ring.live(), 3);
        assert_eq!(ring.overrun(2), 0);
        assert_eq!(ring.overrun(7), 0);
        assert_eq!(ring.overrun(9), 2);
    }

    #[test]
    fn test_live_on_full_and_empty_ring() {
        let mut ring = RingState::new(10).unwrap();
        assert_eq!(ring.live(), 0);
        ring.reset(0, &points(10)).unwrap();
        assert_eq!((ring.start(), ring.end()), (0, 0));
        assert_eq!(ring.live(), 10);
        assert_eq!(ring.overrun(1), 1);
    }
}
