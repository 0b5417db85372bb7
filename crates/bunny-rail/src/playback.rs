//! Timed playback of a looping trajectory straight onto the control plane.
//!
//! The loop keeps a few seconds of points ahead of the robot: it uploads an
//! initial batch, waits for the robot to get going, and then once per tick
//! deletes what the robot has certainly executed and tops the table up with
//! the next batch.

use std::time::Duration;

use tracing::{debug, info};

use crate::codec::PointRecord;
use crate::command::Command;
use crate::config::PlaybackConfig;
use crate::control::ControlPlane;
use crate::error::Result;
use crate::provider::EpisodeProvider;
use crate::trajectory::TrajectoryPoint;

/// Counters of one playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub episodes: usize,
    pub points_uploaded: usize,
    pub ranges_deleted: usize,
}

/// Drives an [`EpisodeProvider`] in real time.
///
/// Waiting goes through `sleeper`, so tests can run without blocking.
pub struct Playback<S> {
    config: PlaybackConfig,
    robot_id: i32,
    sleeper: S,
}

impl<S: FnMut(Duration)> Playback<S> {
    pub fn new(config: PlaybackConfig, sleeper: S) -> Result<Self> {
        config.validate()?;
        let robot_id = config.wire_robot_id()?;
        Ok(Self {
            config,
            robot_id,
            sleeper,
        })
    }

    /// Upload the initial batch and then run `episodes` refill cycles.
    pub fn run<P: ControlPlane>(
        &mut self,
        plane: &mut P,
        provider: &mut EpisodeProvider,
        episodes: usize,
    ) -> Result<PlaybackReport> {
        let mut report = PlaybackReport::default();

        let batch = provider.get_batch(self.config.initial_batch_ms)?;
        let mut buffered = self.upload(plane, &batch, &mut report)? as i64;
        info!(
            robot_id = self.robot_id,
            points = batch.len(),
            buffered_ms = buffered,
            "initial batch uploaded"
        );
        (self.sleeper)(Duration::from_millis(self.config.lead_ms));
        buffered -= self.config.lead_ms as i64;

        for episode in 0..episodes {
            let keep_ms = (buffered.max(0) as f64 * self.config.slack) as u64;
            for (first, last) in provider.get_free_ranges(keep_ms) {
                for command in self.delete_commands(first, last) {
                    plane.send(&command)?;
                    report.ranges_deleted += 1;
                }
            }

            let batch = provider.get_batch(self.config.episode_batch_ms)?;
            buffered += self.upload(plane, &batch, &mut report)? as i64;
            debug!(episode, points = batch.len(), buffered_ms = buffered, "episode");

            (self.sleeper)(Duration::from_millis(self.config.tick_ms));
            buffered -= self.config.tick_ms as i64;
            report.episodes += 1;
        }

        info!(
            episodes = report.episodes,
            uploaded = report.points_uploaded,
            deleted = report.ranges_deleted,
            "playback finished"
        );
        Ok(report)
    }

    /// Send a batch; returns the robot time it covers.
    fn upload<P: ControlPlane>(
        &self,
        plane: &mut P,
        batch: &[TrajectoryPoint],
        report: &mut PlaybackReport,
    ) -> Result<u64> {
        let mut covered = 0u64;
        for point in batch {
            plane.send(&Command::AddPoint(PointRecord {
                robot_id: self.robot_id,
                point: point.shifted(self.config.offset, self.config.capacity),
            }))?;
            covered = covered.saturating_add(point.duration_ms);
        }
        report.points_uploaded += batch.len();
        Ok(covered)
    }

    /// Range delete for source ids `first..=last`, split where the shift wraps.
    fn delete_commands(&self, first: u32, last: u32) -> Vec<Command> {
        let modulus = self.config.capacity as u64;
        let shift = |id: u32| ((id as u64 + self.config.offset as u64) % modulus) as u32;
        let (first, last) = (shift(first), shift(last));
        let robot_id = self.robot_id;

        if first <= last {
            vec![Command::DeleteRange { robot_id, first, last }]
        } else {
            vec![
                Command::DeleteRange {
                    robot_id,
                    first,
                    last: (modulus - 1) as u32,
                },
                Command::DeleteRange {
                    robot_id,
                    first: 0,
                    last,
                },
            ]
        }
    }
}
