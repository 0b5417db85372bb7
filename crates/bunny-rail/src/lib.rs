//! Trajectory streaming for match-table robot controllers.
//!
//! The controller executes robot-joint trajectories out of a fixed-size
//! point table: every point names its successor, and the robot walks the
//! chain one point at a time. This crate keeps that table fed:
//!
//! - **Upload proxy**: accepts CSV trajectory batches over TCP, resets or
//!   extends the point chain, and reclaims ids the robot has already passed
//!   ([`server`], [`session`], [`ring`])
//! - **Ternary function tables**: approximates scaling functions with
//!   value/mask rules the controller can match in one lookup ([`ternary`])
//! - **Playback**: streams a looping trajectory at robot speed
//!   ([`provider`], [`playback`])
//! - **Switch agent**: an in-memory stand-in for the hardware agent that
//!   speaks the same control protocol ([`switchd`])
//!
//! # Example
//!
//! ```rust
//! use bunny_rail::{SessionManager, TableStore, UploadMode, ParseOptions};
//! use bunny_rail::control::Connector;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! # #[derive(Clone, Default)]
//! # struct Local(Rc<RefCell<TableStore>>);
//! # impl bunny_rail::ControlPlane for Local {
//! #     fn send(&mut self, c: &bunny_rail::Command) -> bunny_rail::Result<()> {
//! #         bunny_rail::ControlPlane::send(&mut *self.0.borrow_mut(), c)
//! #     }
//! #     fn actual_position(&mut self, r: i32) -> bunny_rail::Result<u32> {
//! #         Ok(self.0.borrow().cursor(r))
//! #     }
//! # }
//! # impl Connector for Local {
//! #     type Plane = Local;
//! #     fn connect(&self) -> bunny_rail::Result<Local> { Ok(self.clone()) }
//! # }
//! let agent = Local::default();
//! let mut session = SessionManager::new(agent.clone(), 1000, ParseOptions::default())?;
//!
//! let csv = "t,x,y,p1,p2,p3,p4,p5,p6,s1,s2,s3,s4,s5,s6\n\
//!            0.0,0,0,0,0,0,0,0,0,0,0,0,0,0,0\n\
//!            0.5,0,0,1,1,1,1,1,1,0,0,0,0,0,0\n";
//! let ring = session.upload(0, UploadMode::Reset, csv)?;
//! assert_eq!(ring.stop(), Some(1));
//! assert_eq!(agent.0.borrow().redirect(0, 1), Some(1));
//! # Ok::<(), bunny_rail::RailError>(())
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod control;
mod error;
pub mod playback;
pub mod provider;
pub mod ring;
pub mod server;
pub mod session;
pub mod switchd;
pub mod ternary;
pub mod trajectory;

pub use codec::{FunctionEntry, PointRecord, Selector, UploadHeader};
pub use command::Command;
pub use config::{PlaybackConfig, ProxyConfig};
pub use control::{Connector, ControlPlane, TcpConnector, TcpControlPlane};
pub use error::{RailError, Result};
pub use playback::{Playback, PlaybackReport};
pub use provider::EpisodeProvider;
pub use ring::RingState;
pub use server::{UploadRequest, UploadServer};
pub use session::{SessionManager, UploadMode};
pub use switchd::{SwitchServer, TableStore};
pub use ternary::{FunctionWeights, TernaryRule};
pub use trajectory::{Linkage, ParseOptions, TrajectoryPoint};
