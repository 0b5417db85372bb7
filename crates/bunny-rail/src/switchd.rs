//! In-memory switch agent.
//!
//! Keeps the point table, redirect table, actual-position registers and
//! function tables of the controller in process memory and serves the
//! control protocol on a TCP port. It stands in for the hardware agent in
//! tests and local runs; nothing here talks to a real switch.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};

use tracing::{debug, error, info, warn};

use crate::codec::Selector;
use crate::command::Command;
use crate::control::ControlPlane;
use crate::error::{RailError, Result};
use crate::server;
use crate::ternary::{self, TernaryRule};
use crate::trajectory::TrajectoryPoint;

/// Tables of the emulated controller.
#[derive(Debug, Default, Clone)]
pub struct TableStore {
    points: BTreeMap<(i32, u32), TrajectoryPoint>,
    redirects: BTreeMap<(i32, u32), u32>,
    positions: HashMap<i32, u32>,
    functions: HashMap<Selector, Vec<TernaryRule>>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command. Returns the reply value for queries.
    pub fn apply(&mut self, command: &Command) -> Result<Option<u32>> {
        match command {
            Command::AddPoint(record) => {
                self.points
                    .insert((record.robot_id, record.point.id), record.point.clone());
            }
            Command::DeleteRange { robot_id, first, last } => {
                if first <= last {
                    let removed = self
                        .points
                        .range((*robot_id, *first)..=(*robot_id, *last))
                        .map(|(key, _)| *key)
                        .collect::<Vec<_>>();
                    for key in removed {
                        self.points.remove(&key);
                    }
                }
            }
            Command::ClearAll => {
                self.points.clear();
                self.redirects.clear();
            }
            Command::Dump => self.dump(),
            Command::ClearFunctions => self.functions.clear(),
            Command::AddFunctionEntry(entry) => {
                self.functions
                    .entry(entry.selector)
                    .or_default()
                    .push(entry.rule());
            }
            Command::GetActualPosition { robot_id } => {
                return Ok(Some(self.cursor(*robot_id)));
            }
            Command::SetRedirect { robot_id, from_id, to_id } => {
                self.redirects.insert((*robot_id, *from_id), *to_id);
            }
            Command::UnsetRedirect { robot_id, from_id } => {
                if self.redirects.remove(&(*robot_id, *from_id)).is_none() {
                    return Err(RailError::StaleRedirect {
                        robot_id: *robot_id,
                        from_id: *from_id,
                    });
                }
            }
            Command::SetActualPosition { robot_id, point_id } => {
                self.positions.insert(*robot_id, *point_id);
            }
            Command::Close | Command::Shutdown => {}
        }
        Ok(None)
    }

    pub fn point(&self, robot_id: i32, id: u32) -> Option<&TrajectoryPoint> {
        self.points.get(&(robot_id, id))
    }

    /// Installed point ids of one robot, ascending.
    pub fn point_ids(&self, robot_id: i32) -> Vec<u32> {
        self.points
            .range((robot_id, 0)..=(robot_id, u32::MAX))
            .map(|(&(_, id), _)| id)
            .collect()
    }

    pub fn redirect(&self, robot_id: i32, from_id: u32) -> Option<u32> {
        self.redirects.get(&(robot_id, from_id)).copied()
    }

    /// Installed redirects of one robot as `(from, to)` pairs.
    pub fn redirects(&self, robot_id: i32) -> Vec<(u32, u32)> {
        self.redirects
            .range((robot_id, 0)..=(robot_id, u32::MAX))
            .map(|(&(_, from), &to)| (from, to))
            .collect()
    }

    /// Execution cursor of a robot; robots never set start at 0.
    pub fn cursor(&self, robot_id: i32) -> u32 {
        self.positions.get(&robot_id).copied().unwrap_or(0)
    }

    /// Point executed after `id`: the redirect if one is installed, the
    /// point's own link otherwise.
    pub fn successor(&self, robot_id: i32, id: u32) -> Option<u32> {
        self.redirect(robot_id, id)
            .or_else(|| self.point(robot_id, id).map(|p| p.next_id))
    }

    /// Move a robot's cursor to the successor of its current point.
    ///
    /// Returns the new position, or `None` when the current point is not
    /// installed. A robot parked on a self-loop stays where it is.
    pub fn advance(&mut self, robot_id: i32) -> Option<u32> {
        let next = self.successor(robot_id, self.cursor(robot_id))?;
        self.positions.insert(robot_id, next);
        Some(next)
    }

    pub fn function_rules(&self, selector: Selector) -> &[TernaryRule] {
        self.functions.get(&selector).map_or(&[], Vec::as_slice)
    }

    /// Evaluate a function table the way the TCAM would.
    pub fn evaluate(&self, selector: Selector, input: i64) -> Option<i64> {
        ternary::lookup(self.function_rules(selector), input)
    }

    /// Robots with at least one installed point, ascending.
    pub fn robots(&self) -> Vec<i32> {
        let mut robots: Vec<i32> = self.points.keys().map(|&(r, _)| r).collect();
        robots.dedup();
        robots
    }

    fn dump(&self) {
        for robot_id in self.robots() {
            info!(
                robot_id,
                points = self.point_ids(robot_id).len(),
                redirects = ?self.redirects(robot_id),
                actual = self.cursor(robot_id),
                "table dump"
            );
        }
        for selector in Selector::ALL {
            info!(?selector, rules = self.function_rules(selector).len(), "function table");
        }
    }
}

/// Lets a session drive the store in-process.
impl ControlPlane for TableStore {
    fn send(&mut self, command: &Command) -> Result<()> {
        match self.apply(command) {
            Ok(_) => Ok(()),
            Err(e @ RailError::StaleRedirect { .. }) => {
                warn!(error = %e, "ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn actual_position(&mut self, robot_id: i32) -> Result<u32> {
        Ok(self.cursor(robot_id))
    }
}

/// How a control connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Peer sent `Close` or hung up.
    Closed,
    /// Peer asked the agent to stop.
    Shutdown,
}

/// Blocking control-protocol server around a [`TableStore`].
pub struct SwitchServer {
    listener: TcpListener,
    store: TableStore,
}

impl SwitchServer {
    pub fn bind(addr: &str) -> Result<Self> {
        Ok(Self::from_listener(TcpListener::bind(addr)?, TableStore::new()))
    }

    /// Wrap an existing listener (for testing).
    pub fn from_listener(listener: TcpListener, store: TableStore) -> Self {
        Self { listener, store }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Serve connections one at a time until a peer sends `Shutdown`.
    ///
    /// Returns the final table contents.
    pub fn run(mut self) -> Result<TableStore> {
        info!(addr = ?self.listener.local_addr().ok(), "switch agent listening");
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if server::accept_error_is_transient(&e) => {
                    warn!(error = %e, "accept error");
                    server::accept_backoff(&e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            debug!(%peer, "control connection");
            match self.serve_connection(&mut stream) {
                Ok(ConnectionEnd::Shutdown) => {
                    info!(%peer, "shutdown requested");
                    return Ok(self.store);
                }
                Ok(ConnectionEnd::Closed) => {}
                Err(e) => error!(%peer, error = %e, "control connection failed"),
            }
        }
    }

    /// Handle commands on one connection until it ends. Public for unit testing.
    pub fn serve_connection<S: Read + Write>(&mut self, stream: &mut S) -> Result<ConnectionEnd> {
        loop {
            let command = match Command::read_from(stream) {
                Ok(command) => command,
                Err(RailError::Disconnected) => return Ok(ConnectionEnd::Closed),
                Err(e) => return Err(e),
            };
            debug!(code = command.code(), "dispatch");

            match command {
                Command::Close => return Ok(ConnectionEnd::Closed),
                Command::Shutdown => return Ok(ConnectionEnd::Shutdown),
                _ => {}
            }

            match self.store.apply(&command) {
                Ok(Some(reply)) => {
                    stream.write_all(&reply.to_le_bytes())?;
                    stream.flush()?;
                }
                Ok(None) => {}
                Err(e @ RailError::StaleRedirect { .. }) => warn!(error = %e, "ignored"),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FunctionEntry, PointRecord};
    use std::io::Cursor;

    fn add(robot_id: i32, id: u32, next_id: u32) -> Command {
        Command::AddPoint(PointRecord {
            robot_id,
            point: TrajectoryPoint {
                id,
                next_id,
                duration_ms: 100,
                positions: [0.0; 6],
                speeds: [0.0; 6],
            },
        })
    }

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn script(commands: &[Command]) -> Duplex {
        Duplex {
            input: Cursor::new(commands.iter().flat_map(Command::encode).collect()),
            output: Vec::new(),
        }
    }

    fn server() -> SwitchServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        SwitchServer::from_listener(listener, TableStore::new())
    }

    #[test]
    fn test_delete_range_skips_missing() {
        let mut store = TableStore::new();
        for id in [1, 2, 3, 7] {
            store.apply(&add(0, id, id + 1)).unwrap();
        }
        store.apply(&add(1, 2, 3)).unwrap();
        store
            .apply(&Command::DeleteRange { robot_id: 0, first: 0, last: 5 })
            .unwrap();

        assert_eq!(store.point_ids(0), vec![7]);
        assert_eq!(store.point_ids(1), vec![2]);
    }

    #[test]
    fn test_unset_missing_redirect_is_stale() {
        let mut store = TableStore::new();
        let err = store
            .apply(&Command::UnsetRedirect { robot_id: 0, from_id: 4 })
            .unwrap_err();
        assert!(matches!(err, RailError::StaleRedirect { robot_id: 0, from_id: 4 }));
    }

    #[test]
    fn test_advance_follows_redirect() {
        let mut store = TableStore::new();
        store.apply(&add(0, 0, 1)).unwrap();
        store.apply(&add(0, 1, 2)).unwrap();
        store
            .apply(&Command::SetRedirect { robot_id: 0, from_id: 1, to_id: 1 })
            .unwrap();

        assert_eq!(store.advance(0), Some(1));
        assert_eq!(store.advance(0), Some(1));
        store
            .apply(&Command::UnsetRedirect { robot_id: 0, from_id: 1 })
            .unwrap();
        assert_eq!(store.advance(0), Some(2));
        assert_eq!(store.advance(0), None);
    }

    #[test]
    fn test_clear_all_keeps_functions_and_registers() {
        let mut store = TableStore::new();
        store.apply(&add(0, 0, 1)).unwrap();
        store
            .apply(&Command::SetActualPosition { robot_id: 0, point_id: 9 })
            .unwrap();
        store
            .apply(&Command::AddFunctionEntry(FunctionEntry {
                selector: Selector::TargetSpeed,
                match_value: 0,
                match_mask: 0,
                output: 5,
            }))
            .unwrap();
        store.apply(&Command::ClearAll).unwrap();

        assert!(store.point_ids(0).is_empty());
        assert_eq!(store.cursor(0), 9);
        assert_eq!(store.evaluate(Selector::TargetSpeed, 123), Some(5));
        assert_eq!(store.evaluate(Selector::ActualSpeed, 123), None);
    }

    #[test]
    fn test_serve_connection_replies_to_queries() {
        let mut server = server();
        let mut stream = script(&[
            Command::SetActualPosition { robot_id: 2, point_id: 17 },
            Command::GetActualPosition { robot_id: 2 },
            Command::UnsetRedirect { robot_id: 2, from_id: 0 },
            Command::Close,
        ]);

        assert_eq!(server.serve_connection(&mut stream).unwrap(), ConnectionEnd::Closed);
        assert_eq!(stream.output, 17u32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_serve_connection_shutdown_and_hangup() {
        let mut server = server();
        let mut stream = script(&[Command::ClearAll, Command::Shutdown]);
        assert_eq!(server.serve_connection(&mut stream).unwrap(), ConnectionEnd::Shutdown);

        let mut stream = script(&[add(0, 3, 4)]);
        assert_eq!(server.serve_connection(&mut stream).unwrap(), ConnectionEnd::Closed);
        assert_eq!(server.store().point_ids(0), vec![3]);
    }

    #[test]
    fn test_serve_connection_rejects_unknown_code() {
        let mut server = server();
        let mut stream = Duplex {
            input: Cursor::new(4i32.to_le_bytes().to_vec()),
            output: Vec::new(),
        };
        assert!(matches!(
            server.serve_connection(&mut stream),
            Err(RailError::UnknownCommand(4))
        ));
    }
}
