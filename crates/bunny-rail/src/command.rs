//! Control-plane commands.
//!
//! Every message on the control connection starts with a little-endian
//! `i32` op code followed by a fixed payload for that code. Positive codes
//! are table operations; negative codes end the connection.

use std::io::Read;

use crate::codec::{
    self, FunctionEntry, PointRecord, FUNCTION_RECORD_LEN, POINT_RECORD_LEN,
};
use crate::error::{RailError, Result};

/// Op codes of the control protocol.
pub mod op {
    pub const ADD_POINT: i32 = 1;
    pub const DELETE_RANGE: i32 = 2;
    pub const CLEAR_ALL: i32 = 3;
    pub const DUMP: i32 = 5;
    pub const CLEAR_FUNCTIONS: i32 = 7;
    pub const ADD_FUNCTION_ENTRY: i32 = 8;
    pub const GET_ACTUAL_POSITION: i32 = 9;
    pub const SET_REDIRECT: i32 = 10;
    pub const UNSET_REDIRECT: i32 = 11;
    pub const SET_ACTUAL_POSITION: i32 = 12;
    pub const CLOSE: i32 = -1;
    pub const SHUTDOWN: i32 = -2;
}

/// A decoded control-plane message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Install (or replace) one trajectory point.
    AddPoint(PointRecord),
    /// Remove points `first..=last`; absent points are skipped.
    DeleteRange { robot_id: i32, first: u32, last: u32 },
    /// Remove every point and redirect.
    ClearAll,
    /// Log the table contents on the agent side.
    Dump,
    /// Remove every function-table entry.
    ClearFunctions,
    /// Install one ternary function entry.
    AddFunctionEntry(FunctionEntry),
    /// Read the robot's execution cursor; answered with one `u32`.
    GetActualPosition { robot_id: i32 },
    /// Override the successor of `from_id`.
    SetRedirect { robot_id: i32, from_id: u32, to_id: u32 },
    /// Drop the override on `from_id`.
    UnsetRedirect { robot_id: i32, from_id: u32 },
    /// Overwrite the robot's execution cursor.
    SetActualPosition { robot_id: i32, point_id: u32 },
    /// End this connection.
    Close,
    /// End this connection and stop the agent.
    Shutdown,
}

impl Command {
    pub fn code(&self) -> i32 {
        match self {
            Command::AddPoint(_) => op::ADD_POINT,
            Command::DeleteRange { .. } => op::DELETE_RANGE,
            Command::ClearAll => op::CLEAR_ALL,
            Command::Dump => op::DUMP,
            Command::ClearFunctions => op::CLEAR_FUNCTIONS,
            Command::AddFunctionEntry(_) => op::ADD_FUNCTION_ENTRY,
            Command::GetActualPosition { .. } => op::GET_ACTUAL_POSITION,
            Command::SetRedirect { .. } => op::SET_REDIRECT,
            Command::UnsetRedirect { .. } => op::UNSET_REDIRECT,
            Command::SetActualPosition { .. } => op::SET_ACTUAL_POSITION,
            Command::Close => op::CLOSE,
            Command::Shutdown => op::SHUTDOWN,
        }
    }

    /// Whether the agent answers this command.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::GetActualPosition { .. })
    }

    /// Whether this command ends the connection.
    pub fn is_terminal(&self) -> bool {
        self.code() < 0
    }

    /// Op code followed by the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + POINT_RECORD_LEN);
        buf.extend_from_slice(&self.code().to_le_bytes());
        match self {
            Command::AddPoint(record) => buf.extend_from_slice(&record.encode()),
            Command::DeleteRange { robot_id, first, last } => {
                buf.extend_from_slice(&robot_id.to_le_bytes());
                buf.extend_from_slice(&first.to_le_bytes());
                buf.extend_from_slice(&last.to_le_bytes());
            }
            Command::AddFunctionEntry(entry) => buf.extend_from_slice(&entry.encode()),
            Command::GetActualPosition { robot_id } => {
                buf.extend_from_slice(&robot_id.to_le_bytes());
            }
            Command::SetRedirect { robot_id, from_id, to_id } => {
                buf.extend_from_slice(&robot_id.to_le_bytes());
                buf.extend_from_slice(&from_id.to_le_bytes());
                buf.extend_from_slice(&to_id.to_le_bytes());
            }
            Command::UnsetRedirect { robot_id, from_id } => {
                buf.extend_from_slice(&robot_id.to_le_bytes());
                buf.extend_from_slice(&from_id.to_le_bytes());
            }
            Command::SetActualPosition { robot_id, point_id } => {
                buf.extend_from_slice(&robot_id.to_le_bytes());
                buf.extend_from_slice(&point_id.to_le_bytes());
            }
            Command::ClearAll
            | Command::Dump
            | Command::ClearFunctions
            | Command::Close
            | Command::Shutdown => {}
        }
        buf
    }

    /// Read one command from a blocking stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let code = codec::read_i32(reader)?;
        let command = match code {
            op::ADD_POINT => {
                Command::AddPoint(PointRecord::decode(&codec::read_record(reader, POINT_RECORD_LEN)?)?)
            }
            op::DELETE_RANGE => Command::DeleteRange {
                robot_id: codec::read_i32(reader)?,
                first: codec::read_u32(reader)?,
                last: codec::read_u32(reader)?,
            },
            op::CLEAR_ALL => Command::ClearAll,
            op::DUMP => Command::Dump,
            op::CLEAR_FUNCTIONS => Command::ClearFunctions,
            op::ADD_FUNCTION_ENTRY => Command::AddFunctionEntry(FunctionEntry::decode(
                &codec::read_record(reader, FUNCTION_RECORD_LEN)?,
            )?),
            op::GET_ACTUAL_POSITION => Command::GetActualPosition {
                robot_id: codec::read_i32(reader)?,
            },
            op::SET_REDIRECT => Command::SetRedirect {
                robot_id: codec::read_i32(reader)?,
                from_id: codec::read_u32(reader)?,
                to_id: codec::read_u32(reader)?,
            },
            op::UNSET_REDIRECT => Command::UnsetRedirect {
                robot_id: codec::read_i32(reader)?,
                from_id: codec::read_u32(reader)?,
            },
            op::SET_ACTUAL_POSITION => Command::SetActualPosition {
                robot_id: codec::read_i32(reader)?,
                point_id: codec::read_u32(reader)?,
            },
            op::CLOSE => Command::Close,
            op::SHUTDOWN => Command::Shutdown,
            other => return Err(RailError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Selector;
    use crate::trajectory::TrajectoryPoint;

    fn decode(bytes: &[u8]) -> Result<Command> {
        let mut reader = bytes;
        Command::read_from(&mut reader)
    }

    #[test]
    fn test_delete_range_bytes() {
        let cmd = Command::DeleteRange {
            robot_id: 2,
            first: 10,
            last: 39,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &op::DELETE_RANGE.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &39u32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_add_point_decodes() {
        let cmd = Command::AddPoint(PointRecord {
            robot_id: 0,
            point: TrajectoryPoint {
                id: 5,
                next_id: 5,
                duration_ms: 2000,
                positions: [1.5; 6],
                speeds: [-0.25; 6],
            },
        });
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 4 + POINT_RECORD_LEN);
        assert_eq!(decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_function_entry_decodes() {
        let cmd = Command::AddFunctionEntry(FunctionEntry {
            selector: Selector::ActualSpeed,
            match_value: 1,
            match_mask: 2,
            output: 3,
        });
        assert_eq!(decode(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_terminal_codes() {
        assert_eq!(Command::Close.encode(), (-1i32).to_le_bytes().to_vec());
        assert_eq!(decode(&(-2i32).to_le_bytes()).unwrap(), Command::Shutdown);
        assert!(Command::Shutdown.is_terminal());
        assert!(!Command::ClearAll.is_terminal());
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            decode(&4i32.to_le_bytes()),
            Err(RailError::UnknownCommand(4))
        ));
    }

    #[test]
    fn test_truncated_payload_is_short_read() {
        let bytes = Command::SetRedirect {
            robot_id: 1,
            from_id: 2,
            to_id: 3,
        }
        .encode();
        assert!(matches!(decode(&bytes[..10]), Err(RailError::ShortRead { .. })));
        assert!(matches!(decode(&[]), Err(RailError::Disconnected)));
    }
}
