//! Fixed-layout binary records of the control-plane protocol.
//!
//! Control-plane records are little-endian and keep the alignment padding of
//! the native structs the switch agent was written against.
//!
//! # Point-add record (120 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Robot id (i32)
//! 4       4     Point id
//! 8       4     Next point id
//! 12      4     Padding
//! 16      8     Duration in ms (u64)
//! 24      48    Positions, 6 x f64
//! 72      48    Speeds, 6 x f64
//! ```
//!
//! # Function-entry record (32 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       1     Selector (b'A', b'T' or b'D')
//! 1       7     Padding
//! 8       8     Match value (u64)
//! 16      8     Match mask (u64)
//! 24      8     Output (u64, two's complement of the i64 output)
//! ```
//!
//! The upload header sent to the proxy is the only big-endian record: a
//! `u32` mode followed by a `u32` payload length.

use std::io::{Cursor, ErrorKind, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{RailError, Result};
use crate::ternary::TernaryRule;
use crate::trajectory::{TrajectoryPoint, JOINTS};

/// Size of an encoded point-add record.
pub const POINT_RECORD_LEN: usize = 120;

/// Size of an encoded function-entry record.
pub const FUNCTION_RECORD_LEN: usize = 32;

/// Size of an encoded upload header.
pub const UPLOAD_HEADER_LEN: usize = 8;

/// Function table a ternary rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Function of the actual joint speed.
    ActualSpeed,
    /// Function of the target joint speed.
    TargetSpeed,
    /// Function of the position difference.
    PositionDifference,
}

impl Selector {
    /// All tables, in installation order.
    pub const ALL: [Selector; 3] = [
        Selector::PositionDifference,
        Selector::ActualSpeed,
        Selector::TargetSpeed,
    ];

    /// Wire tag of the table.
    pub fn tag(self) -> u8 {
        match self {
            Selector::ActualSpeed => b'A',
            Selector::TargetSpeed => b'T',
            Selector::PositionDifference => b'D',
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'A' => Ok(Selector::ActualSpeed),
            b'T' => Ok(Selector::TargetSpeed),
            b'D' => Ok(Selector::PositionDifference),
            other => Err(RailError::UnknownSelector(other)),
        }
    }
}

/// Point-add record: a trajectory point addressed to one robot.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub robot_id: i32,
    pub point: TrajectoryPoint,
}

impl PointRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(POINT_RECORD_LEN);
        buf.extend_from_slice(&self.robot_id.to_le_bytes());
        buf.extend_from_slice(&self.point.id.to_le_bytes());
        buf.extend_from_slice(&self.point.next_id.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.point.duration_ms.to_le_bytes());
        for v in self.point.positions.iter().chain(self.point.speeds.iter()) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        expect_len("point", data, POINT_RECORD_LEN)?;
        let mut cursor = Cursor::new(data);

        let robot_id = cursor.read_i32::<LittleEndian>()?;
        let id = cursor.read_u32::<LittleEndian>()?;
        let next_id = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(16);
        let duration_ms = cursor.read_u64::<LittleEndian>()?;

        let mut positions = [0.0; JOINTS];
        cursor.read_f64_into::<LittleEndian>(&mut positions)?;
        let mut speeds = [0.0; JOINTS];
        cursor.read_f64_into::<LittleEndian>(&mut speeds)?;

        Ok(Self {
            robot_id,
            point: TrajectoryPoint {
                id,
                next_id,
                duration_ms,
                positions,
                speeds,
            },
        })
    }
}

/// Function-entry record: one ternary rule for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionEntry {
    pub selector: Selector,
    pub match_value: u64,
    pub match_mask: u64,
    pub output: u64,
}

impl FunctionEntry {
    /// Entry for a generated rule; the output keeps its two's-complement bits.
    pub fn from_rule(selector: Selector, rule: &TernaryRule) -> Self {
        Self {
            selector,
            match_value: rule.match_value,
            match_mask: rule.match_mask,
            output: rule.output as u64,
        }
    }

    /// Entry from operator-supplied wide integers, clamped to the 64-bit fields.
    pub fn saturating(selector: Selector, match_value: u128, match_mask: u128, output: u128) -> Self {
        Self {
            selector,
            match_value: saturate_u64(match_value),
            match_mask: saturate_u64(match_mask),
            output: saturate_u64(output),
        }
    }

    /// Rule view of the entry.
    pub fn rule(&self) -> TernaryRule {
        TernaryRule {
            match_value: self.match_value,
            match_mask: self.match_mask,
            output: self.output as i64,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FUNCTION_RECORD_LEN);
        buf.push(self.selector.tag());
        buf.extend_from_slice(&[0u8; 7]);
        buf.extend_from_slice(&self.match_value.to_le_bytes());
        buf.extend_from_slice(&self.match_mask.to_le_bytes());
        buf.extend_from_slice(&self.output.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        expect_len("function entry", data, FUNCTION_RECORD_LEN)?;
        let selector = Selector::from_tag(data[0])?;
        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            selector,
            match_value: cursor.read_u64::<LittleEndian>()?,
            match_mask: cursor.read_u64::<LittleEndian>()?,
            output: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Clamp a wide unsigned value to `u64::MAX`.
pub fn saturate_u64(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Header of an inbound upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadHeader {
    pub mode: u32,
    pub length: u32,
}

impl UploadHeader {
    pub fn encode(&self) -> [u8; UPLOAD_HEADER_LEN] {
        let mut buf = [0u8; UPLOAD_HEADER_LEN];
        buf[..4].copy_from_slice(&self.mode.to_be_bytes());
        buf[4..].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        expect_len("upload header", data, UPLOAD_HEADER_LEN)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            mode: cursor.read_u32::<BigEndian>()?,
            length: cursor.read_u32::<BigEndian>()?,
        })
    }
}

/// Decode a little-endian `i32`.
pub fn decode_i32(data: &[u8]) -> Result<i32> {
    expect_len("i32", data, 4)?;
    Ok(Cursor::new(data).read_i32::<LittleEndian>()?)
}

/// Decode a little-endian `u32`.
pub fn decode_u32(data: &[u8]) -> Result<u32> {
    expect_len("u32", data, 4)?;
    Ok(Cursor::new(data).read_u32::<LittleEndian>()?)
}

fn expect_len(record: &'static str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(RailError::MalformedRecord {
            record,
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

/// Read exactly `len` bytes.
///
/// Fails with `Disconnected` when the peer is gone before the first byte and
/// with `ShortRead` when it closes part-way through.
pub fn read_record<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut got = 0;
    while got < len {
        match reader.read(&mut buf[got..]) {
            Ok(0) if got == 0 => return Err(RailError::Disconnected),
            Ok(0) => return Err(RailError::ShortRead { needed: len, got }),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                return Err(if got == 0 {
                    RailError::Disconnected
                } else {
                    RailError::ShortRead { needed: len, got }
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

/// Read one little-endian `i32` from a stream.
pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    decode_i32(&read_record(reader, 4)?)
}

/// Read one little-endian `u32` from a stream.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    decode_u32(&read_record(reader, 4)?)
}
