//! Error types for the ring-buffer session and the wire codec.

use thiserror::Error;

/// Errors raised while decoding records, encoding function tables or
/// driving the control plane.
#[derive(Debug, Error)]
pub enum RailError {
    /// A binary record did not have the exact expected length.
    #[error("Malformed {record} record: expected {expected} bytes, got {got}")]
    MalformedRecord {
        record: &'static str,
        expected: usize,
        got: usize,
    },

    /// Ternary encoder asked for more significant bits than a 64-bit key can hold.
    #[error("Invalid precision: {precision} (max {max})")]
    InvalidPrecision {
        precision: u32,
        max: u32,
    },

    /// Episode provider has no points to serve.
    #[error("Trajectory source is empty")]
    EmptySource,

    /// Peer closed the connection before a record started.
    #[error("Peer disconnected")]
    Disconnected,

    /// Peer closed the connection in the middle of a record.
    #[error("Short read: need {needed} bytes, got {got}")]
    ShortRead {
        needed: usize,
        got: usize,
    },

    /// Tried to remove a redirect that is not installed.
    #[error("No redirect installed for robot {robot_id} at point {from_id}")]
    StaleRedirect {
        robot_id: i32,
        from_id: u32,
    },

    /// A CSV field could not be parsed as a float.
    #[error("Bad float at line {line}, column {column}: {value:?}")]
    BadFloat {
        line: usize,
        column: usize,
        value: String,
    },

    /// A CSV row is too short to hold six positions and six speeds.
    #[error("Line {line} has {got} columns, need at least {needed}")]
    MissingColumns {
        line: usize,
        needed: usize,
        got: usize,
    },

    /// Op code outside the control protocol.
    #[error("Unknown command code: {0}")]
    UnknownCommand(i32),

    /// Function table selector outside `A`, `T`, `D`.
    #[error("Unknown function table selector: {0:#04x}")]
    UnknownSelector(u8),

    /// A single batch does not fit in the ring.
    #[error("Batch of {len} points exceeds ring capacity {capacity}")]
    BatchTooLarge {
        len: usize,
        capacity: u32,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RailError {
    /// Whether the error means the peer is gone and the connection should be dropped.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RailError::Disconnected | RailError::ShortRead { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message() {
        let err = RailError::MalformedRecord {
            record: "point",
            expected: 120,
            got: 112,
        };
        assert_eq!(
            err.to_string(),
            "Malformed point record: expected 120 bytes, got 112"
        );
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(RailError::Disconnected.is_disconnect());
        assert!(RailError::ShortRead { needed: 4, got: 1 }.is_disconnect());
        assert!(!RailError::EmptySource.is_disconnect());
    }
}
