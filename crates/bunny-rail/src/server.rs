//! Inbound upload protocol and the blocking proxy loop.
//!
//! A client sends any number of requests on one connection:
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0       4       Mode (u32 BE): 0 = reset, otherwise append
//! 4       4       Payload length (u32 BE)
//! 8       length  UTF-8 CSV payload
//! ```
//!
//! and gets a `u32` BE status back for each: `1` when the upload was
//! applied, `0` when it was rejected or failed.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::codec::{self, UploadHeader, UPLOAD_HEADER_LEN};
use crate::control::Connector;
use crate::error::{RailError, Result};
use crate::session::{SessionManager, UploadMode};

/// Response status of an applied upload.
pub const STATUS_OK: u32 = 1;

/// Response status of a rejected or failed upload.
pub const STATUS_FAILED: u32 = 0;

/// Default cap on a single payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[cfg(unix)]
const ENFILE: i32 = 23;
#[cfg(unix)]
const EMFILE: i32 = 24;

/// Pause after running out of descriptors or memory before accepting again.
const RESOURCE_BACKOFF: Duration = Duration::from_millis(100);

/// Whether a failed `accept` only affected one pending connection or a
/// temporary resource shortage, so the listener can keep going.
pub fn accept_error_is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::OutOfMemory => true,
        _ => is_descriptor_exhaustion(err),
    }
}

#[cfg(unix)]
fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_err: &io::Error) -> bool {
    false
}

/// Sleep after resource errors so the loop does not spin on them.
pub(crate) fn accept_backoff(err: &io::Error) {
    if err.kind() == io::ErrorKind::OutOfMemory || is_descriptor_exhaustion(err) {
        thread::sleep(RESOURCE_BACKOFF);
    }
}

/// A decoded upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub mode: UploadMode,
    pub payload: String,
}

impl UploadRequest {
    pub fn new(mode: UploadMode, payload: impl Into<String>) -> Self {
        Self {
            mode,
            payload: payload.into(),
        }
    }

    /// Header followed by the payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let length = u32::try_from(self.payload.len()).map_err(|_| RailError::MalformedRecord {
            record: "upload payload",
            expected: u32::MAX as usize,
            got: self.payload.len(),
        })?;
        let header = UploadHeader {
            mode: self.mode.code(),
            length,
        };
        let mut buf = Vec::with_capacity(UPLOAD_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(self.payload.as_bytes());
        Ok(buf)
    }

    /// Read one request.
    ///
    /// An oversized payload is drained from the stream before the error is
    /// returned, so the connection stays usable for the next request.
    pub fn read_from<R: Read>(reader: &mut R, max_payload: usize) -> Result<Self> {
        let header = UploadHeader::decode(&codec::read_record(reader, UPLOAD_HEADER_LEN)?)?;
        let length = header.length as usize;

        if length > max_payload {
            let drained = io::copy(&mut (&mut *reader).take(length as u64), &mut io::sink())?;
            if drained < length as u64 {
                return Err(RailError::ShortRead {
                    needed: length,
                    got: drained as usize,
                });
            }
            return Err(RailError::MalformedRecord {
                record: "upload payload",
                expected: max_payload,
                got: length,
            });
        }

        let bytes = if length == 0 {
            Vec::new()
        } else {
            codec::read_record(reader, length).map_err(|e| match e {
                RailError::Disconnected => RailError::ShortRead { needed: length, got: 0 },
                other => other,
            })?
        };
        let payload = String::from_utf8(bytes).map_err(|e| RailError::MalformedRecord {
            record: "utf-8 payload",
            expected: length,
            got: e.utf8_error().valid_up_to(),
        })?;

        Ok(Self {
            mode: UploadMode::from_code(header.mode),
            payload,
        })
    }
}

/// Send one request and wait for its status.
pub fn send_upload<S: Read + Write>(stream: &mut S, request: &UploadRequest) -> Result<u32> {
    stream.write_all(&request.encode()?)?;
    stream.flush()?;
    let status = codec::read_record(stream, 4)?;
    Ok(u32::from_be_bytes([status[0], status[1], status[2], status[3]]))
}

/// Blocking upload proxy for one robot path.
pub struct UploadServer<C> {
    listener: TcpListener,
    session: SessionManager<C>,
    robot_id: i32,
    max_payload: usize,
}

impl<C: Connector> UploadServer<C> {
    /// Bind the listener.
    pub fn bind(addr: &str, session: SessionManager<C>, robot_id: i32, max_payload: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self::from_listener(listener, session, robot_id, max_payload))
    }

    /// Wrap an existing listener (for testing).
    pub fn from_listener(
        listener: TcpListener,
        session: SessionManager<C>,
        robot_id: i32,
        max_payload: usize,
    ) -> Self {
        Self {
            listener,
            session,
            robot_id,
            max_payload,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn session(&self) -> &SessionManager<C> {
        &self.session
    }

    /// Serve connections one after another. Returns only if the listener fails.
    pub fn run(&mut self) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), robot_id = self.robot_id, "upload proxy listening");
        loop {
            match self.accept_one() {
                Ok(()) => {}
                Err(RailError::Io(e)) if accept_error_is_transient(&e) => {
                    warn!(error = %e, "accept error");
                    accept_backoff(&e);
                }
                Err(e) => {
                    error!(error = %e, "listener failed");
                    return Err(e);
                }
            }
        }
    }

    /// Accept and fully serve a single connection.
    pub fn accept_one(&mut self) -> Result<()> {
        let (mut stream, peer) = self.listener.accept()?;
        info!(%peer, "client connected");
        match self.handle_connection(&mut stream) {
            Ok(served) => info!(%peer, served, "client disconnected"),
            Err(e) => warn!(%peer, error = %e, "connection dropped"),
        }
        Ok(())
    }

    /// Serve requests until the client hangs up. Public for unit testing.
    ///
    /// Returns the number of requests answered.
    pub fn handle_connection<S: Read + Write>(&mut self, stream: &mut S) -> Result<usize> {
        let mut served = 0;
        loop {
            let status = match UploadRequest::read_from(stream, self.max_payload) {
                Ok(request) => self.handle_request(&request),
                Err(RailError::Disconnected) => return Ok(served),
                Err(e) if e.is_disconnect() => return Err(e),
                Err(RailError::Io(e)) => return Err(RailError::Io(e)),
                Err(e) => {
                    warn!(error = %e, "rejected upload");
                    STATUS_FAILED
                }
            };
            stream.write_all(&status.to_be_bytes())?;
            stream.flush()?;
            served += 1;
        }
    }

    /// Apply one request and map the outcome to a status code.
    pub fn handle_request(&mut self, request: &UploadRequest) -> u32 {
        debug!(mode = ?request.mode, bytes = request.payload.len(), "upload request");
        match self.session.upload(self.robot_id, request.mode, &request.payload) {
            Ok(_) => STATUS_OK,
            Err(e) => {
                error!(robot_id = self.robot_id, mode = ?request.mode, error = %e, "upload failed");
                STATUS_FAILED
            }
        }
    }
}
