//! Fixed header for the handoff wire protocol
//!
//! Fixed header is 12 bytes:
//! - Byte 0: Version (4 bits) + Frame kind (4 bits)
//! - Byte 1: Status (always 0 on requests)
//! - Bytes 2-3: Reserved (LE, zero)
//! - Bytes 4-7: Request ID (LE), echoed by the response
//! - Bytes 8-11: Payload length (LE)

use handoff_core::{HandoffError, HandoffResult};

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Largest payload either side will accept
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Frame kind identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → service: one JPEG image
    DetectRequest = 1,
    /// Service → client: landmarks or an error status
    DetectResponse = 2,
}

impl FrameKind {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            1 => Some(FrameKind::DetectRequest),
            2 => Some(FrameKind::DetectResponse),
            _ => None,
        }
    }

    #[inline]
    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

/// Service-level outcome of a detect call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Payload carries 63 landmark values
    Ok = 0,
    /// The request image could not be decoded
    DecodeFailure = 1,
    /// Inference itself failed
    Internal = 2,
    /// The service is overloaded or shutting down
    Unavailable = 3,
    /// The request frame was malformed
    InvalidRequest = 4,
}

impl Status {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Status::Ok),
            1 => Some(Status::DecodeFailure),
            2 => Some(Status::Internal),
            3 => Some(Status::Unavailable),
            4 => Some(Status::InvalidRequest),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Client-side error for a non-OK status
    pub fn into_error(self, detail: String) -> HandoffError {
        match self {
            Status::Ok => HandoffError::InvalidWireFormat("OK status is not an error".into()),
            Status::DecodeFailure => HandoffError::RemoteDecodeFailure(detail),
            Status::Internal => HandoffError::RemoteInternal(detail),
            Status::Unavailable => HandoffError::RemoteUnavailable(detail),
            Status::InvalidRequest => HandoffError::RemoteRejected(detail),
        }
    }
}

/// Fixed header structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire protocol version (4 bits)
    pub version: u8,
    pub kind: FrameKind,
    pub status: Status,
    /// Correlates a response with its request
    pub request_id: u32,
    /// Bytes following the header
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, request_id: u32) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            kind,
            status: Status::Ok,
            request_id,
            payload_len: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &[u8]) -> HandoffResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(HandoffError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        // Byte 0: Version + Kind
        let version = buf[0] >> 4;
        if version != WIRE_VERSION {
            return Err(HandoffError::UnsupportedVersion(version));
        }
        let kind = FrameKind::from_nibble(buf[0] & 0x0F)
            .ok_or(HandoffError::UnknownFrameKind(buf[0] & 0x0F))?;

        // Byte 1: Status
        let status = Status::from_byte(buf[1]).ok_or(HandoffError::UnknownStatus(buf[1]))?;
        if kind == FrameKind::DetectRequest && !status.is_ok() {
            return Err(HandoffError::InvalidWireFormat(
                "request carries a status".into(),
            ));
        }

        // Bytes 4-7: Request ID
        let request_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        // Bytes 8-11: Payload length
        let payload_len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(HandoffError::PayloadTooLarge {
                size: payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(FrameHeader {
            version,
            kind,
            status,
            request_id,
            payload_len,
        })
    }

    /// Serialize header into the first [`HEADER_SIZE`] bytes of `buf`
    pub fn serialize(&self, buf: &mut [u8]) -> HandoffResult<()> {
        if buf.len() < HEADER_SIZE {
            return Err(HandoffError::BufferTooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        buf[0] = (self.version << 4) | self.kind.to_nibble();
        buf[1] = self.status.to_byte();
        buf[2..4].copy_from_slice(&0u16.to_le_bytes());
        buf[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());

        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = (self.version << 4) | self.kind.to_nibble();
        buf[1] = self.status.to_byte();
        buf[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }
}
