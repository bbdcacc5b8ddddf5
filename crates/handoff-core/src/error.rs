//! Error types for handoff

use thiserror::Error;

/// Protocol, transport and configuration errors
#[derive(Error, Debug)]
pub enum HandoffError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),

    #[error("Unknown status code: {0}")]
    UnknownStatus(u8),

    #[error("Invalid landmark count: expected 63 values, got {0}")]
    InvalidLandmarkCount(usize),

    #[error("Response id mismatch: expected {expected}, got {actual}")]
    RequestIdMismatch { expected: u32, actual: u32 },

    // Remote status errors
    #[error("Remote could not decode image: {0}")]
    RemoteDecodeFailure(String),

    #[error("Remote inference failed: {0}")]
    RemoteInternal(String),

    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    // Transport errors
    #[error("Operation timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Channel broken by an earlier failure")]
    ChannelBroken,

    // Local errors
    #[error("Image error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for handoff operations
pub type HandoffResult<T> = Result<T, HandoffError>;

/// Failure of a single inference call.
///
/// Never persisted; drives mode transitions and per-call fallback only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The call did not complete within its deadline
    #[error("inference timed out")]
    Timeout,

    /// The request or response could not travel over the network
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The input image could not be decoded
    #[error("image decode failure: {0}")]
    DecodeFailure(String),

    /// The back end cannot serve requests
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Short tag for logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Timeout => "timeout",
            BackendError::TransportFailure(_) => "transport",
            BackendError::DecodeFailure(_) => "decode",
            BackendError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<HandoffError> for BackendError {
    fn from(err: HandoffError) -> Self {
        match err {
            HandoffError::Timeout => BackendError::Timeout,
            HandoffError::RemoteDecodeFailure(detail) => BackendError::DecodeFailure(detail),
            HandoffError::Image(detail) => BackendError::DecodeFailure(detail),
            HandoffError::RemoteInternal(detail) | HandoffError::RemoteUnavailable(detail) => {
                BackendError::Unavailable(detail)
            }
            HandoffError::Config(detail) => BackendError::Unavailable(detail),
            other => BackendError::TransportFailure(other.to_string()),
        }
    }
}
