//! Complete frames for the detect RPC
//!
//! Frame = Fixed Header + Payload

use bytes::{BufMut, Bytes, BytesMut};

use handoff_core::{HandoffError, HandoffResult, Pose};

use crate::{pose_from_bytes, pose_to_bytes, FrameHeader, FrameKind, Status, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// A JPEG-encoded frame sent for inference
#[derive(Clone, Debug, PartialEq)]
pub struct DetectRequest {
    pub request_id: u32,
    pub image: Bytes,
}

/// Outcome of a detect call as carried on the wire
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    /// Detection ran; `Pose::Absent` when no hand was found
    Landmarks(Pose),
    /// Detection did not run or failed
    Error { status: Status, detail: String },
}

impl ResponseBody {
    pub fn error(status: Status, detail: impl Into<String>) -> Self {
        ResponseBody::Error {
            status,
            detail: detail.into(),
        }
    }

    /// Turn the body into the caller-facing result
    pub fn into_result(self) -> HandoffResult<Pose> {
        match self {
            ResponseBody::Landmarks(pose) => Ok(pose),
            ResponseBody::Error { status, detail } => Err(status.into_error(detail)),
        }
    }
}

/// Service reply to a [`DetectRequest`]
#[derive(Clone, Debug, PartialEq)]
pub struct DetectResponse {
    pub request_id: u32,
    pub body: ResponseBody,
}

/// Any frame on the connection
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(DetectRequest),
    Response(DetectResponse),
}

impl DetectRequest {
    pub fn new(request_id: u32, image: impl Into<Bytes>) -> Self {
        DetectRequest {
            request_id,
            image: image.into(),
        }
    }

    /// Serialize header + JPEG payload
    pub fn encode(&self) -> HandoffResult<Bytes> {
        let mut header = FrameHeader::new(FrameKind::DetectRequest, self.request_id);
        header.payload_len = checked_len(self.image.len())?;
        Ok(assemble(&header, &self.image))
    }
}

impl DetectResponse {
    pub fn landmarks(request_id: u32, pose: Pose) -> Self {
        DetectResponse {
            request_id,
            body: ResponseBody::Landmarks(pose),
        }
    }

    pub fn error(request_id: u32, status: Status, detail: impl Into<String>) -> Self {
        DetectResponse {
            request_id,
            body: ResponseBody::error(status, detail),
        }
    }

    /// Serialize header + landmark or error payload
    pub fn encode(&self) -> HandoffResult<Bytes> {
        let mut header = FrameHeader::new(FrameKind::DetectResponse, self.request_id);
        let payload = match &self.body {
            ResponseBody::Landmarks(pose) => pose_to_bytes(pose),
            ResponseBody::Error { status, detail } => {
                if status.is_ok() {
                    return Err(HandoffError::InvalidWireFormat(
                        "error response with OK status".into(),
                    ));
                }
                header.status = *status;
                detail.as_bytes().to_vec()
            }
        };
        header.payload_len = checked_len(payload.len())?;
        Ok(assemble(&header, &payload))
    }
}

impl Message {
    /// Build a message from a parsed header and its payload bytes
    pub fn from_parts(header: &FrameHeader, payload: Bytes) -> HandoffResult<Self> {
        if payload.len() != header.payload_len as usize {
            return Err(HandoffError::BufferTooShort {
                expected: header.payload_len as usize,
                actual: payload.len(),
            });
        }

        match header.kind {
            FrameKind::DetectRequest => Ok(Message::Request(DetectRequest {
                request_id: header.request_id,
                image: payload,
            })),
            FrameKind::DetectResponse => {
                let body = if header.status.is_ok() {
                    ResponseBody::Landmarks(pose_from_bytes(&payload)?)
                } else {
                    ResponseBody::Error {
                        status: header.status,
                        detail: String::from_utf8_lossy(&payload).into_owned(),
                    }
                };
                Ok(Message::Response(DetectResponse {
                    request_id: header.request_id,
                    body,
                }))
            }
        }
    }

    /// Parse one complete frame
    pub fn parse(buf: &[u8]) -> HandoffResult<Self> {
        let header = FrameHeader::parse(buf)?;
        let end = HEADER_SIZE + header.payload_len as usize;
        if buf.len() < end {
            return Err(HandoffError::BufferTooShort {
                expected: end,
                actual: buf.len(),
            });
        }
        Self::from_parts(&header, Bytes::copy_from_slice(&buf[HEADER_SIZE..end]))
    }
}

fn checked_len(len: usize) -> HandoffResult<u32> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(HandoffError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(len as u32)
}

fn assemble(header: &FrameHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{HandPose, LANDMARK_VALUES};

    use crate::LANDMARK_PAYLOAD_SIZE;

    #[test]
    fn test_request_frame() {
        let request = DetectRequest::new(7, vec![0xFF, 0xD8, 0xFF, 0xE0]);
        let bytes = request.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);

        match Message::parse(&bytes).unwrap() {
            Message::Request(parsed) => assert_eq!(parsed, request),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_landmark_response_frame() {
        let values: Vec<f32> = (0..LANDMARK_VALUES).map(|i| i as f32 * 0.01).collect();
        let pose = Pose::Hand(HandPose::from_values(&values).unwrap());
        let response = DetectResponse::landmarks(9, pose.clone());

        let bytes = response.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + LANDMARK_PAYLOAD_SIZE);

        let Message::Response(parsed) = Message::parse(&bytes).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(parsed.request_id, 9);
        assert_eq!(parsed.body.into_result().unwrap(), pose);
    }

    #[test]
    fn test_no_hand_response_is_not_an_error() {
        let bytes = DetectResponse::landmarks(1, Pose::Absent).encode().unwrap();
        let Message::Response(parsed) = Message::parse(&bytes).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(parsed.body.into_result().unwrap(), Pose::Absent);
    }

    #[test]
    fn test_error_response_keeps_status() {
        let response = DetectResponse::error(3, Status::DecodeFailure, "not a jpeg");
        let bytes = response.encode().unwrap();

        let Message::Response(parsed) = Message::parse(&bytes).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(parsed, response);
        assert!(matches!(
            parsed.body.into_result(),
            Err(HandoffError::RemoteDecodeFailure(detail)) if detail == "not a jpeg"
        ));
    }

    #[test]
    fn test_error_with_ok_status_rejected() {
        let response = DetectResponse {
            request_id: 1,
            body: ResponseBody::Error {
                status: Status::Ok,
                detail: String::new(),
            },
        };
        assert!(response.encode().is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = DetectRequest::new(1, vec![1, 2, 3, 4]).encode().unwrap();
        assert!(matches!(
            Message::parse(&bytes[..bytes.len() - 1]),
            Err(HandoffError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_short_landmark_payload_rejected() {
        let mut header = FrameHeader::new(FrameKind::DetectResponse, 1);
        header.payload_len = 8;
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            Message::parse(&bytes),
            Err(HandoffError::InvalidLandmarkCount(2))
        ));
    }
}
