//! Landmark codec - Pose ↔ 63 flat f32 values
//!
//! Layout: `[x0, y0, z0, x1, y1, z1, ..., x20, y20, z20]`, each value
//! little-endian on the wire. All-zero values mean "no hand detected".

use handoff_core::{HandPose, HandoffError, HandoffResult, Pose, LANDMARK_VALUES};

/// Encoded size of a landmark payload
pub const LANDMARK_PAYLOAD_SIZE: usize = LANDMARK_VALUES * 4;

/// Flatten a pose. `Pose::Absent` becomes 63 zeros.
pub fn encode_pose(pose: &Pose) -> [f32; LANDMARK_VALUES] {
    match pose {
        Pose::Hand(hand) => hand.to_values(),
        Pose::Absent => [0.0; LANDMARK_VALUES],
    }
}

/// Rebuild a pose from flat values.
///
/// Exactly 63 finite values are required. All exactly 0.0 decodes to
/// `Pose::Absent`, never to a hand with every landmark at the origin.
pub fn decode_pose(values: &[f32]) -> HandoffResult<Pose> {
    if values.len() != LANDMARK_VALUES {
        return Err(HandoffError::InvalidLandmarkCount(values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(HandoffError::InvalidWireFormat(
            "non-finite landmark value".into(),
        ));
    }
    if values.iter().all(|v| *v == 0.0) {
        return Ok(Pose::Absent);
    }

    HandPose::from_values(values)
        .map(Pose::Hand)
        .ok_or(HandoffError::InvalidLandmarkCount(values.len()))
}

/// Serialize a pose into its wire payload
pub fn pose_to_bytes(pose: &Pose) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LANDMARK_PAYLOAD_SIZE);
    for value in encode_pose(pose) {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Parse a landmark payload
pub fn pose_from_bytes(buf: &[u8]) -> HandoffResult<Pose> {
    if buf.len() % 4 != 0 {
        return Err(HandoffError::InvalidWireFormat(format!(
            "landmark payload of {} bytes is not a whole number of f32",
            buf.len()
        )));
    }

    let values: Vec<f32> = buf
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    decode_pose(&values)
}
