//! Landmark payload decoding and re-encoding

#![no_main]

use libfuzzer_sys::fuzz_target;

use handoff_core::Pose;
use handoff_wire::{pose_from_bytes, pose_to_bytes};

fuzz_target!(|data: &[u8]| {
    if let Ok(pose) = pose_from_bytes(data) {
        let bytes = pose_to_bytes(&pose);
        let again = pose_from_bytes(&bytes).expect("re-encoded payload must decode");
        assert_eq!(pose, again);
        if let Pose::Absent = pose {
            assert!(bytes.iter().all(|b| *b == 0));
        }
    }
});
