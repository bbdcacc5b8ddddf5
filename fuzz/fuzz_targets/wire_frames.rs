//! Arbitrary bytes through the frame parser: errors are fine, panics are not

#![no_main]

use libfuzzer_sys::fuzz_target;

use handoff_wire::{FrameHeader, Message};

fuzz_target!(|data: &[u8]| {
    let _ = FrameHeader::parse(data);

    if let Ok(message) = Message::parse(data) {
        // Anything that parses must re-encode
        let encoded = match &message {
            Message::Request(request) => request.encode(),
            Message::Response(response) => response.encode(),
        };
        assert!(encoded.is_ok());
    }
});
