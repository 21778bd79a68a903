#![no_main]
//! Fuzz target for call channel datagrams
//!
//! Feeds random bytes to the wire decoder the socket transport runs on
//! every received datagram.

use libfuzzer_sys::fuzz_target;

use fusion::wire::WireMessage;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic
    if let Ok(message) = WireMessage::decode(data) {
        // Anything we accept we can send back
        let bytes = message.encode().expect("decoded message must encode");
        assert_eq!(WireMessage::decode(&bytes).ok(), Some(message));
    }
});
