//! Fuzz target for request and response envelope decoding
//!
//! Bytes read from a socket go through `envelope_len` then CBOR decoding.
//!
//! # Invariants
//!
//! - Oversized length prefixes are rejected before anything is allocated
//! - Anything that decodes re-encodes and decodes to the same value
//! - NEVER panic on malformed input

#![no_main]

use greet_proto::{
    Request, Response,
    envelope::{LENGTH_PREFIX_SIZE, MAX_ENVELOPE_SIZE, envelope_len, frame},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(prefix) = data.first_chunk::<LENGTH_PREFIX_SIZE>() {
        if let Ok(len) = envelope_len(*prefix) {
            assert!(len <= MAX_ENVELOPE_SIZE);
        }
    }

    if let Ok(request) = Request::decode(data) {
        let encoded = request.encode().expect("decoded request must re-encode");
        assert_eq!(Request::decode(&encoded).expect("re-encoded request must decode"), request);

        let framed = frame(&encoded).expect("decoded request fits in a frame");
        assert_eq!(&framed[LENGTH_PREFIX_SIZE..], encoded.as_slice());
    }

    if let Ok(response) = Response::decode(data) {
        let encoded = response.encode().expect("decoded response must re-encode");
        assert_eq!(Response::decode(&encoded).expect("re-encoded response must decode"), response);
    }
});
