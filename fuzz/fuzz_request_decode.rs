//! Fuzz target for the request frame decoder.
//!
//! Run with: cargo +nightly fuzz run fuzz_request_decode
//!
//! Decodes arbitrary bytes as a stream of request frames. The decoder must
//! never panic, and every frame it yields must re-encode to the same bytes.

#![no_main]

use fsrelay_core::protocol::{FrameLimits, encode_request, read_request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    runtime.block_on(async {
        let limits = FrameLimits::new(1 << 16);
        let mut reader = data;
        let mut consumed = 0;
        while let Ok(Some(frame)) = read_request(&mut reader, &limits).await {
            let encoded = encode_request(frame.method, &frame.password, &frame.path, &frame.body)
                .expect("decoded frame must re-encode");
            assert_eq!(&data[consumed..consumed + encoded.len()], &encoded[..]);
            consumed += encoded.len();
        }
    });
});
