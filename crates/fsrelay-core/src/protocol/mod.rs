//! Wire protocol — length-prefixed binary frames over TCP.
//!
//! Every numeric field is a little-endian `u32`. String fields are raw bytes
//! whose length comes from the header, so paths and bodies are binary-safe.
//!
//! ## Request
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ method   │ pass len │ path len │ body len │ password │ path     │ body     │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │ 4 bytes  │ N bytes  │ N bytes  │ N bytes  │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Copy and rename carry `{"newpath": "/absolute/destination"}` as the body.
//!
//! ## Response
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────┐
//! │ msg len  │ {"code": 0, "message": "success"}           │
//! │ 4 bytes  │ N bytes of JSON                             │
//! └──────────┴─────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod types;

pub use codec::{
    FrameLimits, encode_request, encode_response, read_request, read_response, write_request,
    write_response,
};
pub use types::*;
