//! Fuzz target for the path policy.
//!
//! Run with: cargo +nightly fuzz run fuzz_path_policy
//!
//! Checks arbitrary byte paths against a fixed policy. Any accepted path
//! must be absolute, free of `..`, and under the root.

#![no_main]

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path};

use fsrelay_config::PathPolicy;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let policy = PathPolicy::new(["/data"], ["/etc/", "/boot/"], ["php", "cgi", "pl", "py"]);
    let path = Path::new(OsStr::from_bytes(data));

    if policy.check(path).is_ok() {
        assert!(path.is_absolute());
        assert!(path.starts_with("/data"));
        assert!(!path.components().any(|c| c == Component::ParentDir));
    }
});
