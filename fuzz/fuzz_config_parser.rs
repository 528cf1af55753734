//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text through `AppConfig::parse()`, then through the
//! server-side derivations (body size, path policy) for anything that parses.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = fsrelay_config::AppConfig::parse(s) {
            let _ = config.validate_for_server();
            let _ = config.max_body_bytes();
            let _ = config.build_path_policy();
        }
    }
});
