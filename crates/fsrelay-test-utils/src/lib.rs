#![deny(unsafe_code)]

//! Shared test utilities for the fsrelay workspace.
//!
//! Provides a running-server fixture, config builders, and tracing helpers so
//! that individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! fsrelay-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod server;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use server::TestServer;
