#![deny(unsafe_code)]

//! fsrelay core runtime.
//!
//! A small TCP file-operation service: clients send length-prefixed binary
//! frames asking the server to create, append to, remove, copy, or rename
//! files and directories under a set of allowed roots. This crate holds the
//! wire protocol, the server and its connection lifecycle, the pooled
//! client, and the daemon plumbing around them.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, used as the return type of
/// async trait methods that must stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared-secret authentication.
pub mod auth;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Pooled client for the file server.
pub mod client;
/// Daemon runtime and signal handling.
pub mod daemon;
/// Filesystem operations.
pub mod executor;
/// `tracing` subscriber setup.
pub mod logging;
/// Length-prefixed binary wire protocol.
pub mod protocol;
/// Accept loop and per-connection lifecycle.
pub mod server;
/// Shutdown trigger and completion barrier.
pub mod shutdown;

pub use auth::SharedSecret;
pub use client::{ConnectionPool, FsClient};
pub use daemon::Daemon;
pub use executor::{FsExecutor, Operation, OperationExecutor};
pub use server::{Server, ServerPolicy};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};
