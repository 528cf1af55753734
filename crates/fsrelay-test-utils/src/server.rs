//! File server fixture.
//!
//! [`TestServer`] runs a real server on an ephemeral loopback port with a
//! temporary root directory. The directory is deleted when the fixture is
//! dropped.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use fsrelay_config::AppConfig;
use fsrelay_core::client::{FsClient, PoolConfig};
use fsrelay_core::server::{ConnectionTracker, Server, ServerPolicy};
use fsrelay_core::shutdown::{ShutdownCoordinator, ShutdownHandle, ShutdownReason};
use fsrelay_core::FsExecutor;

use crate::config::TestConfigBuilder;

/// A running server plus the handles needed to inspect and stop it.
pub struct TestServer {
    addr: SocketAddr,
    config: AppConfig,
    tracker: ConnectionTracker,
    shutdown: ShutdownHandle,
    stopped: JoinHandle<ShutdownReason>,
    root: TempDir,
}

impl TestServer {
    /// Start a server with default settings.
    pub async fn start() -> Self {
        Self::start_with(|builder| builder).await
    }

    /// Start a server, letting `configure` adjust the config. The temp root is
    /// always added to the allowed roots.
    pub async fn start_with(configure: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder) -> Self {
        let root = TempDir::new().expect("failed to create temp root");
        let config = configure(TestConfigBuilder::new().root_dir(root.path())).build();

        let mut policy = ServerPolicy::from_config(&config).expect("invalid test config");
        policy.listen_addr = "127.0.0.1:0".to_string();
        let executor = FsExecutor::with_allowed_extensions(
            config.server.allowed_extensions.iter().map(String::as_str),
        );
        let server = Server::bind(policy, Arc::new(executor))
            .await
            .expect("failed to bind test server");
        let addr = server.local_addr().expect("no local address");
        let tracker = server.tracker();

        let mut coordinator = ShutdownCoordinator::new();
        let done = coordinator.register("server");
        let listener = coordinator.listener();
        let shutdown = coordinator.handle();
        tokio::spawn(async move {
            if let Err(e) = server.run(listener, done).await {
                tracing::error!(error = %e, "test server failed");
            }
        });
        let stopped = tokio::spawn(coordinator.wait());

        Self {
            addr,
            config,
            tracker,
            shutdown,
            stopped,
            root,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The temporary root directory.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// An absolute path under the root.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// [`path`](Self::path) as a string, the form client calls take.
    pub fn remote(&self, relative: &str) -> String {
        self.path(relative).display().to_string()
    }

    /// A pooled client with the server's password and no pre-dialed
    /// connections.
    pub async fn client(&self) -> FsClient {
        self.client_with(PoolConfig {
            addr: self.addr.to_string(),
            min_idle: 0,
            max_open: 8,
            ..PoolConfig::default()
        })
        .await
    }

    pub async fn client_with(&self, pool: PoolConfig) -> FsClient {
        FsClient::connect(pool, self.config.server.password.as_bytes())
            .await
            .expect("failed to connect test client")
    }

    /// A bare TCP connection for sending hand-built frames.
    pub async fn raw_connect(&self) -> TcpStream {
        TcpStream::connect(self.addr)
            .await
            .expect("failed to connect to test server")
    }

    pub fn active_connections(&self) -> usize {
        self.tracker.active()
    }

    /// Wait until the active connection count reaches `n`.
    pub async fn wait_for_active(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.tracker.active() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("active connection count never reached the expected value");
    }

    /// Start the shutdown without waiting for it.
    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger(ShutdownReason::Terminate);
    }

    /// Whether the drain has finished.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_finished()
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn shutdown(self) -> ShutdownReason {
        self.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.stopped)
            .await
            .expect("server did not drain in time")
            .expect("shutdown task panicked")
    }
}
