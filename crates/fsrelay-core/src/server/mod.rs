//! The file server: accept loop, per-connection lifecycle, and drain.
//!
//! [`Server::run`] accepts connections until the shutdown listener fires,
//! then drops the listener and polls the [`ConnectionTracker`] until every
//! connection task has finished before reporting completion.

mod connection;
mod tracker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use fsrelay_config::size::format_size;
use fsrelay_config::{AppConfig, ConfigError, PathPolicy};

use crate::auth::SharedSecret;
use crate::executor::OperationExecutor;
use crate::protocol::{FrameLimits, MAX_BODY_SIZE, MAX_PASSWORD_LENGTH};
use crate::shutdown::{CompletionHandle, ShutdownListener};

pub use connection::RequestError;
pub use tracker::{ConnectionGuard, ConnectionTracker};

/// Everything a connection needs to validate requests. Read-only once built.
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    /// `host:port` to bind.
    pub listen_addr: String,
    /// `None` disables authentication.
    pub secret: Option<SharedSecret>,
    pub limits: FrameLimits,
    pub paths: PathPolicy,
    /// How long a connection may sit without a request.
    pub idle_timeout: Duration,
    /// How long a single frame may take to arrive once it has started.
    pub frame_timeout: Duration,
    /// How often the drain checks for remaining connections.
    pub drain_poll_interval: Duration,
}

impl ServerPolicy {
    /// Build the policy from a loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        config.validate_for_server()?;
        let server = &config.server;

        let requested = config.max_body_bytes()?;
        if requested > u64::from(MAX_BODY_SIZE) {
            warn!(
                requested = %format_size(requested),
                limit = %format_size(MAX_BODY_SIZE.into()),
                "server.max_body_size above the protocol ceiling, clamping"
            );
        }

        let secret = SharedSecret::new(server.password.as_bytes());
        if let Some(secret) = &secret {
            if !secret.fits_frame() {
                return Err(ServerError::SecretTooLong(secret.byte_len()));
            }
        }

        Ok(Self {
            listen_addr: format!("{}:{}", server.listen_addr, server.listen_port),
            secret,
            limits: FrameLimits::new(requested),
            paths: config.build_path_policy(),
            idle_timeout: Duration::from_secs(server.idle_timeout_secs),
            frame_timeout: Duration::from_secs(server.frame_timeout_secs),
            drain_poll_interval: Duration::from_millis(server.drain_poll_interval_ms),
        })
    }
}

/// State shared by every connection task.
pub(crate) struct ServerContext {
    pub(crate) policy: ServerPolicy,
    pub(crate) executor: Arc<dyn OperationExecutor>,
}

/// A bound server, ready to run.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tracker: ConnectionTracker,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(
        policy: ServerPolicy,
        executor: Arc<dyn OperationExecutor>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&policy.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: policy.listen_addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext { policy, executor }),
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle on the live connection count.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `shutdown` fires, then drain and report through `done`.
    pub async fn run(
        self,
        shutdown: ShutdownListener,
        done: CompletionHandle,
    ) -> Result<(), ServerError> {
        let Self {
            listener,
            ctx,
            tracker,
        } = self;
        let policy = &ctx.policy;

        info!(
            addr = %listener.local_addr()?,
            roots = ?policy.paths.allowed_roots(),
            max_body = %format_size(policy.limits.max_body_size.into()),
            auth = policy.secret.is_some(),
            "file server listening"
        );

        let mut stop = shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = tracker.enter();
                        debug!(%peer, active = tracker.active(), "connection accepted");
                        let ctx = Arc::clone(&ctx);
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            connection::serve(stream, peer, ctx, conn_shutdown).await;
                            drop(guard);
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                reason = stop.triggered() => {
                    info!(%reason, "no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        let mut ticker = tokio::time::interval(ctx.policy.drain_poll_interval);
        loop {
            ticker.tick().await;
            let active = tracker.active();
            if active == 0 {
                break;
            }
            info!(active, "waiting for active connections to finish");
        }

        info!("file server stopped");
        done.complete();
        Ok(())
    }
}

/// Errors from building or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server.password is {0} bytes, must be at most {max}", max = MAX_PASSWORD_LENGTH)]
    SecretTooLong(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
