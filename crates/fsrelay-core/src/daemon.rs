//! Daemon process: bind, serve, trap signals, drain.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, warn};

use fsrelay_config::AppConfig;

use crate::executor::{FsExecutor, OperationExecutor};
use crate::server::{Server, ServerError, ServerPolicy};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};

/// The fsrelay daemon.
pub struct Daemon {
    config: AppConfig,
    executor: Arc<dyn OperationExecutor>,
}

impl Daemon {
    /// Create a daemon that operates on the local filesystem.
    pub fn new(config: AppConfig) -> Self {
        let executor = FsExecutor::with_allowed_extensions(
            config.server.allowed_extensions.iter().map(String::as_str),
        );
        Self::with_executor(config, Arc::new(executor))
    }

    /// Create a daemon with a custom executor.
    pub fn with_executor(config: AppConfig, executor: Arc<dyn OperationExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run until SIGINT, SIGTERM, SIGQUIT, or SIGHUP, then drain.
    pub async fn run(&self) -> Result<ShutdownReason, DaemonError> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` resolves, then drain. Bind failures are returned
    /// before anything is served.
    pub async fn run_until<F>(&self, stop: F) -> Result<ShutdownReason, DaemonError>
    where
        F: Future<Output = ShutdownReason>,
    {
        let policy = ServerPolicy::from_config(&self.config)?;
        let server = Server::bind(policy, Arc::clone(&self.executor)).await?;
        info!(
            addr = %server.local_addr()?,
            version = %crate::build_info::version_string(),
            "fsrelay daemon starting"
        );

        let mut coordinator = ShutdownCoordinator::new();
        let done = coordinator.register("server");
        let listener = coordinator.listener();
        let mut server_task = tokio::spawn(server.run(listener, done));

        // A server that exits on its own still ends the daemon.
        tokio::select! {
            reason = stop => {
                coordinator.trigger(reason);
            }
            result = &mut server_task => {
                coordinator.trigger(ShutdownReason::Terminate);
                log_server_exit(result);
                let reason = coordinator.wait().await;
                return Ok(reason);
            }
        }

        let reason = coordinator.wait().await;
        log_server_exit(server_task.await);
        info!(%reason, "fsrelay daemon stopped");
        Ok(reason)
    }
}

fn log_server_exit(result: Result<Result<(), ServerError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "server stopped with an error"),
        Err(e) => error!(error = %e, "server task failed"),
    }
}

/// Resolve on the first termination or reload signal.
#[cfg(unix)]
pub async fn wait_for_signal() -> ShutdownReason {
    use tokio::signal::unix::{SignalKind, signal};

    let streams = (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
        signal(SignalKind::hangup()),
    );
    let (Ok(mut term), Ok(mut quit), Ok(mut hup)) = streams else {
        warn!("failed to install signal handlers, only Ctrl-C will stop the daemon");
        let _ = tokio::signal::ctrl_c().await;
        return ShutdownReason::Terminate;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("SIGINT received, initiating graceful shutdown");
            ShutdownReason::Terminate
        }
        _ = term.recv() => {
            warn!("SIGTERM received, initiating graceful shutdown");
            ShutdownReason::Terminate
        }
        _ = quit.recv() => {
            warn!("SIGQUIT received, initiating graceful shutdown");
            ShutdownReason::Terminate
        }
        _ = hup.recv() => {
            info!("SIGHUP received, reloading");
            ShutdownReason::Reload
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> ShutdownReason {
    let _ = tokio::signal::ctrl_c().await;
    warn!("Ctrl-C received, initiating graceful shutdown");
    ShutdownReason::Terminate
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Server(#[from] ServerError),
}
