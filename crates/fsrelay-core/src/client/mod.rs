//! Client for the file server, with pooled connections.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), fsrelay_core::client::ClientError> {
//! use fsrelay_core::client::{FsClient, PoolConfig};
//!
//! let client = FsClient::connect(PoolConfig::default(), "secret").await?;
//! client.write_file("/data/site/index.html", b"<h1>hi</h1>").await?;
//! client.rename("/data/site/index.html", "/data/site/home.html").await?;
//! # Ok(())
//! # }
//! ```

pub mod pool;

use std::time::Duration;

use tracing::debug;

use fsrelay_config::ClientConfig;

use crate::auth::SharedSecret;
use crate::protocol::{DestinationParams, Method, ProtocolError, encode_request};

pub use pool::{Connection, ConnectionPool, PoolConfig, PoolError, PooledConnection};

/// Errors surfaced to client callers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server carried out nothing and answered with this message.
    #[error("server error: {0}")]
    Server(String),

    #[error("failed to encode destination: {0}")]
    Params(#[from] serde_json::Error),
}

/// Issues requests over a [`ConnectionPool`].
#[derive(Clone)]
pub struct FsClient {
    pool: ConnectionPool,
    password: Option<SharedSecret>,
}

impl FsClient {
    /// Connect using the `[client]` section of the configuration.
    pub async fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let pool = PoolConfig {
            addr: format!("{}:{}", config.host, config.port),
            min_idle: config.min_idle,
            max_open: config.max_open,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            ..PoolConfig::default()
        };
        Self::connect(pool, config.password.as_bytes()).await
    }

    pub async fn connect(pool: PoolConfig, password: impl Into<Vec<u8>>) -> Result<Self, ClientError> {
        Ok(Self {
            pool: ConnectionPool::new(pool).await?,
            password: SharedSecret::new(password),
        })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: ConnectionPool, password: impl Into<Vec<u8>>) -> Self {
        Self {
            pool,
            password: SharedSecret::new(password),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Send one request. The connection goes back to the pool only after a
    /// success response; anything else discards it.
    pub async fn request(&self, method: Method, path: &str, body: &[u8]) -> Result<(), ClientError> {
        let password = self.password.as_ref().map(SharedSecret::expose).unwrap_or_default();
        let frame = encode_request(method, password, path.as_bytes(), body)?;

        let mut conn = self.pool.acquire().await?;
        let response = conn.round_trip(&frame).await?;
        debug!(%method, path, code = response.code, "response received");

        match response.into_result() {
            Ok(_) => {
                conn.release();
                Ok(())
            }
            Err(message) => Err(ClientError::Server(message)),
        }
    }

    /// Create or truncate `path` and write `body`.
    pub async fn write_file(&self, path: &str, body: &[u8]) -> Result<(), ClientError> {
        self.request(Method::CreateFile, path, body).await
    }

    pub async fn modify_file(&self, path: &str, body: &[u8]) -> Result<(), ClientError> {
        self.request(Method::ModifyFile, path, body).await
    }

    pub async fn append_file(&self, path: &str, body: &[u8]) -> Result<(), ClientError> {
        self.request(Method::AppendFile, path, body).await
    }

    pub async fn remove_file(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::RemoveFile, path, &[]).await
    }

    pub async fn create_dir(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::CreateDir, path, &[]).await
    }

    pub async fn remove_dir(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::RemoveDir, path, &[]).await
    }

    pub async fn clear_dir(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::ClearDir, path, &[]).await
    }

    /// Copy a file or directory tree to `to`.
    pub async fn copy(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let body = destination(to)?;
        self.request(Method::Copy, from, &body).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let body = destination(to)?;
        self.request(Method::Rename, from, &body).await
    }

    /// Close the underlying pool.
    pub fn close(&self) {
        self.pool.close();
    }
}

fn destination(to: &str) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&DestinationParams {
        newpath: to.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_body() {
        assert_eq!(
            destination("/data/b").unwrap(),
            br#"{"newpath":"/data/b"}"#.to_vec()
        );
    }
}
