//! Client connection pool.
//!
//! Capacity is a semaphore of `max_open` permits. A checked-out
//! [`PooledConnection`] holds one permit; idle connections hold none and
//! sit in a LIFO stack. Idle connections older than `idle_ttl` are dropped
//! on the way out instead of being reused, so the server's idle timeout
//! never closes a connection the pool is about to hand out.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::protocol::{ProtocolError, ResponseFrame, read_response};

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `host:port` of the server.
    pub addr: String,
    /// Connections dialed up front.
    pub min_idle: usize,
    /// Ceiling on simultaneously open connections.
    pub max_open: usize,
    /// Idle connections older than this are discarded.
    pub idle_ttl: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9468".to_string(),
            min_idle: 2,
            max_open: 100,
            idle_ttl: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors from the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("connection pool exhausted")]
    Exhausted,

    #[error("connection pool closed")]
    Closed,
}

/// One TCP connection to the server.
#[derive(Debug)]
pub struct Connection {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    /// Dial the server.
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self, PoolError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PoolError::ConnectTimeout(addr.to_string()))?
            .map_err(|source| PoolError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| PoolError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let peer = stream.peer_addr().map_err(|source| PoolError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            stream: BufReader::new(stream),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send an encoded request and read its response.
    pub async fn round_trip(&mut self, request: &[u8]) -> Result<ResponseFrame, ProtocolError> {
        let stream = self.stream.get_mut();
        stream.write_all(request).await?;
        stream.flush().await?;
        read_response(&mut self.stream).await
    }
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolInner {
    config: PoolConfig,
    idle: Mutex<Vec<IdleConnection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A bounded pool of connections to one server. Clones share the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create the pool and dial `min_idle` connections.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let max_open = config.max_open.max(1);
        let min_idle = config.min_idle.min(max_open);

        let mut idle = Vec::with_capacity(min_idle);
        for _ in 0..min_idle {
            let conn = Connection::connect(&config.addr, config.connect_timeout).await?;
            idle.push(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
        debug!(addr = %config.addr, min_idle, max_open, "connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(max_open)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check out a connection, waiting for capacity if the pool is at its
    /// ceiling.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        self.checkout(permit).await
    }

    /// Check out a connection without waiting.
    pub async fn try_acquire(&self) -> Result<PooledConnection, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => PoolError::Closed,
                TryAcquireError::NoPermits => PoolError::Exhausted,
            })?;
        self.checkout(permit).await
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let conn = match self.pop_fresh() {
            Some(conn) => conn,
            None => {
                let config = &self.inner.config;
                trace!(addr = %config.addr, "dialing new connection");
                Connection::connect(&config.addr, config.connect_timeout).await?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Most recently used idle connection that is younger than the TTL.
    fn pop_fresh(&self) -> Option<Connection> {
        let ttl = self.inner.config.idle_ttl;
        let mut idle = self.inner.idle();
        while let Some(entry) = idle.pop() {
            if entry.since.elapsed() < ttl {
                return Some(entry.conn);
            }
            trace!(peer = %entry.conn.peer_addr(), "discarding stale idle connection");
        }
        None
    }

    /// Return a healthy connection to the idle set.
    pub fn release(&self, mut conn: PooledConnection) {
        if let Some(conn) = conn.conn.take() {
            self.put_idle(conn);
        }
    }

    fn put_idle(&self, conn: Connection) {
        if self.is_closed() {
            return;
        }
        self.inner.idle().push(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }

    /// Close idle connections and refuse further checkouts. Connections that
    /// are checked out are closed when they come back.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner.idle().clear();
        debug!(addr = %self.inner.config.addr, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Permits not currently held by checked-out connections.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// A checked-out connection. Dropping it without
/// [`release`](PooledConnection::release) discards the connection.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: ConnectionPool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Send a request and read the response.
    pub async fn round_trip(&mut self, request: &[u8]) -> Result<ResponseFrame, ProtocolError> {
        match self.conn.as_mut() {
            Some(conn) => conn.round_trip(request).await,
            None => Err(ProtocolError::Truncated("request")),
        }
    }

    /// Give the connection back to the pool for reuse.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_idle(conn);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!(peer = %conn.peer_addr(), "discarding connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A listener that accepts and holds connections open.
    async fn sink() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (addr, task)
    }

    fn config(addr: &str, min_idle: usize, max_open: usize) -> PoolConfig {
        PoolConfig {
            addr: addr.to_string(),
            min_idle,
            max_open,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pre_dials_min_idle() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 3, 10)).await.unwrap();
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.available(), 10);
    }

    #[tokio::test]
    async fn test_release_returns_to_idle() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 1, 4)).await.unwrap();

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 3);
        pool.release(conn);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_discarded() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 1, 4)).await.unwrap();
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test]
    async fn test_try_acquire_exhausted() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 0, 1)).await.unwrap();
        let held = pool.try_acquire().await.unwrap();
        assert!(matches!(pool.try_acquire().await, Err(PoolError::Exhausted)));
        held.release();
        assert!(pool.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_capacity() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 0, 1)).await.unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        held.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_close() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(config(&addr, 2, 4)).await.unwrap();
        let out = pool.acquire().await.unwrap();
        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
        assert!(matches!(pool.try_acquire().await, Err(PoolError::Closed)));

        out.release();
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_idle_connections_dropped() {
        let (addr, _task) = sink().await;
        let pool = ConnectionPool::new(PoolConfig {
            idle_ttl: Duration::from_millis(20),
            ..config(&addr, 2, 4)
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(pool.pop_fresh().is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let result = ConnectionPool::new(config(&addr, 1, 1)).await;
        assert!(matches!(result, Err(PoolError::Connect { .. })));
    }
}
