//! One connection: read a frame, validate, dispatch, respond, repeat.
//!
//! Between frames the task waits for the next byte, the idle deadline or
//! shutdown. Once a frame has started arriving it is read to the end and
//! carried out, even if shutdown fires in the meantime. A frame whose bytes
//! stop arriving for longer than the frame deadline is abandoned.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use fsrelay_config::DeniedReason;

use super::ServerContext;
use crate::auth;
use crate::executor::{ExecError, Operation};
use crate::protocol::{
    DestinationParams, Method, ProtocolError, RequestFrame, ResponseFrame, read_request,
    write_response,
};
use crate::shutdown::ShutdownListener;

/// Why a decoded request was refused. The display text is the response
/// message.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Password check failed")]
    Unauthorized,

    #[error("path is not valid UTF-8")]
    InvalidPath,

    #[error(transparent)]
    Denied(#[from] DeniedReason),

    #[error("destination path error: cannot be empty")]
    EmptyDestination,

    #[error("destination path error: invalid parameters: {0}")]
    InvalidDestination(#[source] serde_json::Error),

    #[error("destination path error: {0}")]
    DeniedDestination(#[source] DeniedReason),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

pub(crate) async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: ShutdownListener,
) {
    let policy = &ctx.policy;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let opened = Instant::now();
    let mut last_activity: Option<Instant> = None;
    let mut served = 0u64;

    loop {
        let deadline = deadline_after(last_activity.unwrap_or(opened), policy.idle_timeout);

        let waiting = tokio::select! {
            biased;
            filled = timeout_at(deadline, async {
                reader.fill_buf().await.map(|buf| buf.is_empty())
            }) => filled,
            _ = shutdown.triggered() => {
                debug!(%peer, "closing idle connection for shutdown");
                break;
            }
        };

        match waiting {
            Err(_) => {
                debug!(%peer, served, "idle timeout");
                break;
            }
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
            Ok(Ok(true)) => {
                // The peer finished sending. Hold the connection until the
                // idle window since the last response runs out.
                if let Some(last) = last_activity {
                    tokio::select! {
                        _ = sleep_until(deadline_after(last, policy.idle_timeout)) => {}
                        _ = shutdown.triggered() => {}
                    }
                }
                debug!(%peer, served, "peer closed connection");
                break;
            }
            Ok(Ok(false)) => {}
        }

        let mut frame_reader = StallDeadline::new(&mut reader, policy.frame_timeout);
        let frame = match read_request(&mut frame_reader, &policy.limits).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                match &e {
                    ProtocolError::Io(err) if err.kind() == io::ErrorKind::TimedOut => {
                        warn!(%peer, timeout = ?policy.frame_timeout, "frame read stalled");
                    }
                    ProtocolError::Truncated(_) | ProtocolError::Io(_) => {
                        debug!(%peer, error = %e, "connection lost mid-frame");
                    }
                    _ => warn!(%peer, error = %e, "malformed request"),
                }
                // The stream position is lost, so nothing after this frame
                // can be decoded.
                let response = ResponseFrame::failure(e.to_string());
                if let Err(e) = write_response(&mut write_half, &response).await {
                    debug!(%peer, error = %e, "failed to write response");
                }
                break;
            }
        };

        let method = frame.method;
        let response = match handle_request(&ctx, frame).await {
            Ok(op) => {
                info!(%peer, %method, path = %op.path().display(), "request completed");
                ResponseFrame::success()
            }
            Err(e) => {
                info!(%peer, %method, error = %e, "request failed");
                ResponseFrame::failure(e.to_string())
            }
        };

        if let Err(e) = write_response(&mut write_half, &response).await {
            debug!(%peer, error = %e, "failed to write response");
            break;
        }
        served += 1;
        last_activity = Some(Instant::now());
        debug!(%peer, served, "idle timer reset");

        if shutdown.is_triggered() {
            debug!(%peer, "closing connection after response for shutdown");
            break;
        }
    }

    debug!(%peer, served, "connection closed");
}

/// `from + after`, saturating to a far-future instant instead of
/// overflowing.
fn deadline_after(from: Instant, after: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    from.checked_add(after).unwrap_or_else(|| from + FAR_FUTURE)
}

/// Fails a read with [`io::ErrorKind::TimedOut`] once no bytes have arrived
/// for `limit`. Every read that makes progress pushes the deadline out.
struct StallDeadline<'a, R> {
    inner: &'a mut R,
    limit: Duration,
    timer: Pin<Box<Sleep>>,
}

impl<'a, R> StallDeadline<'a, R> {
    fn new(inner: &'a mut R, limit: Duration) -> Self {
        let timer = Box::pin(tokio::time::sleep_until(deadline_after(Instant::now(), limit)));
        Self { inner, limit, timer }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for StallDeadline<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut *this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                if buf.filled().len() > before {
                    let next = deadline_after(Instant::now(), this.limit);
                    this.timer.as_mut().reset(next);
                }
                Poll::Ready(result)
            }
            Poll::Pending => match this.timer.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no bytes received before the frame deadline",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Authenticate, validate, and carry out one request.
async fn handle_request(ctx: &ServerContext, frame: RequestFrame) -> Result<Operation, RequestError> {
    let policy = &ctx.policy;
    if !auth::authorize(policy.secret.as_ref(), &frame.password) {
        return Err(RequestError::Unauthorized);
    }

    let path = path_from_bytes(frame.path)?;
    policy.paths.check(&path)?;
    debug!(method = %frame.method, path = %path.display(), body_len = frame.body.len(), "dispatching");

    let op = build_operation(frame.method, path, frame.body, &policy.paths)?;
    ctx.executor.execute(&op).await?;
    Ok(op)
}

fn build_operation(
    method: Method,
    path: PathBuf,
    body: Vec<u8>,
    paths: &fsrelay_config::PathPolicy,
) -> Result<Operation, RequestError> {
    Ok(match method {
        Method::CreateFile => Operation::CreateFile { path, body },
        Method::ModifyFile => Operation::ModifyFile { path, body },
        Method::AppendFile => Operation::AppendFile { path, body },
        Method::RemoveFile => Operation::RemoveFile { path },
        Method::CreateDir => Operation::CreateDir { path },
        Method::RemoveDir => Operation::RemoveDir { path },
        Method::ClearDir => Operation::ClearDir { path },
        Method::Copy => Operation::Copy {
            to: destination(&body, paths)?,
            from: path,
        },
        Method::Rename => Operation::Rename {
            to: destination(&body, paths)?,
            from: path,
        },
    })
}

/// Parse and validate the `newpath` of a copy or rename body.
fn destination(body: &[u8], paths: &fsrelay_config::PathPolicy) -> Result<PathBuf, RequestError> {
    let params: DestinationParams =
        serde_json::from_slice(body).map_err(RequestError::InvalidDestination)?;
    if params.newpath.is_empty() {
        return Err(RequestError::EmptyDestination);
    }
    let to = PathBuf::from(params.newpath);
    paths.check(&to).map_err(RequestError::DeniedDestination)?;
    Ok(to)
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, RequestError> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, RequestError> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| RequestError::InvalidPath)
}
