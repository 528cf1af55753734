//! Frame encoding and decoding.
//!
//! Decoding pulls from any [`AsyncRead`]; callers are expected to wrap
//! sockets in a [`tokio::io::BufReader`] so the many small header reads do
//! not each become a syscall. Every read is "exactly N bytes or fail" and
//! every header field is checked before the bytes it describes are read, so
//! a hostile length can never trigger an oversized allocation.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::*;

/// Per-server limits applied while decoding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest accepted body. Never above [`MAX_BODY_SIZE`].
    pub max_body_size: u32,
}

impl FrameLimits {
    /// Limits with the given body ceiling, clamped to [`MAX_BODY_SIZE`].
    pub fn new(max_body_size: u64) -> Self {
        Self {
            max_body_size: max_body_size.min(u64::from(MAX_BODY_SIZE)) as u32,
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

/// Serialize a request into a single buffer.
pub fn encode_request(
    method: Method,
    password: &[u8],
    path: &[u8],
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let password_len = checked_len(password.len(), MAX_PASSWORD_LENGTH)
        .ok_or(ProtocolError::PasswordTooLong(password.len() as u64))?;
    let path_len = checked_len(path.len(), MAX_PATH_LENGTH)
        .ok_or(ProtocolError::PathTooLong(path.len() as u64))?;
    let body_len = checked_len(body.len(), MAX_BODY_SIZE).ok_or(ProtocolError::BodyTooLarge {
        size: body.len() as u64,
        limit: MAX_BODY_SIZE,
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + password.len() + path.len() + body.len());
    buf.extend_from_slice(&method.code().to_le_bytes());
    buf.extend_from_slice(&password_len.to_le_bytes());
    buf.extend_from_slice(&path_len.to_le_bytes());
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(password);
    buf.extend_from_slice(path);
    buf.extend_from_slice(body);
    Ok(buf)
}

fn checked_len(len: usize, max: u32) -> Option<u32> {
    u32::try_from(len).ok().filter(|&l| l <= max)
}

/// Encode and write a request, then flush.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    method: Method,
    password: &[u8],
    path: &[u8],
    body: &[u8],
) -> Result<(), ProtocolError> {
    let buf = encode_request(method, password, path, body)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one request.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first header
/// byte. Ending anywhere else is [`ProtocolError::Truncated`].
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Option<RequestFrame>, ProtocolError> {
    let mut field = [0u8; 4];
    if !read_first(reader, &mut field).await? {
        return Ok(None);
    }
    let code = u32::from_le_bytes(field);
    let method = Method::from_code(code).ok_or(ProtocolError::InvalidMethod(code))?;

    let password_len = read_u32(reader, "password length").await?;
    if password_len > MAX_PASSWORD_LENGTH {
        return Err(ProtocolError::PasswordTooLong(password_len.into()));
    }

    let path_len = read_u32(reader, "path length").await?;
    if path_len > MAX_PATH_LENGTH {
        return Err(ProtocolError::PathTooLong(path_len.into()));
    }

    let body_size = read_u32(reader, "body size").await?;
    if body_size > limits.max_body_size {
        return Err(ProtocolError::BodyTooLarge {
            size: body_size.into(),
            limit: limits.max_body_size,
        });
    }

    let password = read_section(reader, password_len, "password").await?;
    let path = read_section(reader, path_len, "path").await?;
    let body = read_section(reader, body_size, "body").await?;

    Ok(Some(RequestFrame {
        method,
        password,
        path,
        body,
    }))
}

/// Serialize a response: length prefix followed by JSON.
pub fn encode_response(code: i32, message: &str) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(&ResponseFrame {
        code,
        message: message.to_string(),
    })?;
    let len = u32::try_from(json.len())
        .map_err(|_| ProtocolError::ResponseTooLarge(json.len() as u64))?;

    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Encode and write a response, then flush.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &ResponseFrame,
) -> Result<(), ProtocolError> {
    let buf = encode_response(response.code, &response.message)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one response. A non-zero code is returned as-is; the caller decides
/// how to surface it.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ResponseFrame, ProtocolError> {
    let len = read_u32(reader, "response length").await?;
    if len > MAX_RESPONSE_LENGTH {
        return Err(ProtocolError::ResponseTooLarge(len.into()));
    }
    let payload = read_section(reader, len, "response message").await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Fill `buf`, or report a clean end of stream if nothing at all was read.
async fn read_first<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8; 4],
) -> Result<bool, ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(ProtocolError::Truncated("method"));
        }
        filled += n;
    }
    Ok(true)
}

async fn read_u32<R: AsyncRead + Unpin>(
    reader: &mut R,
    section: &'static str,
) -> Result<u32, ProtocolError> {
    let mut field = [0u8; 4];
    read_exact(reader, &mut field, section).await?;
    Ok(u32::from_le_bytes(field))
}

async fn read_section<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: u32,
    section: &'static str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; len as usize];
    read_exact(reader, &mut buf, section).await?;
    Ok(buf)
}

async fn read_exact<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ProtocolError::Truncated(section)),
        Err(e) => Err(e.into()),
    }
}
