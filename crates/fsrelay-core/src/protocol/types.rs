//! Frame types shared by the server and the client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of the fixed request header: four `u32` fields.
pub const HEADER_LEN: usize = 16;

/// Longest password a request may carry.
pub const MAX_PASSWORD_LENGTH: u32 = 64;

/// Longest path a request may carry.
pub const MAX_PATH_LENGTH: u32 = 1 << 10;

/// Hard ceiling on request bodies (1 GiB). Configured limits are clamped to it.
pub const MAX_BODY_SIZE: u32 = 1 << 30;

/// Largest response message a client will read.
pub const MAX_RESPONSE_LENGTH: u32 = 16 << 20;

/// Response code for a successful request.
pub const CODE_SUCCESS: i32 = 0;

/// Response code for any failed request.
pub const CODE_FAILURE: i32 = 1;

/// Operation requested by a frame. Codes 0 and 10+ are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Method {
    /// Create or truncate a file and write the body.
    CreateFile = 1,
    /// Overwrite a file with the body.
    ModifyFile = 2,
    /// Append the body to a file, creating it if needed.
    AppendFile = 3,
    /// Remove a file. Missing files are not an error.
    RemoveFile = 4,
    /// Create a directory and its parents.
    CreateDir = 5,
    /// Remove a directory tree. Missing directories are not an error.
    RemoveDir = 6,
    /// Remove everything inside a directory, keeping the directory.
    ClearDir = 7,
    /// Copy a file or directory tree to `newpath`.
    Copy = 8,
    /// Rename a file or directory to `newpath`.
    Rename = 9,
}

impl Method {
    /// All methods in code order.
    pub const ALL: [Method; 9] = [
        Method::CreateFile,
        Method::ModifyFile,
        Method::AppendFile,
        Method::RemoveFile,
        Method::CreateDir,
        Method::RemoveDir,
        Method::ClearDir,
        Method::Copy,
        Method::Rename,
    ];

    /// Wire code for this method.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a method by wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    /// Whether the body carries a JSON destination rather than file content.
    pub fn has_destination(self) -> bool {
        matches!(self, Method::Copy | Method::Rename)
    }

    /// Short lowercase name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Method::CreateFile => "create-file",
            Method::ModifyFile => "modify-file",
            Method::AppendFile => "append-file",
            Method::RemoveFile => "remove-file",
            Method::CreateDir => "create-dir",
            Method::RemoveDir => "remove-dir",
            Method::ClearDir => "clear-dir",
            Method::Copy => "copy",
            Method::Rename => "rename",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded request. Lives only until it has been dispatched.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub method: Method,
    pub password: Vec<u8>,
    pub path: Vec<u8>,
    pub body: Vec<u8>,
}

impl fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFrame")
            .field("method", &self.method)
            .field("password", &"[REDACTED]")
            .field("path", &String::from_utf8_lossy(&self.path))
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Status returned for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub code: i32,
    pub message: String,
}

impl ResponseFrame {
    /// The response sent after a request was carried out.
    pub fn success() -> Self {
        Self {
            code: CODE_SUCCESS,
            message: "success".to_string(),
        }
    }

    /// A failure response carrying the error text.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: CODE_FAILURE,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// `Ok(message)` for code 0, `Err(message)` otherwise.
    pub fn into_result(self) -> Result<String, String> {
        if self.is_success() {
            Ok(self.message)
        } else {
            Err(self.message)
        }
    }
}

/// JSON body of copy and rename requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationParams {
    #[serde(default)]
    pub newpath: String,
}

/// Errors from encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("method {0} not defined")]
    InvalidMethod(u32),

    #[error("password length {0} too large, must be at most {max}", max = MAX_PASSWORD_LENGTH)]
    PasswordTooLong(u64),

    #[error("path length {0} too large, must be at most {max}", max = MAX_PATH_LENGTH)]
    PathTooLong(u64),

    #[error("body size {size} too large, must be at most {limit}")]
    BodyTooLarge { size: u64, limit: u32 },

    #[error("response length {0} too large, must be at most {max}", max = MAX_RESPONSE_LENGTH)]
    ResponseTooLarge(u64),

    #[error("connection closed while reading {0}")]
    Truncated(&'static str),

    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_method_codes() {
        assert_eq!(Method::CreateFile.code(), 1);
        assert_eq!(Method::Rename.code(), 9);
        for (i, method) in Method::ALL.iter().enumerate() {
            assert_eq!(method.code(), i as u32 + 1);
            assert_eq!(Method::from_code(method.code()), Some(*method));
        }
    }

    #[test]
    fn test_method_out_of_range() {
        assert_eq!(Method::from_code(0), None);
        assert_eq!(Method::from_code(10), None);
        assert_eq!(Method::from_code(u32::MAX), None);
    }

    #[test]
    fn test_destination_methods() {
        let with_dest: Vec<_> = Method::ALL.into_iter().filter(|m| m.has_destination()).collect();
        assert_eq!(with_dest, vec![Method::Copy, Method::Rename]);
    }

    #[test]
    fn test_response_json_shape() {
        let json = serde_json::to_string(&ResponseFrame::success()).unwrap();
        assert_eq!(json, r#"{"code":0,"message":"success"}"#);
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(ResponseFrame::success().into_result(), Ok("success".to_string()));
        assert_eq!(
            ResponseFrame::failure("Password check failed").into_result(),
            Err("Password check failed".to_string())
        );
    }

    #[test]
    fn test_request_debug_hides_password() {
        let frame = RequestFrame {
            method: Method::CreateFile,
            password: b"hunter2".to_vec(),
            path: b"/data/x".to_vec(),
            body: b"hello".to_vec(),
        };
        let debug = format!("{frame:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("/data/x"));
        assert!(debug.contains("body_len: 5"));
    }

    #[test]
    fn test_destination_params() {
        let params: DestinationParams = serde_json::from_str(r#"{"newpath":"/data/y"}"#).unwrap();
        assert_eq!(params.newpath, "/data/y");
        let empty: DestinationParams = serde_json::from_str("{}").unwrap();
        assert!(empty.newpath.is_empty());
    }
}
