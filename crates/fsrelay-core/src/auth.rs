//! Shared-secret authentication.
//!
//! The server holds at most one [`SharedSecret`]. When none is configured
//! every request is accepted; otherwise the request's password field must
//! match it byte for byte.

use std::fmt;

use zeroize::Zeroize;

use crate::protocol::MAX_PASSWORD_LENGTH;

/// A password that is zeroized on drop and never printed.
#[derive(Clone)]
pub struct SharedSecret {
    inner: Vec<u8>,
}

impl SharedSecret {
    /// Wrap a configured password. Returns `None` for an empty password,
    /// which means authentication is disabled.
    pub fn new(value: impl Into<Vec<u8>>) -> Option<Self> {
        let inner = value.into();
        (!inner.is_empty()).then_some(Self { inner })
    }

    /// Length in bytes, without exposing the value.
    pub fn byte_len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the secret fits in a request's password field.
    pub fn fits_frame(&self) -> bool {
        self.inner.len() <= MAX_PASSWORD_LENGTH as usize
    }

    /// Compare a presented password against the secret.
    ///
    /// The comparison touches every byte of the secret regardless of where
    /// the first mismatch is.
    pub fn verify(&self, presented: &[u8]) -> bool {
        if presented.len() != self.inner.len() {
            return false;
        }
        self.inner
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// The raw bytes. Used by the client to fill the password field.
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("inner", &"[REDACTED]")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

/// Check a request password against an optional secret.
pub fn authorize(secret: Option<&SharedSecret>, presented: &[u8]) -> bool {
    secret.is_none_or(|s| s.verify(presented))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_password_disables_auth() {
        assert!(SharedSecret::new("").is_none());
        assert!(authorize(None, b""));
        assert!(authorize(None, b"anything"));
    }

    #[test]
    fn test_verify() {
        let secret = SharedSecret::new("1234567890").unwrap();
        assert!(secret.verify(b"1234567890"));
        assert!(!secret.verify(b"1234567891"));
        assert!(!secret.verify(b"123456789"));
        assert!(!secret.verify(b""));
        assert!(authorize(Some(&secret), b"1234567890"));
        assert!(!authorize(Some(&secret), b"wrong"));
    }

    #[test]
    fn test_debug_redacts() {
        let secret = SharedSecret::new("hunter2").unwrap();
        let debug = format!("{secret:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("len: 7"));
    }

    #[test]
    fn test_fits_frame() {
        assert!(SharedSecret::new(vec![b'a'; 64]).unwrap().fits_frame());
        assert!(!SharedSecret::new(vec![b'a'; 65]).unwrap().fits_frame());
    }
}
