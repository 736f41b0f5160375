//! Zeroizing holder for access and refresh tokens
//!
//! Tokens live in the session for the whole process lifetime and are cloned
//! into every outgoing request, so each copy wipes its buffer on drop.

use std::fmt;
use zeroize::Zeroize;

/// A credential string that is wiped from memory when dropped
///
/// `Debug` never prints the value. Use [`Secret::expose`] at the single
/// point where the raw value has to leave the process (a request header or
/// the credential store).
///
/// # Example
///
/// ```
/// use bookworm_lib::security::Secret;
///
/// let token = Secret::new("eyJhbGciOi.payload.sig");
/// assert_eq!(token.expose(), "eyJhbGciOi.payload.sig");
/// assert_eq!(token.bearer(), "Bearer eyJhbGciOi.payload.sig");
/// assert!(!format!("{:?}", token).contains("payload"));
/// ```
#[derive(Clone)]
pub struct Secret {
    inner: String,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Returns the raw token
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Formats the token as an `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.inner)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.inner.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.inner.as_bytes(), other.inner.as_bytes())
    }
}

impl Eq for Secret {}

impl PartialEq<str> for Secret {
    fn eq(&self, other: &str) -> bool {
        constant_time_eq(self.inner.as_bytes(), other.as_bytes())
    }
}

impl PartialEq<&str> for Secret {
    fn eq(&self, other: &&str) -> bool {
        constant_time_eq(self.inner.as_bytes(), other.as_bytes())
    }
}

/// Compares two byte slices without short-circuiting on the first mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
