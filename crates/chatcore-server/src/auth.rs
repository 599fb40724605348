//! Transport-boundary authentication (AMBIENT STACK Non-goals: "a single
//! bearer check at the transport boundary"): just the bearer-token path — no
//! identity provider, no rate limiting, since those are explicitly out of
//! scope here. Token comparison stays constant-time: a timing side-channel
//! on string comparison is cheap to close and expensive to explain away
//! later.

use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing authorization token"),
            AuthError::InvalidFormat => write!(f, "invalid authorization format"),
            AuthError::InvalidToken => write!(f, "invalid token"),
        }
    }
}

impl std::error::Error for AuthError {}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        let _ = a.ct_eq(a);
        return false;
    }
    a.ct_eq(b).into()
}

/// Check an `Authorization` header value (`"Bearer <token>"`) against the
/// configured token. `expected` of `None` means auth is disabled (local/dev
/// mode) and every request passes.
pub fn check_bearer(expected: Option<&str>, header: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let header = header.ok_or(AuthError::MissingToken)?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::InvalidFormat)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}
