//! Credential data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Format used for role expirations (`VALID UNTIL`).
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// A short-lived database credential supplied by the caller.
///
/// The engine never stores credentials; they only live for one call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    /// Sensitive - never log
    pub password: String,
    /// Timestamp rendered as the database expects it in `VALID UNTIL`.
    pub expiration: String,
}

impl Credential {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        expiration: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            expiration: expiration.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"****")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Render an absolute expiration time.
pub fn format_expiration(at: DateTime<Utc>) -> String {
    at.format(EXPIRATION_FORMAT).to_string()
}

/// Render the expiration time `ttl` from `now`, saturating at the latest
/// representable time.
pub fn expiration_after(now: DateTime<Utc>, ttl: Duration) -> String {
    format_expiration(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
}
