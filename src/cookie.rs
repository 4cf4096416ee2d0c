//! Forum session cookies written on the shared root domain.

use std::fmt;

use axum::http::HeaderValue;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;

/// Cookie key storing the forum token.
pub const REMEMBER_ME_KEY: &str = "flarum_remember";
/// Cookie key of the forum session.
pub const SESSION_KEY: &str = "flarum_session";

const ROOT_PATH: &str = "/";
/// Offset used to expire a cookie on the client.
const EXPIRED_OFFSET: i64 = 10;
/// Format of the `Expires` attribute, always rendered in GMT.
const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// One `Set-Cookie` instruction for the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    name: &'static str,
    value: String,
    path: String,
    domain: String,
    expires: DateTime<Utc>,
}

impl Cookie {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Whether the client drops this cookie at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header(&self) -> Result<HeaderValue> {
        Ok(HeaderValue::from_str(&self.to_string())?)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; Expires={}; Path={}; Domain={}",
            self.name,
            self.value,
            self.expires.format(EXPIRES_FORMAT),
            self.path,
            self.domain,
        )
    }
}

/// Builds cookies bound to the configured root domain.
///
/// This is the only way to create a [`Cookie`], so none can leave the bridge
/// without a domain.
#[derive(Clone, Debug)]
pub struct CookieFactory {
    domain: String,
    forum_path: String,
}

impl CookieFactory {
    /// Create a new [`CookieFactory`].
    pub fn new(domain: impl Into<String>, forum_path: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            forum_path: forum_path.into(),
        }
    }

    fn cookie(
        &self,
        name: &'static str,
        value: impl Into<String>,
        path: &str,
        expires: DateTime<Utc>,
    ) -> Cookie {
        Cookie {
            name,
            value: value.into(),
            path: path.to_owned(),
            domain: self.domain.clone(),
            expires,
        }
    }

    /// Long-lived cookie holding the forum token.
    pub fn remember(
        &self,
        token: impl Into<String>,
        lifetime_seconds: u64,
        now: DateTime<Utc>,
    ) -> Cookie {
        let expires = i64::try_from(lifetime_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.cookie(REMEMBER_ME_KEY, token, ROOT_PATH, expires)
    }

    /// Clear the remember-me cookie.
    pub fn forget_remember(&self, now: DateTime<Utc>) -> Cookie {
        self.cookie(REMEMBER_ME_KEY, "", ROOT_PATH, expired(now))
    }

    /// Clear the session cookie on the root path and on the forum directory.
    pub fn forget_session(&self, now: DateTime<Utc>) -> [Cookie; 2] {
        [
            self.cookie(SESSION_KEY, "", ROOT_PATH, expired(now)),
            self.cookie(SESSION_KEY, "", &self.forum_path, expired(now)),
        ]
    }
}

/// Whether `value` only holds RFC 6265 `cookie-octet` characters.
pub fn is_cookie_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E))
}

fn expired(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(EXPIRED_OFFSET)
}
