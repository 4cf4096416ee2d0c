//! Password sent to the forum on account creation and token exchange.

use std::borrow::Cow;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::ConfigError;

/// How the host credential becomes the forum password.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordMode {
    /// Send the host credential as-is. The forum hashes it.
    #[default]
    Forward,
    /// Send `hex(HMAC-SHA1(password_token, username))`.
    Derived,
}

/// Applies the configured [`PasswordMode`].
#[derive(Clone)]
pub struct PasswordStrategy {
    mode: PasswordMode,
    token: String,
}

impl std::fmt::Debug for PasswordStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordStrategy")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PasswordStrategy {
    /// Create a new [`PasswordStrategy`].
    ///
    /// [`PasswordMode::Derived`] needs a non-empty token.
    pub fn new(
        mode: PasswordMode,
        token: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let token = token.unwrap_or_default();
        if mode == PasswordMode::Derived && token.is_empty() {
            return Err(ConfigError::Missing("forum.password_token"));
        }

        Ok(Self {
            mode,
            token: token.to_owned(),
        })
    }

    /// Password to send to the forum for `username`.
    pub fn forum_password<'a>(&self, username: &str, password: &'a str) -> Cow<'a, str> {
        match self.mode {
            PasswordMode::Forward => Cow::Borrowed(password),
            PasswordMode::Derived => Cow::Owned(derive_password(&self.token, username)),
        }
    }
}

/// Keyed hash of the username with the password token.
pub fn derive_password(token: &str, username: &str) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(username.as_bytes());

    hex::encode(mac.finalize().into_bytes())
}
