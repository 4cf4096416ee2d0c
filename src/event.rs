//! Host lifecycle events mirrored to the forum.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Usernames accepted by Flarum.
static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+$").expect("username pattern is valid")
});

pub(crate) fn validate_username(name: &str) -> Result<(), ValidationError> {
    if !USERNAME.is_match(name) {
        return Err(ValidationError::new("invalid_username"));
    }

    Ok(())
}

/// User as known by the host application.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub id: u64,
    #[validate(
        length(min = 1, max = 30, message = "Name must contain 1 to 30 characters."),
        custom(
            function = "validate_username",
            message = "Name must only contain letters, digits, dashes and underscores."
        )
    )]
    pub name: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password must not be empty."))]
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub is_activated: bool,
}

impl fmt::Debug for LocalUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalUser")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("is_activated", &self.is_activated)
            .finish()
    }
}

/// Discriminant of a [`LifecycleEvent`], used for routing and labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Registered,
    Activated,
    Login,
    Logout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Registered => "registered",
            EventKind::Activated => "activated",
            EventKind::Login => "login",
            EventKind::Logout => "logout",
        }
    }

    /// Login and logout answer with cookies, so they cannot wait on a queue.
    pub fn is_deferrable(&self) -> bool {
        matches!(self, EventKind::Registered | EventKind::Activated)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by the host identity system.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// A user account was created.
    Registered(LocalUser),
    /// The host marked the account as active.
    Activated(LocalUser),
    /// The user authenticated on the host.
    Login(LocalUser),
    /// The user signed out.
    Logout,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Registered(_) => EventKind::Registered,
            LifecycleEvent::Activated(_) => EventKind::Activated,
            LifecycleEvent::Login(_) => EventKind::Login,
            LifecycleEvent::Logout => EventKind::Logout,
        }
    }

    /// User carried by the event, if any.
    pub fn user(&self) -> Option<&LocalUser> {
        match self {
            LifecycleEvent::Registered(user)
            | LifecycleEvent::Activated(user)
            | LifecycleEvent::Login(user) => Some(user),
            LifecycleEvent::Logout => None,
        }
    }
}
