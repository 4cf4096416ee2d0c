//! Mirror host lifecycle events to the forum.
//!
//! Every handler is stateless and returns its cookies as values, so it runs
//! the same inline or on the background queue. [`Bridge::handle`] is the
//! entry point for the host: it never fails, errors are logged and reported
//! on the [`Outcome`].

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::config::Forum;
use crate::cookie::{Cookie, CookieFactory, is_cookie_value};
use crate::credential::PasswordStrategy;
use crate::error::{BridgeError, ConfigError, Result};
use crate::event::{EventKind, LifecycleEvent, LocalUser};
use crate::forum::{ForumClient, TOKEN_ENDPOINT, USERS_ENDPOINT};

/// JSON:API document wrapping attributes.
#[derive(Debug, Serialize)]
struct Document<T> {
    data: Resource<T>,
}

#[derive(Debug, Serialize)]
struct Resource<T> {
    attributes: T,
}

impl<T: Serialize> Document<T> {
    fn new(attributes: T) -> Self {
        Self {
            data: Resource { attributes },
        }
    }
}

#[derive(Debug, Serialize)]
struct NewUser<'a> {
    id: u64,
    username: &'a str,
    password: &'a str,
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Activation {
    is_activated: bool,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    identification: &'a str,
    password: &'a str,
    lifetime: u64,
}

/// What happened while handling one event.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
    pub event: EventKind,
    /// Forum answer, uninterpreted.
    pub response: Option<Value>,
    /// Cookies the host must send to the client.
    #[serde(skip)]
    pub cookies: Vec<Cookie>,
    /// Swallowed failure, if any.
    pub error: Option<String>,
}

impl Outcome {
    fn new(event: EventKind) -> Self {
        Self {
            event,
            response: None,
            cookies: Vec::new(),
            error: None,
        }
    }

    fn from_result(event: EventKind, result: Result<Value>) -> Self {
        match result {
            Ok(response) => Self::new(event).response(response),
            Err(err) => Self::new(event).failed(&err),
        }
    }

    fn response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    fn cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    fn failed(mut self, err: &BridgeError) -> Self {
        self.error = Some(err.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Synchronizes host accounts and sessions with the forum.
#[derive(Clone, Debug)]
pub struct Bridge {
    client: ForumClient,
    cookies: CookieFactory,
    passwords: PasswordStrategy,
    lifetime: u64,
}

impl Bridge {
    /// Create a new [`Bridge`] from forum configuration.
    pub fn new(config: &Forum) -> std::result::Result<Self, ConfigError> {
        if config.root_domain.is_empty() {
            return Err(ConfigError::Missing("forum.root_domain"));
        }

        Ok(Self {
            client: ForumClient::new(&config.url, &config.api_key, config.admin_user_id),
            cookies: CookieFactory::new(&config.root_domain, &config.forum_path),
            passwords: PasswordStrategy::new(
                config.password_mode,
                config.password_token.as_deref(),
            )?,
            lifetime: config.credential_lifetime_seconds,
        })
    }

    /// Run the handler matching `event`.
    pub async fn handle(&self, event: LifecycleEvent) -> Outcome {
        let kind = event.kind();
        let user_id = event.user().map(|user| user.id);

        let outcome = match &event {
            LifecycleEvent::Registered(user) => {
                Outcome::from_result(kind, self.on_registration(user).await)
            },
            LifecycleEvent::Activated(user) => {
                Outcome::from_result(kind, self.on_activation(user).await)
            },
            LifecycleEvent::Login(user) => match self.on_login(user).await {
                Ok((response, cookie)) => {
                    Outcome::new(kind).response(response).cookies(vec![cookie])
                },
                // The client still gets a remember cookie, empty.
                Err(err) => Outcome::new(kind)
                    .failed(&err)
                    .cookies(vec![self.remember("")]),
            },
            LifecycleEvent::Logout => Outcome::new(kind).cookies(self.on_logout()),
        };

        match &outcome.error {
            Some(error) => tracing::error!(
                event = %kind,
                user_id,
                error = %error,
                "forum synchronization failed"
            ),
            None => tracing::info!(event = %kind, user_id, "forum synchronized"),
        }
        metrics::counter!(
            "bridge_events_total",
            "event" => kind.as_str(),
            "outcome" => if outcome.is_success() { "success" } else { "failure" }
        )
        .increment(1);

        outcome
    }

    /// Create the forum account mirroring `user`.
    pub async fn on_registration(&self, user: &LocalUser) -> Result<Value> {
        let password = self.passwords.forum_password(&user.name, &user.password);
        let body = Document::new(NewUser {
            id: user.id,
            username: &user.name,
            password: &password,
            email: &user.email,
        });

        self.client.post(USERS_ENDPOINT, &body).await
    }

    /// Mark the forum account of `user` as active.
    pub async fn on_activation(&self, user: &LocalUser) -> Result<Value> {
        let body = Document::new(Activation { is_activated: true });

        self.client
            .post(&format!("{USERS_ENDPOINT}/{}", user.id), &body)
            .await
    }

    /// Exchange credentials for a forum token.
    pub async fn authenticate(&self, identification: &str, password: &str) -> Result<Value> {
        let body = TokenRequest {
            identification,
            password,
            lifetime: self.lifetime,
        };

        self.client.post(TOKEN_ENDPOINT, &body).await
    }

    /// Fetch a forum token and wrap it in the remember-me cookie.
    ///
    /// A response without a usable token yields a cookie with an empty value.
    pub async fn on_login(&self, user: &LocalUser) -> Result<(Value, Cookie)> {
        let password = self.passwords.forum_password(&user.name, &user.password);
        let response = self.authenticate(&user.name, &password).await?;

        let token = match token_of(&response) {
            "" => {
                tracing::warn!(user_id = user.id, "forum answered without token");
                ""
            },
            token if !is_cookie_value(token) => {
                tracing::warn!(user_id = user.id, "forum token cannot be stored in a cookie");
                ""
            },
            token => token,
        };
        let cookie = self.remember(token);

        Ok((response, cookie))
    }

    /// Cookies clearing the forum session, on both root and forum paths.
    pub fn on_logout(&self) -> Vec<Cookie> {
        let now = Utc::now();
        let mut cookies = vec![self.cookies.forget_remember(now)];
        cookies.extend(self.cookies.forget_session(now));
        cookies
    }

    fn remember(&self, token: &str) -> Cookie {
        self.cookies.remember(token, self.lifetime, Utc::now())
    }
}

fn token_of(response: &Value) -> &str {
    response
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default()
}
