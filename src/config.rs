//! Configuration manager for the bridge.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credential::PasswordMode;
use crate::error::ConfigError;
use crate::event::EventKind;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_NAME: &str = "forum-bridge";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_ADMIN_USER_ID: u64 = 1;

/// Nominal login validity advertised to operators.
pub const DEFAULT_LIFETIME_IN_DAYS: u64 = 99_999;
/// Validity window sent to the forum and stamped on cookies.
pub const DEFAULT_CREDENTIAL_LIFETIME: u64 = 99_999_999;
/// Directory the forum is served from.
pub const DEFAULT_FORUM_PATH: &str = "/flarum";
/// Queue dedicated to forum jobs.
pub const DEFAULT_QUEUE_NAME: &str = "flarum";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Port of the HTTP surface.
    pub port: u16,
    /// Related to the remote forum.
    #[serde(skip_serializing)]
    pub forum: Forum,
    /// Related to deferred execution.
    pub queue: Queue,
    /// Related to logs and metrics.
    pub telemetry: Telemetry,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            port: DEFAULT_PORT,
            forum: Forum::default(),
            queue: Queue::default(),
            telemetry: Telemetry::default(),
            path: PathBuf::default(),
        }
    }
}

/// Flarum configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Forum {
    /// Base URL of the forum, API routes are appended to it.
    pub url: String,
    /// Key stored in the forum `api_keys` table.
    pub api_key: String,
    /// Domain shared by the host and the forum, without scheme.
    pub root_domain: String,
    /// Secret used to derive forum passwords.
    pub password_token: Option<String>,
    /// How many days the login should be valid. Informational.
    pub lifetime_in_days: u64,
    /// Token and cookie validity, in seconds.
    pub credential_lifetime_seconds: u64,
    /// Directory serving the forum, holding its own session cookie.
    pub forum_path: String,
    /// Forum account the API key acts as.
    pub admin_user_id: u64,
    pub password_mode: PasswordMode,
}

impl std::fmt::Debug for Forum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forum")
            .field("url", &self.url)
            .field("root_domain", &self.root_domain)
            .field("credential_lifetime_seconds", &self.credential_lifetime_seconds)
            .field("forum_path", &self.forum_path)
            .field("admin_user_id", &self.admin_user_id)
            .field("password_mode", &self.password_mode)
            .finish_non_exhaustive()
    }
}

impl Default for Forum {
    fn default() -> Self {
        Self {
            url: String::default(),
            api_key: String::default(),
            root_domain: String::default(),
            password_token: None,
            lifetime_in_days: DEFAULT_LIFETIME_IN_DAYS,
            credential_lifetime_seconds: DEFAULT_CREDENTIAL_LIFETIME,
            forum_path: DEFAULT_FORUM_PATH.to_owned(),
            admin_user_id: DEFAULT_ADMIN_USER_ID,
            password_mode: PasswordMode::default(),
        }
    }
}

/// Background queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Queue {
    /// Queue name, used in logs.
    pub name: String,
    /// Pending jobs before submissions are refused.
    pub capacity: usize,
    /// Events handled on the queue instead of inline.
    pub deferred: Vec<EventKind>,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_owned(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            deferred: vec![EventKind::Registered, EventKind::Activated],
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// OTLP collector receiving logs and traces.
    pub otlp_endpoint: Option<String>,
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            metrics: true,
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Self, ConfigError> {
        let file_path: &Path = if self.path.is_file() {
            &self.path
        } else {
            Path::new(DEFAULT_CONFIG_PATH)
        };

        let file = File::open(file_path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Apply process environment overrides, then validate.
    pub fn finish(self) -> Result<Arc<Self>, ConfigError> {
        let config = self.with_env(|key| std::env::var(key).ok()).validate()?;
        Ok(Arc::new(config))
    }

    /// Override entries with environment variables.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var("FLARUM_URL") {
            self.forum.url = url;
        }
        if let Some(key) = var("FLARUM_API_KEY") {
            self.forum.api_key = key;
        }
        if let Some(domain) = var("ROOT_DOMAIN") {
            self.forum.root_domain = domain;
        }
        if let Some(token) = var("FLARUM_PASSWORD_TOKEN") {
            self.forum.password_token = Some(token);
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        self
    }

    /// Check required entries and normalize the forum URL.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.forum.url.is_empty() {
            return Err(ConfigError::Missing("forum.url"));
        }
        if self.forum.api_key.is_empty() {
            return Err(ConfigError::Missing("forum.api_key"));
        }
        if self.forum.root_domain.is_empty() {
            return Err(ConfigError::Missing("forum.root_domain"));
        }
        if self.forum.password_mode == PasswordMode::Derived
            && self.forum.password_token.as_deref().unwrap_or_default().is_empty()
        {
            return Err(ConfigError::Missing("forum.password_token"));
        }
        if let Some(kind) = self.queue.deferred.iter().find(|kind| !kind.is_deferrable()) {
            return Err(ConfigError::NotDeferrable(*kind));
        }

        self.forum.url = normalize_url(&self.forum.url)?;
        Ok(self)
    }
}

/// Normalizes a URL string by ensuring it starts with a valid scheme
/// (`http` or `https`) and has no trailing slash.
fn normalize_url(url: &str) -> Result<String, url::ParseError> {
    let url_with_scheme =
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

    let parsed_url = Url::parse(&url_with_scheme)?;
    Ok(parsed_url.as_str().trim_end_matches('/').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("forum.example.com").unwrap(), "https://forum.example.com");
        assert_eq!(
            normalize_url("http://example.com/flarum/").unwrap(),
            "http://example.com/flarum"
        );
        assert!(normalize_url("http://").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Configuration::default()
            .with_env(env(&[
                ("FLARUM_URL", "example.com/flarum"),
                ("FLARUM_API_KEY", "key"),
                ("ROOT_DOMAIN", "example.com"),
                ("PORT", "9000"),
            ]))
            .validate()
            .unwrap();

        assert_eq!(config.forum.url, "https://example.com/flarum");
        assert_eq!(config.forum.api_key, "key");
        assert_eq!(config.forum.root_domain, "example.com");
        assert_eq!(config.port, 9000);
        assert_eq!(config.forum.credential_lifetime_seconds, DEFAULT_CREDENTIAL_LIFETIME);
        assert_eq!(config.queue.name, DEFAULT_QUEUE_NAME);
    }

    #[test]
    fn test_missing_entries() {
        let config = Configuration::default()
            .with_env(env(&[("FLARUM_URL", "example.com"), ("FLARUM_API_KEY", "key")]));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("forum.root_domain"))
        ));

        let mut config = Configuration::default().with_env(env(&[
            ("FLARUM_URL", "example.com"),
            ("FLARUM_API_KEY", "key"),
            ("ROOT_DOMAIN", "example.com"),
        ]));
        config.forum.password_mode = PasswordMode::Derived;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("forum.password_token"))
        ));
    }

    #[test]
    fn test_cookie_events_cannot_be_deferred() {
        for kind in [EventKind::Login, EventKind::Logout] {
            let mut config = Configuration::default().with_env(env(&[
                ("FLARUM_URL", "example.com"),
                ("FLARUM_API_KEY", "key"),
                ("ROOT_DOMAIN", "example.com"),
            ]));
            config.queue.deferred.push(kind);

            assert!(matches!(
                config.validate(),
                Err(ConfigError::NotDeferrable(rejected)) if rejected == kind
            ));
        }
    }

    #[test]
    fn test_read_file() {
        let path = std::env::temp_dir().join(format!("forum-bridge-{}.yaml", std::process::id()));
        std::fs::write(&path, "name: from-file\nport: 9001\n").unwrap();

        let config = Configuration::default().path(path.clone()).read().unwrap();
        assert_eq!(config.name, "from-file");
        assert_eq!(config.port, 9001);
        assert_eq!(config.queue.name, DEFAULT_QUEUE_NAME);

        std::fs::write(&path, "port: [not a port]\n").unwrap();
        assert!(matches!(
            Configuration::default().path(path.clone()).read(),
            Err(ConfigError::Yaml(_))
        ));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: bridge
forum:
  url: https://example.com/flarum
  api_key: key
  root_domain: example.com
  credential_lifetime_seconds: 3600
  password_mode: derived
  password_token: salt
queue:
  deferred: [registered]
telemetry:
  metrics: false
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        let config = config.validate().unwrap();

        assert_eq!(config.name, "bridge");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.forum.credential_lifetime_seconds, 3600);
        assert_eq!(config.forum.password_mode, PasswordMode::Derived);
        assert_eq!(config.forum.forum_path, DEFAULT_FORUM_PATH);
        assert_eq!(config.queue.deferred, vec![EventKind::Registered]);
        assert_eq!(config.queue.capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.telemetry.metrics);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut config = Configuration::default();
        config.forum.api_key = "very-secret".into();
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
