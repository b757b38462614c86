use std::time::Duration;

use onboard_tokens::store::StorageKeys;
use serde::Deserialize;
use url::Url;

fn default_timeout_secs() -> u64 {
    30
}

fn default_refresh_path() -> String {
    "auth/refresh/".to_owned()
}

/// Configuration for a [`SessionClient`][crate::SessionClient]
///
/// Typically deserialized once at startup.
///
/// ```
/// # use onboard_reqwest::ClientConfig;
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "base_url": "https://hr.example.com",
///     "path_prefix": "/api/v1",
///     "timeout_secs": 10
/// }"#).unwrap();
///
/// assert_eq!(
///     config.endpoint("onboarding/plans/").as_str(),
///     "https://hr.example.com/api/v1/onboarding/plans/",
/// );
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// The backend's base URL
    pub base_url: Url,

    /// A path prefix placed before every request path
    #[serde(default)]
    pub path_prefix: String,

    /// Request timeout in seconds, applied to the refresh call as well
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Path of the refresh endpoint, relative to the prefix
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Keys under which credentials are persisted
    #[serde(default)]
    pub storage_keys: StorageKeys,
}

impl ClientConfig {
    /// Constructs a configuration with defaults for everything but the base URL
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            path_prefix: String::new(),
            timeout_secs: default_timeout_secs(),
            refresh_path: default_refresh_path(),
            storage_keys: StorageKeys::default(),
        }
    }

    /// Sets the path prefix
    pub fn with_path_prefix(mut self, path_prefix: impl Into<String>) -> Self {
        self.path_prefix = path_prefix.into();
        self
    }

    /// Sets the request timeout in seconds
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// The request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolves a request path against the base URL and path prefix
    ///
    /// `path` is a path only; add query parameters on the request builder.
    /// Trailing slashes in `path` are kept.
    pub fn endpoint(&self, path: &str) -> Url {
        let base = self.base_url.path().trim_end_matches('/');
        let prefix = self.path_prefix.trim_matches('/');
        let path = path.trim_start_matches('/');

        let mut joined = String::with_capacity(base.len() + prefix.len() + path.len() + 2);
        joined.push_str(base);
        if !prefix.is_empty() {
            joined.push('/');
            joined.push_str(prefix);
        }
        joined.push('/');
        joined.push_str(path);

        let mut url = self.base_url.clone();
        url.set_path(&joined);
        url.set_query(None);
        url
    }

    /// The URL of the refresh endpoint
    pub fn refresh_url(&self) -> Url {
        self.endpoint(&self.refresh_path)
    }
}
