//! Connection settings for the tracking server.

use lrs_types::{config_error, SweepResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_HOST_VAR: &str = "CLEARML_API_HOST";
pub const ACCESS_KEY_VAR: &str = "CLEARML_API_ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "CLEARML_API_SECRET_KEY";

/// API server address and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClearMlConfig {
    /// Base URL of the API server, e.g. `https://api.clear.ml`.
    pub api_host: String,
    pub access_key: String,
    pub secret_key: String,
    pub request_timeout: Duration,
    /// Extra attempts for requests that never reached the server.
    pub connect_retries: u32,
}

impl ClearMlConfig {
    pub fn new(
        api_host: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            api_host: api_host.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            request_timeout: Duration::from_secs(30),
            connect_retries: 3,
        }
    }

    /// Read credentials from `CLEARML_API_*` environment variables.
    pub fn from_env() -> SweepResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SweepResult<Self> {
        let require = |key: &str| -> SweepResult<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| config_error!("environment variable {key} is not set"))
        };
        Ok(Self::new(
            require(API_HOST_VAR)?,
            require(ACCESS_KEY_VAR)?,
            require(SECRET_KEY_VAR)?,
        ))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_host, endpoint)
    }
}

impl std::fmt::Debug for ClearMlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearMlConfig")
            .field("api_host", &self.api_host)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}
