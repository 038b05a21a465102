//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TaskSyncError;

const DEFAULT_ENDPOINT: &str = "http://localhost:4000/graphql";
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Connection settings for the task service.
///
/// ```rust
/// use tasksync::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .endpoint("https://tasks.example.com/graphql")
///     .request_timeout_secs(15)
///     .build();
/// assert_eq!(
///     config.subscription_url(),
///     "wss://tasks.example.com/graphql"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP endpoint for queries and mutations.
    pub endpoint: String,

    /// WebSocket endpoint for subscriptions.
    ///
    /// Derived from `endpoint` (`http` → `ws`, `https` → `wss`) when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_endpoint: Option<String>,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Upper bound for the subscription reconnect backoff.
    pub max_backoff_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_endpoint: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_backoff_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// WebSocket URL for subscriptions.
    pub fn subscription_url(&self) -> String {
        if let Some(url) = &self.subscription_endpoint {
            return url.clone();
        }
        if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.endpoint.clone()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Check the settings before building a transport.
    pub fn validate(&self) -> Result<(), TaskSyncError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(TaskSyncError::Config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }

        let ws = self.subscription_url();
        if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
            return Err(TaskSyncError::Config(format!(
                "subscription endpoint must be a ws(s) URL, got '{}'",
                ws
            )));
        }

        for (name, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&value) {
                return Err(TaskSyncError::Config(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, value
                )));
            }
        }

        if self.max_backoff_secs == 0 {
            return Err(TaskSyncError::Config(
                "max_backoff_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn subscription_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.subscription_endpoint = Some(url.into());
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_backoff_secs(mut self, secs: u64) -> Self {
        self.config.max_backoff_secs = secs;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
