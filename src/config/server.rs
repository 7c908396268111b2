use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL of the application.
    ///
    /// Used to build the absolute `target` handed to the IdP and as the
    /// fallback destination whenever a redirect target is rejected.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request body size limit in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let parsed = Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Validation(format!(
                "server.base_url '{}' is not an absolute URL: {}",
                self.base_url, e
            ))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "server.base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        Ok(())
    }

    /// Build an absolute URL for a path served by this application.
    pub fn absolute_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_body_limit() -> usize {
    64 * 1024 // form posts only
}
