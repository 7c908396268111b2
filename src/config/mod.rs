//! Configuration module for the Shibboleth bridge.
//!
//! The bridge is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! base_url = "https://app.uwm.edu"
//!
//! [shibboleth]
//! idp_login = "/Shibboleth.sso/Login"
//! allowed_redirect_host = "uwm.edu"
//!
//! [token]
//! enabled = true
//! secret = "${SHIBGATE_TOKEN_SECRET}"
//! ```

mod auth;
mod emulator;
mod observability;
mod server;

use std::path::Path;

pub use auth::*;
pub use emulator::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration for the bridge.
///
/// Every section is optional. Built once at startup and shared read-only
/// through `AppState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShibgateConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session cookie and lifetime settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// IdP endpoints, attribute mapping, and login policy.
    #[serde(default)]
    pub shibboleth: ShibbolethConfig,

    /// User store backend.
    #[serde(default)]
    pub users: UserStoreConfig,

    /// Bearer token handoff after login.
    #[serde(default)]
    pub token: TokenConfig,

    /// Development-only emulated IdP.
    #[serde(default)]
    pub emulator: EmulatorConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ShibgateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch feature-gated sections before typed deserialization so the
        // error names the missing cargo feature.
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let mut config: ShibgateConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.session.validate()?;
        self.shibboleth.validate()?;
        self.token.validate()?;
        self.emulator.validate()?;

        if self.emulator.enabled && !self.server.host.is_loopback() {
            tracing::warn!(
                bind_address = %self.server.host,
                "The emulated IdP is enabled on a non-localhost address. \
                 Anyone who can reach this address can log in as any configured \
                 emulator user. Never enable emulator.enabled in production."
            );
        }

        Ok(())
    }

    /// Generate a starter configuration file.
    pub fn default_toml(token_secret: &str) -> String {
        format!(
            r#"# shibgate configuration
# Generated by `shibgate init`

[server]
host = "127.0.0.1"
port = 8080
base_url = "http://localhost:8080"

[session]
cookie_name = "shibgate_session"
secure = false

[shibboleth]
idp_login = "/Shibboleth.sso/Login"
idp_logout = "/Shibboleth.sso/Logout"
authenticated = "/home"
identifier = "email"
entitlement = "entitlement"
use_simple_session = false
add_new_users = true
allowed_redirect_host = "localhost"

[shibboleth.user]
email = "mail"
name = "displayName"
first_name = "givenName"
last_name = "sn"
student_id = "employeeNumber"

[token]
enabled = false
secret = "{token_secret}"

# Never enable in production.
[emulator]
enabled = false

[emulator.users.user]
uid = "user"
displayName = "User User"
givenName = "User"
sn = "User"
mail = "user@localhost"
"#
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization.
///
/// A config that turns on token handoff or the emulator in a binary built
/// without those features would otherwise load fine and then silently do
/// nothing.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if section_enabled(raw, "token") {
        check_jwt_feature(&mut issues);
    }

    if section_enabled(raw, "emulator") {
        check_emulator_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}\n\
         Or use the 'full' profile: cargo build --features full\n\
         Run 'shibgate features' to see all available features."
    )))
}

fn section_enabled(raw: &toml::Value, section: &str) -> bool {
    raw.get(section)
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
}

fn check_jwt_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "jwt"))]
    _issues.push(("token.enabled requires the 'jwt' feature".into(), "jwt"));
}

fn check_emulator_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "emulator"))]
    _issues.push((
        "emulator.enabled requires the 'emulator' feature".into(),
        "emulator",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
