use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum token signing secret length in bytes (HS256 key size).
const MIN_TOKEN_SECRET_LEN: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Shibboleth
// ─────────────────────────────────────────────────────────────────────────────

/// IdP endpoints, attribute mapping and login policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShibbolethConfig {
    /// Login handler of the local SP (or the IdP itself).
    /// The authenticate endpoint is appended as the `target` parameter.
    #[serde(default = "default_idp_login")]
    pub idp_login: String,

    /// Logout handler of the local SP.
    #[serde(default = "default_idp_logout")]
    pub idp_logout: String,

    /// Where users land after a successful login when no earlier
    /// destination was recorded.
    #[serde(default = "default_authenticated")]
    pub authenticated: String,

    /// Canonical user field → asserted attribute name.
    ///
    /// When empty, the legacy `idp_login_*` keys are used if present,
    /// otherwise the built-in mapping.
    #[serde(default)]
    pub user: BTreeMap<String, String>,

    /// Legacy: attribute carrying the user's email.
    #[serde(default)]
    pub idp_login_email: Option<String>,

    /// Legacy: attribute carrying the user's given name.
    #[serde(default)]
    pub idp_login_first: Option<String>,

    /// Legacy: attribute carrying the user's surname.
    #[serde(default)]
    pub idp_login_last: Option<String>,

    /// Canonical field that identifies a user. Must be a key of `user`.
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Asserted attribute holding the entitlement string.
    #[serde(default = "default_entitlement")]
    pub entitlement: String,

    /// Store the mapped attributes directly in the session instead of
    /// resolving a user record.
    #[serde(default)]
    pub use_simple_session: bool,

    /// Create a user record when no existing user matches.
    #[serde(default = "default_true")]
    pub add_new_users: bool,

    /// Host suffix an external return URL must end with to be honoured.
    /// When unset, external return URLs are never honoured.
    #[serde(default)]
    pub allowed_redirect_host: Option<String>,
}

impl Default for ShibbolethConfig {
    fn default() -> Self {
        Self {
            idp_login: default_idp_login(),
            idp_logout: default_idp_logout(),
            authenticated: default_authenticated(),
            user: default_attribute_map(),
            idp_login_email: None,
            idp_login_first: None,
            idp_login_last: None,
            identifier: default_identifier(),
            entitlement: default_entitlement(),
            use_simple_session: false,
            add_new_users: true,
            allowed_redirect_host: None,
        }
    }
}

impl ShibbolethConfig {
    pub(super) fn validate(&mut self) -> Result<(), ConfigError> {
        if self.user.is_empty() {
            self.user = self
                .legacy_attribute_map()
                .unwrap_or_else(default_attribute_map);
        }

        if !self.user.contains_key(&self.identifier) {
            return Err(ConfigError::Validation(format!(
                "shibboleth.identifier '{}' is not a field of shibboleth.user (fields: {})",
                self.identifier,
                self.user.keys().cloned().collect::<Vec<_>>().join(", ")
            )));
        }

        for (name, value) in [
            ("idp_login", &self.idp_login),
            ("idp_logout", &self.idp_logout),
            ("authenticated", &self.authenticated),
            ("entitlement", &self.entitlement),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "shibboleth.{name} must not be empty"
                )));
            }
        }

        // Hosts are compared after URL normalization, which lowercases them
        self.allowed_redirect_host = self
            .allowed_redirect_host
            .take()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        Ok(())
    }

    /// Canonical field → asserted attribute name.
    pub fn attribute_map(&self) -> &BTreeMap<String, String> {
        &self.user
    }

    /// Build a mapping from the pre-`user` configuration keys.
    fn legacy_attribute_map(&self) -> Option<BTreeMap<String, String>> {
        let map: BTreeMap<String, String> = [
            ("email", &self.idp_login_email),
            ("first_name", &self.idp_login_first),
            ("last_name", &self.idp_login_last),
        ]
        .into_iter()
        .filter_map(|(field, attr)| attr.as_ref().map(|a| (field.to_string(), a.clone())))
        .collect();

        (!map.is_empty()).then_some(map)
    }
}

pub fn default_attribute_map() -> BTreeMap<String, String> {
    [
        ("email", "mail"),
        ("name", "displayName"),
        ("first_name", "givenName"),
        ("last_name", "sn"),
        ("student_id", "employeeNumber"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_idp_login() -> String {
    "/Shibboleth.sso/Login".to_string()
}

fn default_idp_logout() -> String {
    "/Shibboleth.sso/Logout".to_string()
}

fn default_authenticated() -> String {
    "/home".to_string()
}

fn default_identifier() -> String {
    "email".to_string()
}

fn default_entitlement() -> String {
    "entitlement".to_string()
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie name.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Session duration in seconds.
    #[serde(default = "default_session_duration")]
    pub duration_secs: u64,

    /// Secure cookie (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,

    /// SameSite cookie attribute.
    #[serde(default)]
    pub same_site: SameSite,

    /// How often expired sessions are swept from the store.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            duration_secs: default_session_duration(),
            secure: true,
            same_site: SameSite::default(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl SessionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "session.cookie_name must not be empty".into(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "session.duration_secs must be greater than zero".into(),
            ));
        }
        if self.same_site == SameSite::None && !self.secure {
            return Err(ConfigError::Validation(
                "session.same_site = \"none\" requires session.secure = true".into(),
            ));
        }
        Ok(())
    }
}

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

fn default_session_cookie() -> String {
    "shibgate_session".to_string()
}

fn default_session_duration() -> u64 {
    8 * 60 * 60 // one working day
}

fn default_cleanup_interval() -> u64 {
    300
}

// ─────────────────────────────────────────────────────────────────────────────
// User store
// ─────────────────────────────────────────────────────────────────────────────

/// User store backend.
///
/// Production deployments plug in their own `UserStore`; the bundled
/// backends exist for development and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum UserStoreConfig {
    /// Users live in process memory and are lost on restart.
    #[default]
    Memory,

    /// Users are persisted to a JSON file.
    File { path: PathBuf },
}

// ─────────────────────────────────────────────────────────────────────────────
// Token handoff
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer token minted for the resolved user and appended to the
/// post-login redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    #[serde(default)]
    pub enabled: bool,

    /// HMAC secret for signing tokens. Required when enabled.
    #[serde(default)]
    pub secret: Option<String>,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,

    /// `iss` claim.
    #[serde(default = "default_token_issuer")]
    pub issuer: String,

    /// Query parameter carrying the token on the redirect.
    #[serde(default = "default_token_param")]
    pub query_param: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            ttl_secs: default_token_ttl(),
            issuer: default_token_issuer(),
            query_param: default_token_param(),
        }
    }
}

impl TokenConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        match &self.secret {
            Some(secret) if secret.len() >= MIN_TOKEN_SECRET_LEN => {}
            Some(_) => {
                return Err(ConfigError::Validation(format!(
                    "token.secret must be at least {MIN_TOKEN_SECRET_LEN} bytes"
                )));
            }
            None => {
                return Err(ConfigError::Validation(
                    "token.enabled = true requires token.secret".into(),
                ));
            }
        }

        if self.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "token.ttl_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_token_issuer() -> String {
    "shibgate".to_string()
}

fn default_token_param() -> String {
    "token".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shibboleth_from(toml_str: &str) -> Result<ShibbolethConfig, ConfigError> {
        let mut config: ShibbolethConfig = toml::from_str(toml_str).unwrap();
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_explicit_attribute_map_wins() {
        let config = shibboleth_from(
            r#"
            identifier = "uid"

            [user]
            uid = "eppn"
            email = "mail"
        "#,
        )
        .unwrap();

        assert_eq!(config.attribute_map().len(), 2);
        assert_eq!(config.attribute_map()["uid"], "eppn");
    }

    #[test]
    fn test_legacy_keys_used_when_map_empty() {
        let config = shibboleth_from(
            r#"
            idp_login_email = "mail"
            idp_login_first = "givenName"
            idp_login_last = "sn"
        "#,
        )
        .unwrap();

        let map = config.attribute_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["email"], "mail");
        assert_eq!(map["first_name"], "givenName");
        assert_eq!(map["last_name"], "sn");
    }

    #[test]
    fn test_builtin_map_when_nothing_configured() {
        let config = shibboleth_from("").unwrap();
        assert_eq!(config.attribute_map(), &default_attribute_map());
    }

    #[test]
    fn test_identifier_must_be_mapped() {
        let err = shibboleth_from(
            r#"
            identifier = "username"
        "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_blank_redirect_suffix_is_unset() {
        let config = shibboleth_from(r#"allowed_redirect_host = "  ""#).unwrap();
        assert!(config.allowed_redirect_host.is_none());
    }

    #[test]
    fn test_redirect_suffix_lowercased() {
        let config = shibboleth_from(r#"allowed_redirect_host = " UWM.Edu ""#).unwrap();
        assert_eq!(config.allowed_redirect_host.as_deref(), Some("uwm.edu"));
    }

    #[test]
    fn test_token_requires_secret() {
        let config = TokenConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let short = TokenConfig {
            enabled: true,
            secret: Some("too-short".into()),
            ..Default::default()
        };
        assert!(short.validate().unwrap_err().to_string().contains("32"));

        let ok = TokenConfig {
            enabled: true,
            secret: Some("k".repeat(32)),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_same_site_none_requires_secure() {
        let config = SessionConfig {
            same_site: SameSite::None,
            secure: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_user_store_file_backend() {
        let config: UserStoreConfig = toml::from_str(
            r#"
            type = "file"
            path = "/var/lib/shibgate/users.json"
        "#,
        )
        .unwrap();

        assert!(
            matches!(config, UserStoreConfig::File { ref path } if path.ends_with("users.json"))
        );
    }
}
