//! Emulated identity provider for local development.
//!
//! Stands in for both the SP module and the IdP: a login form accepts any
//! configured username with a password equal to the username, and the
//! user's configured attributes are then released to the bridge in place
//! of asserted request variables.

mod state;

use std::{collections::BTreeMap, path::PathBuf};

use chrono::Utc;
pub use state::{EmulatorState, FileStateStore};
use tower_cookies::{Cookie, Cookies, cookie::SameSite};
use uuid::Uuid;

use crate::config::EmulatorConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a login form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials accepted. Carries the target recorded by the auth
    /// request, if any.
    Authenticated { target: Option<String> },
    InvalidCredentials,
}

pub struct EmulatedIdp {
    users: BTreeMap<String, BTreeMap<String, String>>,
    store: FileStateStore,
    cookie_name: String,
}

impl EmulatedIdp {
    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self {
            users: config.users.clone(),
            store: FileStateStore::new(config.state_dir()),
            cookie_name: config.cookie_name.clone(),
        }
    }

    /// Browser id from the emulator cookie.
    pub fn browser_id(&self, cookies: &Cookies) -> Option<Uuid> {
        cookies
            .get(&self.cookie_name)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
    }

    /// Existing browser id, or a new one with its cookie set.
    pub fn ensure_browser_id(&self, cookies: &Cookies) -> Uuid {
        if let Some(id) = self.browser_id(cookies) {
            return id;
        }
        let id = Uuid::new_v4();
        let cookie = Cookie::build((self.cookie_name.clone(), id.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        cookies.add(cookie);
        id
    }

    /// Configured attributes for `username`.
    pub fn fetch_attrs(&self, username: &str) -> Option<&BTreeMap<String, String>> {
        self.users.get(username)
    }

    /// Record where the browser should go once it logs in.
    pub async fn make_auth_request(&self, browser: Uuid, target: String) -> Result<(), EmulatorError> {
        let mut state = self.store.load(browser).await?.unwrap_or_default();
        state.pending_target = Some(target);
        self.store.save(browser, &state).await
    }

    /// Check the login form and, on success, release the user's attributes
    /// to this browser.
    pub async fn login(
        &self,
        browser: Uuid,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, EmulatorError> {
        if username.is_empty() || username != password {
            return Ok(LoginOutcome::InvalidCredentials);
        }
        let Some(attrs) = self.fetch_attrs(username) else {
            return Ok(LoginOutcome::InvalidCredentials);
        };

        let mut state = self.store.load(browser).await?.unwrap_or_default();
        let target = state.pending_target.take();
        state.username = Some(username.to_string());
        state.attributes = attrs.clone();
        state.authenticated_at = Some(Utc::now());
        self.store.save(browser, &state).await?;

        tracing::info!(username = %username, "Emulated IdP login");
        Ok(LoginOutcome::Authenticated { target })
    }

    /// Attributes released to `browser`. Empty when not logged in.
    pub async fn released_attributes(
        &self,
        browser: Uuid,
    ) -> Result<BTreeMap<String, String>, EmulatorError> {
        Ok(self
            .store
            .load(browser)
            .await?
            .filter(EmulatorState::is_authenticated)
            .map(|s| s.attributes)
            .unwrap_or_default())
    }

    /// Forget everything about `browser`.
    pub async fn logout(&self, browser: Uuid) -> Result<(), EmulatorError> {
        self.store.remove(browser).await
    }
}
