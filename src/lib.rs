//! Shibboleth attribute-assertion to session bridge.
//!
//! A Shibboleth SP module in front of this service terminates the SAML
//! exchange and forwards the asserted attributes as request headers.
//! `shibgate` maps those attributes onto local user fields, resolves or
//! provisions the user, establishes a session and redirects onward.
//! A development-only emulated IdP can stand in for real federation.

pub mod auth;
pub mod config;
#[cfg(feature = "emulator")]
pub mod emulator;
pub mod middleware;
#[cfg(feature = "server")]
pub mod observability;
pub mod routes;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

#[cfg(feature = "jwt")]
use crate::auth::{TokenError, TokenIssuer};
use crate::{
    auth::{
        IdentitySource, MemorySessionStore, RedirectPolicy, SessionStore, UserStore,
        UserStoreError, users::create_user_store,
    },
    config::ShibgateConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ShibgateConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    /// Real SP headers or the emulated IdP, fixed at startup.
    pub identity_source: IdentitySource,
    pub redirects: Arc<RedirectPolicy>,
    /// Present when token handoff is enabled.
    #[cfg(feature = "jwt")]
    pub tokens: Option<Arc<TokenIssuer>>,
}

/// Errors building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("user store: {0}")]
    UserStore(#[from] UserStoreError),

    #[cfg(feature = "jwt")]
    #[error("token issuer: {0}")]
    Token(#[from] TokenError),
}

impl AppState {
    /// Build state with the configured user store and an in-memory
    /// session store.
    pub async fn new(config: ShibgateConfig) -> Result<Self, StartupError> {
        let users = create_user_store(&config.users).await?;
        Self::with_stores(config, Arc::new(MemorySessionStore::new()), users)
    }

    /// Build state around caller-supplied stores.
    pub fn with_stores(
        config: ShibgateConfig,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, StartupError> {
        let identity_source = identity_source(&config);
        let redirects = Arc::new(RedirectPolicy::new(
            config.shibboleth.allowed_redirect_host.clone(),
            config.server.base_url.clone(),
        ));

        #[cfg(feature = "jwt")]
        let tokens = if config.token.enabled {
            Some(Arc::new(TokenIssuer::from_config(&config.token)?))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            sessions,
            users,
            identity_source,
            redirects,
            #[cfg(feature = "jwt")]
            tokens,
        })
    }
}

fn identity_source(config: &ShibgateConfig) -> IdentitySource {
    #[cfg(feature = "emulator")]
    if config.emulator.enabled {
        tracing::warn!(
            state_dir = %config.emulator.state_dir().display(),
            "Emulated IdP is enabled. Never run this configuration in production."
        );
        return IdentitySource::Emulated(Arc::new(emulator::EmulatedIdp::from_config(
            &config.emulator,
        )));
    }
    #[cfg(not(feature = "emulator"))]
    let _ = config;

    IdentitySource::Server
}

pub fn build_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .nest("/auth", routes::auth_routes());

    #[cfg(feature = "emulator")]
    if state.identity_source.emulator().is_some() {
        app = app.nest("/emulated", routes::emulator_routes());
    }

    let body_limit = state.config.server.body_limit_bytes;

    app = app
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(tower_cookies::CookieManagerLayer::new());

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
