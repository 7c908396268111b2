pub mod auth;
#[cfg(feature = "emulator")]
pub mod emulator;
pub mod health;

use axum::{Router, routing::get};

use crate::AppState;

/// Where the IdP (or emulator) sends the browser back with an assertion.
pub const AUTHENTICATE_PATH: &str = "/auth/authenticate";

pub const EMULATED_LOGIN_PATH: &str = "/emulated/login";
pub const EMULATED_IDP_PATH: &str = "/emulated/idp";
pub const EMULATED_LOGOUT_PATH: &str = "/emulated/logout";

/// Routes mounted under `/auth`.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(auth::login))
        .route("/authenticate", get(auth::authenticate))
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/slo", get(auth::single_logout).post(auth::single_logout))
        .route("/me", get(auth::me))
}

/// Routes mounted under `/emulated`. Only mounted when the emulator is on.
#[cfg(feature = "emulator")]
pub fn emulator_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(emulator::login))
        .route("/idp", get(emulator::idp_form).post(emulator::idp_submit))
        .route("/logout", get(emulator::logout))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared helpers for router tests.

    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{HeaderMap, Request, header},
        response::Response,
    };
    use http_body_util::BodyExt;

    use crate::{
        AppState,
        auth::{MemorySessionStore, MemoryUserStore},
        config::ShibgateConfig,
    };

    pub struct TestApp {
        pub state: AppState,
        pub sessions: Arc<MemorySessionStore>,
        pub users: Arc<MemoryUserStore>,
    }

    impl TestApp {
        pub fn from_toml(toml: &str) -> Self {
            let config = ShibgateConfig::from_str(toml).unwrap();
            let sessions = Arc::new(MemorySessionStore::new());
            let users = Arc::new(MemoryUserStore::new());
            let state = AppState::with_stores(config, sessions.clone(), users.clone()).unwrap();
            Self {
                state,
                sessions,
                users,
            }
        }

        pub fn router(&self) -> axum::Router {
            crate::build_app(self.state.clone())
        }
    }

    /// GET with extra headers.
    pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Value of the named cookie in the response's `Set-Cookie` headers.
    pub fn set_cookie(response: &Response, name: &str) -> Option<String> {
        cookie_from(response.headers(), name)
    }

    fn cookie_from(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.to_string())
    }

    pub fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    pub async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
