//! Authentication routes.
//!
//! - `/auth/login` - Redirects to the IdP login handler (or the emulator)
//! - `/auth/authenticate` - Consumes the asserted attributes and starts a session
//! - `/auth/logout` - Destroys the session, redirects to the IdP logout handler
//! - `/auth/slo` - Destroys the session, redirects to a validated return URL
//! - `/auth/me` - Returns the current session's identity

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::Redirect,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use super::{AUTHENTICATE_PATH, EMULATED_LOGIN_PATH, EMULATED_LOGOUT_PATH};
use crate::{
    AppState,
    auth::{
        AuthError, BridgeSession, LoginBranch, VariableSource, map_attributes,
        redirect::append_query_param, resolve, session_store::IDP_CHECKED_FLASH,
    },
    config::{SameSite, SessionConfig, ShibgateConfig},
};

fn cookie_same_site(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

fn build_session_cookie(config: &SessionConfig, session: &BridgeSession) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), session.id.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(cookie_same_site(config.same_site))
        .max_age(CookieDuration::seconds(session.ttl().as_secs() as i64))
        .build()
}

/// Build a session removal cookie with the same security attributes as the login cookie.
fn build_removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build(config.cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(cookie_same_site(config.same_site))
        .max_age(CookieDuration::ZERO)
        .build()
}

fn session_id_from_cookie(state: &AppState, cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(&state.config.session.cookie_name)
        .and_then(|c| c.value().parse::<Uuid>().ok())
}

async fn load_session(
    state: &AppState,
    cookies: &Cookies,
) -> Result<Option<BridgeSession>, AuthError> {
    let Some(id) = session_id_from_cookie(state, cookies) else {
        return Ok(None);
    };
    Ok(state.sessions.get_session(id).await?)
}

fn new_session(state: &AppState) -> BridgeSession {
    BridgeSession::new(Duration::from_secs(state.config.session.duration_secs))
}

pub(crate) fn referer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Query parameters for the login endpoint.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Where to land after login. Local paths or allowed hosts only.
    #[serde(default)]
    pub return_to: Option<String>,
}

/// Send the browser to the IdP with the authenticate endpoint as `target`.
#[tracing::instrument(name = "auth.login", skip(state, cookies))]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, AuthError> {
    if let Some(return_to) = query.return_to.as_deref() {
        match state.redirects.login_return_to(return_to) {
            Some(intended) => remember_intended_url(&state, &cookies, intended).await?,
            None => {
                tracing::warn!(return_to = %return_to, "Ignoring return_to outside allowed hosts")
            }
        }
    }

    let target = state.config.server.absolute_url(AUTHENTICATE_PATH);
    let login_url = if state.identity_source.is_emulated() {
        EMULATED_LOGIN_PATH
    } else {
        state.config.shibboleth.idp_login.as_str()
    };

    Ok(Redirect::to(&append_query_param(login_url, "target", &target)))
}

async fn remember_intended_url(
    state: &AppState,
    cookies: &Cookies,
    intended: String,
) -> Result<(), AuthError> {
    match load_session(state, cookies).await? {
        Some(mut session) => {
            session.intended_url = Some(intended);
            state.sessions.update_session(session).await?;
        }
        None => {
            let mut session = new_session(state);
            session.intended_url = Some(intended);
            state.sessions.create_session(session.clone()).await?;
            cookies.add(build_session_cookie(&state.config.session, &session));
        }
    }
    Ok(())
}

/// Receive the assertion, resolve the session and redirect onward.
#[tracing::instrument(
    name = "auth.authenticate",
    skip(state, headers, cookies),
    fields(branch = tracing::field::Empty)
)]
pub async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
) -> Result<Redirect, AuthError> {
    let config = state.config.clone();
    let shib = &config.shibboleth;

    let variables = state.identity_source.variables(&headers, &cookies).await?;
    let attributes = map_attributes(shib.attribute_map(), &variables);
    let entitlement = variables.variable(&shib.entitlement);

    let existing = load_session(&state, &cookies).await?;
    let had_session = existing.is_some();
    let mut session = existing.unwrap_or_else(|| new_session(&state));

    let resolution = resolve(
        shib,
        attributes,
        entitlement,
        &mut session,
        state.users.as_ref(),
    )
    .await?;
    tracing::Span::current().record("branch", resolution.branch.as_str());

    // Nothing asserted and nothing to carry the flash in
    if resolution.branch == LoginBranch::NoIdentifier && !had_session {
        return Ok(Redirect::to(&shib.authenticated));
    }

    let intended = session.take_intended_url();
    session.flash(IDP_CHECKED_FLASH, true);
    let session = state.sessions.regenerate_session(&session).await?;
    cookies.add(build_session_cookie(&config.session, &session));

    let destination = post_login_destination(intended, &config);

    #[cfg(feature = "jwt")]
    let destination = match (&state.tokens, &resolution.user) {
        (Some(issuer), Some(user)) => {
            let token = issuer
                .mint(user, session.identifier.as_deref())
                .map_err(|e| AuthError::Internal(format!("Token signing failed: {e}")))?;
            append_query_param(&destination, issuer.query_param(), &token)
        }
        _ => destination,
    };

    tracing::info!(
        session_id = %session.id,
        branch = resolution.branch.as_str(),
        "Login complete"
    );

    Ok(Redirect::to(&destination))
}

/// Recorded destination unless it points back at the authenticate
/// endpoint, which would loop.
fn post_login_destination(intended: Option<String>, config: &ShibgateConfig) -> String {
    let authenticate_url = config.server.absolute_url(AUTHENTICATE_PATH);
    intended
        .filter(|url| {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            path != AUTHENTICATE_PATH && path != authenticate_url
        })
        .unwrap_or_else(|| config.shibboleth.authenticated.clone())
}

/// Drop the local session, then hand off to the IdP logout handler.
#[tracing::instrument(name = "auth.logout", skip(state, headers, cookies, params))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, AuthError> {
    destroy_session(&state, &headers, &cookies, &params).await?;

    let target = if state.identity_source.is_emulated() {
        EMULATED_LOGOUT_PATH
    } else {
        state.config.shibboleth.idp_logout.as_str()
    };
    Ok(Redirect::to(target))
}

/// Single logout: drop the local session and return to the caller if its
/// host is allowed.
#[tracing::instrument(name = "auth.slo", skip(state, headers, cookies, params))]
pub async fn single_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, AuthError> {
    destroy_session(&state, &headers, &cookies, &params).await?;

    let candidate = params
        .get("return")
        .map(String::as_str)
        .or_else(|| referer(&headers));
    let target = state.redirects.logout_target(candidate);

    tracing::debug!(candidate = ?candidate, target = %target, "Single logout redirect");
    Ok(Redirect::to(&target))
}

#[cfg_attr(not(feature = "jwt"), allow(unused_variables))]
async fn destroy_session(
    state: &AppState,
    headers: &HeaderMap,
    cookies: &Cookies,
    params: &HashMap<String, String>,
) -> Result<(), AuthError> {
    if let Some(id) = session_id_from_cookie(state, cookies) {
        state.sessions.delete_session(id).await?;
        tracing::info!(session_id = %id, "Session destroyed");
    }
    cookies.remove(build_removal_cookie(&state.config.session));

    #[cfg(feature = "jwt")]
    invalidate_presented_token(state, headers, params).await;

    Ok(())
}

/// Revoke the bearer token sent with a logout, if any. Never fails the
/// logout itself.
#[cfg(feature = "jwt")]
async fn invalidate_presented_token(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) {
    let Some(issuer) = &state.tokens else {
        return;
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let Some(token) = bearer.or_else(|| params.get(issuer.query_param()).map(String::as_str))
    else {
        return;
    };

    if let Err(e) = issuer.invalidate(token).await {
        tracing::warn!(error = %e, "Ignoring unusable token on logout");
    }
}

/// Current session identity.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// The IdP was consulted since the last time this was read
    pub idp_checked: bool,
    pub expires_at: DateTime<Utc>,
}

#[tracing::instrument(name = "auth.me", skip(state, cookies))]
pub async fn me(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Json<MeResponse>, AuthError> {
    let Some(mut session) = load_session(&state, &cookies).await? else {
        return Err(AuthError::SessionNotFound);
    };

    let idp_checked = session
        .take_flash(IDP_CHECKED_FLASH)
        .is_some_and(|v| v == serde_json::Value::Bool(true));
    if idp_checked {
        state.sessions.update_session(session.clone()).await?;
    }

    let attributes = match (&session.attributes, session.user_id) {
        (Some(attrs), _) => attrs.clone(),
        (None, Some(id)) => state
            .users
            .get(id)
            .await?
            .map(|u| u.attributes)
            .unwrap_or_default(),
        (None, None) => BTreeMap::new(),
    };

    Ok(Json(MeResponse {
        authenticated: session.is_authenticated(),
        user_id: session.user_id,
        identifier: session.identifier.clone(),
        attributes,
        idp_checked,
        expires_at: session.expires_at,
    }))
}
