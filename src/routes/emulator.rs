//! Emulated IdP pages. Mounted under `/emulated` only when the emulator
//! is enabled.

use axum::{
    Form,
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_cookies::Cookies;
use validator::Validate;

use super::{AUTHENTICATE_PATH, EMULATED_IDP_PATH, auth::referer};
use crate::{
    AppState,
    auth::AuthError,
    emulator::{EmulatedIdp, LoginOutcome},
};

const INVALID_CREDENTIALS: &str = "Incorrect username and/or password";

fn emulator(state: &AppState) -> Result<&EmulatedIdp, AuthError> {
    state
        .identity_source
        .emulator()
        .map(|idp| idp.as_ref())
        .ok_or_else(|| AuthError::Internal("Emulated IdP route hit with emulator disabled".into()))
}

#[derive(Debug, Deserialize)]
pub struct EmulatedLoginQuery {
    #[serde(default)]
    pub target: Option<String>,
}

/// Start an emulated auth request and show the IdP form.
///
/// The post-login target comes from `target` or the Referer. Targets off
/// this origin and outside the allowed hosts are replaced with the
/// authenticate endpoint.
#[tracing::instrument(name = "emulator.login", skip(state, headers, cookies))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
    Query(query): Query<EmulatedLoginQuery>,
) -> Result<Redirect, AuthError> {
    let idp = emulator(&state)?;
    let browser = idp.ensure_browser_id(&cookies);

    let target = query
        .target
        .as_deref()
        .or_else(|| referer(&headers))
        .filter(|t| state.redirects.is_trusted_target(t))
        .map(str::to_string)
        .unwrap_or_else(|| state.config.server.absolute_url(AUTHENTICATE_PATH));

    idp.make_auth_request(browser, target).await?;
    Ok(Redirect::to(EMULATED_IDP_PATH))
}

/// Login form submission.
#[derive(Debug, Deserialize, Validate)]
pub struct IdpLoginForm {
    #[validate(length(max = 256))]
    #[serde(default)]
    pub username: String,
    #[validate(length(max = 256))]
    #[serde(default)]
    pub password: String,
}

pub async fn idp_form() -> Html<String> {
    Html(render_form(None, ""))
}

#[tracing::instrument(name = "emulator.idp", skip(state, cookies, form))]
pub async fn idp_submit(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<IdpLoginForm>,
) -> Result<Response, AuthError> {
    form.validate()
        .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

    let idp = emulator(&state)?;
    let browser = idp.ensure_browser_id(&cookies);

    match idp.login(browser, &form.username, &form.password).await? {
        LoginOutcome::Authenticated { target } => {
            let target =
                target.unwrap_or_else(|| state.config.server.absolute_url(AUTHENTICATE_PATH));
            Ok(Redirect::to(&target).into_response())
        }
        LoginOutcome::InvalidCredentials => {
            tracing::debug!(username = %form.username, "Emulated IdP rejected credentials");
            Ok(Html(render_form(Some(INVALID_CREDENTIALS), &form.username)).into_response())
        }
    }
}

/// End the emulated IdP session.
#[tracing::instrument(name = "emulator.logout", skip(state, headers, cookies))]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
) -> Result<Html<String>, AuthError> {
    let idp = emulator(&state)?;
    if let Some(browser) = idp.browser_id(&cookies) {
        idp.logout(browser).await?;
    }

    let back = referer(&headers)
        .filter(|r| r.starts_with("http://") || r.starts_with("https://"))
        .unwrap_or(state.redirects.base_url());

    Ok(Html(format!(
        "Goodbye, fair user. <a href='{}'>Return from whence you came</a>!",
        escape_html(back)
    )))
}

fn render_form(error: Option<&str>, username: &str) -> String {
    let error = error
        .map(|e| format!("<p class=\"error\">{}</p>\n", escape_html(e)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Emulated IdP</title></head>
<body>
<h1>Emulated IdP Login</h1>
{error}<form method="post" action="{EMULATED_IDP_PATH}">
<label>Username <input type="text" name="username" value="{username}" autofocus></label>
<label>Password <input type="password" name="password"></label>
<button type="submit">Log in</button>
</form>
</body>
</html>
"#,
        username = escape_html(username),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode};
    use http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::UserStore,
        routes::testing::{TestApp, body_string, get, location, set_cookie},
    };

    const EMULATOR_COOKIE: &str = "shibgate_emulator";

    fn emulated_app(dir: &tempfile::TempDir) -> TestApp {
        TestApp::from_toml(&format!(
            r#"
            [emulator]
            enabled = true
            state_dir = "{}"
        "#,
            dir.path().display()
        ))
    }

    fn post_form(uri: &str, cookie: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_emulated_login_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);

        let response = app.router().oneshot(get("/auth/login", &[])).await.unwrap();
        let to_emulator = location(&response).to_string();
        assert!(to_emulator.starts_with("/emulated/login?target="), "{to_emulator}");

        let response = app.router().oneshot(get(&to_emulator, &[])).await.unwrap();
        assert_eq!(location(&response), "/emulated/idp");
        let browser = set_cookie(&response, EMULATOR_COOKIE).unwrap();
        let cookie = format!("{EMULATOR_COOKIE}={browser}");

        let response = app
            .router()
            .oneshot(get("/emulated/idp", &[("cookie", cookie.as_str())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("name=\"password\""));

        let response = app
            .router()
            .oneshot(post_form("/emulated/idp", &cookie, "username=user&password=user"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "http://localhost:8080/auth/authenticate"
        );

        let response = app
            .router()
            .oneshot(get("/auth/authenticate", &[("cookie", cookie.as_str())]))
            .await
            .unwrap();
        assert_eq!(location(&response), "/home");
        let user = app
            .users
            .find_by_field("email", "user@uwm.edu")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.attribute("name"), Some("User User"));

        let response = app
            .router()
            .oneshot(get("/auth/logout", &[("cookie", cookie.as_str())]))
            .await
            .unwrap();
        assert_eq!(location(&response), "/emulated/logout");
    }

    #[tokio::test]
    async fn test_wrong_password_rerenders_form() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);
        let cookie = format!("{EMULATOR_COOKIE}={}", uuid::Uuid::new_v4());

        let response = app
            .router()
            .oneshot(post_form("/emulated/idp", &cookie, "username=user&password=nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(INVALID_CREDENTIALS));
        assert!(body.contains("value=\"user\""));
    }

    #[tokio::test]
    async fn test_foreign_target_replaced_with_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);

        let response = app
            .router()
            .oneshot(get("/emulated/login?target=https%3A%2F%2Fevil.com%2F", &[]))
            .await
            .unwrap();
        let browser = set_cookie(&response, EMULATOR_COOKIE).unwrap();
        let cookie = format!("{EMULATOR_COOKIE}={browser}");

        let response = app
            .router()
            .oneshot(post_form("/emulated/idp", &cookie, "username=staff&password=staff"))
            .await
            .unwrap();

        assert_eq!(
            location(&response),
            "http://localhost:8080/auth/authenticate"
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_browser_gets_no_identity() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);

        // SP headers are ignored while emulating
        let response = app
            .router()
            .oneshot(get("/auth/authenticate", &[("mail", "spoofed@uwm.edu")]))
            .await
            .unwrap();

        assert_eq!(location(&response), "/home");
        assert!(app.users.is_empty().await);
    }

    #[tokio::test]
    async fn test_logout_page_escapes_referer() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);

        let response = app
            .router()
            .oneshot(get(
                "/emulated/logout",
                &[("referer", "https://app.uwm.edu/x'><script>")],
            ))
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(body.starts_with("Goodbye, fair user."));
        assert!(body.contains("https://app.uwm.edu/x&#x27;&gt;&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn test_logout_page_ignores_non_http_referer() {
        let dir = tempfile::tempdir().unwrap();
        let app = emulated_app(&dir);

        let response = app
            .router()
            .oneshot(get("/emulated/logout", &[("referer", "javascript:alert(1)")]))
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(body.contains("href='http://localhost:8080'"));
    }

    #[tokio::test]
    async fn test_emulator_routes_absent_when_disabled() {
        let app = TestApp::from_toml("");

        let response = app
            .router()
            .oneshot(get("/emulated/idp", &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
