//! Post-logout and post-login redirect targets.
//!
//! Any URL that arrives from the client (a `return` parameter, the
//! Referer header, a `return_to` on login) is attacker-controlled. A
//! target is honoured only when it is a local path or when its host ends
//! with the configured suffix. Everything else falls back to the
//! application's base URL.

use axum::http::HeaderValue;
use url::Url;

/// Decides which client-supplied redirect targets are honoured.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    allowed_suffix: Option<String>,
    base_url: String,
}

impl RedirectPolicy {
    pub fn new(allowed_suffix: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            allowed_suffix: allowed_suffix
                .map(|s| s.to_ascii_lowercase())
                .filter(|s| !s.is_empty()),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Target for single logout: the candidate when its host is allowed,
    /// the base URL otherwise.
    pub fn logout_target(&self, candidate: Option<&str>) -> String {
        safe_redirect(candidate, self.allowed_suffix.as_deref(), &self.base_url)
    }

    /// Filter a `return_to` offered at login. Local paths and allowed
    /// hosts pass through; anything else is dropped.
    pub fn login_return_to(&self, candidate: &str) -> Option<String> {
        if is_local_path(candidate) {
            return Some(candidate.to_string());
        }
        let suffix = self.allowed_suffix.as_deref()?;
        host_matches(candidate, suffix).then(|| candidate.to_string())
    }

    /// Local path, same origin as the base URL, or an allowed host.
    pub fn is_trusted_target(&self, candidate: &str) -> bool {
        if self.login_return_to(candidate).is_some() {
            return true;
        }
        if !is_header_safe(candidate) {
            return false;
        }
        match (Url::parse(candidate), Url::parse(&self.base_url)) {
            (Ok(target), Ok(base)) => target.origin() == base.origin(),
            _ => false,
        }
    }
}

/// Pick a redirect target.
///
/// Returns `candidate` only when it parses as an absolute URL with a host
/// ending in `allowed_suffix`. The match is a literal suffix comparison on
/// the host, so `notuwm.edu` matches `uwm.edu`; configure a leading dot to
/// require a subdomain boundary. A missing or empty suffix rejects every
/// candidate.
pub fn safe_redirect(candidate: Option<&str>, allowed_suffix: Option<&str>, fallback: &str) -> String {
    match (candidate, allowed_suffix) {
        (Some(url), Some(suffix)) if host_matches(url, suffix) => url.to_string(),
        _ => fallback.to_string(),
    }
}

/// `true` when `url` parses and its host ends with `suffix`.
///
/// The host is compared in its normalized (lowercase) form.
pub fn host_matches(url: &str, suffix: &str) -> bool {
    if suffix.is_empty() || !is_header_safe(url) {
        return false;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed
        .host_str()
        .is_some_and(|host| host.ends_with(&suffix.to_ascii_lowercase()))
}

/// Relative path on this origin. Protocol-relative `//host` and the
/// backslash variant browsers normalize to it are excluded.
pub fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && is_header_safe(path)
}

/// Usable verbatim as a `Location` value. URL parsing strips tab, CR and
/// LF, so a target that only passes after parsing is still rejected here.
fn is_header_safe(target: &str) -> bool {
    !target.bytes().any(|b| b.is_ascii_control()) && HeaderValue::from_str(target).is_ok()
}

/// Append `name=value` to a URL or path, keeping any existing query.
pub fn append_query_param(target: &str, name: &str, value: &str) -> String {
    let (base, fragment) = match target.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (target, None),
    };

    let encoded: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish();

    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };

    match fragment {
        Some(f) => format!("{base}{separator}{encoded}#{f}"),
        None => format!("{base}{separator}{encoded}"),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const BASE: &str = "https://app.uwm.edu";

    #[rstest]
    #[case::allowed_subdomain(Some("https://portal.uwm.edu/x"), Some("uwm.edu"), "https://portal.uwm.edu/x")]
    #[case::foreign_host(Some("https://evil.com/x"), Some("uwm.edu"), BASE)]
    #[case::literal_suffix(Some("https://notuwm.edu/"), Some("uwm.edu"), "https://notuwm.edu/")]
    #[case::dot_suffix_blocks_lookalike(Some("https://notuwm.edu/"), Some(".uwm.edu"), BASE)]
    #[case::exact_host(Some("http://uwm.edu"), Some("uwm.edu"), "http://uwm.edu")]
    #[case::suffix_in_path_only(Some("https://evil.com/uwm.edu"), Some("uwm.edu"), BASE)]
    #[case::userinfo_trick(Some("https://uwm.edu@evil.com/"), Some("uwm.edu"), BASE)]
    #[case::relative_has_no_host(Some("/dashboard"), Some("uwm.edu"), BASE)]
    #[case::unparseable(Some("ht!tp:://"), Some("uwm.edu"), BASE)]
    #[case::no_candidate(None, Some("uwm.edu"), BASE)]
    #[case::no_suffix(Some("https://portal.uwm.edu/"), None, BASE)]
    #[case::empty_suffix(Some("https://portal.uwm.edu/"), Some(""), BASE)]
    #[case::embedded_lf(Some("https://my.uwm.edu/a\nb"), Some("uwm.edu"), BASE)]
    #[case::embedded_cr(Some("https://my.uwm.edu/a\rb"), Some("uwm.edu"), BASE)]
    #[case::embedded_tab(Some("https://my.uwm.edu/a\tb"), Some("uwm.edu"), BASE)]
    #[case::mixed_case_suffix(Some("https://my.uwm.edu/"), Some("UWM.edu"), "https://my.uwm.edu/")]
    fn test_safe_redirect(
        #[case] candidate: Option<&str>,
        #[case] suffix: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(safe_redirect(candidate, suffix, BASE), expected);
    }

    #[rstest]
    #[case("/home", true)]
    #[case("/reports?month=3", true)]
    #[case("//evil.com", false)]
    #[case("/\\evil.com", false)]
    #[case("https://evil.com", false)]
    #[case("home", false)]
    #[case("", false)]
    #[case("/x\ny", false)]
    #[case("/x\ry", false)]
    #[case("/x\ty", false)]
    fn test_is_local_path(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_local_path(path), expected);
    }

    #[test]
    fn test_login_return_to() {
        let policy = RedirectPolicy::new(Some("uwm.edu".into()), BASE);

        assert_eq!(policy.login_return_to("/reports").as_deref(), Some("/reports"));
        assert_eq!(
            policy.login_return_to("https://d2l.uwm.edu/").as_deref(),
            Some("https://d2l.uwm.edu/")
        );
        assert_eq!(policy.login_return_to("https://evil.com/"), None);
        assert_eq!(policy.login_return_to("//evil.com/"), None);
    }

    #[test]
    fn test_login_return_to_without_suffix_allows_local_only() {
        let policy = RedirectPolicy::new(None, BASE);

        assert_eq!(policy.login_return_to("/reports").as_deref(), Some("/reports"));
        assert_eq!(policy.login_return_to("https://d2l.uwm.edu/"), None);
    }

    #[rstest]
    #[case("/auth/authenticate", true)]
    #[case("https://app.uwm.edu/auth/authenticate", true)]
    #[case("https://app.uwm.edu:8443/auth/authenticate", false)]
    #[case("http://app.uwm.edu/auth/authenticate", false)]
    #[case("https://evil.com/auth/authenticate", false)]
    fn test_is_trusted_target_same_origin(#[case] candidate: &str, #[case] expected: bool) {
        let policy = RedirectPolicy::new(None, BASE);
        assert_eq!(policy.is_trusted_target(candidate), expected);
    }

    #[test]
    fn test_suffix_is_case_insensitive() {
        let policy = RedirectPolicy::new(Some("UWM.Edu".into()), BASE);

        assert_eq!(
            policy.logout_target(Some("https://My.UWM.edu/page")),
            "https://My.UWM.edu/page"
        );
        assert_eq!(
            policy.login_return_to("https://d2l.uwm.edu/").as_deref(),
            Some("https://d2l.uwm.edu/")
        );
    }

    #[test]
    fn test_control_characters_never_trusted() {
        let policy = RedirectPolicy::new(Some("uwm.edu".into()), BASE);

        assert!(!policy.is_trusted_target("https://app.uwm.edu/x\ny"));
        assert!(!policy.is_trusted_target("/x\ty"));
        assert_eq!(policy.login_return_to("/x\ny"), None);
    }

    #[test]
    fn test_blank_suffix_treated_as_unset() {
        let policy = RedirectPolicy::new(Some(String::new()), BASE);
        assert_eq!(policy.logout_target(Some("https://x.uwm.edu/")), BASE);
    }

    #[rstest]
    #[case("/home", "/home?token=abc")]
    #[case("/home?tab=1", "/home?tab=1&token=abc")]
    #[case("/home?", "/home?token=abc")]
    #[case("https://app.uwm.edu/x#frag", "https://app.uwm.edu/x?token=abc#frag")]
    fn test_append_query_param(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(append_query_param(target, "token", "abc"), expected);
    }

    #[test]
    fn test_append_query_param_encodes_value() {
        assert_eq!(
            append_query_param("/Shibboleth.sso/Login", "target", "https://app.uwm.edu/auth/authenticate"),
            "/Shibboleth.sso/Login?target=https%3A%2F%2Fapp.uwm.edu%2Fauth%2Fauthenticate"
        );
    }
}
