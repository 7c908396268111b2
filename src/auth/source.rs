//! Where asserted attributes come from.
//!
//! Chosen once at startup: the real SP in front of the bridge, or the
//! emulated IdP when it is enabled. Handlers never branch on the mode
//! themselves.

#[cfg(feature = "emulator")]
use std::sync::Arc;

use axum::http::HeaderMap;
use tower_cookies::Cookies;

use super::{
    AuthError,
    attributes::{EmulatedVariables, ServerVariables, VariableSource},
};
#[cfg(feature = "emulator")]
use crate::emulator::EmulatedIdp;

#[derive(Clone)]
pub enum IdentitySource {
    /// Request headers set by the SP module
    Server,
    /// Attributes released by the emulated IdP to this browser
    #[cfg(feature = "emulator")]
    Emulated(Arc<EmulatedIdp>),
}

/// Variable lookup for one request.
pub enum Variables<'a> {
    Server(ServerVariables<'a>),
    Emulated(EmulatedVariables),
}

impl VariableSource for Variables<'_> {
    fn variable(&self, name: &str) -> Option<String> {
        match self {
            Variables::Server(v) => v.variable(name),
            Variables::Emulated(v) => v.variable(name),
        }
    }
}

impl IdentitySource {
    pub fn is_emulated(&self) -> bool {
        !matches!(self, IdentitySource::Server)
    }

    #[cfg(feature = "emulator")]
    pub fn emulator(&self) -> Option<&Arc<EmulatedIdp>> {
        match self {
            IdentitySource::Emulated(idp) => Some(idp),
            IdentitySource::Server => None,
        }
    }

    /// Variables visible to this request.
    #[cfg_attr(not(feature = "emulator"), allow(unused_variables))]
    pub async fn variables<'a>(
        &self,
        headers: &'a HeaderMap,
        cookies: &Cookies,
    ) -> Result<Variables<'a>, AuthError> {
        match self {
            IdentitySource::Server => Ok(Variables::Server(ServerVariables::new(headers))),
            #[cfg(feature = "emulator")]
            IdentitySource::Emulated(idp) => {
                let Some(browser) = idp.browser_id(cookies) else {
                    return Ok(Variables::Emulated(EmulatedVariables::default()));
                };
                let released = idp.released_attributes(browser).await?;
                Ok(Variables::Emulated(EmulatedVariables::new(released)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[tokio::test]
    async fn test_server_source_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("mail", HeaderValue::from_static("user@uwm.edu"));
        let cookies = Cookies::default();

        let vars = IdentitySource::Server
            .variables(&headers, &cookies)
            .await
            .unwrap();

        assert_eq!(vars.variable("mail").as_deref(), Some("user@uwm.edu"));
        assert!(!IdentitySource::Server.is_emulated());
    }

    #[cfg(feature = "emulator")]
    #[tokio::test]
    async fn test_emulated_source_ignores_headers() {
        let dir = tempfile::tempdir().unwrap();
        let idp = EmulatedIdp::from_config(&crate::config::EmulatorConfig {
            enabled: true,
            state_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let source = IdentitySource::Emulated(Arc::new(idp));
        let mut headers = HeaderMap::new();
        headers.insert("mail", HeaderValue::from_static("forged@evil.com"));

        let vars = source.variables(&headers, &Cookies::default()).await.unwrap();

        assert_eq!(vars.variable("mail"), None);
        assert!(source.is_emulated());
    }
}
