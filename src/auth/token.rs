//! Bearer token handoff.
//!
//! After a user-backed login the bridge can append a short-lived HS256
//! token to the redirect so a separate frontend can call APIs without the
//! session cookie. Logout revokes the presented token by its `jti` until
//! the token would have expired anyway.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::users::User;
use crate::config::TokenConfig;

/// `auth_type` claim on tokens minted after an IdP login.
pub const IDP_AUTH_TYPE: &str = "idp";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signing secret is not configured")]
    MissingSecret,

    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token has been revoked")]
    Revoked,
}

/// Claims carried by a handoff token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffClaims {
    /// User record id
    pub sub: String,
    /// Identifier value asserted at login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub auth_type: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Mints, verifies and revokes handoff tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl_secs: i64,
    query_param: String,
    /// jti → exp of revoked tokens
    revoked: RwLock<HashMap<String, i64>>,
}

impl TokenIssuer {
    pub fn from_config(config: &TokenConfig) -> Result<Self, TokenError> {
        let secret = config.secret.as_deref().ok_or(TokenError::MissingSecret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            ttl_secs: i64::try_from(config.ttl_secs).unwrap_or(i64::MAX / 2),
            query_param: config.query_param.clone(),
            revoked: RwLock::new(HashMap::new()),
        })
    }

    /// Query parameter the token travels in.
    pub fn query_param(&self) -> &str {
        &self.query_param
    }

    /// Sign a token for `user`.
    pub fn mint(&self, user: &User, identifier: Option<&str>) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = HandoffClaims {
            sub: user.id.to_string(),
            identifier: identifier.map(str::to_string),
            auth_type: IDP_AUTH_TYPE.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Encode)
    }

    /// Verify signature, issuer, expiry and revocation.
    pub async fn verify(&self, token: &str) -> Result<HandoffClaims, TokenError> {
        let claims = self.decode(token)?;
        if self.revoked.read().await.contains_key(&claims.jti) {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Revoke `token` until its natural expiry.
    pub async fn invalidate(&self, token: &str) -> Result<(), TokenError> {
        let claims = self.decode(token)?;
        let now = Utc::now().timestamp();

        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, exp| *exp > now);
        revoked.insert(claims.jti.clone(), claims.exp);

        tracing::debug!(jti = %claims.jti, sub = %claims.sub, "Revoked handoff token");
        Ok(())
    }

    fn decode(&self, token: &str) -> Result<HandoffClaims, TokenError> {
        decode::<HandoffClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::from_config(&TokenConfig {
            enabled: true,
            secret: Some(SECRET.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            attributes: BTreeMap::from([("email".to_string(), "user@uwm.edu".to_string())]),
            password: "shibboleth".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_minted_token_carries_idp_claims() {
        let issuer = issuer();
        let user = user();

        let token = issuer.mint(&user, Some("user@uwm.edu")).unwrap();
        let claims = issuer.verify(&token).await.unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.auth_type, "idp");
        assert_eq!(claims.iss, "shibgate");
        assert_eq!(claims.identifier.as_deref(), Some("user@uwm.edu"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn test_invalidated_token_is_revoked() {
        let issuer = issuer();
        let token = issuer.mint(&user(), None).unwrap();

        issuer.invalidate(&token).await.unwrap();

        assert!(matches!(issuer.verify(&token).await, Err(TokenError::Revoked)));
    }

    #[tokio::test]
    async fn test_revocation_is_per_token() {
        let issuer = issuer();
        let user = user();
        let first = issuer.mint(&user, None).unwrap();
        let second = issuer.mint(&user, None).unwrap();

        issuer.invalidate(&first).await.unwrap();

        assert!(issuer.verify(&second).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_from_other_secret_rejected() {
        let other = TokenIssuer::from_config(&TokenConfig {
            enabled: true,
            secret: Some("ffffffffffffffffffffffffffffffff".to_string()),
            ..Default::default()
        })
        .unwrap();
        let token = other.mint(&user(), None).unwrap();

        assert!(matches!(issuer().verify(&token).await, Err(TokenError::Invalid(_))));
        assert!(issuer().invalidate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let now = Utc::now().timestamp();
        let claims = HandoffClaims {
            sub: Uuid::new_v4().to_string(),
            identifier: None,
            auth_type: IDP_AUTH_TYPE.to_string(),
            iss: "shibgate".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(issuer().verify(&token).await, Err(TokenError::Expired)));
    }

    #[test]
    fn test_missing_secret() {
        let result = TokenIssuer::from_config(&TokenConfig::default());
        assert!(matches!(result, Err(TokenError::MissingSecret)));
    }
}
