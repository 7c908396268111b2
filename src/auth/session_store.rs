//! Session storage for bridge sessions.
//!
//! A bridge session is keyed by a random id carried in the session cookie.
//! It holds either a reference to a resolved user record or, in simple
//! session mode, the mapped attributes themselves.
//!
//! `MemorySessionStore` is the only bundled backend. It is single-node and
//! loses sessions on restart; deployments needing more implement
//! `SessionStore` themselves.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
}

/// Flash key set once the IdP has been consulted during this login round.
pub const IDP_CHECKED_FLASH: &str = "shib-idp-checked";

/// Server-side state behind a session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSession {
    /// Session ID
    pub id: Uuid,

    /// Resolved user record, when one was matched or provisioned
    #[serde(default)]
    pub user_id: Option<Uuid>,

    /// Identifier value asserted by the IdP
    #[serde(default)]
    pub identifier: Option<String>,

    /// Mapped attributes (simple session mode only), including the
    /// entitlement under its configured name
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,

    /// Where to send the user once login completes
    #[serde(default)]
    pub intended_url: Option<String>,

    /// One-shot values consumed by the next reader
    #[serde(default)]
    pub flash: BTreeMap<String, serde_json::Value>,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session expires
    pub expires_at: DateTime<Utc>,
}

impl BridgeSession {
    /// Fresh anonymous session.
    pub fn new(duration: Duration) -> Self {
        let now = Utc::now();
        let lifetime =
            chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(8));
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            identifier: None,
            attributes: None,
            intended_url: None,
            flash: BTreeMap::new(),
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// A user record or simple-session attributes are attached.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() || self.attributes.is_some()
    }

    /// Get TTL as a Duration.
    pub fn ttl(&self) -> Duration {
        let now = Utc::now();
        if self.expires_at <= now {
            Duration::ZERO
        } else {
            (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
        }
    }

    pub fn flash(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.flash.insert(key.into(), value.into());
    }

    /// Remove and return a flashed value.
    pub fn take_flash(&mut self, key: &str) -> Option<serde_json::Value> {
        self.flash.remove(key)
    }

    /// Remove and return the recorded post-login destination.
    pub fn take_intended_url(&mut self) -> Option<String> {
        self.intended_url.take()
    }

    /// Copy of this session under a new id, same contents and expiry.
    fn with_new_id(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session.
    async fn create_session(&self, session: BridgeSession) -> SessionResult<Uuid>;

    /// Get a live session by ID. Expired sessions are reported as absent.
    async fn get_session(&self, id: Uuid) -> SessionResult<Option<BridgeSession>>;

    /// Replace a stored session.
    async fn update_session(&self, session: BridgeSession) -> SessionResult<()>;

    /// Delete a session.
    async fn delete_session(&self, id: Uuid) -> SessionResult<()>;

    /// Remove expired sessions, returning how many were dropped.
    async fn cleanup(&self) -> SessionResult<usize>;

    /// Move a session's contents to a fresh id and drop the old id.
    ///
    /// Guards against session fixation: an id planted before login is
    /// never the id that carries the authenticated state.
    async fn regenerate_session(&self, session: &BridgeSession) -> SessionResult<BridgeSession> {
        let rotated = session.with_new_id();
        self.delete_session(session.id).await?;
        self.create_session(rotated.clone()).await?;
        Ok(rotated)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Session Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory session store.
///
/// Suitable for development and single-node deployments.
/// Sessions are lost on restart and not shared across nodes.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, BridgeSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: BridgeSession) -> SessionResult<Uuid> {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);
        Ok(id)
    }

    async fn get_session(&self, id: Uuid) -> SessionResult<Option<BridgeSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).filter(|s| !s.is_expired()).cloned())
    }

    async fn update_session(&self, session: BridgeSession) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(SessionError::NotFound);
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id);
        Ok(())
    }

    async fn cleanup(&self) -> SessionResult<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok(before - sessions.len())
    }
}
