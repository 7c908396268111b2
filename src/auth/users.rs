//! User record storage.
//!
//! The bridge only needs three operations from the application's user
//! directory: find by a field value, create, and update attributes.
//! `MemoryUserStore` and `FileUserStore` cover development and small
//! deployments.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::UserStoreConfig;

pub type UserStoreResult<T> = Result<T, UserStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("User not found")]
    NotFound,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt user file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A user record in the application's directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,

    /// Canonical field → value
    pub attributes: BTreeMap<String, String>,

    /// Opaque credential. Users provisioned by the bridge get a fixed
    /// placeholder since the IdP is the only way in.
    pub password: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn attribute(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).map(String::as_str)
    }
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub attributes: BTreeMap<String, String>,
    pub password: String,
}

impl CreateUser {
    fn into_user(self) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            attributes: self.attributes,
            password: self.password,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// First user whose `field` equals `value`.
    async fn find_by_field(&self, field: &str, value: &str) -> UserStoreResult<Option<User>>;

    async fn get(&self, id: Uuid) -> UserStoreResult<Option<User>>;

    async fn create(&self, input: CreateUser) -> UserStoreResult<User>;

    /// Overwrite the given attributes, leaving other fields untouched.
    async fn update_attributes(
        &self,
        id: Uuid,
        attributes: BTreeMap<String, String>,
    ) -> UserStoreResult<User>;
}

/// Build the configured user store.
pub async fn create_user_store(config: &UserStoreConfig) -> UserStoreResult<Arc<dyn UserStore>> {
    match config {
        UserStoreConfig::Memory => Ok(Arc::new(MemoryUserStore::new())),
        UserStoreConfig::File { path } => Ok(Arc::new(FileUserStore::open(path).await?)),
    }
}

fn find_in<'a>(
    users: impl IntoIterator<Item = &'a User>,
    field: &str,
    value: &str,
) -> Option<User> {
    users
        .into_iter()
        .find(|u| u.attribute(field) == Some(value))
        .cloned()
}

fn apply_update(
    users: &mut HashMap<Uuid, User>,
    id: Uuid,
    attributes: BTreeMap<String, String>,
) -> UserStoreResult<User> {
    let user = users.get_mut(&id).ok_or(UserStoreError::NotFound)?;
    user.attributes.extend(attributes);
    user.updated_at = Utc::now();
    Ok(user.clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Users in process memory. Lost on restart.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_field(&self, field: &str, value: &str) -> UserStoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(find_in(users.values(), field, value))
    }

    async fn get(&self, id: Uuid) -> UserStoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, input: CreateUser) -> UserStoreResult<User> {
        let user = input.into_user();
        self.users.write().await.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_attributes(
        &self,
        id: Uuid,
        attributes: BTreeMap<String, String>,
    ) -> UserStoreResult<User> {
        let mut users = self.users.write().await;
        apply_update(&mut users, id, attributes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File
// ─────────────────────────────────────────────────────────────────────────────

/// Users persisted as a JSON array.
///
/// The whole file is loaded on open and rewritten after every change via a
/// temp file and rename, so a crash never leaves a half-written file.
pub struct FileUserStore {
    path: PathBuf,
    users: RwLock<HashMap<Uuid, User>>,
}

impl FileUserStore {
    /// Open the store, starting empty if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> UserStoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let users = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<User> =
                    serde_json::from_slice(&bytes).map_err(|source| UserStoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().map(|u| (u.id, u)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(UserStoreError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), count = users.len(), "Loaded user file");

        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    async fn persist(&self, users: &HashMap<Uuid, User>) -> UserStoreResult<()> {
        let mut list: Vec<&User> = users.values().collect();
        list.sort_by_key(|u| u.created_at);
        let json = serde_json::to_vec_pretty(&list)?;

        let io_err = |source| UserStoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn find_by_field(&self, field: &str, value: &str) -> UserStoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(find_in(users.values(), field, value))
    }

    async fn get(&self, id: Uuid) -> UserStoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, input: CreateUser) -> UserStoreResult<User> {
        let user = input.into_user();
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        self.persist(&users).await?;
        Ok(user)
    }

    async fn update_attributes(
        &self,
        id: Uuid,
        attributes: BTreeMap<String, String>,
    ) -> UserStoreResult<User> {
        let mut users = self.users.write().await;
        let user = apply_update(&mut users, id, attributes)?;
        self.persist(&users).await?;
        Ok(user)
    }
}
