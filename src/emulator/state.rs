use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EmulatorError;

/// What the emulated IdP remembers about one browser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmulatorState {
    /// Where to go once the login form is submitted
    #[serde(default)]
    pub pending_target: Option<String>,

    /// Logged-in emulator user
    #[serde(default)]
    pub username: Option<String>,

    /// Attributes released for `username`
    #[serde(default)]
    pub attributes: std::collections::BTreeMap<String, String>,

    #[serde(default)]
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl EmulatorState {
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }
}

/// One JSON file per browser under a state directory. Survives restarts.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_simple()))
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<EmulatorState>, EmulatorError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable emulator state");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EmulatorError::Io { path, source }),
        }
    }

    pub async fn save(&self, id: Uuid, state: &EmulatorState) -> Result<(), EmulatorError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| EmulatorError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(state)?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| EmulatorError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| EmulatorError::Io { path, source })
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), EmulatorError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EmulatorError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let id = Uuid::new_v4();

        assert!(store.load(id).await.unwrap().is_none());

        let state = EmulatorState {
            pending_target: Some("http://localhost:8080/auth/authenticate".into()),
            ..Default::default()
        };
        store.save(id, &state).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(state));

        store.remove(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
        store.remove(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_state_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let id = Uuid::new_v4();
        std::fs::write(store.path_for(id), b"<html>").unwrap();

        assert!(store.load(id).await.unwrap().is_none());
    }
}
