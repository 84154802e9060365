use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{SessionBackend, SessionEntry, SessionError};
use crate::clock::Clock;

type Entries = HashMap<String, SessionEntry>;

/// Session storage in a single JSON file, so the CLI can resume across runs.
///
/// Every operation rewrites the whole file; writes go to a sibling temp file first and
/// are renamed into place.
pub struct FileSessionStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<path>.tmp`, never the session file itself or one of its siblings.
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn read_entries(&self) -> Result<Entries, SessionError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Entries::new());
        }
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Session file unreadable, starting fresh");
                Ok(Entries::new())
            }
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_vec_pretty(entries)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = entries.len(), "Session file written");
        Ok(())
    }
}

impl std::fmt::Debug for FileSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSessionStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionBackend for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        let now = self.clock.now();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                self.write_entries(&entries).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        let now = self.clock.now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(key.to_string(), SessionEntry::new(value.to_string(), ttl, now));
        self.write_entries(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let store = FileSessionStore::new(&path, clock.clone());
        store.set("payment_result", "{}", Some(Duration::hours(24))).await.unwrap();
        drop(store);

        let reopened = FileSessionStore::new(&path, clock.clone());
        assert_eq!(
            reopened.get("payment_result").await.unwrap().as_deref(),
            Some("{}")
        );

        clock.advance(Duration::hours(25));
        assert_eq!(reopened.get("payment_result").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_or_garbage_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileSessionStore::new(&path, Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(store.get("x").await.unwrap(), None);

        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "garbage").await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), None);

        store.set("x", "1", None).await.unwrap();
        store.delete("x").await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), None);

        store.clear().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn temp_file_never_replaces_a_sibling() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sibling = dir.path().join("session.tmp");
        tokio::fs::write(&sibling, "keep me").await.unwrap();

        let store = FileSessionStore::new(dir.path().join("session.json"), clock.clone());
        store.set("x", "1", None).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&sibling).await.unwrap(), "keep me");
        assert_eq!(store.get("x").await.unwrap().as_deref(), Some("1"));
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[tokio::test]
    async fn session_file_may_itself_end_in_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.tmp");
        let store = FileSessionStore::new(&path, Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(store.temp_path(), dir.path().join("session.tmp.tmp"));

        store.set("x", "1", None).await.unwrap();
        store.set("y", "2", None).await.unwrap();
        assert_eq!(store.get("x").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("y").await.unwrap().as_deref(), Some("2"));
        assert!(!store.temp_path().exists());
    }
}
