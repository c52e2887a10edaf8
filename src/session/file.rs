//! File-backed session store: one JSON document per session.
//!
//! Persistence is eager: every mutation is durable on disk before the call
//! returns, written atomically via a temp file plus rename. Reads prefer the
//! in-memory cache and fall back to disk on miss.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{check_session_id, Session, SessionStore};

pub struct FileSessionStore {
    directory: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl FileSessionStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| Error::Store(format!("failed to create {}: {e}", directory.display())))?;
        Ok(Self {
            directory,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.json"))
    }

    /// Write the session document atomically: temp file, then rename.
    async fn persist(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.id);
        let tmp = self.directory.join(format!("{}.json.tmp", session.id));
        let body = serde_json::to_vec_pretty(session)?;

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::Store(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Store(format!("failed to rename {}: {e}", tmp.display())))?;
        debug!(session = %session.id, path = %path.display(), "session persisted");
        Ok(())
    }

    /// Load a session document from disk; `None` when absent.
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        if check_session_id(id).is_err() {
            return Ok(None);
        }
        let path = self.session_path(id);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let session: Session = serde_json::from_slice(&body)?;
        Ok(Some(session))
    }

    /// Cached read, falling through to disk and filling the cache.
    async fn fetch(&self, id: &str) -> Result<Option<Session>> {
        if let Some(session) = self.cache.read().await.get(id) {
            return Ok(Some(session.clone()));
        }
        match self.load(id).await? {
            Some(session) => {
                self.cache
                    .write()
                    .await
                    .insert(id.to_string(), session.clone());
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Apply `mutate` to a session and persist before publishing to the
    /// cache. Holding the write lock across load, persist, and publish
    /// serializes appends per store.
    async fn update<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut cache = self.cache.write().await;
        let mut session = match cache.get(id) {
            Some(session) => session.clone(),
            None => self
                .load(id)
                .await?
                .ok_or_else(|| Error::session_not_found(id))?,
        };
        mutate(&mut session);
        self.persist(&session).await?;
        cache.insert(id.to_string(), session);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create_session(&self, id: Option<String>) -> Result<Session> {
        let id = match id {
            Some(id) => {
                check_session_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut cache = self.cache.write().await;
        if cache.contains_key(&id) || self.load(&id).await?.is_some() {
            return Err(Error::InvalidInput(format!(
                "session `{id}` already exists"
            )));
        }
        let session = Session::new(id.clone());
        self.persist(&session).await?;
        cache.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.fetch(id).await
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let mut cache = self.cache.write().await;
        let cached = cache.remove(id).is_some();
        if check_session_id(id).is_err() {
            return Ok(cached);
        }
        match tokio::fs::remove_file(self.session_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(Error::Store(format!("failed to delete session {id}: {e}"))),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::Store(format!("failed to list sessions: {e}")))?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Store(format!("failed to list sessions: {e}")))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(session) = self.fetch(id).await? {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn knowledge_base(&self, id: &str) -> Result<Option<String>> {
        Ok(self.fetch(id).await?.map(|s| s.knowledge_base()))
    }

    async fn add_clauses(&self, id: &str, clauses: &[String]) -> Result<()> {
        self.update(id, |session| {
            session.clauses.extend(clauses.iter().cloned());
        })
        .await
    }

    async fn lexicon_summary(&self, id: &str) -> Result<Option<String>> {
        Ok(self.fetch(id).await?.map(|s| s.lexicon_summary()))
    }

    async fn active_strategy(&self, id: &str) -> Result<Option<String>> {
        Ok(self.fetch(id).await?.and_then(|s| s.active_strategy_id))
    }

    async fn set_active_strategy(&self, id: &str, strategy_id: &str) -> Result<()> {
        let strategy_id = strategy_id.to_string();
        self.update(id, move |session| {
            session.active_strategy_id = Some(strategy_id);
        })
        .await
    }
}
