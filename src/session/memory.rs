//! In-memory session store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::{check_session_id, Session, SessionStore};

/// Map-backed store. The write lock serializes appends per store, so a
/// session's clause count always agrees with the sequence seen by a
/// subsequent read.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, id: Option<String>) -> Result<Session> {
        let id = match id {
            Some(id) => {
                check_session_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(Error::InvalidInput(format!(
                "session `{id}` already exists"
            )));
        }
        let session = Session::new(id.clone());
        sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn knowledge_base(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(id)
            .map(Session::knowledge_base))
    }

    async fn add_clauses(&self, id: &str, clauses: &[String]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::session_not_found(id))?;
        session.clauses.extend(clauses.iter().cloned());
        Ok(())
    }

    async fn lexicon_summary(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(id)
            .map(Session::lexicon_summary))
    }

    async fn active_strategy(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(id)
            .and_then(|s| s.active_strategy_id.clone()))
    }

    async fn set_active_strategy(&self, id: &str, strategy_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::session_not_found(id))?;
        session.active_strategy_id = Some(strategy_id.to_string());
        Ok(())
    }
}
