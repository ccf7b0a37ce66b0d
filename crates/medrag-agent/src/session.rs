use async_trait::async_trait;
use dashmap::DashMap;
use medrag_core::{MedRagError, Result, Session, SessionId, SessionStore, TenantId, Turn};

/// Session log in a concurrent map. Reads clone, so a returned session is a
/// snapshot; appends extend the stored turn list under the shard lock, which
/// keeps each user/agent pair contiguous.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, session_id: SessionId, user_id: TenantId) -> Result<Session> {
        let session = self
            .sessions
            .entry(session_id)
            .or_insert_with(|| Session::new(session_id, user_id));
        Ok(session.value().clone())
    }

    async fn append_turns(&self, session_id: SessionId, turns: Vec<Turn>) -> Result<()> {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                session.turns.extend(turns);
                Ok(())
            }
            None => Err(MedRagError::Session(format!(
                "unknown session {}",
                session_id
            ))),
        }
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .get(&session_id)
            .map(|session| session.value().clone()))
    }

    async fn recent_turns(&self, session_id: SessionId, limit: usize) -> Result<Vec<Turn>> {
        match self.sessions.get(&session_id) {
            Some(session) => {
                let turns = &session.value().turns;
                let start = turns.len().saturating_sub(limit);
                Ok(turns[start..].to_vec())
            }
            None => Ok(Vec::new()),
        }
    }
}
