use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use forge_core::ids::SessionId;
use forge_core::session::{Message, Role, Session};

use crate::database::Database;
use crate::error::StoreError;

/// Default idle TTL: 24 hours.
pub const DEFAULT_TTL_SECS: i64 = 60 * 60 * 24;

/// Summary statistics for a session.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub duration_seconds: f64,
    pub has_project: bool,
}

/// Durable key-value store of conversation sessions with TTL expiry.
///
/// Lease semantics: every successful `get` refreshes last-activity and the
/// expiry lease (read extends the lease), so active sessions never expire
/// mid-use. Use [`SessionStore::peek`] for reads that must not touch the
/// lease.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    ttl: ChronoDuration,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, std::time::Duration::from_secs(DEFAULT_TTL_SECS as u64))
    }

    pub fn with_ttl(db: Database, ttl: std::time::Duration) -> Self {
        Self {
            db,
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(DEFAULT_TTL_SECS)),
        }
    }

    /// Create a new session record.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn create(&self, id: &SessionId) -> Result<Session, StoreError> {
        let session = Session::new(id.clone());
        self.save(&session)?;
        info!(session_id = %id, "session created");
        Ok(session)
    }

    /// Get a session, refreshing its activity timestamp and expiry lease.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut session = self
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.last_activity = Utc::now();
        self.save(&session)?;
        Ok(session)
    }

    /// Lease-free read: does not refresh last-activity or the TTL.
    pub fn peek(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.load(id)
    }

    /// Persist a session. Idempotent overwrite; resets the expiry lease.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let data = serde_json::to_string(session)?;
        let expires_at = (Utc::now() + self.ttl).to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, data, created_at, last_activity, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    data = excluded.data,
                    last_activity = excluded.last_activity,
                    expires_at = excluded.expires_at",
                rusqlite::params![
                    session.session_id.as_str(),
                    data,
                    session.created_at.to_rfc3339(),
                    session.last_activity.to_rfc3339(),
                    expires_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Delete a session. Returns whether a record was removed.
    /// The only way (besides TTL expiry) a session leaves the active index.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        let rows = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])
                .map_err(StoreError::from)
        })?;
        if rows > 0 {
            info!(session_id = %id, "session deleted");
        }
        Ok(rows > 0)
    }

    /// All session ids whose lease has not expired.
    pub fn list_active(&self) -> Result<Vec<SessionId>, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM sessions WHERE expires_at > ?1")?;
            let rows = stmt
                .query_map([now], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(SessionId::from_raw).collect())
        })
    }

    /// Append a message, creating the session if absent.
    #[instrument(skip(self, content, metadata), fields(session_id = %id, role = %role))]
    pub fn append_message(
        &self,
        id: &SessionId,
        role: Role,
        content: &str,
        metadata: Map<String, Value>,
    ) -> Result<Message, StoreError> {
        let mut session = match self.load(id)? {
            Some(s) => s,
            None => Session::new(id.clone()),
        };
        let message = session.append(Message::new(role, content, metadata)).clone();
        self.save(&session)?;
        Ok(message)
    }

    /// Conversation history in append order. Missing session yields an
    /// empty history, not an error.
    pub fn history(
        &self,
        id: &SessionId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let Some(session) = self.load(id)? else {
            return Ok(Vec::new());
        };
        let messages = session.messages;
        Ok(match limit {
            Some(n) if messages.len() > n => messages[messages.len() - n..].to_vec(),
            _ => messages,
        })
    }

    /// Shallow-merge the given entries into the session context.
    #[instrument(skip(self, update), fields(session_id = %id))]
    pub fn update_context(
        &self,
        id: &SessionId,
        update: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut session = self
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        for (k, v) in update {
            session.context.insert(k, v);
        }
        self.save(&session)
    }

    pub fn stats(&self, id: &SessionId) -> Result<SessionStats, StoreError> {
        let session = self
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        let duration = session.last_activity - session.created_at;
        Ok(SessionStats {
            session_id: session.session_id.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            message_count: session.messages.len(),
            duration_seconds: duration.num_milliseconds() as f64 / 1000.0,
            has_project: session.has_project(),
        })
    }

    /// Remove all sessions whose lease expired. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().to_rfc3339();
        let rows = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])
                .map_err(StoreError::from)
        })?;
        Ok(rows)
    }

    /// Load and deserialize a row. Rows past their lease read as absent
    /// even before the sweep removes them.
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<(String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT data, expires_at FROM sessions WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
                None => Ok(None),
            }
        })?;

        let Some((data, expires_at)) = row else {
            return Ok(None);
        };

        if let Ok(expiry) = DateTime::parse_from_rfc3339(&expires_at) {
            if expiry.with_timezone(&Utc) <= Utc::now() {
                return Ok(None);
            }
        }

        let session: Session = serde_json::from_str(&data)?;
        Ok(Some(session))
    }

    #[cfg(test)]
    fn expires_at(&self, id: &SessionId) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT expires_at FROM sessions WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_get() {
        let store = store();
        let id = SessionId::from_raw("sess_a");
        store.create(&id).unwrap();
        let session = store.get(&id).unwrap();
        assert_eq!(session.session_id, id);
        assert!(session.messages.is_empty());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = store();
        let err = store.get(&SessionId::from_raw("nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn save_is_idempotent() {
        let store = store();
        let id = SessionId::from_raw("sess_idem");
        let session = store.create(&id).unwrap();

        store.save(&session).unwrap();
        let first = store.get(&id).unwrap();
        store.save(&session).unwrap();
        let second = store.get(&id).unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.messages.len(), second.messages.len());
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn history_returns_messages_in_call_order() {
        let store = store();
        let id = SessionId::from_raw("sess_hist");
        for i in 0..7 {
            store
                .append_message(&id, Role::User, &format!("message {i}"), Map::new())
                .unwrap();
        }

        let all = store.history(&id, None).unwrap();
        assert_eq!(all.len(), 7);
        for (i, msg) in all.iter().enumerate() {
            assert_eq!(msg.content, format!("message {i}"));
        }
    }

    #[test]
    fn history_limit_takes_tail() {
        let store = store();
        let id = SessionId::from_raw("sess_tail");
        for i in 0..5 {
            store
                .append_message(&id, Role::User, &format!("m{i}"), Map::new())
                .unwrap();
        }
        let last2 = store.history(&id, Some(2)).unwrap();
        assert_eq!(last2.len(), 2);
        assert_eq!(last2[0].content, "m3");
        assert_eq!(last2[1].content, "m4");
    }

    #[test]
    fn history_of_missing_session_is_empty() {
        let store = store();
        let history = store.history(&SessionId::from_raw("ghost"), None).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn append_message_creates_session() {
        let store = store();
        let id = SessionId::from_raw("sess_auto");
        let msg = store
            .append_message(&id, Role::User, "hello", Map::new())
            .unwrap();
        assert_eq!(msg.role, Role::User);
        assert!(store.get(&id).is_ok());
    }

    #[test]
    fn delete_removes_from_active_index() {
        let store = store();
        let id = SessionId::from_raw("sess_del");
        store.create(&id).unwrap();
        assert!(store.list_active().unwrap().contains(&id));

        assert!(store.delete(&id).unwrap());
        assert!(!store.list_active().unwrap().contains(&id));
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn update_context_shallow_merges() {
        let store = store();
        let id = SessionId::from_raw("sess_ctx");
        store.create(&id).unwrap();

        let mut first = Map::new();
        first.insert("a".into(), serde_json::json!(1));
        first.insert("b".into(), serde_json::json!("x"));
        store.update_context(&id, first).unwrap();

        let mut second = Map::new();
        second.insert("b".into(), serde_json::json!("y"));
        store.update_context(&id, second).unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.context["a"], serde_json::json!(1));
        assert_eq!(session.context["b"], serde_json::json!("y"));
    }

    #[test]
    fn update_context_missing_session_errors() {
        let store = store();
        let err = store
            .update_context(&SessionId::from_raw("ghost"), Map::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn stats_reports_counts_and_project_flag() {
        let store = store();
        let id = SessionId::from_raw("sess_stats");
        store.append_message(&id, Role::User, "a", Map::new()).unwrap();
        store.append_message(&id, Role::Assistant, "b", Map::new()).unwrap();

        let stats = store.stats(&id).unwrap();
        assert_eq!(stats.message_count, 2);
        assert!(!stats.has_project);
        assert!(stats.duration_seconds >= 0.0);

        let mut update = Map::new();
        update.insert(
            forge_core::session::PROJECT_CONTEXT_KEY.into(),
            serde_json::json!({"project_id": null}),
        );
        store.update_context(&id, update).unwrap();
        assert!(store.stats(&id).unwrap().has_project);
    }

    #[test]
    fn get_extends_lease() {
        let store = store();
        let id = SessionId::from_raw("sess_lease");
        store.create(&id).unwrap();
        let before = store.expires_at(&id).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        store.get(&id).unwrap();
        let after = store.expires_at(&id).unwrap().unwrap();
        assert!(after > before, "lease not extended: {before} -> {after}");
    }

    #[test]
    fn peek_does_not_extend_lease() {
        let store = store();
        let id = SessionId::from_raw("sess_peek");
        store.create(&id).unwrap();
        let before = store.expires_at(&id).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(store.peek(&id).unwrap().is_some());
        let after = store.expires_at(&id).unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn expired_session_reads_as_absent() {
        let store = SessionStore::with_ttl(
            Database::in_memory().unwrap(),
            std::time::Duration::from_millis(10),
        );
        let id = SessionId::from_raw("sess_exp");
        store.create(&id).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(store.peek(&id).unwrap().is_none());
        assert!(store.get(&id).is_err());
        assert!(store.list_active().unwrap().is_empty());
    }

    #[test]
    fn purge_expired_removes_only_expired() {
        let db = Database::in_memory().unwrap();
        let short = SessionStore::with_ttl(db.clone(), std::time::Duration::from_millis(10));
        let long = SessionStore::with_ttl(db.clone(), std::time::Duration::from_secs(3600));

        short.create(&SessionId::from_raw("old")).unwrap();
        long.create(&SessionId::from_raw("fresh")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(30));
        let removed = long.purge_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(long.peek(&SessionId::from_raw("fresh")).unwrap().is_some());
    }
}
