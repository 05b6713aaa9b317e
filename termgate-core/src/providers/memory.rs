use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use termgate_common::{CredentialRecord, SessionLogId, TermgateError};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConnectionProvider, SessionLogOpen, SessionLogStore};

/// In-memory connection store standing in for the out-of-scope database.
/// Records are keyed per owner; lookups for other users miss.
#[derive(Default)]
pub struct MemoryConnectionProvider {
    records: Mutex<HashMap<(String, String), CredentialRecord>>,
}

impl MemoryConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, connection_id: &str, record: CredentialRecord) {
        self.records
            .lock()
            .await
            .insert((user_id.to_owned(), connection_id.to_owned()), record);
    }
}

#[async_trait]
impl ConnectionProvider for MemoryConnectionProvider {
    async fn load_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<CredentialRecord, TermgateError> {
        self.records
            .lock()
            .await
            .get(&(user_id.to_owned(), connection_id.to_owned()))
            .cloned()
            .ok_or_else(|| TermgateError::ConnectionNotFound(connection_id.to_owned()))
    }
}

/// One audit row for a terminal session. `content` stays empty for terminal
/// rows; it only carries chat transcripts for the AI chat session type.
#[derive(Debug, Clone)]
pub struct SessionLogRow {
    pub user_id: String,
    pub connection_id: String,
    pub kind: &'static str,
    pub content: Option<String>,
    pub host: String,
    pub username: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub commands_executed: Option<String>,
}

#[derive(Default)]
pub struct MemorySessionLogStore {
    rows: Mutex<HashMap<SessionLogId, SessionLogRow>>,
}

impl MemorySessionLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, id: SessionLogId) -> Option<SessionLogRow> {
        self.rows.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl SessionLogStore for MemorySessionLogStore {
    async fn open_session_log(
        &self,
        entry: SessionLogOpen,
    ) -> Result<SessionLogId, TermgateError> {
        let id = Uuid::new_v4();
        self.rows.lock().await.insert(
            id,
            SessionLogRow {
                user_id: entry.user_id,
                connection_id: entry.connection_id,
                kind: "terminal",
                content: None,
                host: entry.host,
                username: entry.username,
                start_time: entry.start_time,
                end_time: None,
                duration_seconds: None,
                commands_executed: None,
            },
        );
        Ok(id)
    }

    async fn close_session_log(
        &self,
        id: SessionLogId,
        end_time: DateTime<Utc>,
        commands_json: String,
    ) -> Result<(), TermgateError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&id)
            .ok_or(TermgateError::SessionLogNotFound(id))?;
        row.duration_seconds = Some((end_time - row.start_time).num_seconds());
        row.end_time = Some(end_time);
        row.commands_executed = Some(commands_json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use termgate_common::SshAuth;

    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord {
            host: "10.0.0.5".to_owned(),
            port: 22,
            username: "deploy".to_owned(),
            auth: SshAuth::default(),
        }
    }

    #[tokio::test]
    async fn test_connection_lookup_is_user_scoped() {
        let provider = MemoryConnectionProvider::new();
        provider.insert("user-1", "conn-1", record()).await;

        assert!(provider.load_connection("user-1", "conn-1").await.is_ok());
        assert!(matches!(
            provider.load_connection("user-2", "conn-1").await,
            Err(TermgateError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_log_lifecycle() {
        let store = MemorySessionLogStore::new();
        let start = Utc::now();
        let id = store
            .open_session_log(SessionLogOpen {
                user_id: "user-1".to_owned(),
                connection_id: "conn-1".to_owned(),
                host: "10.0.0.5".to_owned(),
                username: "deploy".to_owned(),
                start_time: start,
            })
            .await
            .unwrap();

        let end = start + chrono::Duration::seconds(42);
        store
            .close_session_log(id, end, "[]".to_owned())
            .await
            .unwrap();

        let row = store.row(id).await.unwrap();
        assert_eq!(row.kind, "terminal");
        assert_eq!(row.content, None);
        assert_eq!(row.end_time, Some(end));
        assert_eq!(row.duration_seconds, Some(42));
        assert_eq!(row.commands_executed.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_closing_unknown_row_fails() {
        let store = MemorySessionLogStore::new();
        let result = store
            .close_session_log(Uuid::new_v4(), Utc::now(), "[]".to_owned())
            .await;
        assert!(matches!(result, Err(TermgateError::SessionLogNotFound(_))));
    }
}
