mod jwt;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use jwt::JwtTokenVerifier;
pub use memory::{MemoryConnectionProvider, MemorySessionLogStore};
use termgate_common::{CredentialRecord, SessionLogId, TermgateError};

/// Verified identity carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub username: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<TokenClaims, TermgateError>;
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Resolves a stored connection, scoped to its owner. Records belonging
    /// to other users are reported as not found.
    async fn load_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<CredentialRecord, TermgateError>;
}

#[derive(Debug, Clone)]
pub struct SessionLogOpen {
    pub user_id: String,
    pub connection_id: String,
    pub host: String,
    pub username: String,
    pub start_time: DateTime<Utc>,
}

#[async_trait]
pub trait SessionLogStore: Send + Sync {
    async fn open_session_log(&self, entry: SessionLogOpen)
        -> Result<SessionLogId, TermgateError>;

    /// `commands_json` is a JSON array of `{command, timestamp}` entries.
    async fn close_session_log(
        &self,
        id: SessionLogId,
        end_time: DateTime<Utc>,
        commands_json: String,
    ) -> Result<(), TermgateError>;
}
