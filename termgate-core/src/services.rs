use std::sync::Arc;

use termgate_common::{TermgateConfig, TermgateError};
use tokio::sync::Mutex;

use crate::providers::{
    ConnectionProvider, JwtTokenVerifier, MemoryConnectionProvider, MemorySessionLogStore,
    SessionLogStore, TokenVerifier,
};
use crate::state::ConnectionPool;

/// Shared service container handed to every protocol surface.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Mutex<TermgateConfig>>,
    pub state: Arc<ConnectionPool>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub connections: Arc<dyn ConnectionProvider>,
    pub session_logs: Arc<dyn SessionLogStore>,
}

impl Services {
    /// Wires the built-in collaborators: JWT verification from the config's
    /// secret, in-memory connection and session-log stores.
    pub fn new(config: TermgateConfig) -> Result<Self, TermgateError> {
        let token_verifier = Arc::new(JwtTokenVerifier::from_config(&config)?);
        Ok(Self::with_providers(
            config,
            token_verifier,
            Arc::new(MemoryConnectionProvider::new()),
            Arc::new(MemorySessionLogStore::new()),
        ))
    }

    pub fn with_providers(
        config: TermgateConfig,
        token_verifier: Arc<dyn TokenVerifier>,
        connections: Arc<dyn ConnectionProvider>,
        session_logs: Arc<dyn SessionLogStore>,
    ) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            state: Arc::new(ConnectionPool::default()),
            token_verifier,
            connections,
            session_logs,
        }
    }
}
