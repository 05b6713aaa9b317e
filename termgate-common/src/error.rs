use std::error::Error;

use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum TermgateError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("session log row not found: {0}")]
    SessionLogNotFound(Uuid),
    #[error("invalid configuration value for {name}: {value}")]
    InvalidConfigValue { name: String, value: String },
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl TermgateError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}
