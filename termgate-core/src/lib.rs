mod services;
mod state;
pub mod providers;

pub use providers::{
    ConnectionProvider, JwtTokenVerifier, MemoryConnectionProvider, MemorySessionLogStore,
    SessionLogOpen, SessionLogStore, TokenClaims, TokenVerifier,
};
pub use services::Services;
pub use state::{ConnectionPool, SessionHandle, MAX_CONNECTIONS};
