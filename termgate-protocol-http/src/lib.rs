mod ansi;
mod api;
mod heuristics;
mod messages;
mod session;
mod watcher;

use std::net::SocketAddr;

use anyhow::Result;
use poem::listener::TcpListener;
use poem::middleware::Cors;
use poem::{get, Endpoint, EndpointExt, IntoResponse, Route, Server};
use tracing::*;

pub use ansi::strip_ansi;
pub use heuristics::{
    build_prompt_pattern, detect_interactive_state, hint_for, InteractiveState,
};
pub use messages::{ClientMessage, Detection, Hint, HintAction, ServerMessage};
pub use session::{CommandEntry, TerminalSession};
use termgate_core::Services;
use termgate_protocol_ssh::HostKeyPolicy;

/// HTTP surface of the gateway: the `/ws/terminal` duplex endpoint behind
/// the configured CORS allow-list.
pub struct HTTPProtocolServer {
    services: Services,
    host_key_policy: HostKeyPolicy,
}

impl HTTPProtocolServer {
    pub fn new(services: &Services) -> Self {
        HTTPProtocolServer {
            services: services.clone(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Replaces the default accept-all host key posture for deployments that
    /// pin their target hosts.
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub async fn run(self, address: SocketAddr) -> Result<()> {
        let cors_origins = { self.services.config.lock().await.cors_origins.clone() };
        let mut cors = Cors::new();
        if !cors_origins.iter().any(|origin| origin == "*") {
            for origin in &cors_origins {
                cors = cors.allow_origin(origin);
            }
        }

        let app = Route::new()
            .at("/ws/terminal", get(api::terminal_ws))
            .with(cors)
            .data(self.services.clone())
            .data(self.host_key_policy.clone())
            .around(move |ep, req| async move {
                let method = req.method().clone();
                let url = req.original_uri().clone();
                let response = ep.call(req).await?.into_response();
                debug!(%method, %url, status=%response.status(), "Request");
                Ok(response)
            });

        info!(%address, "Accepting terminal connections");
        Server::new(TcpListener::bind(address)).run(app).await?;
        Ok(())
    }
}
