use std::collections::HashSet;
use std::sync::Arc;

use russh::keys::{HashAlg, PublicKey};
use tracing::*;

use termgate_common::ClientId;

/// Host key acceptance policy. `AcceptAll` is the development posture and the
/// default; production deployments inject `KnownFingerprints` with the
/// SHA-256 fingerprints of the hosts they trust.
#[derive(Clone, Debug, Default)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAll,
    KnownFingerprints(Arc<HashSet<String>>),
}

impl HostKeyPolicy {
    fn accepts(&self, key: &PublicKey) -> bool {
        match self {
            HostKeyPolicy::AcceptAll => true,
            HostKeyPolicy::KnownFingerprints(known) => {
                known.contains(&key.fingerprint(HashAlg::Sha256).to_string())
            }
        }
    }
}

pub struct ClientHandler {
    pub client_id: ClientId,
    pub policy: HostKeyPolicy,
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        if self.policy.accepts(server_public_key) {
            debug!(session=%self.client_id, %fingerprint, "Host key accepted");
            Ok(true)
        } else {
            warn!(session=%self.client_id, %fingerprint, "Host key rejected by policy");
            Ok(false)
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        debug!(session=%self.client_id, "Dropped");
    }
}
