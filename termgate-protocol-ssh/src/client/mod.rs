mod channel_session;
mod error;
mod handler;

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use channel_session::SessionChannel;
pub use error::SshClientError;
use futures::pin_mut;
pub use handler::HostKeyPolicy;
use handler::ClientHandler;
use russh::client::Handle;
use russh::keys::PrivateKeyWithHashAlg;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::*;

use termgate_common::{ClientId, CredentialRecord, SshAuth};

use crate::keys::load_private_key;
use crate::{ChannelOperation, PtyRequest};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Key(#[from] russh::keys::Error),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("Could not resolve address")]
    Resolve,

    #[error("Connection timed out after {0} seconds")]
    Timeout(u64),

    #[error("Authentication failed")]
    Authentication,

    #[error("Aborted")]
    Aborted,

    #[error("Internal error")]
    Internal,
}

#[derive(Debug)]
pub enum RCEvent {
    State(RCState),
    Output(Bytes),
    Eof,
    Close,
    ExitStatus(u32),
    Done,
}

pub type RCCommandReply = oneshot::Sender<Result<(), SshClientError>>;

#[derive(Debug)]
pub enum RCCommand {
    Connect(CredentialRecord),
    OpenShell(PtyRequest),
    Channel(ChannelOperation),
    Disconnect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RCState {
    NotInitialized,
    Connecting,
    Connected,
    Disconnected,
}

/// Actor owning one SSH transport and its single shell channel. Commands
/// arrive over `command_tx`; PTY output and lifecycle changes leave over
/// `event_rx`; `abort_tx` tears the whole connection down.
pub struct RemoteClient {
    client_id: ClientId,
    tx: UnboundedSender<RCEvent>,
    session: Option<Handle<ClientHandler>>,
    channel_ops_tx: Option<UnboundedSender<ChannelOperation>>,
    state: RCState,
    command_rx: UnboundedReceiver<(RCCommand, Option<RCCommandReply>)>,
    abort_rx: UnboundedReceiver<()>,
    child_tasks: Vec<JoinHandle<Result<(), SshClientError>>>,
    connect_timeout: Duration,
    host_key_policy: HostKeyPolicy,
}

pub struct RemoteClientHandles {
    pub event_rx: UnboundedReceiver<RCEvent>,
    pub command_tx: UnboundedSender<(RCCommand, Option<RCCommandReply>)>,
    pub abort_tx: UnboundedSender<()>,
}

impl RemoteClient {
    pub fn create(
        client_id: ClientId,
        connect_timeout: Duration,
        host_key_policy: HostKeyPolicy,
    ) -> RemoteClientHandles {
        let (event_tx, event_rx) = unbounded_channel();
        let (command_tx, command_rx) = unbounded_channel();
        let (abort_tx, abort_rx) = unbounded_channel();

        let this = Self {
            client_id,
            tx: event_tx,
            session: None,
            channel_ops_tx: None,
            state: RCState::NotInitialized,
            command_rx,
            abort_rx,
            child_tasks: vec![],
            connect_timeout,
            host_key_policy,
        };

        tokio::spawn(this.run().instrument(Span::current()));

        RemoteClientHandles {
            event_rx,
            command_tx,
            abort_tx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some((command, reply)) = command else { break };
                    debug!(session=%self.client_id, ?command, "command");
                    let result = self.handle_command(command).await;
                    let brk = matches!(result, Ok(true));
                    if let Err(error) = &result {
                        debug!(session=%self.client_id, ?error, "Command failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result.map(|_| ()));
                    }
                    if brk {
                        break;
                    }
                }
                Some(_) = self.abort_rx.recv() => {
                    debug!(session=%self.client_id, "Abort requested");
                    self.disconnect().await;
                    break;
                }
            }
        }
        info!(session=%self.client_id, "Client session closed");
    }

    fn set_state(&mut self, state: RCState) -> Result<(), SshClientError> {
        self.state = state.clone();
        self.tx
            .send(RCEvent::State(state))
            .map_err(|_| SshClientError::MpscError)?;
        Ok(())
    }

    fn set_disconnected(&mut self) {
        self.session = None;
        self.channel_ops_tx = None;
        let _ = self.set_state(RCState::Disconnected);
        let _ = self.tx.send(RCEvent::Done);
    }

    async fn handle_command(&mut self, command: RCCommand) -> Result<bool, SshClientError> {
        match command {
            RCCommand::Connect(record) => match self.connect(record).await {
                Ok(()) => {
                    self.set_state(RCState::Connected)?;
                }
                Err(error) => {
                    self.set_disconnected();
                    return Err(SshClientError::Connection(error));
                }
            },
            RCCommand::OpenShell(pty) => {
                self.open_shell(pty).await?;
            }
            RCCommand::Channel(op) => {
                self.apply_channel_op(op);
            }
            RCCommand::Disconnect => {
                self.disconnect().await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn connect(&mut self, record: CredentialRecord) -> Result<(), ConnectionError> {
        let address_str = format!("{}:{}", record.host, record.port);
        let address = match address_str
            .to_socket_addrs()
            .map_err(ConnectionError::Io)
            .and_then(|mut x| x.next().ok_or(ConnectionError::Resolve))
        {
            Ok(address) => address,
            Err(error) => {
                error!(?error, address=%address_str, "Cannot resolve target address");
                return Err(error);
            }
        };

        info!(session=%self.client_id, ?address, username=%record.username, "Connecting");
        let _ = self.set_state(RCState::Connecting);

        let config = Arc::new(russh::client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });
        let handler = ClientHandler {
            client_id: self.client_id.clone(),
            policy: self.host_key_policy.clone(),
        };

        let timeout_secs = self.connect_timeout.as_secs();
        let fut_connect = tokio::time::timeout(
            self.connect_timeout,
            Self::connect_and_auth(config, address, handler, record),
        );
        pin_mut!(fut_connect);

        tokio::select! {
            result = &mut fut_connect => {
                let session = result.map_err(|_| ConnectionError::Timeout(timeout_secs))??;
                self.session = Some(session);
                info!(session=%self.client_id, ?address, "Connected");
                Ok(())
            }
            Some(_) = self.abort_rx.recv() => {
                info!(session=%self.client_id, "Abort requested during connect");
                Err(ConnectionError::Aborted)
            }
        }
    }

    async fn connect_and_auth(
        config: Arc<russh::client::Config>,
        address: std::net::SocketAddr,
        handler: ClientHandler,
        record: CredentialRecord,
    ) -> Result<Handle<ClientHandler>, ConnectionError> {
        let mut session = russh::client::connect(config, address, handler).await?;

        let auth_result = match &record.auth {
            SshAuth::Password { password } => {
                session
                    .authenticate_password(
                        record.username.as_str(),
                        password.expose_secret().as_str(),
                    )
                    .await?
            }
            SshAuth::PrivateKey { key, passphrase } => {
                let key = load_private_key(key, passphrase.as_ref())?;
                let hash_alg = session.best_supported_rsa_hash().await.ok().flatten().flatten();
                session
                    .authenticate_publickey(
                        record.username.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
            }
        };

        if !auth_result.success() {
            warn!(username=%record.username, "Auth rejected");
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            return Err(ConnectionError::Authentication);
        }

        Ok(session)
    }

    async fn open_shell(&mut self, pty: PtyRequest) -> Result<(), SshClientError> {
        if let Some(session) = &self.session {
            let channel = session.channel_open_session().await?;
            channel
                .request_pty(true, &pty.term, pty.col_width, pty.row_height, 0, 0, &[])
                .await?;
            channel.request_shell(true).await?;

            let (ops_tx, ops_rx) = unbounded_channel();
            self.channel_ops_tx = Some(ops_tx);

            let channel =
                SessionChannel::new(channel, ops_rx, self.tx.clone(), self.client_id.clone());
            self.child_tasks
                .push(tokio::spawn(channel.run().instrument(Span::current())));
        }
        Ok(())
    }

    fn apply_channel_op(&mut self, op: ChannelOperation) {
        match &self.channel_ops_tx {
            Some(tx) => {
                if tx.send(op).is_err() {
                    self.channel_ops_tx = None;
                }
            }
            None => debug!(session=%self.client_id, "Operation for closed channel"),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
        self.set_disconnected();
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        for task in self.child_tasks.drain(..) {
            task.abort();
        }
        debug!(session=%self.client_id, "Dropped");
    }
}
