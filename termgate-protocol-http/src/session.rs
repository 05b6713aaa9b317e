use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::*;

use async_trait::async_trait;
use termgate_common::{ClientId, SessionLogId, TermgateError};
use termgate_core::{
    ConnectionProvider, Services, SessionHandle, SessionLogOpen, SessionLogStore,
};
use termgate_protocol_ssh::{
    ChannelOperation, HostKeyPolicy, PtyRequest, RCCommand, RCCommandReply, RCEvent, RCState,
    RemoteClient, SshClientError,
};

use crate::ansi::strip_ansi;
use crate::heuristics::{build_prompt_pattern, hint_for, InteractiveState};
use crate::messages::{Detection, ServerMessage};
use crate::watcher::{self, evaluate_watch, WatchVerdict, READ_CHUNK, READ_DEADLINE, WATCH_CAP};

const COMMAND_LOG_CAP: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct CommandEntry {
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionParams {
    pub client_id: ClientId,
    pub user_id: String,
    pub connection_id: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Store(#[from] TermgateError),
    #[error("dial to {host}:{port} failed: {error}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        error: SshClientError,
    },
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

struct Shared {
    watching: bool,
    watch_buffer: Vec<u8>,
    watch_start: Instant,
    last_output: Instant,
    interactive_state: InteractiveState,
    interactive_notified: bool,
    command_log: Vec<CommandEntry>,
}

/// One live browser-to-SSH session: the sole owner of the shell channel's
/// command side, the watch state and the command log. The inbound router
/// calls `feed`/`resize`/`watch_*`; the pump and watcher tasks run until
/// teardown.
pub struct TerminalSession {
    client_id: ClientId,
    host: String,
    port: u16,
    ssh_username: String,
    prompt_pattern: Regex,
    command_tx: UnboundedSender<(RCCommand, Option<RCCommandReply>)>,
    abort_tx: UnboundedSender<()>,
    outbound: UnboundedSender<ServerMessage>,
    shared: Mutex<Shared>,
    session_log_id: Option<SessionLogId>,
    services: Services,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    torn_down: AtomicBool,
    closed: AtomicBool,
}

impl TerminalSession {
    /// Resolves the connection, dials SSH, opens the PTY shell, opens the
    /// audit row and installs the session into the pool. Progress frames go
    /// out over `outbound` along the way. On failure nothing is installed.
    pub async fn open(
        services: &Services,
        outbound: &UnboundedSender<ServerMessage>,
        params: SessionParams,
        host_key_policy: HostKeyPolicy,
    ) -> Result<Arc<Self>, ConnectError> {
        let send = |message: ServerMessage| {
            let _ = outbound.send(message);
        };

        send(ServerMessage::Status {
            content: "正在查询连接配置...".to_owned(),
        });
        let record = services
            .connections
            .load_connection(&params.user_id, &params.connection_id)
            .await?;

        send(ServerMessage::Status {
            content: format!("正在连接 {}:{} ...", record.host, record.port),
        });
        let connect_timeout = services.config.lock().await.ssh_connect_timeout;
        let handles =
            RemoteClient::create(params.client_id.clone(), connect_timeout, host_key_policy);

        send(ServerMessage::Status {
            content: "正在建立 SSH 连接...".to_owned(),
        });
        command_reply(&handles.command_tx, RCCommand::Connect(record.clone()))
            .await
            .map_err(|error| ConnectError::Dial {
                host: record.host.clone(),
                port: record.port,
                error,
            })?;

        send(ServerMessage::Status {
            content: "正在创建终端...".to_owned(),
        });
        command_reply(&handles.command_tx, RCCommand::OpenShell(PtyRequest::default()))
            .await
            .map_err(|error| ConnectError::Dial {
                host: record.host.clone(),
                port: record.port,
                error,
            })?;

        // An audit failure is reported but never blocks the session itself.
        let session_log_id = match services
            .session_logs
            .open_session_log(SessionLogOpen {
                user_id: params.user_id.clone(),
                connection_id: params.connection_id.clone(),
                host: record.host.clone(),
                username: record.username.clone(),
                start_time: Utc::now(),
            })
            .await
        {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(session=%params.client_id, ?error, "Failed to open session log");
                send(ServerMessage::Error {
                    content: "会话审计记录创建失败".to_owned(),
                });
                None
            }
        };

        let prompt_pattern = build_prompt_pattern(&record.username)?;
        let now = Instant::now();
        let session = Arc::new(Self {
            client_id: params.client_id.clone(),
            host: record.host,
            port: record.port,
            ssh_username: record.username,
            prompt_pattern,
            command_tx: handles.command_tx,
            abort_tx: handles.abort_tx,
            outbound: outbound.clone(),
            shared: Mutex::new(Shared {
                watching: false,
                watch_buffer: Vec::new(),
                watch_start: now,
                last_output: now,
                interactive_state: InteractiveState::None,
                interactive_notified: false,
                command_log: Vec::new(),
            }),
            session_log_id,
            services: services.clone(),
            tasks: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        {
            let mut tasks = session.tasks.lock().await;
            tasks.push(tokio::spawn(
                run_pump(session.clone(), handles.event_rx).instrument(Span::current()),
            ));
            tasks.push(tokio::spawn(
                watcher::run_watcher(session.clone()).instrument(Span::current()),
            ));
        }

        services
            .state
            .add(params.client_id, session.clone())
            .await;

        info!(session=%session.client_id, host=%session.host, port=session.port,
              username=%session.ssh_username, "Terminal session established");
        Ok(session)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!(session=%self.client_id, "Outbound channel closed, dropping frame");
        }
    }

    fn send_channel_op(&self, op: ChannelOperation) {
        if self.command_tx.send((RCCommand::Channel(op), None)).is_err() {
            debug!(session=%self.client_id, "SSH command channel closed, dropping input");
        }
    }

    /// Forwards raw input to the shell. A newline marks a submitted command
    /// for the audit log; any input while watching resets the interactive
    /// notification so a fresh prompt can be surfaced.
    pub async fn feed(&self, data: &str) {
        {
            let mut shared = self.shared.lock().await;
            if data.contains('\r') || data.contains('\n') {
                let command = data.trim();
                if !command.is_empty() {
                    shared.command_log.push(CommandEntry {
                        command: command.to_owned(),
                        timestamp: Utc::now(),
                    });
                }
            }
            if shared.watching {
                shared.interactive_notified = false;
                shared.interactive_state = InteractiveState::None;
                shared.last_output = Instant::now();
            }
        }
        self.send_channel_op(ChannelOperation::Data(Bytes::from(data.as_bytes().to_vec())));
    }

    pub async fn watch_begin(&self) {
        let mut shared = self.shared.lock().await;
        let now = Instant::now();
        shared.watching = true;
        shared.watch_buffer.clear();
        shared.watch_start = now;
        shared.last_output = now;
        shared.interactive_state = InteractiveState::None;
        shared.interactive_notified = false;
        debug!(session=%self.client_id, "Watch started");
    }

    pub async fn watch_end(&self) {
        let mut shared = self.shared.lock().await;
        shared.watching = false;
        shared.watch_buffer.clear();
        shared.interactive_state = InteractiveState::None;
        shared.interactive_notified = false;
        debug!(session=%self.client_id, "Watch stopped");
    }

    /// PTY resize; failures in the SSH layer are non-fatal and swallowed.
    pub fn resize(&self, cols: u32, rows: u32) {
        self.send_channel_op(ChannelOperation::ResizePty {
            col_width: cols,
            row_height: rows,
        });
    }

    async fn on_output(&self, bytes: &[u8]) {
        for chunk in bytes.chunks(READ_CHUNK) {
            self.send(ServerMessage::Output {
                data: encode_terminal_bytes(chunk),
            });
        }
        let mut shared = self.shared.lock().await;
        shared.last_output = Instant::now();
        if shared.watching {
            shared.watch_buffer.extend_from_slice(bytes);
            if shared.watch_buffer.len() > WATCH_CAP {
                let excess = shared.watch_buffer.len() - WATCH_CAP;
                shared.watch_buffer.drain(..excess);
            }
        }
    }

    /// One watcher tick: snapshot the watch state, apply the ordered rules,
    /// emit at most one event.
    pub(crate) async fn inspect_watch(&self) {
        let mut shared = self.shared.lock().await;
        if !shared.watching {
            return;
        }
        let now = Instant::now();
        let idle = now.duration_since(shared.last_output);
        let total = now.duration_since(shared.watch_start);
        let clean = strip_ansi(&String::from_utf8_lossy(&shared.watch_buffer));

        match evaluate_watch(
            &self.prompt_pattern,
            shared.watch_buffer.is_empty(),
            &clean,
            idle,
            total,
            shared.interactive_state,
            shared.interactive_notified,
        ) {
            Some(WatchVerdict::Finished(detection)) => {
                shared.watching = false;
                shared.watch_buffer.clear();
                shared.interactive_state = InteractiveState::None;
                shared.interactive_notified = false;
                drop(shared);
                debug!(session=%self.client_id, ?detection, "Watched command finished");
                let output = match detection {
                    Detection::EmptyTimeout => String::new(),
                    _ => clean,
                };
                self.send(ServerMessage::CommandFinished { output, detection });
            }
            Some(WatchVerdict::Interactive(state)) => {
                shared.interactive_state = state;
                shared.interactive_notified = true;
                drop(shared);
                info!(session=%self.client_id, ?state, "Interactive state detected");
                if let Some(hint) = hint_for(state) {
                    self.send(ServerMessage::InteractiveDetected {
                        interactive_type: state,
                        output: clean,
                        hint,
                    });
                }
            }
            None => {}
        }
    }

    /// The SSH side is gone. Finish an active watch window, tell the browser
    /// and run the full shutdown from a separate task (the pump calls this
    /// from inside itself).
    async fn on_eof(self: &Arc<Self>) {
        let finished_output = {
            let mut shared = self.shared.lock().await;
            if shared.watching {
                shared.watching = false;
                let clean = strip_ansi(&String::from_utf8_lossy(&shared.watch_buffer));
                shared.watch_buffer.clear();
                Some(clean)
            } else {
                None
            }
        };
        if let Some(output) = finished_output {
            self.send(ServerMessage::CommandFinished {
                output,
                detection: Detection::ProcessExit,
            });
        }
        self.send(ServerMessage::Disconnected {
            content: "SSH 连接已断开".to_owned(),
        });

        let this = self.clone();
        tokio::spawn(async move { this.close().await });
    }

    /// Full shutdown: teardown, audit row close, pool removal. Idempotent.
    pub async fn shutdown(&self) {
        self.close().await;
    }

    async fn close_session_log(&self) {
        let Some(id) = self.session_log_id else {
            return;
        };
        let commands = {
            let shared = self.shared.lock().await;
            let log = &shared.command_log;
            let start = log.len().saturating_sub(COMMAND_LOG_CAP);
            log[start..].to_vec()
        };
        let commands_json = match serde_json::to_string(&commands) {
            Ok(json) => json,
            Err(error) => {
                warn!(session=%self.client_id, ?error, "Failed to serialize command log");
                return;
            }
        };
        if let Err(error) = self
            .services
            .session_logs
            .close_session_log(id, Utc::now(), commands_json)
            .await
        {
            warn!(session=%self.client_id, ?error, "Failed to close session log");
        }
    }
}

#[async_trait]
impl SessionHandle for TerminalSession {
    /// Cancels pump and watcher and releases the SSH channel and transport.
    /// Does not touch the audit row or the pool (the eviction path).
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.command_tx.send((RCCommand::Disconnect, None));
        let _ = self.abort_tx.send(());
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        debug!(session=%self.client_id, "Session torn down");
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown().await;
        self.close_session_log().await;
        self.services.state.remove(&self.client_id).await;
        info!(session=%self.client_id, "Session closed");
    }
}

/// Single reader of the remote client's event stream. The 500 ms deadline is
/// the cancellation checkpoint; EOF ends the session.
async fn run_pump(
    session: Arc<TerminalSession>,
    mut event_rx: tokio::sync::mpsc::UnboundedReceiver<RCEvent>,
) {
    loop {
        match tokio::time::timeout(READ_DEADLINE, event_rx.recv()).await {
            Err(_) => continue,
            Ok(None) => {
                session.on_eof().await;
                break;
            }
            Ok(Some(event)) => match event {
                RCEvent::Output(bytes) => session.on_output(&bytes).await,
                RCEvent::Eof | RCEvent::Close | RCEvent::Done => {
                    session.on_eof().await;
                    break;
                }
                RCEvent::ExitStatus(code) => {
                    debug!(session=%session.client_id, code, "Remote exit status");
                }
                RCEvent::State(state) => {
                    if state == RCState::Disconnected {
                        session.on_eof().await;
                        break;
                    }
                }
            },
        }
    }
    debug!(session=%session.client_id, "Pump finished");
}

async fn command_reply(
    command_tx: &UnboundedSender<(RCCommand, Option<RCCommandReply>)>,
    command: RCCommand,
) -> Result<(), SshClientError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    command_tx
        .send((command, Some(reply_tx)))
        .map_err(|_| SshClientError::MpscError)?;
    reply_rx.await.map_err(|_| SshClientError::MpscError)?
}

/// Maps PTY bytes 1:1 onto U+0000..U+00FF so arbitrary binary output
/// survives the JSON text frame; the browser reverses the mapping before
/// decoding.
fn encode_terminal_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use termgate_common::TermgateConfig;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use super::*;

    fn test_session() -> (
        Arc<TerminalSession>,
        UnboundedReceiver<ServerMessage>,
        UnboundedReceiver<(RCCommand, Option<RCCommandReply>)>,
    ) {
        let config = TermgateConfig::from_lookup(|_| None).unwrap();
        let services = Services::new(config).unwrap();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let (command_tx, command_rx) = unbounded_channel();
        let (abort_tx, _abort_rx) = unbounded_channel();
        let now = Instant::now();
        let session = Arc::new(TerminalSession {
            client_id: "client-1".to_owned(),
            host: "web1".to_owned(),
            port: 22,
            ssh_username: "deploy".to_owned(),
            prompt_pattern: build_prompt_pattern("deploy").unwrap(),
            command_tx,
            abort_tx,
            outbound: outbound_tx,
            shared: Mutex::new(Shared {
                watching: false,
                watch_buffer: Vec::new(),
                watch_start: now,
                last_output: now,
                interactive_state: InteractiveState::None,
                interactive_notified: false,
                command_log: Vec::new(),
            }),
            session_log_id: None,
            services,
            tasks: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (session, outbound_rx, command_rx)
    }

    #[tokio::test]
    async fn test_feed_records_submitted_commands() {
        let (session, _out, mut commands) = test_session();
        session.feed("l").await;
        session.feed("s").await;
        session.feed("ls -la\r").await;

        let shared = session.shared.lock().await;
        assert_eq!(shared.command_log.len(), 1);
        assert_eq!(shared.command_log[0].command, "ls -la");
        drop(shared);

        // Every keystroke still reached the SSH input side, in order.
        let mut seen = Vec::new();
        while let Ok((command, _)) = commands.try_recv() {
            if let RCCommand::Channel(ChannelOperation::Data(data)) = command {
                seen.push(String::from_utf8(data.to_vec()).unwrap());
            }
        }
        assert_eq!(seen, vec!["l", "s", "ls -la\r"]);
    }

    #[tokio::test]
    async fn test_feed_resets_interactive_notification() {
        let (session, _out, _commands) = test_session();
        session.watch_begin().await;
        {
            let mut shared = session.shared.lock().await;
            shared.interactive_state = InteractiveState::Pager;
            shared.interactive_notified = true;
        }
        session.feed("q").await;
        let shared = session.shared.lock().await;
        assert!(!shared.interactive_notified);
        assert_eq!(shared.interactive_state, InteractiveState::None);
    }

    #[tokio::test]
    async fn test_watch_buffer_is_capped_from_the_front() {
        let (session, mut out, _commands) = test_session();
        session.watch_begin().await;

        session.on_output(&vec![b'a'; WATCH_CAP]).await;
        session.on_output(b"tail-marker").await;

        let shared = session.shared.lock().await;
        assert_eq!(shared.watch_buffer.len(), WATCH_CAP);
        assert!(shared.watch_buffer.ends_with(b"tail-marker"));
        assert_eq!(shared.watch_buffer[0], b'a');
        drop(shared);

        // Output frames never exceed the read chunk size.
        while let Ok(message) = out.try_recv() {
            if let ServerMessage::Output { data } = message {
                assert!(data.chars().count() <= READ_CHUNK);
            }
        }
    }

    #[tokio::test]
    async fn test_watch_begin_then_end_emits_nothing() {
        let (session, mut out, _commands) = test_session();
        session.watch_begin().await;
        session.watch_end().await;
        session.inspect_watch().await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inspect_emits_finish_once() {
        let (session, mut out, _commands) = test_session();
        session.watch_begin().await;
        session.on_output(b"file-a\nfile-b\ndeploy@web1:~$ ").await;
        {
            // Simulate two seconds of idle time.
            let mut shared = session.shared.lock().await;
            shared.last_output = Instant::now() - std::time::Duration::from_secs(3);
        }
        session.inspect_watch().await;
        session.inspect_watch().await;

        let mut finishes = 0;
        while let Ok(message) = out.try_recv() {
            if let ServerMessage::CommandFinished { detection, output } = message {
                assert_eq!(detection, Detection::Prompt);
                assert!(output.contains("deploy@web1"));
                finishes += 1;
            }
        }
        assert_eq!(finishes, 1);
        assert!(!session.shared.lock().await.watching);
    }

    #[tokio::test]
    async fn test_close_writes_last_hundred_commands() {
        let config = TermgateConfig::from_lookup(|_| None).unwrap();
        let store = Arc::new(termgate_core::MemorySessionLogStore::new());
        let services = Services::with_providers(
            config.clone(),
            Arc::new(termgate_core::JwtTokenVerifier::from_config(&config).unwrap()),
            Arc::new(termgate_core::MemoryConnectionProvider::new()),
            store.clone(),
        );

        let (outbound_tx, _outbound_rx) = unbounded_channel();
        let (command_tx, _command_rx) = unbounded_channel();
        let (abort_tx, _abort_rx) = unbounded_channel();
        let id = store
            .open_session_log(SessionLogOpen {
                user_id: "user-1".to_owned(),
                connection_id: "conn-1".to_owned(),
                host: "web1".to_owned(),
                username: "deploy".to_owned(),
                start_time: Utc::now(),
            })
            .await
            .unwrap();
        let now = Instant::now();
        let session = Arc::new(TerminalSession {
            client_id: "client-1".to_owned(),
            host: "web1".to_owned(),
            port: 22,
            ssh_username: "deploy".to_owned(),
            prompt_pattern: build_prompt_pattern("deploy").unwrap(),
            command_tx,
            abort_tx,
            outbound: outbound_tx,
            shared: Mutex::new(Shared {
                watching: false,
                watch_buffer: Vec::new(),
                watch_start: now,
                last_output: now,
                interactive_state: InteractiveState::None,
                interactive_notified: false,
                command_log: Vec::new(),
            }),
            session_log_id: Some(id),
            services,
            tasks: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        for i in 0..150 {
            session.feed(&format!("echo {i}\r")).await;
        }
        session.close().await;

        let row = store.row(id).await.unwrap();
        let commands: Vec<serde_json::Value> =
            serde_json::from_str(&row.commands_executed.unwrap()).unwrap();
        assert_eq!(commands.len(), 100);
        assert_eq!(commands[0]["command"], "echo 50");
        assert_eq!(commands[99]["command"], "echo 149");
        assert!(row.end_time.is_some());
    }

    #[test]
    fn test_terminal_byte_encoding_is_lossless() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = encode_terminal_bytes(&bytes);
        let decoded: Vec<u8> = encoded.chars().map(|c| c as u8).collect();
        assert_eq!(bytes, decoded);
    }
}
