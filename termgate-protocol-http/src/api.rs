use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocket};
use poem::web::{Data, Query};
use poem::{handler, IntoResponse};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tracing::*;

use termgate_common::TermgateError;
use termgate_core::{Services, TokenClaims, TokenVerifier};
use termgate_protocol_ssh::{ConnectionError, HostKeyPolicy, SshClientError};

use crate::messages::{ClientMessage, ServerMessage};
use crate::session::{ConnectError, SessionParams, TerminalSession};

/// Close code used when the handshake token does not verify.
const CLOSE_UNAUTHORIZED: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub client_id: String,
    pub token: String,
}

/// `GET /ws/terminal?client_id=<id>&token=<jwt>`. The token is verified
/// before the upgrade completes; a bad token closes the duplex with 4001
/// without processing a single frame.
#[handler]
pub async fn terminal_ws(
    ws: WebSocket,
    Query(query): Query<TerminalQuery>,
    Data(services): Data<&Services>,
    Data(host_key_policy): Data<&HostKeyPolicy>,
) -> impl IntoResponse {
    let services = services.clone();
    let host_key_policy = host_key_policy.clone();
    let verified = services.token_verifier.verify(&query.token).await;

    ws.on_upgrade(move |mut socket| async move {
        let claims = match verified {
            Ok(claims) => claims,
            Err(_) => {
                debug!(client_id=%query.client_id, "Rejecting duplex: invalid token");
                let _ = socket
                    .send(Message::Close(Some((
                        CLOSE_UNAUTHORIZED.into(),
                        "Unauthorized".to_owned(),
                    ))))
                    .await;
                return;
            }
        };

        let span = info_span!("terminal", client_id=%query.client_id, user=%claims.username);
        handle_session(socket, services, host_key_policy, query.client_id, claims)
            .instrument(span)
            .await;
    })
}

async fn handle_session(
    socket: poem::web::websocket::WebSocketStream,
    services: Services,
    host_key_policy: HostKeyPolicy,
    client_id: String,
    claims: TokenClaims,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = unbounded_channel::<ServerMessage>();

    // Single writer to the duplex; everything the session produces funnels
    // through this channel, so pump and watcher output stays ordered.
    let sender = tokio::spawn(
        async move {
            while let Some(message) = outbound_rx.recv().await {
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(?error, "Failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(error) = sink.send(Message::Text(frame)).await {
                    debug!(?error, "Duplex send failed, stopping sender");
                    break;
                }
            }
        }
        .instrument(Span::current()),
    );

    let mut session: Option<Arc<TerminalSession>> = None;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(?error, "Duplex read failed");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        debug!(?error, "Unparseable frame");
                        let _ = outbound_tx.send(ServerMessage::Error {
                            content: "无效的消息格式".to_owned(),
                        });
                        continue;
                    }
                };
                match parsed {
                    ClientMessage::Ping { timestamp } => {
                        let _ = outbound_tx.send(ServerMessage::Pong {
                            timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
                        });
                    }
                    ClientMessage::Connect { connection_id } => {
                        if session.is_some() {
                            let _ = outbound_tx.send(ServerMessage::Error {
                                content: "当前连接已存在".to_owned(),
                            });
                            continue;
                        }
                        let params = SessionParams {
                            client_id: client_id.clone(),
                            user_id: claims.user_id.clone(),
                            connection_id,
                        };
                        match TerminalSession::open(
                            &services,
                            &outbound_tx,
                            params,
                            host_key_policy.clone(),
                        )
                        .await
                        {
                            Ok(new_session) => {
                                let _ = outbound_tx.send(ServerMessage::Connected {
                                    content: "SSH 连接成功".to_owned(),
                                });
                                session = Some(new_session);
                            }
                            Err(error) => {
                                info!(%error, "Connect failed");
                                let _ = outbound_tx.send(ServerMessage::Error {
                                    content: connect_error_message(&error),
                                });
                            }
                        }
                    }
                    ClientMessage::Data { data } => match &session {
                        Some(session) => session.feed(&data).await,
                        None => {
                            let _ = outbound_tx.send(ServerMessage::Error {
                                content: "尚未建立 SSH 连接".to_owned(),
                            });
                        }
                    },
                    ClientMessage::Resize { cols, rows } => {
                        if let Some(session) = &session {
                            session.resize(cols, rows);
                        }
                    }
                    ClientMessage::WatchCommand => {
                        if let Some(session) = &session {
                            session.watch_begin().await;
                        }
                    }
                    ClientMessage::StopWatch => {
                        if let Some(session) = &session {
                            session.watch_end().await;
                        }
                    }
                    ClientMessage::Disconnect => break,
                    ClientMessage::Unknown => {
                        debug!("Ignoring unknown message type");
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(session) = session.take() {
        session.shutdown().await;
    }
    drop(outbound_tx);
    let _ = sender.await;
    debug!("Duplex closed");
}

fn connect_error_message(error: &ConnectError) -> String {
    match error {
        ConnectError::Store(TermgateError::ConnectionNotFound(_)) => "未找到连接配置".to_owned(),
        ConnectError::Store(error) => format!("查询连接配置失败: {error}"),
        ConnectError::Pattern(_) => "内部错误".to_owned(),
        ConnectError::Dial { host, port, error } => dial_error_message(host, *port, error),
    }
}

fn dial_error_message(host: &str, port: u16, error: &SshClientError) -> String {
    match error {
        SshClientError::Connection(error) => match error {
            ConnectionError::Authentication => "认证失败：用户名或密码/密钥错误".to_owned(),
            ConnectionError::Timeout(secs) => format!("连接超时（{secs}秒）"),
            ConnectionError::Io(error) => {
                format!("网络错误: 无法连接到 {host}:{port} ({error})")
            }
            ConnectionError::Resolve => format!("网络错误: 无法解析 {host}"),
            ConnectionError::Key(error) => format!("私钥错误: {error}"),
            ConnectionError::Ssh(error) => format!("SSH连接失败: {error}"),
            ConnectionError::Aborted => "连接已取消".to_owned(),
            ConnectionError::Internal => "内部错误".to_owned(),
        },
        SshClientError::Russh(error) => format!("SSH协议错误: {error}"),
        SshClientError::MpscError | SshClientError::Other(_) => "内部错误".to_owned(),
    }
}
