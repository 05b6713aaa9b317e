use bytes::Bytes;
use russh::client::Msg;
use russh::Channel;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::*;

use termgate_common::ClientId;

use super::error::SshClientError;
use crate::{ChannelOperation, RCEvent};

/// Pumps operations into the shell channel and channel messages out to the
/// session's event stream.
pub struct SessionChannel {
    client_channel: Channel<Msg>,
    ops_rx: UnboundedReceiver<ChannelOperation>,
    events_tx: UnboundedSender<RCEvent>,
    client_id: ClientId,
}

impl SessionChannel {
    pub fn new(
        client_channel: Channel<Msg>,
        ops_rx: UnboundedReceiver<ChannelOperation>,
        events_tx: UnboundedSender<RCEvent>,
        client_id: ClientId,
    ) -> Self {
        SessionChannel {
            client_channel,
            ops_rx,
            events_tx,
            client_id,
        }
    }

    pub async fn run(mut self) -> Result<(), SshClientError> {
        loop {
            tokio::select! {
                incoming = self.ops_rx.recv() => {
                    match incoming {
                        Some(ChannelOperation::Data(data)) => {
                            // Input write failures are logged and skipped; a
                            // dead channel surfaces on the next wait() below.
                            if let Err(error) = self.client_channel.data(&*data).await {
                                warn!(session=%self.client_id, ?error, "Failed to write to SSH channel");
                            }
                        }
                        Some(ChannelOperation::ResizePty { col_width, row_height }) => {
                            if let Err(error) = self
                                .client_channel
                                .window_change(col_width, row_height, 0, 0)
                                .await
                            {
                                debug!(session=%self.client_id, ?error, "Failed to resize PTY");
                            }
                        }
                        Some(ChannelOperation::Close) => break,
                        None => break,
                    }
                }
                channel_event = self.client_channel.wait() => {
                    match channel_event {
                        Some(russh::ChannelMsg::Data { data }) => {
                            let bytes: &[u8] = &data;
                            self.events_tx.send(RCEvent::Output(
                                Bytes::from(bytes.to_vec()),
                            )).map_err(|_| SshClientError::MpscError)?;
                        }
                        Some(russh::ChannelMsg::ExtendedData { data, ext: _ }) => {
                            // A PTY session merges stderr into the stream.
                            let bytes: &[u8] = &data;
                            self.events_tx.send(RCEvent::Output(
                                Bytes::from(bytes.to_vec()),
                            )).map_err(|_| SshClientError::MpscError)?;
                        }
                        Some(russh::ChannelMsg::Eof) => {
                            self.events_tx.send(RCEvent::Eof).map_err(|_| SshClientError::MpscError)?;
                        }
                        Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                            self.events_tx.send(RCEvent::ExitStatus(exit_status)).map_err(|_| SshClientError::MpscError)?;
                        }
                        Some(russh::ChannelMsg::Close) => {
                            self.events_tx.send(RCEvent::Close).map_err(|_| SshClientError::MpscError)?;
                            break
                        }
                        Some(russh::ChannelMsg::WindowAdjusted { .. }) => { }
                        Some(msg) => {
                            debug!(session=%self.client_id, "Unhandled channel message: {:?}", msg);
                        }
                        None => {
                            self.events_tx.send(RCEvent::Close).map_err(|_| SshClientError::MpscError)?;
                            break
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        debug!(session=%self.client_id, "Shell channel closed");
    }
}
