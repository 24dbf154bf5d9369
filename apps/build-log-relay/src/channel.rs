use std::fmt;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RelayError;

pub const BUILD_FINISHED_STATUS: &str = "Build finished";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

/// Structured frame that ends every stream that still has a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TerminalMessage {
    Finished { status: String },
    Failed { error: String },
}

impl TerminalMessage {
    pub fn finished() -> Self {
        TerminalMessage::Finished {
            status: BUILD_FINISHED_STATUS.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TerminalMessage::Failed {
            error: message.into(),
        }
    }
}

/// Outbound half of a log websocket.
///
/// Tracks the channel state itself so that every send and close is guarded by
/// a state check, at most one terminal message goes out and the transport
/// sees at most one close.
pub struct LogChannel<S> {
    sink: S,
    state: ChannelState,
    disconnect: CancellationToken,
    terminal_sent: bool,
}

impl<S> LogChannel<S>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    pub fn new(sink: S, disconnect: CancellationToken) -> Self {
        Self {
            sink,
            state: ChannelState::Open,
            disconnect,
            terminal_sent: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open && !self.disconnect.is_cancelled()
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }

    /// Resolves once the client is known to be gone.
    pub async fn disconnected(&self) {
        self.disconnect.cancelled().await
    }

    pub async fn send_chunk(&mut self, chunk: &str) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::ClientDisconnected);
        }
        self.send(Message::Text(chunk.to_owned())).await
    }

    /// Sends the terminal frame if none was sent yet and the client is still
    /// listening. Returns whether it went out.
    pub async fn send_terminal(&mut self, message: &TerminalMessage) -> bool {
        if self.terminal_sent || !self.is_open() {
            return false;
        }
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode terminal message");
                return false;
            }
        };
        match self.send(Message::Text(payload)).await {
            Ok(()) => {
                self.terminal_sent = true;
                true
            }
            Err(_) => false,
        }
    }

    /// Idempotent; failures from an already-closed transport are swallowed.
    pub async fn close(&mut self) {
        if self.state != ChannelState::Open {
            return;
        }
        self.state = ChannelState::Closing;
        if let Err(err) = self.sink.close().await {
            debug!(error = %err, "websocket already closed");
        }
        self.state = ChannelState::Closed;
        self.disconnect.cancel();
    }

    async fn send(&mut self, message: Message) -> Result<(), RelayError> {
        if let Err(err) = self.sink.send(message).await {
            debug!(error = %err, "websocket send failed; treating as disconnect");
            // The transport is already gone, so there is nothing left to close.
            self.state = ChannelState::Closed;
            self.disconnect.cancel();
            return Err(RelayError::ClientDisconnected);
        }
        Ok(())
    }
}

/// Drains inbound frames and cancels `disconnect` once the client closes the
/// socket, errors, or the stream ends. Client payloads are ignored.
pub async fn watch_disconnect<R, E>(mut inbound: R, disconnect: CancellationToken)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = disconnect.cancelled() => return,
            next = inbound.next() => next,
        };
        match next {
            Some(Ok(Message::Close(frame))) => {
                debug!(reason = ?frame.map(|f| f.reason.to_string()), "client closed websocket");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!(error = %err, "error receiving websocket frame");
                break;
            }
            None => break,
        }
    }
    disconnect.cancel();
}
