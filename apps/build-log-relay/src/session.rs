use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{FutureExt, Sink};
use tracing::{debug, error, info, warn};

use crate::channel::{LogChannel, TerminalMessage};
use crate::error::RelayError;
use crate::log_tracker::LogCursor;
use crate::telemetry;
use crate::upstream::{BuildRef, BuildServer, BuildStatus, UpstreamHandle};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Pause between console polls while the build is running.
    pub poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Streaming,
    Finalizing,
    Closed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Build completed and the client received `{"status": "Build finished"}`.
    Finished,
    /// The client received `{"error": ...}` describing the failure.
    Failed(RelayError),
    /// The client went away; nothing terminal was delivered.
    ClientDisconnected,
}

impl SessionOutcome {
    pub fn metric_label(&self) -> &'static str {
        match self {
            SessionOutcome::Finished => "finished",
            SessionOutcome::Failed(err) => err.metric_label(),
            SessionOutcome::ClientDisconnected => "client_disconnected",
        }
    }
}

/// One websocket's worth of log relaying for a single build.
///
/// Polls the console while the build runs, forwards only unseen output, and
/// always finishes by closing the channel, after at most one terminal frame.
pub struct LogStreamSession {
    upstream: UpstreamHandle,
    build: BuildRef,
    settings: StreamSettings,
    phase: SessionPhase,
    cursor: LogCursor,
}

impl LogStreamSession {
    pub fn new(upstream: UpstreamHandle, build: BuildRef, settings: StreamSettings) -> Self {
        Self {
            upstream,
            build,
            settings,
            phase: SessionPhase::Initializing,
            cursor: LogCursor::new(),
        }
    }

    pub async fn run<S>(mut self, mut channel: LogChannel<S>) -> SessionOutcome
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        telemetry::record_session_started();
        info!(build = %self.build, "log stream opened");

        let result = AssertUnwindSafe(self.drive(&mut channel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RelayError::Unexpected(panic_message(panic))));

        let outcome = match result {
            Ok(()) => {
                if channel.send_terminal(&TerminalMessage::finished()).await {
                    info!(
                        build = %self.build,
                        delivered = self.cursor.delivered(),
                        "build finished; log stream complete"
                    );
                    SessionOutcome::Finished
                } else {
                    SessionOutcome::ClientDisconnected
                }
            }
            Err(RelayError::ClientDisconnected) => SessionOutcome::ClientDisconnected,
            Err(err) => {
                self.report(&err);
                if let Some(message) = err.client_message() {
                    channel.send_terminal(&TerminalMessage::error(message)).await;
                }
                SessionOutcome::Failed(err)
            }
        };

        if outcome == SessionOutcome::ClientDisconnected {
            info!(build = %self.build, "client disconnected from log stream");
        }

        channel.close().await;
        self.enter(match outcome {
            SessionOutcome::Finished
            | SessionOutcome::Failed(RelayError::ConnectionUnavailable) => SessionPhase::Closed,
            _ => SessionPhase::Aborted,
        });
        telemetry::record_session_completed(outcome.metric_label());
        outcome
    }

    async fn drive<S>(&mut self, channel: &mut LogChannel<S>) -> Result<(), RelayError>
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        let server = match self.upstream.server() {
            Some(server) => server.clone(),
            None => return Err(RelayError::ConnectionUnavailable),
        };
        if !self.build.is_well_formed() {
            return Err(RelayError::BuildNotFound {
                job: self.build.job_name.clone(),
                number: self.build.build_number,
            });
        }

        let mut status = self.fetch_status(&server, channel).await?;
        if status.is_running {
            self.enter(SessionPhase::Streaming);
        }

        while status.is_running {
            self.flush(&server, channel).await?;

            status = self.fetch_status(&server, channel).await?;
            if !status.is_running {
                info!(build = %self.build, "build finished");
                // Output written between the last poll and completion.
                self.flush(&server, channel).await?;
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = channel.disconnected() => return Err(RelayError::ClientDisconnected),
            }
        }

        self.enter(SessionPhase::Finalizing);
        self.flush(&server, channel).await
    }

    async fn fetch_status<S>(
        &self,
        server: &Arc<dyn BuildServer>,
        channel: &LogChannel<S>,
    ) -> Result<BuildStatus, RelayError>
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        ensure_listening(channel)?;
        server
            .build_status(&self.build)
            .await
            .map_err(|err| RelayError::from_upstream(&self.build, err))
    }

    /// Fetches the cumulative console and sends whatever the client has not
    /// seen. The offset only advances once the chunk is on the wire.
    async fn flush<S>(
        &mut self,
        server: &Arc<dyn BuildServer>,
        channel: &mut LogChannel<S>,
    ) -> Result<(), RelayError>
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        ensure_listening(channel)?;
        let log = server
            .console_text(&self.build)
            .await
            .map_err(|err| RelayError::from_upstream(&self.build, err))?;

        let (delta, next) = self.cursor.pending(&log);
        if delta.is_empty() {
            return Ok(());
        }

        channel.send_chunk(delta).await?;
        self.cursor.commit(next);
        telemetry::record_chunk_sent(delta.len());
        Ok(())
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(
            build = %self.build,
            from = ?self.phase,
            to = ?phase,
            "log stream phase change"
        );
        self.phase = phase;
    }

    fn report(&self, err: &RelayError) {
        let build = &self.build;
        match err {
            RelayError::ConnectionUnavailable => {
                warn!(%build, "jenkins connection unavailable; rejecting log stream")
            }
            RelayError::BuildNotFound { .. } => info!(%build, "build not found"),
            RelayError::Upstream(message) => {
                warn!(%build, error = %message, "jenkins api error")
            }
            RelayError::Unexpected(detail) => {
                error!(%build, error = %detail, "unexpected log stream failure")
            }
            RelayError::ClientDisconnected => {}
        }
    }
}

fn ensure_listening<S>(channel: &LogChannel<S>) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    if channel.is_open() {
        Ok(())
    } else {
        Err(RelayError::ClientDisconnected)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}
