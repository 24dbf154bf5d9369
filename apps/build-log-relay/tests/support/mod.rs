#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use build_log_relay::{
    BuildRef, BuildServer, BuildStatus, JobEntry, JobInfo, LogChannel, LogStreamSession,
    SessionOutcome, StreamSettings, TerminalMessage, UpstreamError, UpstreamHandle,
};
use futures::channel::mpsc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Upstream double that replays scripted answers. The last scripted answer of
/// each queue repeats forever.
#[derive(Default)]
pub struct ScriptedServer {
    statuses: Mutex<VecDeque<Result<BuildStatus, UpstreamError>>>,
    job_statuses: Mutex<HashMap<String, VecDeque<Result<BuildStatus, UpstreamError>>>>,
    stalled_consoles: Mutex<HashSet<String>>,
    logs: Mutex<VecDeque<Result<String, UpstreamError>>>,
    jobs: Mutex<Option<Result<Vec<JobEntry>, UpstreamError>>>,
    job_infos: Mutex<HashMap<String, Result<JobInfo, UpstreamError>>>,
    panic_on_console: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(
        self,
        statuses: impl IntoIterator<Item = Result<BuildStatus, UpstreamError>>,
    ) -> Self {
        *self.statuses.lock().unwrap() = statuses.into_iter().collect();
        self
    }

    /// Statuses for one job only; other jobs keep using the shared queue.
    pub fn with_job_statuses(
        self,
        job: &str,
        statuses: impl IntoIterator<Item = Result<BuildStatus, UpstreamError>>,
    ) -> Self {
        self.job_statuses
            .lock()
            .unwrap()
            .insert(job.to_string(), statuses.into_iter().collect());
        self
    }

    /// Console requests for `job` never complete.
    pub fn with_stalled_console(self, job: &str) -> Self {
        self.stalled_consoles.lock().unwrap().insert(job.to_string());
        self
    }

    pub fn with_logs<I, S>(self, logs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.logs.lock().unwrap() = logs.into_iter().map(|log| Ok(log.into())).collect();
        self
    }

    pub fn with_log_results(
        self,
        logs: impl IntoIterator<Item = Result<String, UpstreamError>>,
    ) -> Self {
        *self.logs.lock().unwrap() = logs.into_iter().collect();
        self
    }

    pub fn with_jobs(self, jobs: Result<Vec<JobEntry>, UpstreamError>) -> Self {
        *self.jobs.lock().unwrap() = Some(jobs);
        self
    }

    pub fn with_job_info(self, name: &str, info: Result<JobInfo, UpstreamError>) -> Self {
        self.job_infos.lock().unwrap().insert(name.to_string(), info);
        self
    }

    pub fn panicking_console(mut self) -> Self {
        self.panic_on_console = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next<T: Clone>(queue: &Mutex<VecDeque<T>>, fallback: T) -> T {
    pop_or_repeat(&mut queue.lock().unwrap(), fallback)
}

fn pop_or_repeat<T: Clone>(queue: &mut VecDeque<T>, fallback: T) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or(fallback)
    } else {
        queue.front().cloned().unwrap_or(fallback)
    }
}

#[async_trait]
impl BuildServer for ScriptedServer {
    async fn whoami(&self) -> Result<String, UpstreamError> {
        self.record("whoami");
        Ok("relay-bot".into())
    }

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, UpstreamError> {
        self.record("list_jobs");
        self.jobs.lock().unwrap().clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn job_info(&self, name: &str) -> Result<JobInfo, UpstreamError> {
        self.record("job_info");
        self.job_infos
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(Err(UpstreamError::NotFound))
    }

    async fn build_status(&self, build: &BuildRef) -> Result<BuildStatus, UpstreamError> {
        self.record("build_status");
        if let Some(queue) = self.job_statuses.lock().unwrap().get_mut(&build.job_name) {
            return pop_or_repeat(queue, Ok(BuildStatus::finished()));
        }
        next(&self.statuses, Ok(BuildStatus::finished()))
    }

    async fn console_text(&self, build: &BuildRef) -> Result<String, UpstreamError> {
        self.record("console_text");
        let stalled = self.stalled_consoles.lock().unwrap().contains(&build.job_name);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.panic_on_console {
            panic!("console decoder exploded");
        }
        next(&self.logs, Ok(String::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(String),
    Terminal(TerminalMessage),
}

impl Frame {
    pub fn from_message(message: Message) -> Option<Frame> {
        match message {
            Message::Text(text) => Some(Frame::from_text(text)),
            _ => None,
        }
    }

    pub fn from_text(text: String) -> Frame {
        match serde_json::from_str::<TerminalMessage>(&text) {
            Ok(terminal) => Frame::Terminal(terminal),
            Err(_) => Frame::Chunk(text),
        }
    }
}

pub fn terminals(frames: &[Frame]) -> usize {
    frames
        .iter()
        .filter(|frame| matches!(frame, Frame::Terminal(_)))
        .count()
}

pub fn chunks(frames: &[Frame]) -> String {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::Chunk(text) => Some(text.as_str()),
            Frame::Terminal(_) => None,
        })
        .collect()
}

pub struct RunningSession {
    pub frames: mpsc::UnboundedReceiver<Message>,
    pub disconnect: CancellationToken,
    pub task: tokio::task::JoinHandle<SessionOutcome>,
}

pub fn spawn_session(
    upstream: UpstreamHandle,
    build: BuildRef,
    settings: StreamSettings,
) -> RunningSession {
    let (tx, rx) = mpsc::unbounded();
    let disconnect = CancellationToken::new();
    let channel = LogChannel::new(tx, disconnect.clone());
    let session = LogStreamSession::new(upstream, build, settings);
    let task = tokio::spawn(session.run(channel));
    RunningSession {
        frames: rx,
        disconnect,
        task,
    }
}

/// Runs a session to completion and returns everything the client saw.
pub async fn run_session(
    upstream: UpstreamHandle,
    build: BuildRef,
    settings: StreamSettings,
) -> (SessionOutcome, Vec<Frame>) {
    let RunningSession {
        frames, task, ..
    } = spawn_session(upstream, build, settings);
    let outcome = task.await.expect("session task panicked");
    let frames = frames
        .filter_map(|message| async move { Frame::from_message(message) })
        .collect()
        .await;
    (outcome, frames)
}

pub fn available(server: &Arc<ScriptedServer>) -> UpstreamHandle {
    UpstreamHandle::available(server.clone())
}
