//! Relay between a Jenkins server and browser clients.
//!
//! Two surfaces are exposed: a one-shot job listing (`GET /api/jobs`) and a
//! websocket per build (`/ws/logs/:job_name/:build_number`) that polls the
//! upstream console output and forwards only the part the client has not
//! seen yet, finishing with exactly one structured terminal message.

pub mod channel;
pub mod config;
pub mod error;
pub mod jobs;
pub mod log_tracker;
pub mod routes;
pub mod session;
pub mod telemetry;
pub mod upstream;

pub use channel::{ChannelState, LogChannel, TerminalMessage};
pub use config::RelayConfig;
pub use error::RelayError;
pub use log_tracker::{compute_delta, LogCursor};
pub use routes::{build_router, AppState};
pub use session::{LogStreamSession, SessionOutcome, StreamSettings};
pub use upstream::{
    BuildRef, BuildServer, BuildStatus, JobEntry, JobInfo, LastBuild, UpstreamError,
    UpstreamHandle,
};
