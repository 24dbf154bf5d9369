use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RelayConfig;

pub mod jenkins;

pub use jenkins::JenkinsClient;

/// Identifies one build of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRef {
    pub job_name: String,
    pub build_number: u64,
}

impl BuildRef {
    pub fn new(job_name: impl Into<String>, build_number: u64) -> Self {
        Self {
            job_name: job_name.into(),
            build_number,
        }
    }

    /// Build numbers start at 1 and a job always has a name.
    pub fn is_well_formed(&self) -> bool {
        !self.job_name.trim().is_empty() && self.build_number > 0
    }
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' #{}", self.job_name, self.build_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct BuildStatus {
    #[serde(rename = "building", default)]
    pub is_running: bool,
}

impl BuildStatus {
    pub fn running() -> Self {
        Self { is_running: true }
    }

    pub fn finished() -> Self {
        Self { is_running: false }
    }
}

/// Entry of the top-level job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBuild {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
}

/// Detail record for a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub last_build: Option<LastBuild>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            UpstreamError::NotFound => "not_found",
            UpstreamError::Api(_) => "api_error",
            UpstreamError::Malformed(_) => "malformed",
        }
    }
}

/// Read-only view of the automation server, shared by every session.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Name of the authenticated account; used to verify credentials.
    async fn whoami(&self) -> Result<String, UpstreamError>;

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, UpstreamError>;

    async fn job_info(&self, name: &str) -> Result<JobInfo, UpstreamError>;

    async fn build_status(&self, build: &BuildRef) -> Result<BuildStatus, UpstreamError>;

    /// Full console output produced so far, not a delta.
    async fn console_text(&self, build: &BuildRef) -> Result<String, UpstreamError>;
}

/// Process-wide upstream capability, resolved once at startup.
#[derive(Clone)]
pub enum UpstreamHandle {
    Available(Arc<dyn BuildServer>),
    Unavailable,
}

impl UpstreamHandle {
    pub fn available(server: Arc<dyn BuildServer>) -> Self {
        UpstreamHandle::Available(server)
    }

    /// Builds the Jenkins client and verifies it with a single call. Any
    /// failure leaves the handle unavailable for the lifetime of the process.
    pub async fn connect(config: &RelayConfig) -> Self {
        let client = match JenkinsClient::new(
            &config.jenkins_url,
            &config.jenkins_username,
            &config.jenkins_password,
        ) {
            Ok(client) => client,
            Err(err) => {
                warn!(url = %config.jenkins_url, error = %err, "failed to build jenkins client");
                return UpstreamHandle::Unavailable;
            }
        };

        match client.whoami().await {
            Ok(user) => {
                info!(url = %config.jenkins_url, user = %user, "connected to jenkins");
                UpstreamHandle::Available(Arc::new(client))
            }
            Err(err) => {
                warn!(url = %config.jenkins_url, error = %err, "failed to connect to jenkins");
                UpstreamHandle::Unavailable
            }
        }
    }

    pub fn server(&self) -> Option<&Arc<dyn BuildServer>> {
        match self {
            UpstreamHandle::Available(server) => Some(server),
            UpstreamHandle::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, UpstreamHandle::Available(_))
    }
}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamHandle::Available(_) => f.write_str("UpstreamHandle::Available"),
            UpstreamHandle::Unavailable => f.write_str("UpstreamHandle::Unavailable"),
        }
    }
}
