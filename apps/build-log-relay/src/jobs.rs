use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::CONNECTION_FAILED_MESSAGE;
use crate::telemetry;
use crate::upstream::{BuildServer, JobEntry, LastBuild, UpstreamError, UpstreamHandle};

pub const LIST_FAILED_MESSAGE: &str = "Failed to fetch job list from Jenkins";
pub const SERVER_ERROR_MESSAGE: &str = "An unexpected server error occurred";
pub const DEFAULT_COLOR: &str = "grey";

/// Job as presented to the web client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub name: String,
    pub url: Option<String>,
    pub color: Option<String>,
    pub last_build: Option<LastBuild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /api/jobs`. Always served with status 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobsResponse {
    Jobs { jobs: Vec<JobSummary> },
    Error { error: String },
}

pub async fn summarize_jobs(upstream: &UpstreamHandle) -> JobsResponse {
    let Some(server) = upstream.server() else {
        telemetry::record_jobs_request("connection_unavailable");
        return JobsResponse::Error {
            error: CONNECTION_FAILED_MESSAGE.to_string(),
        };
    };

    let listing = match server.list_jobs().await {
        Ok(listing) => listing,
        Err(err @ UpstreamError::Malformed(_)) => {
            error!(error = %err, "unreadable jobs list");
            telemetry::record_jobs_request("server_error");
            return JobsResponse::Error {
                error: SERVER_ERROR_MESSAGE.to_string(),
            };
        }
        Err(err) => {
            warn!(error = %err, "failed to fetch jobs list");
            telemetry::record_jobs_request("list_failed");
            return JobsResponse::Error {
                error: LIST_FAILED_MESSAGE.to_string(),
            };
        }
    };

    let jobs = join_all(listing.into_iter().map(|entry| summarize(server.as_ref(), entry))).await;
    telemetry::record_jobs_request("ok");
    JobsResponse::Jobs { jobs }
}

/// A failed detail lookup degrades to the listing entry instead of failing
/// the whole response.
async fn summarize(server: &dyn BuildServer, entry: JobEntry) -> JobSummary {
    match server.job_info(&entry.name).await {
        Ok(info) => JobSummary {
            name: info.name,
            url: info.url,
            color: info.color,
            last_build: info.last_build,
            error: None,
        },
        Err(err) => {
            warn!(job = %entry.name, error = %err, "failed to fetch job details");
            JobSummary {
                name: entry.name,
                url: entry.url,
                color: Some(entry.color.unwrap_or_else(|| DEFAULT_COLOR.to_string())),
                last_build: None,
                error: Some(format!("Failed to fetch details: {err}")),
            }
        }
    }
}
