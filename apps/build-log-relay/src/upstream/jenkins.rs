use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{BuildRef, BuildServer, BuildStatus, JobEntry, JobInfo, UpstreamError};
use crate::telemetry;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Jenkins JSON API client authenticated with a username and API token.
#[derive(Clone)]
pub struct JenkinsClient {
    base_url: String,
    username: String,
    password: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobListing {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

impl JenkinsClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .user_agent(concat!("build-log-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| UpstreamError::Api(err.to_string()))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            username: username.to_string(),
            password: password.to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(&self, path: &str, operation: &'static str) -> Result<Response, UpstreamError> {
        let url = self.url(path);
        debug!(%url, operation, "jenkins request");

        let result = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|err| UpstreamError::Api(err.to_string()))
            .and_then(|response| check_status(response, path));

        match &result {
            Ok(_) => telemetry::record_upstream_request(operation, "ok"),
            Err(err) => telemetry::record_upstream_request(operation, err.metric_label()),
        }
        result
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
    ) -> Result<T, UpstreamError> {
        self.get(path, operation)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                if err.is_decode() {
                    UpstreamError::Malformed(err.to_string())
                } else {
                    UpstreamError::Api(err.to_string())
                }
            })
    }
}

#[async_trait]
impl BuildServer for JenkinsClient {
    async fn whoami(&self) -> Result<String, UpstreamError> {
        let me: WhoAmI = self.get_json("me/api/json", "whoami").await?;
        Ok(me.id)
    }

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, UpstreamError> {
        let listing: JobListing = self
            .get_json("api/json?tree=jobs[name,url,color]", "list_jobs")
            .await?;
        Ok(listing.jobs)
    }

    async fn job_info(&self, name: &str) -> Result<JobInfo, UpstreamError> {
        let path = format!("{}/api/json", job_path(name));
        self.get_json(&path, "job_info").await
    }

    async fn build_status(&self, build: &BuildRef) -> Result<BuildStatus, UpstreamError> {
        let path = format!("{}/api/json?tree=building,result", build_path(build));
        self.get_json(&path, "build_status").await
    }

    async fn console_text(&self, build: &BuildRef) -> Result<String, UpstreamError> {
        let path = format!("{}/consoleText", build_path(build));
        self.get(&path, "console_text")
            .await?
            .text()
            .await
            .map_err(|err| UpstreamError::Api(err.to_string()))
    }
}

fn check_status(response: Response, path: &str) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(UpstreamError::NotFound);
    }
    if !status.is_success() {
        return Err(UpstreamError::Api(format!(
            "request to {path} failed with status {status}"
        )));
    }
    Ok(response)
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// `folder/app` becomes `job/folder/job/app`.
fn job_path(name: &str) -> String {
    name.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("job/{}", utf8_percent_encode(segment, PATH_SEGMENT)))
        .collect::<Vec<_>>()
        .join("/")
}

fn build_path(build: &BuildRef) -> String {
    format!("{}/{}", job_path(&build.job_name), build.build_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn base_url_is_normalized() {
        assert_eq!(normalize_base_url("http://ci:8080/"), "http://ci:8080");
        assert_eq!(normalize_base_url(" https://ci.example.com "), "https://ci.example.com");
        assert_eq!(normalize_base_url("ci.local:8080"), "http://ci.local:8080");
    }

    #[test_timeout::timeout]
    fn folder_jobs_map_to_nested_paths() {
        assert_eq!(job_path("deploy"), "job/deploy");
        assert_eq!(job_path("team/deploy"), "job/team/job/deploy");
        assert_eq!(job_path("my job#1"), "job/my%20job%231");
    }

    #[test_timeout::timeout]
    fn build_urls_point_at_console_and_status() {
        let client = JenkinsClient::new("http://ci:8080/", "bot", "token").unwrap();
        let build = BuildRef::new("team/deploy", 17);
        assert_eq!(
            client.url(&format!("{}/consoleText", build_path(&build))),
            "http://ci:8080/job/team/job/deploy/17/consoleText"
        );
        assert_eq!(client.url("api/json"), "http://ci:8080/api/json");
    }

    #[test_timeout::tokio_timeout_test]
    async fn unreachable_server_is_an_api_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = JenkinsClient::new("http://127.0.0.1:9", "bot", "token").unwrap();
        let err = client.whoami().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Api(_)));
    }
}
