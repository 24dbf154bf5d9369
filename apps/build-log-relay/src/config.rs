use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::http::HeaderValue;
use clap::Parser;

use crate::session::StreamSettings;

#[derive(Debug, Parser)]
#[command(
    name = "build-log-relay",
    author,
    version,
    about = "Relays Jenkins job listings and live build console logs to web clients"
)]
pub struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BUILD_LOG_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Base URL of the Jenkins server.
    #[arg(long, env = "JENKINS_URL", default_value = "http://localhost:8080")]
    pub jenkins_url: String,

    #[arg(long, env = "JENKINS_USERNAME", default_value = "your_jenkins_username")]
    pub jenkins_username: String,

    /// Password or API token for the Jenkins account.
    #[arg(
        long,
        env = "JENKINS_PASSWORD",
        default_value = "your_jenkins_api_token_or_password",
        hide_env_values = true
    )]
    pub jenkins_password: String,

    /// Delay between console polls while a build is running.
    #[arg(long, env = "BUILD_LOG_RELAY_POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Origins allowed to call the API from a browser.
    #[arg(
        long,
        env = "BUILD_LOG_RELAY_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000,http://localhost"
    )]
    pub allowed_origins: Vec<String>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BUILD_LOG_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 0)]
    pub shutdown_grace_secs: u64,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub jenkins_url: String,
    pub jenkins_username: String,
    pub jenkins_password: String,
    pub poll_interval: Duration,
    pub allowed_origins: Vec<HeaderValue>,
    pub shutdown_grace: Duration,
}

impl RelayConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            poll_interval: self.poll_interval,
        }
    }
}

impl TryFrom<Cli> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        if cli.poll_interval_ms == 0 {
            bail!("poll interval must be greater than zero");
        }

        let allowed_origins = cli
            .allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid allowed origin: {origin}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(RelayConfig {
            listen_addr,
            jenkins_url: cli.jenkins_url,
            jenkins_username: cli.jenkins_username,
            jenkins_password: cli.jenkins_password,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            allowed_origins,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("jenkins_url", &self.jenkins_url)
            .field("jenkins_username", &self.jenkins_username)
            .field("jenkins_password", &"<redacted>")
            .field("poll_interval", &self.poll_interval)
            .field("allowed_origins", &self.allowed_origins)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}
