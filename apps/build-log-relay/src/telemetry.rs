use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "build-log-relay";
const OTEL_STDOUT_ENV: &str = "BUILD_LOG_RELAY_OTEL_STDOUT";

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Installs the Prometheus recorder and the global tracing subscriber.
    /// `BUILD_LOG_RELAY_OTEL_STDOUT=1` additionally exports spans to stdout.
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        let tracer_provider = env_truthy(OTEL_STDOUT_ENV).then(stdout_tracer_provider);
        let otel_layer = tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
        });

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(otel_layer)
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        if tracer_provider.is_some() {
            info!("OpenTelemetry stdout exporter enabled ({OTEL_STDOUT_ENV}=1)");
        }

        Ok(Self {
            metrics_handle,
            tracer_provider,
        })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

fn stdout_tracer_provider() -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                .build(),
        )
        .build()
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.tracer_provider {
            if let Err(err) = provider.shutdown() {
                warn!(
                    error = %err,
                    "failed to shutdown OpenTelemetry tracer provider"
                );
            }
        }
    }
}

pub fn record_session_started() {
    counter!("build_log_relay_sessions_started_total").increment(1);
    gauge!("build_log_relay_sessions_active").increment(1.0);
}

pub fn record_session_completed(outcome: &'static str) {
    gauge!("build_log_relay_sessions_active").decrement(1.0);
    counter!("build_log_relay_sessions_completed_total", "outcome" => outcome).increment(1);
}

pub fn record_chunk_sent(bytes: usize) {
    counter!("build_log_relay_log_chunks_sent_total").increment(1);
    counter!("build_log_relay_log_bytes_sent_total").increment(bytes as u64);
}

pub fn record_upstream_request(operation: &'static str, result: &'static str) {
    counter!(
        "build_log_relay_upstream_requests_total",
        "operation" => operation,
        "result" => result
    )
    .increment(1);
}

pub fn record_jobs_request(result: &'static str) {
    counter!("build_log_relay_jobs_requests_total", "result" => result).increment(1);
}

fn env_truthy(key: &str) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
