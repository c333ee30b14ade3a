use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use storefront_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_INSTALL: Mutex<()> = Mutex::new(());
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Pretty logs for local work, JSON lines in production. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = tracing_fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_timer(UtcTime::rfc_3339());

    match config.environment {
        Environment::Production => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?,
        Environment::Development | Environment::Test => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?,
    }

    TRACING_INIT.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the global Prometheus recorder once; later calls share the same handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = METRICS_INSTALL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    METRICS_HANDLE.set(handle.clone()).ok();
    describe_storefront_metrics();
    STARTED_AT.get_or_init(Instant::now);

    Ok(handle)
}

fn describe_storefront_metrics() {
    describe_gauge!("storefront_build_info", "Build metadata for the running binary");
    describe_gauge!("storefront_uptime_seconds", "Seconds since the process started");
    describe_counter!(
        "storefront_resolutions_total",
        "Hostname resolutions, labelled by source and result"
    );
    describe_histogram!(
        "storefront_lookup_seconds",
        "Duration in seconds of store directory lookups"
    );
    describe_counter!(
        "storefront_publications_total",
        "Publication attempts, labelled by result"
    );
    describe_counter!(
        "domain_mutations_total",
        "Merchant domain changes, labelled by operation"
    );
    describe_counter!(
        "domain_checks_total",
        "DNS verification checks, labelled by result"
    );
    describe_counter!(
        "merchant_cache_writes_total",
        "Merchant cache mirror writes, labelled by result"
    );
}

/// Recorder output plus the build and uptime gauges, which are rendered by hand.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let uptime = STARTED_AT
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();

    let _ = writeln!(body, "# TYPE storefront_build_info gauge");
    let _ = writeln!(
        body,
        "storefront_build_info{{version=\"{BUILD_VERSION}\",git=\"{}\"}} 1",
        git_sha()
    );
    let _ = writeln!(body, "# TYPE storefront_uptime_seconds gauge");
    let _ = writeln!(body, "storefront_uptime_seconds {uptime}");

    body
}
