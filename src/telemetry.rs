// src/telemetry.rs
//! Logging and metrics plumbing shared by the three binaries.
//!
//! Each process (orchestrator or worker) installs its own Prometheus recorder and dumps the
//! rendered exposition text next to its outputs when it finishes, since there is no server
//! to scrape.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "FILTRATION_LOG_FORMAT";
const DEFAULT_FILTER: &str = "event_filtration=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `FILTRATION_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: tests and repeated calls must not panic
    let _ = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(false)).try_init()
    };
}

/// Short, stable digest of a caption. Raw captions never reach the logs.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// One-time metric descriptions so series show up with help text.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("filtration_rows_total", "Rows classified by workers.");
        describe_counter!(
            "filtration_zero_shot_filtered_total",
            "Rows marked as noise by the zero-shot strategy."
        );
        describe_counter!(
            "filtration_topic_filtered_total",
            "Rows marked as advertising by the topic strategy."
        );
        describe_counter!(
            "filtration_degenerate_total",
            "Rows whose label similarities could not be normalized."
        );
        describe_counter!(
            "filtration_worker_failures_total",
            "Worker processes that exited unsuccessfully."
        );
        describe_histogram!("filtration_worker_seconds", "Worker wall time in seconds.");
        describe_gauge!("filtration_shards", "Shards produced for the current run.");
    });
}

/// Process-local Prometheus recorder.
pub struct Metrics {
    handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// Install the recorder. If another recorder is already installed (tests), metrics are
    /// still emitted but `write_snapshot` becomes a no-op.
    pub fn init() -> Self {
        let handle = match PrometheusBuilder::new().install_recorder() {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::debug!(error = %e, "prometheus recorder not installed");
                None
            }
        };
        ensure_metrics_described();
        Self { handle }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }

    /// Write `<dir>/metrics_<name>.prom`.
    pub fn write_snapshot(&self, dir: &Path, name: &str) -> Result<Option<PathBuf>> {
        let Some(text) = self.render() else {
            return Ok(None);
        };
        let path = dir.join(format!("metrics_{name}.prom"));
        std::fs::write(&path, text)
            .with_context(|| format!("writing metrics snapshot {}", path.display()))?;
        Ok(Some(path))
    }
}
