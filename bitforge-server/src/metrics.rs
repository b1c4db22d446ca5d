//! Prometheus metrics
//!
//! [`PrometheusObserver`] feeds the runner's observer capability into the
//! `metrics` facade; [`init`] installs the Prometheus recorder whose handle
//! renders `/metrics`.

use anyhow::Context;
use bitforge_core::domain::outcome::RunStatus;
use bitforge_runner::{Observer, Scope};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "fpga_compilation_requests_total";
pub const COMPILATION_DURATION: &str = "fpga_compilation_duration_seconds";
pub const IN_PROGRESS: &str = "fpga_compilation_in_progress";
pub const COMMAND_DURATION: &str = "fpga_command_execution_duration_seconds";

/// 1s, 2s, 4s, ... 512s
const COMPILATION_BUCKETS: [f64; 10] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0];

/// 0.1s, 0.2s, 0.4s, ... 51.2s
const COMMAND_BUCKETS: [f64; 10] = [0.1, 0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2];

/// Builds a recorder configured with the compilation histograms
fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(COMPILATION_DURATION.to_string()),
            &COMPILATION_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(Matcher::Full(COMMAND_DURATION.to_string()), &COMMAND_BUCKETS)
        })
        .context("Invalid histogram bucket configuration")
}

/// Installs the global Prometheus recorder
///
/// Must be called once at startup, before any metric is recorded.
pub fn init() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Observer publishing run metrics through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl Observer for PrometheusObserver {
    fn run_started(&self) {
        gauge!(IN_PROGRESS).increment(1.0);
    }

    fn record_duration(&self, scope: Scope<'_>, elapsed: Duration) {
        match scope {
            Scope::Run => histogram!(COMPILATION_DURATION).record(elapsed.as_secs_f64()),
            Scope::Command(program) => {
                histogram!(COMMAND_DURATION, "command" => program.to_string())
                    .record(elapsed.as_secs_f64())
            }
        }
    }

    fn record_outcome(&self, status: RunStatus) {
        counter!(REQUESTS_TOTAL, "status" => status.as_str()).increment(1);
        gauge!(IN_PROGRESS).decrement(1.0);
    }
}
