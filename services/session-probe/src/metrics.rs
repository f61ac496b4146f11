//! Prometheus metrics snapshot
//!
//! The client crates emit through the `metrics` facade:
//!
//! - `backend_responses_total` (counter): label `outcome`
//! - `session_refresh_total` (counter): label `result`
//! - `session_refresh_joined_total` (counter)
//!
//! The probe is short-lived, so instead of serving `/metrics` it installs a
//! recorder and prints the rendered text on exit when `--metrics` is given.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record one probe command and how it ended.
pub fn record_command(command: &'static str, result: &'static str) {
    metrics::counter!("probe_commands_total", "command" => command, "result" => result)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_client::ResponseOutcome;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Uses build_recorder() instead of install_recorder() to avoid the
    /// global recorder singleton constraint.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_command_does_not_panic_without_recorder() {
        record_command("request", "success");
    }

    #[test]
    fn command_counter_carries_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_command("refresh", "refreshed");

        let output = handle.render();
        assert!(output.contains("probe_commands_total"), "got: {output}");
        assert!(output.contains("command=\"refresh\""));
        assert!(output.contains("result=\"refreshed\""));
    }

    #[test]
    fn client_metrics_render_through_probe_recorder() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        backend_client::metrics::record_outcome(&ResponseOutcome::SessionExpired);

        let output = handle.render();
        assert!(
            output.contains("backend_responses_total{outcome=\"session_expired\"} 1"),
            "got: {output}"
        );
    }
}
