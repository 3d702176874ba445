use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_submit(status: &'static str) {
    metrics::counter!("session_submit_total", "status" => status).increment(1);
}

pub(crate) fn record_answer(status: &'static str) {
    metrics::counter!("answer_submit_total", "status" => status).increment(1);
}

pub(crate) fn record_flush(status: &'static str) {
    metrics::counter!("autosave_flush_total", "status" => status).increment(1);
}

pub(crate) fn record_warning(warning: &str) {
    metrics::counter!("threshold_warnings_total", "warning" => warning.to_string()).increment(1);
}

pub(crate) fn record_reveal() {
    metrics::counter!("reveal_consumed_total").increment(1);
}
