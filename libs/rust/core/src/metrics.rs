//! Gauges exposed by `GET /metrics`, Prometheus text exposition format.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static APP_UPTIME_SECONDS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("app_uptime_seconds", "Process uptime in seconds").unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

static APP_MODEL_EXISTS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("app_model_exists", "Whether a model is currently loaded").unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

static APP_REQUIRED_COLS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "app_required_cols",
        "Required input columns of the loaded model",
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

static APP_VERSION_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("app_version_info", "Build identity of the running process"),
        &["version", "git_sha"],
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

pub fn set_version_info(version: &str, git_sha: &str) {
    APP_VERSION_INFO
        .with_label_values(&[version, git_sha])
        .set(1);
}

pub fn observe(uptime_secs: i64, model_exists: bool, required_cols: usize) {
    APP_UPTIME_SECONDS.set(uptime_secs);
    APP_MODEL_EXISTS.set(i64::from(model_exists));
    APP_REQUIRED_COLS.set(required_cols as i64);
}

pub fn render() -> String {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buf) {
        tracing::warn!(error = %e, "metrics encode failed");
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_gauges() {
        set_version_info("0.0.0-test", "abcdef0");
        observe(12, true, 14);
        let text = render();
        assert!(text.contains("app_uptime_seconds 12"));
        assert!(text.contains("app_model_exists 1"));
        assert!(text.contains("app_required_cols 14"));
        assert!(text.contains("app_version_info"));
    }
}
