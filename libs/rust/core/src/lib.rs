//! Shared runtime plumbing for mlserve services.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

pub mod events;
pub mod metrics;

pub use events::EventLog;

/// Environment-provided service configuration.
///
/// Every key can be set through the `MLSERVE` environment prefix
/// (`MLSERVE_MODEL_PATH=...`) or through an optional config file named by
/// `MLSERVE_CONFIG_FILE`. Environment wins over the file.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Default model locator on local storage.
    pub model_path: PathBuf,
    /// Optional `s3://bucket/key` source for fetch-on-demand.
    pub model_remote_uri: Option<String>,
    /// Optional HTTP(S) gateway override for S3-compatible stores.
    pub remote_endpoint: Option<String>,
    /// Optional expected SHA-256 digest of the artifact bytes.
    pub model_sha256: Option<String>,
    pub bind_addr: String,
    pub log_dir: PathBuf,
    pub version: String,
    pub git_sha: String,
}

pub fn init_tracing(service: &str) {
    let json = std::env::var("MLSERVE_JSON_LOG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(true)
            .try_init()
    };
    if result.is_ok() {
        info!(target: "mlserve", service, "tracing initialized");
    }
}

pub fn load_config(service: &str) -> Result<AppConfig> {
    let mut builder = config::Config::builder()
        .set_default("model_path", "models/model_openml_adult.json")?
        .set_default("bind_addr", "0.0.0.0:8000")?
        .set_default("log_dir", "logs")?
        .set_default("version", "0.0.0-dev")?
        .set_default("git_sha", "0000000")?;
    if let Ok(file) = std::env::var("MLSERVE_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("MLSERVE").separator("__"));
    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    info!(target: "mlserve", service, model = %cfg.model_path.display(), "config loaded");
    Ok(cfg)
}
