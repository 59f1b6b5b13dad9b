use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

use mlserve_core::{init_tracing, load_config, EventLog};
use model_api::api::{router, AppState};
use model_api::artifact::{ArtifactStore, HttpObjectSource};
use model_api::registry::ModelRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("model-api");
    let cfg = load_config("model-api")?;

    let events = EventLog::open(&cfg.log_dir)?;
    let source = Arc::new(HttpObjectSource::new(cfg.remote_endpoint.clone()));
    let store = ArtifactStore::new(cfg.model_remote_uri.clone(), source, events.clone());
    let registry = Arc::new(ModelRegistry::new(
        store,
        cfg.model_path.clone(),
        cfg.model_sha256.clone(),
        events.clone(),
    ));

    // Best-effort startup load: a missing or unreachable model must not keep
    // the service from starting.
    match registry.ensure_loaded().await {
        Ok(state) => info!(model = %state.model_name(), "model ready"),
        Err(e) => warn!(error = %e, "starting without a model"),
    }
    events.append(
        "startup",
        json!({
            "model": registry.model_name(),
            "exists": registry.current().is_some(),
        }),
    );

    let state = AppState {
        registry,
        events,
        started: Instant::now(),
        version: cfg.version.clone(),
        git_sha: cfg.git_sha.clone(),
    };
    let app = router(state);

    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "model-api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
