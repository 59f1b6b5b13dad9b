//! The single authoritative holder of the active (artifact, schema) pair.
//!
//! Readers take lock-free snapshots; loads serialize on an async mutex and
//! finish with one atomic swap. No reader ever observes artifact A paired
//! with schema B, and a failed load never disturbs a working model.

use arc_swap::ArcSwapOption;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

use mlserve_core::EventLog;

use crate::artifact::ArtifactStore;
use crate::error::ServeError;
use crate::pipeline::{FittedPipeline, ScoreKind};
use crate::schema::{self, Schema};

/// Immutable snapshot of a loaded model. Replaced wholesale on reload,
/// never edited in place.
pub struct RegistryState {
    pub pipeline: FittedPipeline,
    pub schema: Schema,
    pub source: PathBuf,
    pub score_kind: ScoreKind,
    pub loaded_at: SystemTime,
}

impl RegistryState {
    /// Identifying name: the artifact's file name.
    pub fn model_name(&self) -> String {
        self.source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

pub struct ModelRegistry {
    state: ArcSwapOption<RegistryState>,
    load_gate: Mutex<()>,
    store: ArtifactStore,
    default_path: PathBuf,
    expected_sha256: Option<String>,
    events: EventLog,
}

impl ModelRegistry {
    pub fn new(
        store: ArtifactStore,
        default_path: PathBuf,
        expected_sha256: Option<String>,
        events: EventLog,
    ) -> Self {
        Self {
            state: ArcSwapOption::empty(),
            load_gate: Mutex::new(()),
            store,
            default_path,
            expected_sha256,
            events,
        }
    }

    /// Non-blocking read of the live snapshot.
    pub fn current(&self) -> Option<Arc<RegistryState>> {
        self.state.load_full()
    }

    /// Name for health and logging, meaningful even before anything loads.
    pub fn model_name(&self) -> String {
        match self.current() {
            Some(state) => state.model_name(),
            None => self
                .default_path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Resolves, deserializes, re-derives the schema, then atomically swaps
    /// the snapshot. Concurrent loads serialize on the gate; readers keep
    /// the old snapshot until the swap lands.
    pub async fn load(&self, locator: &Path) -> Result<Arc<RegistryState>, ServeError> {
        let _gate = self.load_gate.lock().await;
        let local = self
            .store
            .resolve(locator)
            .await
            .ok_or_else(|| ServeError::ArtifactUnavailable(locator.display().to_string()))?;
        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| ServeError::LoadFailed(format!("{}: {e}", local.display())))?;
        if let Some(expect) = &self.expected_sha256 {
            let got = format!("{:x}", Sha256::digest(&bytes));
            if !expect.eq_ignore_ascii_case(&got) {
                return Err(ServeError::LoadFailed(format!(
                    "artifact digest mismatch expected={expect} got={got}"
                )));
            }
        }
        let pipeline = FittedPipeline::from_slice(&bytes)
            .map_err(|e| ServeError::LoadFailed(e.to_string()))?;
        let score_kind = pipeline
            .score_kind()
            .map_err(|e| ServeError::LoadFailed(e.to_string()))?;
        let schema = schema::extract(&pipeline);
        if schema.is_empty() {
            warn!(model = %local.display(), "schema recovery failed, serving with pass-through normalization");
        }
        let state = Arc::new(RegistryState {
            pipeline,
            schema,
            source: local,
            score_kind,
            loaded_at: SystemTime::now(),
        });
        self.state.store(Some(state.clone()));
        self.events.append(
            "model_loaded",
            json!({ "model": state.model_name(), "cols": state.schema.required_fields.len() }),
        );
        info!(model = %state.model_name(), cols = state.schema.required_fields.len(), "model loaded");
        Ok(state)
    }

    /// At most one load of the configured default locator when empty. A
    /// failure leaves the registry empty and reports `ModelUnavailable`;
    /// it never takes the process down.
    pub async fn ensure_loaded(&self) -> Result<Arc<RegistryState>, ServeError> {
        if let Some(state) = self.current() {
            return Ok(state);
        }
        let default = self.default_path.clone();
        self.load(&default).await.map_err(|e| {
            warn!(error = %e, "model not obtainable");
            ServeError::ModelUnavailable
        })
    }

    /// Locator priority: explicit argument, then whatever the store resolves
    /// for the configured default, then the last-known source.
    pub async fn reload(&self, explicit: Option<PathBuf>) -> Result<Arc<RegistryState>, ServeError> {
        let target = match explicit {
            Some(path) => path,
            None => match self.store.resolve(&self.default_path).await {
                Some(path) => path,
                None => match self.current() {
                    Some(state) => state.source.clone(),
                    None => self.default_path.clone(),
                },
            },
        };
        self.load(&target).await
    }
}
