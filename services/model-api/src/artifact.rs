//! Artifact resolution: local passthrough plus a one-shot remote fetch.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlserve_core::EventLog;

/// Fetches one remote object to a local destination. The production source
/// speaks to an S3-compatible HTTP gateway; tests substitute in-memory
/// fakes.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<()>;
}

pub struct HttpObjectSource {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpObjectSource {
    /// `endpoint` overrides the public S3 host for compatible stores.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl RemoteSource for HttpObjectSource {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<()> {
        let (bucket, key) = split_object_uri(uri)?;
        let url = match &self.endpoint {
            Some(base) => format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key),
            None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
        };
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}

/// Splits `s3://bucket/key` into its parts; anything else is malformed.
fn split_object_uri(uri: &str) -> Result<(&str, &str)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| anyhow!("unsupported locator scheme: {uri}"))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| anyhow!("object uri missing key: {uri}"))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(anyhow!("object uri missing bucket or key: {uri}"));
    }
    Ok((bucket, key))
}

#[derive(Clone)]
pub struct ArtifactStore {
    remote_uri: Option<String>,
    source: Arc<dyn RemoteSource>,
    events: EventLog,
}

impl ArtifactStore {
    pub fn new(remote_uri: Option<String>, source: Arc<dyn RemoteSource>, events: EventLog) -> Self {
        Self {
            remote_uri,
            source,
            events,
        }
    }

    /// Resolves `locator` to bytes on local durable storage.
    ///
    /// A file already present passes through untouched. Otherwise exactly one
    /// fetch from the configured remote source is attempted, materializing at
    /// `locator` (parent directories created as needed). Any failure appends
    /// a `model_download_failed` event and yields `None` — callers decide
    /// whether that is fatal. No retry here; retry is an explicit reload.
    pub async fn resolve(&self, locator: &Path) -> Option<PathBuf> {
        if locator.exists() {
            return Some(locator.to_path_buf());
        }
        let uri = self.remote_uri.as_deref()?;
        if !uri.starts_with("s3://") {
            self.fetch_failed(uri, &anyhow!("unsupported locator scheme: {uri}"));
            return None;
        }
        if let Some(parent) = locator.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.fetch_failed(uri, &e.into());
                return None;
            }
        }
        match self.source.fetch(uri, locator).await {
            Ok(()) if locator.exists() => Some(locator.to_path_buf()),
            Ok(()) => None,
            Err(e) => {
                self.fetch_failed(uri, &e);
                None
            }
        }
    }

    fn fetch_failed(&self, uri: &str, err: &anyhow::Error) {
        tracing::warn!(uri, error = %err, "model download failed");
        self.events
            .append("model_download_failed", json!({ "s3": uri, "err": err.to_string() }));
    }
}
