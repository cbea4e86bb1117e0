//! Remote backend seam for the file store: wire envelope, transport trait,
//! reqwest implementation and the per-store request gate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::error::{Result, StoreError};

/// One file or directory entry as reported by the server. Unknown fields
/// are dropped; client-side attributes live in the store's records, not on
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub size: u64,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub modified: i64,
    /// Present only when the server expanded this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileRecord>>,
    /// Expansion marker: the children of this directory are known, even
    /// when the list is empty.
    #[serde(rename = "_EX", default, skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
}

impl FileRecord {
    pub fn modified_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.modified, 0).single().unwrap_or_default()
    }
}

/// Server response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub total: u64,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub items: Vec<FileRecord>,
}

fn default_status() -> u16 {
    200
}

/// Transport behind the remote file store. Implementations run one request
/// at a time; serialization is enforced by the store's gate, not here.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List a directory (or the whole subtree when `deep`).
    async fn list(
        &self,
        base_path: &str,
        path: Option<&str>,
        deep: bool,
        options: &[String],
    ) -> Result<Envelope>;

    /// Delete a file or directory.
    async fn delete(&self, base_path: &str, path: &str) -> Result<Envelope>;

    /// Rename or move a file or directory.
    async fn rename(&self, base_path: &str, path: &str, new_path: &str) -> Result<Envelope>;
}

/// HTTP transport speaking the file-server query contract.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: &str) -> Self {
        HttpSource { client: reqwest::Client::new(), url: url.to_owned() }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Envelope> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Network {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request failed").to_owned(),
            });
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|err| StoreError::InvalidResponse(format!("bad envelope: {err}")))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn list(
        &self,
        base_path: &str,
        path: Option<&str>,
        deep: bool,
        options: &[String],
    ) -> Result<Envelope> {
        let mut params: Vec<(&str, String)> = vec![("basePath", base_path.to_owned())];
        if let Some(path) = path {
            params.push(("path", path.to_owned()));
        }
        if deep {
            params.push(("queryOptions", "{\"deep\":true}".to_owned()));
        }
        if !options.is_empty() {
            params.push(("options", serde_json::to_string(options)?));
        }
        debug!(base_path, path, deep, "remote list");
        self.execute(self.client.get(&self.url).query(&params)).await
    }

    async fn delete(&self, base_path: &str, path: &str) -> Result<Envelope> {
        debug!(base_path, path, "remote delete");
        let params = [("basePath", base_path), ("path", path)];
        self.execute(self.client.delete(&self.url).query(&params)).await
    }

    async fn rename(&self, base_path: &str, path: &str, new_path: &str) -> Result<Envelope> {
        debug!(base_path, path, new_path, "remote rename");
        let form = [("basePath", base_path), ("path", path), ("newValue", new_path)];
        self.execute(self.client.post(&self.url).form(&form)).await
    }
}

/// Single-flight FIFO gate. Requests acquire in arrival order (the
/// underlying semaphore is fair); closing the gate rejects both queued and
/// future acquisitions with `Cancelled`.
pub struct RequestGate {
    sem: Semaphore,
    closed: AtomicBool,
}

pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RequestGate {
    pub fn new() -> Self {
        RequestGate { sem: Semaphore::new(1), closed: AtomicBool::new(false) }
    }

    /// Wait for the single request slot. Fails with `Cancelled` when the
    /// gate was closed before or while waiting.
    pub async fn acquire(&self) -> Result<GatePermit<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Cancelled("store is closed".to_owned()));
        }
        let permit = self
            .sem
            .acquire()
            .await
            .map_err(|_| StoreError::Cancelled("store is closed".to_owned()))?;
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Cancelled("store is closed".to_owned()));
        }
        Ok(GatePermit { _permit: permit })
    }

    /// Close the gate. Tasks waiting in the queue wake with `Cancelled`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.sem.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        RequestGate::new()
    }
}
