use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;

/// One cached conditional response, keyed by request URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<(String, String)>>,
    pub fetched_at: DateTime<Utc>,
}

/// Conditional-request cache persisted as a single JSON document. Reads and
/// writes serialize through one lock; the flusher snapshots under the lock and
/// writes to disk outside it.
#[derive(Clone)]
pub struct HttpCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    path: Option<PathBuf>,
}

impl HttpCache {
    pub fn in_memory() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            path: None,
        }
    }

    /// Loads the persisted document when present; a missing or unreadable
    /// file starts an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding unreadable cache file");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            entries: Arc::new(Mutex::new(entries)),
            path: Some(path),
        }
    }

    pub fn etag_for(&self, url: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(url).map(|entry| entry.etag.clone())
    }

    /// Records a 200 response.
    pub fn store(
        &self,
        url: &str,
        etag: String,
        body: String,
        headers: Option<Vec<(String, String)>>,
    ) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            url.to_string(),
            CacheEntry {
                etag,
                body: Some(body),
                headers,
                fetched_at: Utc::now(),
            },
        );
    }

    /// 304 path: bumps `fetched_at` and returns the stored body. An entry
    /// without a body is evicted and `None` returned so the caller re-requests
    /// without the validator.
    pub fn refresh(&self, url: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(url) {
            Some(entry) => match entry.body.clone() {
                Some(body) => {
                    entry.fetched_at = Utc::now();
                    metrics::CACHE_HITS.inc();
                    Some(body)
                }
                None => {
                    warn!(url, "cached entry had no body; evicting");
                    entries.remove(url);
                    None
                }
            },
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the full mapping and atomically replaces the backing file.
    pub fn flush(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.entries.lock().unwrap().clone();
        write_atomic(path, &snapshot)
    }

    /// Periodic flusher; performs a final flush when cancelled.
    pub fn spawn_flusher(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = cache.flush() {
                            warn!(error = %err, "cache flush failed");
                        }
                    }
                }
            }
            if let Err(err) = cache.flush() {
                warn!(error = %err, "final cache flush failed");
            } else {
                debug!("cache flushed on shutdown");
            }
        })
    }
}

fn write_atomic(path: &Path, snapshot: &HashMap<String, CacheEntry>) -> std::io::Result<()> {
    let serialized = serde_json::to_vec(snapshot)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, serialized)?;
    std::fs::rename(&tmp, path)
}
