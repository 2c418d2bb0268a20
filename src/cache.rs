//! Time-limited cache of resolved counts keyed by (subject, region, date range).
//!
//! Entries are kept as raw JSON so a hand-edited or truncated cache file only
//! loses the entries that no longer parse. Persistence is best-effort.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::types::{CheckResult, SearchParameters};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(3_600_000);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub result: CheckResult,
    pub created_at_ms: i64,
}

/// Same (subject, region, start, end) tuple, same key.
pub fn cache_key(subject_id: &str, params: &SearchParameters) -> String {
    format!(
        "{}|{}|{}|{}",
        subject_id,
        params.region(),
        params.start(),
        params.end()
    )
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug)]
pub struct ResultCache {
    ttl_ms: i64,
    entries: Mutex<HashMap<String, Value>>,
    path: Option<PathBuf>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis().min(i64::MAX as u128) as i64,
            entries: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Load entries from `path` if it exists and write back after every `put`.
    pub fn with_persistence(ttl: Duration, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self::new(ttl);
        cache.entries = Mutex::new(load_entries(&path));
        cache.path = Some(path);
        cache
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, now_ms())
    }

    pub fn get_at(&self, key: &str, now_ms: i64) -> Option<CacheEntry> {
        let raw = {
            let entries = self.entries.lock().ok()?;
            entries.get(key)?.clone()
        };
        let entry: CacheEntry = match serde_json::from_value(raw) {
            Ok(e) => e,
            Err(e) => {
                debug!(key, error = %e, "Ignoring malformed cache entry");
                return None;
            }
        };
        if !self.is_fresh(entry.created_at_ms, now_ms) {
            return None;
        }
        Some(entry)
    }

    pub fn put(&self, key: &str, result: CheckResult) {
        self.put_at(key, result, now_ms());
    }

    pub fn put_at(&self, key: &str, result: CheckResult, now_ms: i64) {
        let entry = CacheEntry {
            result,
            created_at_ms: now_ms,
        };
        let value = match serde_json::to_value(&entry) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        let snapshot = {
            let Ok(mut entries) = self.entries.lock() else {
                warn!(key, "Cache lock poisoned, entry not stored");
                return;
            };
            // Expired, future-dated and unreadable entries are dropped so the
            // map (and the file mirroring it) stays bounded by the live set.
            entries.retain(|_, v| {
                v.get("createdAtMs")
                    .and_then(Value::as_i64)
                    .is_some_and(|created| self.is_fresh(created, now_ms))
            });
            entries.insert(key.to_string(), value);
            self.path.as_ref().map(|_| entries.clone())
        };
        if let (Some(path), Some(snapshot)) = (self.path.as_deref(), snapshot) {
            if let Err(e) = persist_entries(path, &snapshot) {
                warn!(path = %path.display(), error = %e, "Failed to persist cache");
            }
        }
    }

    /// Entries stamped after `now_ms` (clock moved back) count as stale.
    fn is_fresh(&self, created_at_ms: i64, now_ms: i64) -> bool {
        created_at_ms <= now_ms && now_ms.saturating_sub(created_at_ms) < self.ttl_ms
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_entries(path: &Path) -> HashMap<String, Value> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&text) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache file unreadable, starting empty");
            HashMap::new()
        }
    }
}

fn persist_entries(path: &Path, entries: &HashMap<String, Value>) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer(file, entries)?;
    Ok(())
}
