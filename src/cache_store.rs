//! Durable key-value cache of the last known content and business hours.
//!
//! Values are JSON-encoded strings stored under fixed keys, each paired with
//! a millisecond timestamp key used for TTL checks:
//!
//! | payload key     | timestamp key            |
//! |-----------------|--------------------------|
//! | `menuItems`     | `contentTimestamp`       |
//! | `videoSources`  | `contentTimestamp`       |
//! | `businessHours` | `businessHoursTimestamp` |
//!
//! Every failure in here is logged and turned into "no cache"; nothing is
//! propagated to callers.

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;

use super::clock::Clock;
use super::errors::PersistenceError;

/// Raw string storage, the equivalent of a browser's local storage.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError>;
    fn remove_item(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Storage backed by a single JSON object file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens the cache file at `path`. A missing or unreadable file starts an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(items) => {
                    info!("Loaded {} cached item(s) from {:?}", items.len(), path);
                    items
                }
                Err(e) => {
                    warn!("Cache file {:?} is not valid JSON, starting empty: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file at {:?} yet.", path);
                BTreeMap::new()
            }
            Err(e) => {
                error!("Failed to read cache file {:?}, starting empty: {}", path, e);
                BTreeMap::new()
            }
        };
        Self { path, items: Mutex::new(items) }
    }

    fn write_out(&self, items: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut temp_file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut temp_file, items)?;
        temp_file.flush()?;
        temp_file.persist(&self.path)?;
        trace!("Cache file {:?} rewritten with {} item(s).", self.path, items.len());
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = items.clone();
        updated.insert(key.to_string(), value);
        self.write_out(&updated)?;
        *items = updated;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if !items.contains_key(key) {
            return Ok(());
        }
        let mut updated = items.clone();
        updated.remove(key);
        self.write_out(&updated)?;
        *items = updated;
        Ok(())
    }
}

/// In-process storage with nothing written to disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.items.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

/// What a cache slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKey {
    MenuItems,
    VideoSources,
    BusinessHours,
}

impl CacheKey {
    pub fn payload_key(self) -> &'static str {
        match self {
            CacheKey::MenuItems => "menuItems",
            CacheKey::VideoSources => "videoSources",
            CacheKey::BusinessHours => "businessHours",
        }
    }

    pub fn timestamp_key(self) -> &'static str {
        match self {
            CacheKey::MenuItems | CacheKey::VideoSources => "contentTimestamp",
            CacheKey::BusinessHours => "businessHoursTimestamp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
}

pub struct CacheStore {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { storage, clock, ttl }
    }

    /// Reads a fresh entry. Expired, orphaned or undecodable entries are purged and reported absent.
    pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<CacheEntry<T>> {
        let raw_payload = self.read(key.payload_key())?;
        let Some(fetched_at) = self.read(key.timestamp_key()).and_then(|raw| parse_timestamp(&raw)) else {
            debug!("Cache entry '{}' has no usable timestamp, purging.", key.payload_key());
            self.purge(key);
            return None;
        };
        let payload = match serde_json::from_str::<T>(&raw_payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cache entry '{}' could not be decoded, purging: {}", key.payload_key(), e);
                self.purge(key);
                return None;
            }
        };
        let entry = CacheEntry { payload, fetched_at };
        if self.is_expired(&entry) {
            info!("Cache entry '{}' from {} has expired, purging.", key.payload_key(), entry.fetched_at);
            self.purge(key);
            return None;
        }
        trace!("Cache hit for '{}' (fetched at {}).", key.payload_key(), entry.fetched_at);
        Some(entry)
    }

    /// Stores `payload` under `key`, stamped with the current time.
    pub fn set<T: Serialize>(&self, key: CacheKey, payload: &T) {
        if let Err(e) = self.try_set(key, payload) {
            warn!("Failed to cache '{}', continuing without cache: {}", key.payload_key(), e);
        }
    }

    fn try_set<T: Serialize>(&self, key: CacheKey, payload: &T) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(payload)?;
        let stamp = self.clock.now().timestamp_millis().to_string();
        self.storage.set_item(key.payload_key(), encoded)?;
        self.storage.set_item(key.timestamp_key(), stamp)?;
        debug!("Cached '{}'.", key.payload_key());
        Ok(())
    }

    pub fn is_expired<T>(&self, entry: &CacheEntry<T>) -> bool {
        let age_ms = (self.clock.now() - entry.fetched_at).num_milliseconds();
        age_ms >= i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read cache key '{}', treating as absent: {}", key, e);
                None
            }
        }
    }

    fn purge(&self, key: CacheKey) {
        for raw_key in [key.payload_key(), key.timestamp_key()] {
            if let Err(e) = self.storage.remove_item(raw_key) {
                warn!("Failed to remove cache key '{}': {}", raw_key, e);
            }
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let millis = serde_json::from_str::<i64>(raw).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
}
