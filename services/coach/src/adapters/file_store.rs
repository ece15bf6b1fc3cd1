//! services/coach/src/adapters/file_store.rs
//!
//! This module contains the durable storage adapter.
//! It implements the `KeyValueStore` port from the `core` crate on top of a single
//! JSON document on disk.

use serde_json::{Map, Value};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use titanfit_core::ports::{KeyValueStore, PortError, PortResult};
use tracing::{debug, warn};

const STORE_FILE_NAME: &str = "titanfit_store.json";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A `KeyValueStore` persisted as one JSON object file.
///
/// Every write replaces the whole file through a temporary sibling and a rename,
/// so a batch written with `set_many` is either fully on disk or not at all.
///
/// Calls block on file I/O and are made inline from request handlers. The
/// document holds one installation's records and stays in the tens of kilobytes
/// even with a year of daily weigh-ins.
pub struct FileKeyValueStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    /// Opens (or prepares to create) the store inside `data_dir`.
    pub fn open(data_dir: &Path) -> PortResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            PortError::Storage(format!("cannot create {}: {}", data_dir.display(), e))
        })?;
        Ok(Self {
            path: data_dir.join(STORE_FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> PortResult<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(PortError::Storage(e.to_string())),
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                // The next write replaces the unreadable document.
                warn!(path = %self.path.display(), "Store file is corrupt; treating it as empty.");
                Ok(Map::new())
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> PortResult<()> {
        let body = serde_json::to_vec_pretty(map)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| PortError::Storage(e.to_string()))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| PortError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| PortError::Storage(e.to_string()))?;

        debug!(path = %self.path.display(), keys = map.len(), "Store file written.");
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> PortResult<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PortError::Storage("store lock poisoned".to_string()))?;
        let mut map = self.read_map()?;
        mutate(&mut map);
        self.write_map(&map)
    }
}

//=========================================================================================
// `KeyValueStore` Trait Implementation
//=========================================================================================

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> PortResult<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PortError::Storage("store lock poisoned".to_string()))?;
        let map = self.read_map()?;
        match map.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(PortError::Storage(format!(
                "value under '{}' is not a string: {}",
                key, other
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.update(|map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn set_many(&self, entries: &[(&str, String)]) -> PortResult<()> {
        self.update(|map| {
            for (key, value) in entries {
                map.insert((*key).to_string(), Value::String(value.clone()));
            }
        })
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        self.update(|map| {
            map.remove(key);
        })
    }

    fn clear(&self) -> PortResult<()> {
        self.update(|map| map.clear())
    }
}
