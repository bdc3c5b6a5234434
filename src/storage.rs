//! Best-effort persisted state
//!
//! A [`JsonStore`] is one JSON object on disk mapping keys to opaque blobs.
//! Reads never fail: a missing file, a corrupt file or a blob that no longer
//! decodes all read as absent. Writes replace the whole file through a
//! temporary file and a rename.

use crate::protocol::messages::{DeviceCommand, DeviceStatus};
use crate::transport::mqtt::ConnectionConfig;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Last used connection settings
pub const SETTINGS_KEY: &str = "mqttSettings";
/// Last known device states
pub const DEVICE_STATES_KEY: &str = "deviceStates";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode state: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON key-value file
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the blob stored under `key`, if any
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read_all().remove(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, "Ignoring undecodable stored value: {}", e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), serde_json::to_value(value)?);
        self.write_all(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all();
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn read_all(&self) -> Map<String, Value> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "Cannot read state file: {}", e);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(entries)) => entries,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "State file is not a JSON object, ignoring it");
                Map::new()
            }
        }
    }

    fn write_all(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&temp_path, content).map_err(io_error)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_error)?;
        debug!(path = %self.path.display(), keys = entries.len(), "State saved");
        Ok(())
    }
}

/// Stored state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub status: DeviceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Device id → last known state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStates(BTreeMap<String, DeviceState>);

impl DeviceStates {
    pub fn get(&self, device_id: &str) -> Option<&DeviceState> {
        self.0.get(device_id)
    }

    pub fn status(&self, device_id: &str) -> DeviceStatus {
        self.get(device_id)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    /// Apply a command and return the device's new status
    pub fn apply(&mut self, device_id: &str, command: DeviceCommand) -> DeviceStatus {
        let status = command.apply(self.status(device_id));
        self.0.insert(
            device_id.to_string(),
            DeviceState {
                status,
                updated_at: Utc::now(),
            },
        );
        status
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceState)> {
        self.0.iter().map(|(id, state)| (id.as_str(), state))
    }

    pub fn load(store: &JsonStore) -> Self {
        store.get(DEVICE_STATES_KEY).unwrap_or_default()
    }

    pub fn save(&self, store: &JsonStore) -> Result<(), StoreError> {
        store.set(DEVICE_STATES_KEY, self)
    }
}

/// Saved connection settings, falling back to `defaults` for anything absent
///
/// Stored fields override the defaults one by one, so a blob written by an
/// older version still loads.
pub fn load_settings(store: &JsonStore, defaults: &ConnectionConfig) -> ConnectionConfig {
    let Some(Value::Object(saved)) = store.get::<Value>(SETTINGS_KEY) else {
        return defaults.clone();
    };

    let mut merged = match serde_json::to_value(defaults) {
        Ok(Value::Object(map)) => map,
        _ => return defaults.clone(),
    };
    merged.extend(saved);

    match serde_json::from_value::<ConnectionConfig>(Value::Object(merged)) {
        Ok(mut config) => {
            config.credentials = defaults.credentials.clone();
            config
        }
        Err(e) => {
            warn!("Ignoring saved settings: {}", e);
            defaults.clone()
        }
    }
}

/// Persist connection settings; credentials are never written
pub fn save_settings(store: &JsonStore, config: &ConnectionConfig) -> Result<(), StoreError> {
    store.set(SETTINGS_KEY, config)
}

/// Fill in a client id when none is configured
///
/// A previously generated id is reused so the broker sees the same client
/// across runs; otherwise a fresh `dashboard_xxxxxxxxx` id is generated and
/// saved.
pub fn resolve_client_id(
    store: &JsonStore,
    config: &mut ConnectionConfig,
) -> Result<(), StoreError> {
    if !config.client_id.trim().is_empty() {
        return Ok(());
    }

    let saved = store
        .get::<ConnectionConfig>(SETTINGS_KEY)
        .map(|settings| settings.client_id)
        .filter(|id| !id.trim().is_empty());

    match saved {
        Some(id) => {
            debug!(client_id = %id, "Reusing saved client id");
            config.client_id = id;
        }
        None => {
            config.client_id = generate_client_id();
            info!(client_id = %config.client_id, "Generated new client id");
            save_settings(store, config)?;
        }
    }
    Ok(())
}

/// Connection settings to start a session with
///
/// With `restore_saved`, the last used settings are merged over `configured`
/// (an explicit config file passes false so it always wins). A missing client
/// id is then filled in by [`resolve_client_id`].
pub fn startup_connection(
    store: &JsonStore,
    configured: ConnectionConfig,
    restore_saved: bool,
) -> Result<ConnectionConfig, StoreError> {
    let mut connection = if restore_saved {
        let restored = load_settings(store, &configured);
        if restored != configured {
            info!(host = %restored.host, port = restored.port, "Restored saved connection settings");
        }
        restored
    } else {
        configured
    };
    resolve_client_id(store, &mut connection)?;
    Ok(connection)
}

/// `dashboard_` followed by 9 random lowercase alphanumerics
pub fn generate_client_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("dashboard_{}", &random[..9])
}
