//! Persisted state tests
//!
//! The state file is best effort: anything unreadable behaves like a fresh
//! install instead of an error.

use dashlink::protocol::{DeviceCommand, DeviceStatus};
use dashlink::storage::{
    load_settings, resolve_client_id, save_settings, startup_connection, DeviceStates, JsonStore,
    SETTINGS_KEY,
};
use dashlink::ConnectionConfig;
use tempfile::TempDir;

#[test]
fn test_corrupt_state_file_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{not json").unwrap();
    let store = JsonStore::new(&path);

    assert!(DeviceStates::load(&store).is_empty());
    assert_eq!(
        load_settings(&store, &ConnectionConfig::default()),
        ConnectionConfig::default()
    );

    // The next write replaces the corrupt file
    store.set("theme", &"dark").unwrap();
    assert_eq!(store.get::<String>("theme").as_deref(), Some("dark"));
}

#[test]
fn test_generated_client_id_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let mut first = ConnectionConfig::default();
    resolve_client_id(&JsonStore::new(&path), &mut first).unwrap();
    assert!(first.client_id.starts_with("dashboard_"));
    assert!(path.exists());

    let mut second = ConnectionConfig::default();
    resolve_client_id(&JsonStore::new(&path), &mut second).unwrap();
    assert_eq!(second.client_id, first.client_id);
}

#[test]
fn test_settings_round_trip_without_credentials() {
    let dir = TempDir::new().unwrap();
    let store = JsonStore::new(dir.path().join("state.json"));

    let saved = ConnectionConfig {
        host: "test.mosquitto.org".to_string(),
        port: 8081,
        client_id: "dashboard_abc123def".to_string(),
        credentials: Some(dashlink::transport::mqtt::Credentials {
            username: "aluno".to_string(),
            password: "segredo".to_string(),
        }),
        ..Default::default()
    };
    save_settings(&store, &saved).unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains(SETTINGS_KEY));
    assert!(!raw.contains("segredo"));

    let loaded = load_settings(&store, &ConnectionConfig::default());
    assert_eq!(loaded.host, "test.mosquitto.org");
    assert_eq!(loaded.port, 8081);
    assert_eq!(loaded.client_id, "dashboard_abc123def");
    assert!(loaded.credentials.is_none());
}

#[test]
fn test_device_states_persist() {
    let dir = TempDir::new().unwrap();
    let store = JsonStore::new(dir.path().join("state.json"));

    let mut states = DeviceStates::load(&store);
    states.apply("sala_luz1", DeviceCommand::On);
    states.apply("sala_ar", DeviceCommand::Toggle);
    states.save(&store).unwrap();

    let mut reloaded = DeviceStates::load(&store);
    assert_eq!(reloaded, states);
    assert_eq!(reloaded.status("sala_luz1"), DeviceStatus::On);
    assert_eq!(reloaded.status("sala_ar"), DeviceStatus::On);
    assert_eq!(reloaded.status("cozinha_luz"), DeviceStatus::Off);

    assert_eq!(reloaded.apply("sala_ar", DeviceCommand::Toggle), DeviceStatus::Off);
    assert_eq!(reloaded.len(), 2);
}

#[test]
fn test_saved_host_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    // First run: connect somewhere other than the default and save on connect
    let first = ConnectionConfig {
        host: "broker.emqx.io".to_string(),
        port: 8084,
        ..Default::default()
    };
    let first = startup_connection(&JsonStore::new(&path), first, false).unwrap();
    save_settings(&JsonStore::new(&path), &first).unwrap();

    // Second run without a config file starts from the defaults
    let second = startup_connection(&JsonStore::new(&path), ConnectionConfig::default(), true)
        .unwrap();
    assert_eq!(second.host, "broker.emqx.io");
    assert_eq!(second.port, 8084);
    assert_eq!(second.client_id, first.client_id);
}
