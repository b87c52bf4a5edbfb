//! Architectural Contract Test: Config Persistence
//!
//! Constraints verified:
//! - Each reported change produces exactly one save of the full map
//! - Known keys keep their type, mismatched values are rejected
//! - Unknown keys are added with an inferred type
//! - The file store ends up holding the latest state

mod common;

use common::*;
use devhub_core::{
    ConfigStore, FileConfigStore, LoaderEvent, MemoryConfigStore, OptionType, PluginDescriptors,
    PluginLoader, PluginRegistry, SharedRouter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn registry(journal: &Journal) -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();
    registry.register_plugin("recording", Box::new(RecordingFactory::new(journal.clone())));
    Arc::new(registry)
}

/// Wait for the next persistence outcome, skipping lifecycle events
async fn next_persist_event(events: &mut mpsc::Receiver<LoaderEvent>) -> LoaderEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("persistence event arrives")
            .expect("event channel open");
        match event {
            LoaderEvent::ConfigPersisted { .. } | LoaderEvent::ConfigPersistFailed { .. } => {
                return event;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn one_save_per_reported_change() {
    let journal = Journal::new();
    let store = MemoryConfigStore::with_descriptors(
        PluginDescriptors::new()
            .with("counter", recording(true))
            .with("idle", recording(false)),
    );

    let (mut loader, mut events) =
        PluginLoader::open(registry(&journal), Arc::new(store.clone()), SharedRouter::new())
            .await
            .unwrap();
    loader.load_plugins().await;

    let sender = journal.events_for("counter");
    for value in 1..=3u64 {
        assert!(sender.config_updated("count", value));
        let event = next_persist_event(&mut events).await;
        assert_eq!(
            event,
            LoaderEvent::ConfigPersisted {
                plugin: "counter".into(),
                key: "count".into()
            }
        );
    }

    assert_eq!(store.save_count(), 3);

    // The whole map is written, not just the changed plugin
    let saved = store.snapshot().await;
    assert_eq!(saved.names(), vec!["counter", "idle"]);
    assert_eq!(saved.get("counter").unwrap().config["count"].as_u64(), Some(3));
}

#[tokio::test]
async fn mismatched_type_is_rejected_without_saving() {
    let journal = Journal::new();
    let store = MemoryConfigStore::with_descriptors(PluginDescriptors::new().with("counter", recording(true)));

    let (mut loader, mut events) =
        PluginLoader::open(registry(&journal), Arc::new(store.clone()), SharedRouter::new())
            .await
            .unwrap();
    loader.load_plugins().await;

    journal.events_for("counter").config_updated("count", "many");

    assert!(matches!(
        next_persist_event(&mut events).await,
        LoaderEvent::ConfigPersistFailed { .. }
    ));
    assert_eq!(store.save_count(), 0);
    assert_eq!(
        loader.descriptors().await.get("counter").unwrap().config["count"].as_u64(),
        Some(0)
    );
}

#[tokio::test]
async fn unknown_key_is_added_with_inferred_type() {
    let journal = Journal::new();
    let store = MemoryConfigStore::with_descriptors(PluginDescriptors::new().with("counter", recording(true)));

    let (mut loader, mut events) =
        PluginLoader::open(registry(&journal), Arc::new(store.clone()), SharedRouter::new())
            .await
            .unwrap();
    loader.load_plugins().await;

    journal.events_for("counter").config_updated("mockKey", "mockValue");
    next_persist_event(&mut events).await;

    let saved = store.snapshot().await;
    let option = &saved.get("counter").unwrap().config["mockKey"];
    assert_eq!(option.kind, OptionType::String);
    assert_eq!(option.readable_name, "mockKey");
    assert_eq!(option.value, json!("mockValue"));
}

#[tokio::test]
async fn file_store_holds_latest_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.json");
    let journal = Journal::new();
    let registry = registry(&journal);

    let defaults = PluginDescriptors::new().with("counter", recording(true));
    let store = Arc::new(FileConfigStore::new(&path, defaults));

    let (mut loader, mut events) = PluginLoader::open(registry, store, SharedRouter::new())
        .await
        .unwrap();
    assert!(path.exists(), "missing file is created from defaults");
    loader.load_plugins().await;

    journal.events_for("counter").config_updated("count", 42u64);
    next_persist_event(&mut events).await;
    loader.shutdown().await;

    let reread = FileConfigStore::new(&path, PluginDescriptors::new()).load().await.unwrap();
    assert_eq!(reread.get("counter").unwrap().config["count"].as_u64(), Some(42));
}
