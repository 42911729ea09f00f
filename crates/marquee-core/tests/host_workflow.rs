//! End-to-end host workflows over the public API: install, configure,
//! disable, remove. Library loading itself is covered by the in-crate
//! descriptor tests; here the packages deliberately name libraries that do
//! not exist on disk.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use marquee_core::{
    AddonRegistry, AddonStatus, Error, InstanceKind, MANIFEST_FILE, SettingsStore, StatusReporter,
};

fn install(root: &Path, id: &str, manifest_json: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MANIFEST_FILE), manifest_json).unwrap();
}

const DECODER: &str = r#"{
    "id": "audio.flac", "name": "FLAC decoder", "version": "3.1.0",
    "author": "example",
    "provides": [{"kind": "audioDecoder", "api": "2.1"}],
    "library": {"platforms": {"linux-x64": "lib/libflac.so",
                              "darwin-arm64": "lib/libflac.dylib",
                              "win32-x64": "flac.dll"}},
    "settings": {"schema": {
        "gain": {"type": "float", "label": "Replay gain", "default": 0.0, "min": -12.0, "max": 12.0},
        "device": {"type": "select", "label": "Output device", "default": "auto",
                   "options": [{"value": "auto", "label": "Automatic"},
                               {"value": "hw", "label": "Hardware"}]}
    }}
}"#;

#[tokio::test]
async fn install_configure_remove_lifecycle() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let (reporter, _rx) = StatusReporter::channel(16);
    let registry = AddonRegistry::new(
        root.path(),
        SettingsStore::new(data.path()).unwrap(),
        reporter,
    )
    .unwrap();

    // Nothing installed yet.
    assert!(registry.scan().await.unwrap().is_empty());

    install(root.path(), "audio.flac", DECODER);
    let ids = registry.scan().await.unwrap();
    assert_eq!(ids, ["audio.flac"]);

    let entry = registry.get("audio.flac").await.unwrap();
    assert!(entry.is_enabled());
    assert!(!entry.is_loaded());
    assert!(entry.manifest.provides(InstanceKind::AudioDecoder));
    assert_eq!(entry.manifest.version, "3.1.0");

    // First-run settings come from the schema defaults.
    let defaults = registry
        .settings()
        .load_or_defaults("audio.flac", entry.manifest.settings.as_ref());
    assert_eq!(defaults["gain"], 0.0);
    assert_eq!(defaults["device"], "auto");

    // Persist a change, then confirm it overlays the defaults.
    let mut values = IndexMap::new();
    values.insert("gain".to_string(), serde_json::json!(-3.5));
    registry.save_settings("audio.flac", &values).await.unwrap();
    let merged = registry
        .settings()
        .load_or_defaults("audio.flac", entry.manifest.settings.as_ref());
    assert_eq!(merged["gain"], -3.5);
    assert_eq!(merged["device"], "auto");

    // Out-of-range values never reach disk.
    let mut bad = IndexMap::new();
    bad.insert("gain".to_string(), serde_json::json!(40.0));
    assert!(matches!(
        registry.save_settings("audio.flac", &bad).await,
        Err(Error::InvalidSettings { .. })
    ));

    // Uninstall: the next scan forgets the entry.
    fs::remove_dir_all(root.path().join("audio.flac")).unwrap();
    assert!(registry.scan().await.unwrap().is_empty());
    assert!(registry.get("audio.flac").await.is_none());
}

#[tokio::test]
async fn rescan_keeps_disabled_state_of_surviving_entries() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let registry = AddonRegistry::new(
        root.path(),
        SettingsStore::new(data.path()).unwrap(),
        StatusReporter::sink(),
    )
    .unwrap();

    install(root.path(), "audio.flac", DECODER);
    registry.scan().await.unwrap();
    registry.set_enabled("audio.flac", false).await.unwrap();

    registry.scan().await.unwrap();
    let entry = registry.get("audio.flac").await.unwrap();
    assert!(!entry.is_enabled());

    registry.set_enabled("audio.flac", true).await.unwrap();
    registry.scan().await.unwrap();
    assert!(registry.get("audio.flac").await.unwrap().is_enabled());
}

#[tokio::test]
async fn status_events_flow_from_reporter_to_drain() {
    let (reporter, mut rx) = StatusReporter::channel(8);
    reporter.report("pvr.hts", AddonStatus::NeedSettings, "no server configured");
    reporter.report_detached("pvr.hts", AddonStatus::NeedRestart, "tuner changed");

    let mut statuses = Vec::new();
    for _ in 0..2 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.addon_id, "pvr.hts");
        statuses.push(event.status);
    }
    assert!(statuses.contains(&AddonStatus::NeedSettings));
    assert!(statuses.contains(&AddonStatus::NeedRestart));
}
