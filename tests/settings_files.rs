use flowchat::settings::{load_settings, save_settings, AppSettings};

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = load_settings(&dir.path().join("settings.json"));
    assert_eq!(settings, AppSettings::default());
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let settings = AppSettings {
        template_id: "my-assistant:latest".to_string(),
        playback_speed: 1.25,
        outbound_queue_frames: 8,
        ..AppSettings::default()
    };
    save_settings(&path, &settings).unwrap();
    assert_eq!(load_settings(&path), settings);

    // Overwriting leaves no temp file behind
    let faster = AppSettings {
        playback_speed: 2.0,
        ..settings
    };
    save_settings(&path, &faster).unwrap();
    assert_eq!(load_settings(&path).playback_speed, 2.0);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_corrupt_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(load_settings(&path), AppSettings::default());
}

#[test]
fn test_unknown_fields_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"connect_timeout_secs": 3, "theme": "dark"}"#).unwrap();

    let settings = load_settings(&path);
    assert_eq!(settings.connect_timeout_secs, 3);
    assert_eq!(settings.token_ttl_secs, AppSettings::default().token_ttl_secs);
}
