use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use lotwatch::config::LotwatchdConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LOTWATCH_CONFIG",
        "LOTWATCH_SOURCE",
        "LOTWATCH_MODEL",
        "LOTWATCH_LOT_ID",
        "LOTWATCH_LOT_NAME",
        "LOTWATCH_FPS",
        "LOTWATCH_DB_PATH",
        "LOTWATCH_DEBUG_WINDOW",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LotwatchdConfig::load().expect("load config");
    assert_eq!(cfg.source, "stub://lot_camera");
    assert_eq!(cfg.model, "stub://vehicles");
    assert_eq!(cfg.lot_id, 1);
    assert_eq!(cfg.lot_name, "Main Lot");
    assert_eq!(cfg.capture.fps, 30.0);
    assert_eq!((cfg.capture.width, cfg.capture.height), (1920, 1080));
    assert_eq!(cfg.storage.db_path, "lotwatch.db");
    assert!(cfg.storage.enabled);
    assert!(!cfg.debug_window);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "rtsp://camera-7/stream",
        "model": "/opt/models/cars.xml",
        "lot": { "id": 7, "name": "North Lot" },
        "capture": { "fps": 12.5, "width": 1280, "height": 720 },
        "storage": { "db_path": "north.db", "enabled": true },
        "debug": { "window": false, "dump_dir": "/tmp/north_debug" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LOTWATCH_CONFIG", file.path());
    std::env::set_var("LOTWATCH_LOT_NAME", "North Lot (upper deck)");
    std::env::set_var("LOTWATCH_FPS", "5");
    std::env::set_var("LOTWATCH_DEBUG_WINDOW", "1");

    let cfg = LotwatchdConfig::load().expect("load config");

    assert_eq!(cfg.source, "rtsp://camera-7/stream");
    assert_eq!(cfg.model, "/opt/models/cars.xml");
    assert_eq!(cfg.lot_id, 7);
    assert_eq!(cfg.lot_name, "North Lot (upper deck)");
    assert_eq!(cfg.capture.fps, 5.0);
    assert_eq!((cfg.capture.width, cfg.capture.height), (1280, 720));
    assert_eq!(cfg.storage.db_path, "north.db");
    assert!(cfg.debug_window);
    assert_eq!(cfg.debug_dump_dir, std::path::PathBuf::from("/tmp/north_debug"));

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        source = "stub://south_camera"

        [lot]
        id = 3
        name = "South Lot"

        [storage]
        enabled = false
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("LOTWATCH_CONFIG", file.path());

    let cfg = LotwatchdConfig::load().expect("load config");
    assert_eq!(cfg.source, "stub://south_camera");
    assert_eq!((cfg.lot_id, cfg.lot_name.as_str()), (3, "South Lot"));
    assert!(!cfg.storage.enabled);
    assert_eq!(cfg.capture.fps, 30.0);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOTWATCH_FPS", "0");
    assert!(LotwatchdConfig::load().is_err());
    std::env::set_var("LOTWATCH_FPS", "fast");
    assert!(LotwatchdConfig::load().is_err());
    clear_env();

    std::env::set_var("LOTWATCH_LOT_ID", "north");
    assert!(LotwatchdConfig::load().is_err());
    clear_env();

    std::env::set_var("LOTWATCH_DEBUG_WINDOW", "maybe");
    assert!(LotwatchdConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "lot": { "name": "  " } }"#).expect("write");
    std::env::set_var("LOTWATCH_CONFIG", file.path());
    assert!(LotwatchdConfig::load().is_err());
    clear_env();
}
