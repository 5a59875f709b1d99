use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lotwatch::{
    occupancy_handlers, EngineInfo, OccupancyEngine, ScriptedDetector, SqliteOccupancyStore,
    SyntheticSource,
};

#[test]
fn engine_events_land_in_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("lots.db");
    let db_path = db_path.to_str().expect("utf-8 path");

    let mut store = SqliteOccupancyStore::open(db_path).expect("open store");
    store.register_lot(5, "Depot").expect("register lot");
    let store = Arc::new(Mutex::new(store));

    let detector = ScriptedDetector::new(vec![0, 3, 3, 1]);
    let calls = detector.call_counter();
    let mut engine = OccupancyEngine::with_components(
        EngineInfo::new("stub://depot", 5, "Depot"),
        Box::new(SyntheticSource::open("stub://depot").expect("source")),
        Box::new(detector),
    );
    engine.set_frame_rate(200.0);
    engine.set_frame_width(64);
    engine.set_frame_height(48);
    engine.set_idle_backoff(Duration::from_millis(1));
    let handlers = occupancy_handlers(store.clone());
    engine.set_on_arrive(handlers.on_arrive.expect("arrive handler"));
    engine.set_on_depart(handlers.on_depart.expect("depart handler"));

    engine.start().expect("start");
    let deadline = Instant::now() + Duration::from_secs(5);
    while calls.load(std::sync::atomic::Ordering::SeqCst) < 4 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    engine.stop().expect("stop");

    let store = store.lock().unwrap();
    assert_eq!(store.occupied(5).unwrap(), 1);
    let events = store.recent_events(5, 50).unwrap();
    assert_eq!(events.iter().filter(|e| e.kind == "arrived").count(), 3);
    assert_eq!(events.iter().filter(|e| e.kind == "departed").count(), 2);
}

#[test]
fn reopening_keeps_history() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("lots.db");
    let db_path = db_path.to_str().expect("utf-8 path");

    {
        let mut store = SqliteOccupancyStore::open(db_path).expect("open store");
        store.register_lot(1, "Main Lot").expect("register");
        use lotwatch::OccupancyStore;
        store
            .car_parked(1, std::time::SystemTime::now())
            .expect("park");
    }

    let store = SqliteOccupancyStore::open(db_path).expect("reopen store");
    assert_eq!(store.occupied(1).unwrap(), 1);
    assert_eq!(store.recent_events(1, 10).unwrap().len(), 1);
}
