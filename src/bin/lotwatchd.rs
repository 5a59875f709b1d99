//! lotwatchd - parking lot occupancy daemon
//!
//! This daemon:
//! 1. Loads configuration (LOTWATCH_CONFIG file + LOTWATCH_* env overrides)
//! 2. Opens the camera source and loads the vehicle detector
//! 3. Writes every arrival/departure to the SQLite occupancy store
//! 4. Logs engine health every 5 seconds until Ctrl-C, source loss or quit

use anyhow::Result;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use lotwatch::config::LotwatchdConfig;
use lotwatch::{
    occupancy_handlers, EngineState, FrameDumpViewer, OccupancyEngine, SqliteOccupancyStore,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = LotwatchdConfig::load()?;
    log::info!(
        "lotwatchd {} starting for lot {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.lot_id,
        config.lot_name
    );

    let mut engine =
        OccupancyEngine::open(&config.source, &config.model, config.lot_id, &config.lot_name)?;
    engine.set_frame_rate(config.capture.fps);
    engine.set_frame_width(config.capture.width);
    engine.set_frame_height(config.capture.height);
    engine.set_show_debug_window(config.debug_window);

    if config.storage.enabled {
        let mut store = SqliteOccupancyStore::open(&config.storage.db_path)?;
        store.register_lot(config.lot_id, &config.lot_name)?;
        let handlers = occupancy_handlers(Arc::new(Mutex::new(store)));
        if let Some(on_arrive) = handlers.on_arrive {
            engine.set_on_arrive(on_arrive);
        }
        if let Some(on_depart) = handlers.on_depart {
            engine.set_on_depart(on_depart);
        }
        log::info!("writing occupancy to {}", config.storage.db_path);
    } else {
        log::warn!("storage disabled; events are only logged");
    }

    if config.debug_window {
        let quit = Arc::new(AtomicBool::new(false));
        let viewer = FrameDumpViewer::new(&config.debug_dump_dir)?.with_quit_signal(quit.clone());
        log::info!(
            "debug frames written to {}; type q + Enter to quit",
            viewer.latest_path().display()
        );
        engine.set_debug_viewer(Box::new(viewer));
        spawn_quit_reader(quit);
    }

    engine.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) => {
                log::info!("shutdown signal received, stopping engine...");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if engine.state() == EngineState::Stopped {
            log::warn!("engine stopped on its own ({:?})", engine.stop_reason());
            break;
        }
        let stats = engine.stats();
        log::info!(
            "lot {} occupancy={} frames={} cycles={} handlers_in_flight={}",
            config.lot_id,
            engine.occupancy(),
            stats.frames_captured,
            stats.detection_cycles,
            stats.handlers_in_flight
        );
    }

    engine.stop()?;
    log::info!("lotwatchd exiting with occupancy {}", engine.occupancy());
    Ok(())
}

/// Stand-in for a window quit key: `q` on stdin asks the viewer to quit.
fn spawn_quit_reader(quit: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-quit".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    quit.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("stdin quit reader unavailable: {}", e);
    }
}
