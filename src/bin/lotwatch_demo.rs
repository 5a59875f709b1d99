//! lotwatch_demo - end-to-end synthetic run of the occupancy engine

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use lotwatch::detect::backends::parse_counts;
use lotwatch::{handler, EngineInfo, OccupancyEngine, ScriptedDetector, SyntheticSource, VehicleEvent};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long to run, in seconds.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 10.0)]
    fps: f64,
    /// Vehicle counts the scripted detector reports, one per detection cycle.
    #[arg(long, default_value = "0,1,1,3,3,2,0")]
    counts: String,
    /// Lot name shown in events.
    #[arg(long, default_value = "Demo Lot")]
    lot_name: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !(args.fps.is_finite() && args.fps > 0.0) {
        return Err(anyhow!("fps must be greater than zero"));
    }

    let counts = parse_counts(&args.counts)?;
    let source = SyntheticSource::open("stub://demo_camera")?;
    let mut engine = OccupancyEngine::with_components(
        EngineInfo::new("stub://demo_camera", 1, &args.lot_name),
        Box::new(source),
        Box::new(ScriptedDetector::new(counts)),
    );
    engine.set_frame_rate(args.fps);
    engine.set_frame_width(640);
    engine.set_frame_height(480);
    // One detection per captured frame keeps the script in step with the camera.
    engine.set_idle_backoff(Duration::from_secs_f64(1.0 / args.fps));

    let arrivals = Arc::new(AtomicUsize::new(0));
    let departures = Arc::new(AtomicUsize::new(0));
    let arrived = arrivals.clone();
    engine.set_on_arrive(handler(move |event| {
        arrived.fetch_add(1, Ordering::SeqCst);
        print_event(event);
        Ok(())
    }));
    let departed = departures.clone();
    engine.set_on_depart(handler(move |event| {
        departed.fetch_add(1, Ordering::SeqCst);
        print_event(event);
        Ok(())
    }));

    engine.start()?;
    std::thread::sleep(Duration::from_secs(args.seconds));
    engine.stop()?;

    let stats = engine.stats();
    println!(
        "lot '{}': {} arrivals, {} departures, {} vehicles now ({} frames, {} detection cycles)",
        args.lot_name,
        arrivals.load(Ordering::SeqCst),
        departures.load(Ordering::SeqCst),
        engine.occupancy(),
        stats.frames_captured,
        stats.detection_cycles
    );
    Ok(())
}

fn print_event(event: &VehicleEvent) {
    let at_ms = event
        .timestamp
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    println!(
        "{} vehicle {} at lot {} ({})",
        at_ms,
        event.kind.as_str(),
        event.engine.lot_id(),
        event.engine.lot_name()
    );
}
