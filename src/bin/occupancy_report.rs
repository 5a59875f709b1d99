//! occupancy_report - print a lot's stored occupancy and recent events as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use lotwatch::storage::{LotRecord, StoredEvent};
use lotwatch::SqliteOccupancyStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the occupancy database.
    #[arg(long, env = "LOTWATCH_DB_PATH", default_value = "lotwatch.db")]
    db_path: String,
    /// Lot to report on.
    #[arg(long, default_value_t = 1)]
    lot_id: i64,
    /// Maximum number of recent events to include.
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Serialize)]
struct Report {
    lot: LotRecord,
    recent_events: Vec<StoredEvent>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !std::path::Path::new(&args.db_path).exists() {
        return Err(anyhow!("occupancy db {} does not exist", args.db_path));
    }
    let store = SqliteOccupancyStore::open(&args.db_path)?;
    let lot = store
        .lot(args.lot_id)?
        .ok_or_else(|| anyhow!("lot {} is not registered in {}", args.lot_id, args.db_path))?;
    let report = Report {
        lot,
        recent_events: store.recent_events(args.lot_id, args.limit)?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
