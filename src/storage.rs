use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::events::{handler, EventHandlers, EventKind};

/// Persistent per-lot occupancy.
pub trait OccupancyStore: Send {
    /// Record one arrival. Returns the lot's new occupancy.
    fn car_parked(&mut self, lot_id: i64, at: SystemTime) -> Result<i64>;

    /// Record one departure. Occupancy never drops below zero. Returns the new occupancy.
    fn car_left(&mut self, lot_id: i64, at: SystemTime) -> Result<i64>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LotRecord {
    pub lot_id: i64,
    pub name: String,
    pub occupied: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub lot_id: i64,
    pub kind: String,
    pub occurred_at_ms: i64,
}

pub struct SqliteOccupancyStore {
    conn: Connection,
}

impl SqliteOccupancyStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open occupancy db {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS lots (
              lot_id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              occupied INTEGER NOT NULL DEFAULT 0,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS occupancy_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              lot_id INTEGER NOT NULL,
              kind TEXT NOT NULL,
              occurred_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_occupancy_events_lot ON occupancy_events(lot_id, id);
            "#,
        )?;
        Ok(())
    }

    /// Create or rename a lot and reset its occupancy to zero.
    ///
    /// The engine counts from an empty lot, so the stored count restarts with it.
    pub fn register_lot(&mut self, lot_id: i64, name: &str) -> Result<()> {
        let now = epoch_ms(SystemTime::now())? / 1000;
        self.conn.execute(
            "INSERT INTO lots (lot_id, name, occupied, updated_at) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(lot_id) DO UPDATE SET name = excluded.name, occupied = 0,
             updated_at = excluded.updated_at",
            params![lot_id, name, now],
        )?;
        Ok(())
    }

    pub fn lot(&self, lot_id: i64) -> Result<Option<LotRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT lot_id, name, occupied, updated_at FROM lots WHERE lot_id = ?1",
                params![lot_id],
                |row| {
                    Ok(LotRecord {
                        lot_id: row.get(0)?,
                        name: row.get(1)?,
                        occupied: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn occupied(&self, lot_id: i64) -> Result<i64> {
        self.lot(lot_id)?
            .map(|lot| lot.occupied)
            .ok_or_else(|| anyhow!("lot {} is not registered", lot_id))
    }

    /// Most recent events for a lot, newest first.
    pub fn recent_events(&self, lot_id: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit exceeds i64 range"))?;
        let mut stmt = self.conn.prepare(
            "SELECT id, lot_id, kind, occurred_at_ms FROM occupancy_events
             WHERE lot_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![lot_id, limit], |row| {
            Ok(StoredEvent {
                id: row.get(0)?,
                lot_id: row.get(1)?,
                kind: row.get(2)?,
                occurred_at_ms: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn record(&mut self, lot_id: i64, kind: EventKind, at: SystemTime) -> Result<i64> {
        let at_ms = epoch_ms(at)?;
        let tx = self.conn.transaction()?;
        let step = match kind {
            EventKind::Arrived => "occupied + 1",
            EventKind::Departed => "MAX(occupied - 1, 0)",
        };
        let updated = tx.execute(
            &format!(
                "UPDATE lots SET occupied = {}, updated_at = ?2 WHERE lot_id = ?1",
                step
            ),
            params![lot_id, at_ms / 1000],
        )?;
        if updated == 0 {
            return Err(anyhow!("lot {} is not registered", lot_id));
        }
        tx.execute(
            "INSERT INTO occupancy_events (lot_id, kind, occurred_at_ms) VALUES (?1, ?2, ?3)",
            params![lot_id, kind.as_str(), at_ms],
        )?;
        let occupied: i64 = tx.query_row(
            "SELECT occupied FROM lots WHERE lot_id = ?1",
            params![lot_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(occupied)
    }
}

impl OccupancyStore for SqliteOccupancyStore {
    fn car_parked(&mut self, lot_id: i64, at: SystemTime) -> Result<i64> {
        self.record(lot_id, EventKind::Arrived, at)
    }

    fn car_left(&mut self, lot_id: i64, at: SystemTime) -> Result<i64> {
        self.record(lot_id, EventKind::Departed, at)
    }
}

/// Arrival/departure handlers that write every event through `store`.
///
/// Handlers run concurrently; the mutex serializes them onto the store.
pub fn occupancy_handlers<S>(store: Arc<Mutex<S>>) -> EventHandlers
where
    S: OccupancyStore + 'static,
{
    let parked = store.clone();
    let left = store;
    EventHandlers {
        on_arrive: Some(handler(move |event| {
            let mut store = parked
                .lock()
                .map_err(|_| anyhow!("occupancy store lock poisoned"))?;
            let occupied = store.car_parked(event.engine.lot_id(), event.timestamp)?;
            log::debug!("lot {} stored occupancy {}", event.engine.lot_id(), occupied);
            Ok(())
        })),
        on_depart: Some(handler(move |event| {
            let mut store = left
                .lock()
                .map_err(|_| anyhow!("occupancy store lock poisoned"))?;
            let occupied = store.car_left(event.engine.lot_id(), event.timestamp)?;
            log::debug!("lot {} stored occupancy {}", event.engine.lot_id(), occupied);
            Ok(())
        })),
    }
}

fn epoch_ms(at: SystemTime) -> Result<i64> {
    let ms = at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("event time is before the unix epoch"))?
        .as_millis();
    i64::try_from(ms).map_err(|_| anyhow!("event time exceeds i64 range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> SqliteOccupancyStore {
        let mut store = SqliteOccupancyStore::open(":memory:").expect("open");
        store.register_lot(1, "Main Lot").expect("register");
        store
    }

    #[test]
    fn parked_and_left_move_the_count() {
        let mut store = store();
        let now = SystemTime::now();
        assert_eq!(store.car_parked(1, now).unwrap(), 1);
        assert_eq!(store.car_parked(1, now).unwrap(), 2);
        assert_eq!(store.car_left(1, now).unwrap(), 1);
        assert_eq!(store.occupied(1).unwrap(), 1);
    }

    #[test]
    fn departures_clamp_at_zero() {
        let mut store = store();
        assert_eq!(store.car_left(1, SystemTime::now()).unwrap(), 0);
        assert_eq!(store.occupied(1).unwrap(), 0);
        assert_eq!(store.recent_events(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn unknown_lot_is_rejected() {
        let mut store = store();
        assert!(store.car_parked(99, SystemTime::now()).is_err());
        assert!(store.recent_events(99, 10).unwrap().is_empty());
    }

    #[test]
    fn recent_events_are_newest_first() {
        let mut store = store();
        let base = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        store.car_parked(1, base).unwrap();
        store.car_left(1, base + Duration::from_millis(250)).unwrap();
        let events = store.recent_events(1, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "departed");
        assert_eq!(events[0].occurred_at_ms, 1_700_000_000_250);
        assert_eq!(events[1].kind, "arrived");
    }

    #[test]
    fn register_resets_occupancy() {
        let mut store = store();
        store.car_parked(1, SystemTime::now()).unwrap();
        store.register_lot(1, "Renamed").unwrap();
        let lot = store.lot(1).unwrap().expect("lot");
        assert_eq!((lot.name.as_str(), lot.occupied), ("Renamed", 0));
    }
}
