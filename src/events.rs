//! Vehicle arrival/departure events and their fire-and-forget dispatch.
//!
//! Each unit of change in the vehicle count becomes one handler invocation on
//! its own thread. The detection loop never waits for a handler, and handlers
//! in one burst may run in any order, so a handler must tolerate running
//! concurrently with itself.

use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::engine::EngineInfo;
use crate::occupancy::OccupancyDelta;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Arrived,
    Departed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Arrived => "arrived",
            EventKind::Departed => "departed",
        }
    }
}

/// One vehicle arriving or departing.
///
/// Carries no payload beyond the time and the engine that saw it; handlers
/// identify the lot through `engine`.
#[derive(Clone, Debug)]
pub struct VehicleEvent {
    pub kind: EventKind,
    pub timestamp: SystemTime,
    pub engine: Arc<EngineInfo>,
}

/// Callback invoked once per vehicle event. Errors are logged, never propagated.
pub type EventHandler = Arc<dyn Fn(&VehicleEvent) -> Result<()> + Send + Sync>;

/// Wrap a closure as an `EventHandler`.
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&VehicleEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Installed when no handler was registered before start: logs and does nothing else.
pub fn default_handler() -> EventHandler {
    handler(|event| {
        log::debug!(
            "vehicle {} at lot {} ({}), no handler registered",
            event.kind.as_str(),
            event.engine.lot_id(),
            event.engine.lot_name()
        );
        Ok(())
    })
}

/// The pair of handlers an engine fires.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub on_arrive: Option<EventHandler>,
    pub on_depart: Option<EventHandler>,
}

// ----------------------------------------------------------------------------
// In-flight tracking
// ----------------------------------------------------------------------------

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        let mut count = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count += 1;
    }

    fn finish(&self) {
        let mut count = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn current(&self) -> usize {
        match self.count.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.idle.wait_timeout_while(guard, timeout, |count| *count > 0) {
            Ok((guard, _)) => *guard == 0,
            Err(poisoned) => *poisoned.into_inner().0 == 0,
        }
    }
}

/// Decrements the in-flight count when the handler thread finishes, however it finishes.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// Turns count changes into handler invocations.
#[derive(Clone)]
pub struct EventDispatcher {
    on_arrive: EventHandler,
    on_depart: EventHandler,
    engine: Arc<EngineInfo>,
    in_flight: Arc<InFlight>,
}

impl EventDispatcher {
    pub fn new(handlers: EventHandlers, engine: Arc<EngineInfo>) -> Self {
        Self {
            on_arrive: handlers.on_arrive.unwrap_or_else(default_handler),
            on_depart: handlers.on_depart.unwrap_or_else(default_handler),
            engine,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Fire one arrival per unit increase or one departure per unit decrease.
    /// Returns the number of invocations issued.
    pub fn dispatch(&self, delta: &OccupancyDelta) -> usize {
        for _ in 0..delta.arrivals() {
            self.fire(EventKind::Arrived, self.on_arrive.clone());
        }
        for _ in 0..delta.departures() {
            self.fire(EventKind::Departed, self.on_depart.clone());
        }
        delta.arrivals() + delta.departures()
    }

    pub fn engine(&self) -> &Arc<EngineInfo> {
        &self.engine
    }

    /// Handler invocations that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Block until every issued invocation finished, or the timeout passes.
    /// Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout)
    }

    fn fire(&self, kind: EventKind, handler: EventHandler) {
        self.in_flight.begin();
        let guard = InFlightGuard(self.in_flight.clone());
        let engine = self.engine.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("lot-{}-event", engine.lot_id()))
            .spawn(move || {
                let _guard = guard;
                let event = VehicleEvent {
                    kind,
                    timestamp: SystemTime::now(),
                    engine,
                };
                let started = Instant::now();
                match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                    Ok(Ok(())) => log::trace!(
                        "{} handler for lot {} finished in {:?}",
                        kind.as_str(),
                        event.engine.lot_id(),
                        started.elapsed()
                    ),
                    Ok(Err(err)) => log::error!(
                        "{} handler for lot {} failed: {:#}",
                        kind.as_str(),
                        event.engine.lot_id(),
                        err
                    ),
                    Err(_) => log::error!(
                        "{} handler for lot {} panicked",
                        kind.as_str(),
                        event.engine.lot_id()
                    ),
                }
            });
        if let Err(err) = spawned {
            // The guard moved into the failed closure and was dropped with it.
            log::error!("failed to spawn {} handler thread: {}", kind.as_str(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> Arc<EngineInfo> {
        Arc::new(EngineInfo::new("stub://lot", 7, "North Lot"))
    }

    fn counting(counter: Arc<AtomicUsize>) -> EventHandler {
        handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn dispatch_fires_one_call_per_unit_change() {
        let arrived = Arc::new(AtomicUsize::new(0));
        let departed = Arc::new(AtomicUsize::new(0));
        let dispatcher = EventDispatcher::new(
            EventHandlers {
                on_arrive: Some(counting(arrived.clone())),
                on_depart: Some(counting(departed.clone())),
            },
            engine(),
        );

        let issued = dispatcher.dispatch(&OccupancyDelta {
            previous: 0,
            current: 3,
        });
        assert_eq!(issued, 3);
        dispatcher.dispatch(&OccupancyDelta {
            previous: 3,
            current: 1,
        });
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));

        assert_eq!(arrived.load(Ordering::SeqCst), 3);
        assert_eq!(departed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_sees_engine_identity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = EventDispatcher::new(
            EventHandlers {
                on_arrive: Some(handler(move |event| {
                    sink.lock().unwrap().push((
                        event.kind,
                        event.engine.lot_id(),
                        event.engine.lot_name().to_string(),
                    ));
                    Ok(())
                })),
                on_depart: None,
            },
            engine(),
        );
        dispatcher.dispatch(&OccupancyDelta {
            previous: 0,
            current: 1,
        });
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(EventKind::Arrived, 7, "North Lot".to_string())]
        );
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let dispatcher = EventDispatcher::new(
            EventHandlers {
                on_arrive: Some(handler(|_| Err(anyhow!("database offline")))),
                on_depart: Some(handler(|_| panic!("handler bug"))),
            },
            engine(),
        );
        dispatcher.dispatch(&OccupancyDelta {
            previous: 0,
            current: 2,
        });
        dispatcher.dispatch(&OccupancyDelta {
            previous: 2,
            current: 0,
        });
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn default_handlers_do_nothing_observable() {
        let dispatcher = EventDispatcher::new(EventHandlers::default(), engine());
        assert_eq!(
            dispatcher.dispatch(&OccupancyDelta {
                previous: 0,
                current: 2
            }),
            2
        );
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn unchanged_count_fires_nothing() {
        let dispatcher = EventDispatcher::new(EventHandlers::default(), engine());
        let issued = dispatcher.dispatch(&OccupancyDelta {
            previous: 4,
            current: 4,
        });
        assert_eq!(issued, 0);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
