//! Last-known vehicle count and the per-cycle diff that drives events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Change between the previous count and the newest observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OccupancyDelta {
    pub previous: usize,
    pub current: usize,
}

impl OccupancyDelta {
    /// Arrival events owed for this change.
    pub fn arrivals(&self) -> usize {
        self.current.saturating_sub(self.previous)
    }

    /// Departure events owed for this change.
    pub fn departures(&self) -> usize {
        self.previous.saturating_sub(self.current)
    }

    pub fn is_unchanged(&self) -> bool {
        self.previous == self.current
    }

    /// Signed change, arrivals minus departures.
    pub fn net(&self) -> i64 {
        self.current as i64 - self.previous as i64
    }
}

/// Vehicle count as of the latest detection cycle.
///
/// The count is replaced (not incremented) each cycle. `observe` is an atomic
/// read-modify-write, so concurrent observers never lose or duplicate a change:
/// the deltas they receive always sum to the final count.
#[derive(Debug, Default)]
pub struct OccupancyCounter {
    count: Mutex<usize>,
    snapshot: AtomicUsize,
}

impl OccupancyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the vehicles seen in the newest frame and return the change.
    pub fn observe(&self, cars_in_frame: usize) -> OccupancyDelta {
        let mut count = match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = *count;
        *count = cars_in_frame;
        self.snapshot.store(cars_in_frame, Ordering::SeqCst);
        OccupancyDelta {
            previous,
            current: cars_in_frame,
        }
    }

    /// Lock-free read of the last observed count.
    pub fn current(&self) -> usize {
        self.snapshot.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delta_splits_into_arrivals_and_departures() {
        let up = OccupancyDelta {
            previous: 1,
            current: 4,
        };
        assert_eq!((up.arrivals(), up.departures(), up.net()), (3, 0, 3));

        let down = OccupancyDelta {
            previous: 4,
            current: 1,
        };
        assert_eq!((down.arrivals(), down.departures(), down.net()), (0, 3, -3));

        let flat = OccupancyDelta {
            previous: 2,
            current: 2,
        };
        assert!(flat.is_unchanged());
        assert_eq!((flat.arrivals(), flat.departures()), (0, 0));
    }

    #[test]
    fn observe_replaces_the_count() {
        let counter = OccupancyCounter::new();
        assert_eq!(counter.observe(3).arrivals(), 3);
        assert_eq!(counter.observe(1).departures(), 2);
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn running_sum_of_deltas_tracks_latest_count() {
        let counter = OccupancyCounter::new();
        let mut running: i64 = 0;
        for cars in [0usize, 5, 5, 2, 7, 0, 0, 3, 1] {
            running += counter.observe(cars).net();
            assert_eq!(running, cars as i64);
            assert!(running >= 0);
        }
    }

    #[test]
    fn concurrent_observers_never_lose_changes() {
        let counter = Arc::new(OccupancyCounter::new());
        let stream: Vec<usize> = (0..200).map(|i| (i * 7) % 11).collect();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let counter = counter.clone();
                let stream = stream.clone();
                std::thread::spawn(move || {
                    stream
                        .iter()
                        .skip(worker)
                        .step_by(8)
                        .map(|cars| counter.observe(*cars).net())
                        .sum::<i64>()
                })
            })
            .collect();

        let net: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(net, counter.current() as i64);
    }
}
