//! Timeline scheduler.
//!
//! A min-ordered queue of time-stamped callbacks driven by a single timer
//! task. Events are ordered by `(time, priority, insertion id)`; the driver
//! sleeps until just before the head event, wakes early by a small guard
//! band, and flushes everything due on the audio clock. Insertions that
//! create a new head and head cancellations both rearm the timer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::clock::AudioClock;

/// Wake this much before the head event; the flush re-checks the clock.
pub const SCHEDULER_GUARD: f64 = 0.025;

/// Slop for time comparisons, in seconds.
pub const EPSILON: f64 = 1e-4;

type Callback = Box<dyn FnOnce() + Send>;

struct Entry {
    time: f64,
    priority: i32,
    id: u64,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

impl Entry {
    fn key(&self) -> (f64, i32, u64) {
        (self.time, self.priority, self.id)
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest entry first.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

#[derive(Default)]
struct State {
    queue: BinaryHeap<Entry>,
    next_id: u64,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    clock: AudioClock,
}

/// Handle to a scheduled event; cancelling marks it dead without removing
/// it from the queue (dead heads are skipped and rearm the timer).
#[derive(Clone)]
pub struct EventHandle {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl EventHandle {
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, AtomicOrdering::SeqCst) {
            self.shared.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}

/// The timeline scheduler. Dropping it stops the driver task.
pub struct EventScheduler {
    shared: Arc<Shared>,
    driver: tokio::task::JoinHandle<()>,
}

impl EventScheduler {
    /// Create a scheduler and spawn its driver on the current runtime.
    pub fn new(clock: AudioClock) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            clock,
        });

        let driver = tokio::spawn(drive(Arc::clone(&shared)));

        Self { shared, driver }
    }

    /// Schedule `callback` at absolute clock time `time` (seconds).
    ///
    /// Ties at the same instant fire in ascending `priority`, then
    /// insertion order.
    pub fn schedule(
        &self,
        time: f64,
        priority: i32,
        callback: impl FnOnce() + Send + 'static,
    ) -> EventHandle {
        let cancelled = Arc::new(AtomicBool::new(false));

        let rearm = {
            let mut state = self.shared.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;

            let was_head = state.queue.peek().map(|e| e.key());
            state.queue.push(Entry {
                time,
                priority,
                id,
                cancelled: Arc::clone(&cancelled),
                callback: Box::new(callback),
            });
            // Rearm only when the new entry became the head.
            match was_head {
                Some(head) => (time, priority, id) < head,
                None => true,
            }
        };

        if rearm {
            self.shared.notify.notify_one();
        }

        EventHandle {
            cancelled,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drop every queued event and disarm the timer.
    pub fn clear(&self) {
        self.shared.state.lock().unwrap().queue.clear();
        self.shared.notify.notify_one();
    }

    /// Number of queued (possibly cancelled) events.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }
}

impl Drop for EventScheduler {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// The single timer task: pop due events, run them, sleep until the head.
async fn drive(shared: Arc<Shared>) {
    loop {
        let (due, next_time) = {
            let mut state = shared.state.lock().unwrap();
            let now = shared.clock.now();
            let mut due: Vec<Entry> = Vec::new();

            while let Some(head) = state.queue.peek() {
                if head.cancelled.load(AtomicOrdering::SeqCst) {
                    state.queue.pop();
                    continue;
                }
                if head.time <= now + EPSILON {
                    due.push(state.queue.pop().unwrap());
                } else {
                    break;
                }
            }

            (due, state.queue.peek().map(|e| e.time))
        };

        for entry in due {
            if entry.cancelled.load(AtomicOrdering::SeqCst) {
                continue;
            }
            let result = std::panic::catch_unwind(AssertUnwindSafe(entry.callback));
            if result.is_err() {
                tracing::error!(
                    time = entry.time,
                    id = entry.id,
                    "scheduled callback panicked, continuing flush"
                );
            }
        }

        match next_time {
            Some(time) => {
                // Wake a guard band early when the head is far out; once
                // inside the band, sleep right up to the due time so the
                // loop never spins.
                let until_due = (time - shared.clock.now()).max(0.0);
                let wait = if until_due > SCHEDULER_GUARD {
                    until_due - SCHEDULER_GUARD
                } else {
                    until_due
                };
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
                    _ = shared.notify.notified() => {}
                }
            }
            None => shared.notify.notified().await,
        }
    }
}
