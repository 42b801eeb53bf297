//! Statement cancellation timer.
//!
//! One worker thread per facade runs scheduled cancel tasks. A statement
//! with a positive timeout arms a task before its network round-trip; the
//! returned guard de-schedules the task when dropped, so cleanup happens
//! whether the execute succeeds, fails, or panics. A task that fires
//! marks the statement cancelled and issues the out-of-band `KILL QUERY`
//! through the closure it was armed with.
//!
//! Firing only interrupts the server side; the blocked execute observes
//! the cancelled flag as soon as its I/O returns.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type CancelAction = Box<dyn FnOnce() + Send>;

struct Entry {
    deadline: Instant,
    id: u64,
    /// Cleared by the guard to de-schedule; checked at fire time
    armed: Arc<AtomicBool>,
    action: Option<CancelAction>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline wins
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct TimerState {
    queue: BinaryHeap<Entry>,
    next_id: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Shared cancellation timer; one per facade.
pub struct CancelTimer {
    shared: Arc<TimerShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CancelTimer {
    /// Start the timer worker thread.
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                next_id: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("stratum-cancel-timer".to_string())
            .spawn(move || run_worker(&worker_shared))
            .expect("spawn cancellation timer thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Schedule `action` to run after `delay`. Dropping the returned guard
    /// de-schedules the task.
    pub fn schedule(&self, delay: Duration, action: impl FnOnce() + Send + 'static) -> CancelGuard {
        let armed = Arc::new(AtomicBool::new(true));
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push(Entry {
            deadline: Instant::now() + delay,
            id,
            armed: Arc::clone(&armed),
            action: Some(Box::new(action)),
        });
        drop(state);
        self.shared.condvar.notify_all();

        CancelGuard { armed }
    }
}

impl Default for CancelTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.shutdown = true;
        }
        self.shared.condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// De-schedules its task on drop.
#[must_use = "dropping the guard immediately de-schedules the cancel task"]
pub struct CancelGuard {
    armed: Arc<AtomicBool>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

fn run_worker(shared: &TimerShared) {
    let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if state.shutdown {
            return;
        }

        // Disarmed tasks at the top are dropped without waiting for them
        while state
            .queue
            .peek()
            .is_some_and(|top| !top.armed.load(Ordering::SeqCst))
        {
            state.queue.pop();
        }

        let now = Instant::now();
        match state.queue.peek() {
            Some(top) if top.deadline <= now => {
                let mut entry = state.queue.pop().expect("peeked entry");
                let action = entry.action.take();
                // Fire outside the lock: the action opens a connection and
                // must not block scheduling. Re-check armed last so a guard
                // dropped while we slept wins.
                drop(state);
                if entry.armed.swap(false, Ordering::SeqCst) {
                    if let Some(action) = action {
                        action();
                    }
                }
                state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            }
            Some(top) => {
                let wait = top.deadline - now;
                let (guard, _) = shared
                    .condvar
                    .wait_timeout(state, wait)
                    .unwrap_or_else(|e| e.into_inner());
                state = guard;
            }
            None => {
                state = shared
                    .condvar
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
    }
}
