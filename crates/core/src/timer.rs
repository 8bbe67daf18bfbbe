//! Countdown Timer
//!
//! A thread-safe countdown shared between the session's owning thread (which
//! arms, resets and pauses it) and an optional background thread that ticks it
//! at a fixed interval. Expiry is reported through a single registered
//! callback that fires at most once per arm/reset cycle; the `fired` flag is
//! the only record of whether that delivery already happened, so manual and
//! autonomous ticking can be mixed freely.

use crate::worker::{JOIN_WAIT, Worker};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// The callback invoked when a countdown reaches zero.
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

/// A consistent view of the countdown, as returned by [`CountdownTimer::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// The full duration a cycle counts down from.
    pub budget: Duration,
    /// Time left in the current cycle, never more than `budget`.
    pub remaining: Duration,
    /// Whether `tick` currently decrements `remaining`.
    pub running: bool,
    /// Whether this cycle's timeout has already been delivered.
    pub fired: bool,
}

struct Inner {
    state: TimerState,
    cycles: u64,
    callback: Option<TimeoutCallback>,
}

/// A countdown with arm/reset/pause/resume and an at-most-once timeout callback.
pub struct CountdownTimer {
    inner: Mutex<Inner>,
    auto: Mutex<Option<Worker>>,
}

impl CountdownTimer {
    /// Creates a stopped timer whose budget is `budget`.
    pub fn new(budget: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TimerState {
                    budget,
                    remaining: budget,
                    running: false,
                    fired: false,
                },
                cycles: 0,
                callback: None,
            }),
            auto: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new cycle, optionally replacing the budget first.
    ///
    /// Any timeout pending from the previous cycle is forgotten: `fired` is
    /// cleared and `remaining` is refilled.
    pub fn arm(&self, duration: Option<Duration>, start: bool) {
        let mut inner = self.lock();
        if let Some(duration) = duration {
            inner.state.budget = duration;
        }
        inner.state.remaining = inner.state.budget;
        inner.state.running = start;
        inner.state.fired = false;
        inner.cycles += 1;
    }

    /// Refills `remaining` from the current budget and starts a new cycle.
    ///
    /// `restart`, when given, overwrites `running`; otherwise the timer keeps
    /// whatever run state it had.
    pub fn reset(&self, restart: Option<bool>) {
        let mut inner = self.lock();
        inner.state.remaining = inner.state.budget;
        inner.state.fired = false;
        if let Some(restart) = restart {
            inner.state.running = restart;
        }
        inner.cycles += 1;
    }

    /// Stops ticking without touching `remaining`.
    pub fn pause(&self) {
        self.lock().state.running = false;
    }

    /// Resumes ticking, refilling the countdown if it had already run out.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.state.remaining.is_zero() {
            inner.state.remaining = inner.state.budget;
            inner.state.fired = false;
        }
        inner.state.running = true;
    }

    /// Registers the timeout callback, replacing any previous one.
    pub fn on_timeout<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().callback = Some(Arc::new(callback));
    }

    /// Advances the countdown by `dt`.
    ///
    /// When this call brings `remaining` to zero the timer stops and the
    /// callback runs once, after the state lock has been released so that the
    /// callback may re-arm the timer.
    pub fn tick(&self, dt: Duration) {
        let callback = {
            let mut inner = self.lock();
            let state = &mut inner.state;
            if !state.running || state.remaining.is_zero() {
                return;
            }
            state.remaining = state.remaining.saturating_sub(dt);
            if !state.remaining.is_zero() || state.fired {
                return;
            }
            state.fired = true;
            state.running = false;
            inner.callback.clone()
        };

        debug!("countdown expired");
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Time left in the current cycle.
    pub fn remaining(&self) -> Duration {
        self.lock().state.remaining
    }

    /// Whether ticks currently count down.
    pub fn running(&self) -> bool {
        self.lock().state.running
    }

    /// Whether this cycle's timeout has been delivered. Cleared by `arm`,
    /// `reset`, and `resume` after an expiry.
    pub fn fired(&self) -> bool {
        self.lock().state.fired
    }

    /// The duration each cycle starts from.
    pub fn budget(&self) -> Duration {
        self.lock().state.budget
    }

    /// Number of arm/reset cycles started since construction.
    pub fn cycles(&self) -> u64 {
        self.lock().cycles
    }

    /// All state fields read under one lock.
    pub fn snapshot(&self) -> TimerState {
        self.lock().state
    }

    /// Starts a background thread that calls `tick(interval)` every `interval`.
    ///
    /// A no-op while a previous loop is still alive. The thread only holds a
    /// weak reference, so it winds down on its own once the timer is dropped.
    pub fn start_auto_tick(self: &Arc<Self>, interval: Duration) {
        let mut auto = self.auto.lock().unwrap_or_else(PoisonError::into_inner);
        if auto.as_ref().is_some_and(Worker::is_running) {
            return;
        }

        let timer: Weak<Self> = Arc::downgrade(self);
        let spawned = Worker::spawn("countdown-tick", move |stop| {
            while !stop.load(Ordering::Acquire) {
                thread::sleep(interval);
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match timer.upgrade() {
                    Some(timer) => timer.tick(interval),
                    None => break,
                }
            }
        });

        match spawned {
            Ok(worker) => {
                debug!(interval_ms = interval.as_millis() as u64, "auto tick started");
                *auto = Some(worker);
            }
            Err(e) => warn!(error = %e, "failed to spawn auto tick thread"),
        }
    }

    /// Stops the background loop, waiting a bounded time for it to exit.
    ///
    /// Safe to call repeatedly, and from inside the timeout callback.
    pub fn stop_auto_tick(&self) {
        let auto = self
            .auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = auto {
            worker.stop(JOIN_WAIT);
        }
    }

    /// Whether the background tick thread is alive.
    pub fn is_auto_ticking(&self) -> bool {
        self.auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Worker::is_running)
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop_auto_tick();
    }
}
