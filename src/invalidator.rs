//! Drives the FrameSource collaborator to produce frames at the configured
//! cadence, with a watchdog to un-stick a stalled producer and optional
//! back-pressure pause/resume.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Function the invalidator calls to request a repaint from the
/// FrameSource. Returns `false` on failure; failures are logged and do not
/// stop the next scheduled attempt.
pub type InvalidateFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct InvalidatorOptions {
    pub target_interval: Duration,
    pub watchdog_interval: Duration,
    pub paced: bool,
    pub cadence_adaptation: bool,
}

struct SharedState {
    paused: AtomicBool,
    shutdown: AtomicBool,
    pending_request: AtomicBool,
    /// Nanoseconds of drift correction applied on top of `target_interval`
    /// in cadence-adapted free-running mode, bounded to ± half the target
    /// interval. Signed so the schedule can run either ahead or behind.
    correction_nanos: AtomicI64,
    last_activity: Mutex<Instant>,
    wake: Condvar,
    wake_lock: Mutex<()>,
    capture_gate_pauses: AtomicI64,
    capture_gate_resumes: AtomicI64,
}

/// Schedules invalidation requests to the FrameSource collaborator.
pub struct CaptureInvalidator {
    options: InvalidatorOptions,
    invalidate_fn: InvalidateFn,
    state: Arc<SharedState>,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
    watchdog_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureInvalidator {
    pub fn new(options: InvalidatorOptions, invalidate_fn: InvalidateFn) -> Self {
        let state = Arc::new(SharedState {
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            pending_request: AtomicBool::new(false),
            correction_nanos: AtomicI64::new(0),
            last_activity: Mutex::new(Instant::now()),
            wake: Condvar::new(),
            wake_lock: Mutex::new(()),
            capture_gate_pauses: AtomicI64::new(0),
            capture_gate_resumes: AtomicI64::new(0),
        });
        Self {
            options,
            invalidate_fn,
            state,
            tick_thread: Mutex::new(None),
            watchdog_thread: Mutex::new(None),
        }
    }

    /// Spawns the tick/dispatch thread and the watchdog thread. In paced
    /// mode an initial invalidate is issued synchronously before the
    /// dispatch thread starts waiting on `request_next`.
    pub fn start(&self) {
        *self.state.last_activity.lock() = Instant::now();

        if self.options.paced {
            call_invalidate(&self.invalidate_fn);
        }

        let state = Arc::clone(&self.state);
        let invalidate_fn = Arc::clone(&self.invalidate_fn);
        let options_paced = self.options.paced;
        let target_interval = self.options.target_interval;

        let tick = std::thread::Builder::new()
            .name("capture-invalidator-tick".into())
            .spawn(move || {
                if options_paced {
                    run_paced_dispatch(&state, &invalidate_fn);
                } else {
                    run_free_running_tick(&state, &invalidate_fn, target_interval);
                }
            })
            .expect("failed to spawn capture invalidator tick thread");
        *self.tick_thread.lock() = Some(tick);

        let watchdog_state = Arc::clone(&self.state);
        let watchdog_invalidate = Arc::clone(&self.invalidate_fn);
        let watchdog_interval = self.options.watchdog_interval;
        let watchdog = std::thread::Builder::new()
            .name("capture-invalidator-watchdog".into())
            .spawn(move || run_watchdog(&watchdog_state, &watchdog_invalidate, watchdog_interval))
            .expect("failed to spawn capture invalidator watchdog thread");
        *self.watchdog_thread.lock() = Some(watchdog);
    }

    /// Requests the next invalidate in paced mode. Coalesces: multiple
    /// calls before the dispatch thread wakes produce a single invalidate.
    pub fn request_next(&self) {
        self.state.pending_request.store(true, Ordering::Release);
        let _guard = self.state.wake_lock.lock();
        self.state.wake.notify_all();
    }

    /// Called by the producer whenever a paint is actually observed, to
    /// keep the watchdog baseline current.
    pub fn notify_paint(&self) {
        *self.state.last_activity.lock() = Instant::now();
    }

    pub fn pause(&self) {
        if !self.state.paused.swap(true, Ordering::AcqRel) {
            self.state.capture_gate_pauses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn resume(&self) {
        if self.state.paused.swap(false, Ordering::AcqRel) {
            self.state.capture_gate_resumes.fetch_add(1, Ordering::Relaxed);
            *self.state.last_activity.lock() = Instant::now();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// Updates the drift-based interval correction used in cadence-adapted
    /// mode. `drift_frames` is `(measured_fps - configured_fps) /
    /// configured_fps`; the resulting correction is bounded to ± half the
    /// target interval.
    pub fn update_drift(&self, drift_frames: f64) {
        if !self.options.cadence_adaptation {
            return;
        }
        let half_interval_nanos = self.options.target_interval.as_nanos() as f64 / 2.0;
        let raw_correction_nanos = drift_frames * self.options.target_interval.as_nanos() as f64;
        let bounded = raw_correction_nanos.clamp(-half_interval_nanos, half_interval_nanos);
        self.state
            .correction_nanos
            .store(bounded as i64, Ordering::Relaxed);
    }

    pub fn capture_gate_pauses(&self) -> i64 {
        self.state.capture_gate_pauses.load(Ordering::Relaxed)
    }

    pub fn capture_gate_resumes(&self) -> i64 {
        self.state.capture_gate_resumes.load(Ordering::Relaxed)
    }

    /// Cancels both worker threads and joins them. Safe to call more than
    /// once.
    pub fn stop(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.state.wake_lock.lock();
            self.state.wake.notify_all();
        }
        if let Some(handle) = self.tick_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watchdog_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureInvalidator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn call_invalidate(invalidate_fn: &InvalidateFn) {
    if !invalidate_fn() {
        log::warn!("capture invalidate failed; next tick will retry");
    }
}

fn run_free_running_tick(state: &SharedState, invalidate_fn: &InvalidateFn, target_interval: Duration) {
    let mut next_deadline = Instant::now() + effective_interval(state, target_interval);
    while !state.shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next_deadline {
            let remaining = next_deadline - now;
            let mut guard = state.wake_lock.lock();
            let _ = state.wake.wait_for(&mut guard, remaining);
        }
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }
        if !state.paused.load(Ordering::Acquire) {
            call_invalidate(invalidate_fn);
        }
        next_deadline = Instant::now() + effective_interval(state, target_interval);
    }
}

fn effective_interval(state: &SharedState, target_interval: Duration) -> Duration {
    let correction_nanos = state.correction_nanos.load(Ordering::Relaxed);
    if correction_nanos >= 0 {
        target_interval + Duration::from_nanos(correction_nanos as u64)
    } else {
        target_interval.saturating_sub(Duration::from_nanos((-correction_nanos) as u64))
    }
}

fn run_paced_dispatch(state: &SharedState, invalidate_fn: &InvalidateFn) {
    while !state.shutdown.load(Ordering::Acquire) {
        let mut guard = state.wake_lock.lock();
        if !state.pending_request.load(Ordering::Acquire) && !state.shutdown.load(Ordering::Acquire) {
            state.wake.wait_for(&mut guard, Duration::from_millis(50));
        }
        drop(guard);

        if state.shutdown.load(Ordering::Acquire) {
            break;
        }
        if state.pending_request.swap(false, Ordering::AcqRel) && !state.paused.load(Ordering::Acquire) {
            call_invalidate(invalidate_fn);
        }
    }
}

fn run_watchdog(state: &SharedState, invalidate_fn: &InvalidateFn, watchdog_interval: Duration) {
    let poll_interval = (watchdog_interval / 4).max(Duration::from_millis(1));
    while !state.shutdown.load(Ordering::Acquire) {
        std::thread::sleep(poll_interval);
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }
        let elapsed = state.last_activity.lock().elapsed();
        if elapsed >= watchdog_interval {
            log::warn!("capture watchdog stall detected after {elapsed:?}; forcing invalidate");
            call_invalidate(invalidate_fn);
            *state.last_activity.lock() = Instant::now();
        }
    }
}
