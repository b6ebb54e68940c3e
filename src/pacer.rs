//! The pacer: a dedicated thread that drains the `FrameQueue` at a constant
//! cadence, warms up before sending fresh frames, repeats the last frame on
//! underrun, and sheds excess backlog via a latency-error integrator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use frame_transport::{FrameDescriptor, PixelFormat};

use crate::config::PipelineOptions;
use crate::frame::OwnedFrame;
use crate::invalidator::CaptureInvalidator;
use crate::queue::FrameQueue;
use crate::telemetry::{Counters, Telemetry};
use crate::traits::Sink;

/// Two-state machine the pacer runs through: it only emits fresh frames
/// once `Primed`, and falls back to repeating the last-sent frame whenever
/// it re-enters `WarmingUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    WarmingUp,
    Primed,
}

/// Sliding window of inter-capture intervals, used to measure the
/// producer's actual cadence for the advertised rate and for cadence-drift
/// feedback to the invalidator.
struct DriftTracker {
    samples: Mutex<VecDeque<Instant>>,
    capacity: usize,
}

impl DriftTracker {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn record_capture(&self) {
        let mut samples = self.samples.lock();
        samples.push_back(Instant::now());
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Measured frames-per-second, or `None` if fewer than 3 samples are
    /// available.
    fn measured_fps(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.len() < 3 {
            return None;
        }
        let span = *samples.back().unwrap() - *samples.front().unwrap();
        let intervals = samples.len() as f64 - 1.0;
        if span.as_secs_f64() <= 0.0 {
            return None;
        }
        Some(intervals / span.as_secs_f64())
    }
}

/// Shared with the producer so `Pipeline::ingest` can feed the drift
/// tracker without depending on `Pacer` internals.
pub struct CadenceFeed {
    tracker: Arc<DriftTracker>,
}

impl CadenceFeed {
    pub fn record_capture(&self) {
        self.tracker.record_capture();
    }
}

pub struct Pacer {
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    cadence_feed: Arc<DriftTracker>,
}

struct LoopContext {
    options: PipelineOptions,
    queue: Arc<FrameQueue>,
    sink: Arc<dyn Sink>,
    invalidator: Option<Arc<CaptureInvalidator>>,
    counters: Arc<Counters>,
    telemetry: Arc<Telemetry>,
    drift_tracker: Arc<DriftTracker>,
    shutdown: Arc<AtomicBool>,
}

impl Pacer {
    pub fn new(
        options: PipelineOptions,
        queue: Arc<FrameQueue>,
        sink: Arc<dyn Sink>,
        invalidator: Option<Arc<CaptureInvalidator>>,
        counters: Arc<Counters>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let drift_tracker = Arc::new(DriftTracker::new(60));
        let shutdown = Arc::new(AtomicBool::new(false));
        let context = LoopContext {
            options,
            queue,
            sink,
            invalidator,
            counters,
            telemetry,
            drift_tracker: Arc::clone(&drift_tracker),
            shutdown: Arc::clone(&shutdown),
        };

        let thread = std::thread::Builder::new()
            .name("pacer".into())
            .spawn(move || run_pacer_loop(context))
            .expect("failed to spawn pacer thread");

        Self {
            shutdown,
            thread: Mutex::new(Some(thread)),
            cadence_feed: drift_tracker,
        }
    }

    pub fn cadence_feed(&self) -> CadenceFeed {
        CadenceFeed {
            tracker: Arc::clone(&self.cadence_feed),
        }
    }

    /// Cancels the pacer's sleep loop and joins the thread. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pacer_loop(ctx: LoopContext) {
    let frame_duration = ctx.options.frame_rate.frame_duration();
    let target_depth = ctx.options.target_depth as i64;
    let low_watermark = ctx.options.low_watermark;
    let high_watermark = ctx.options.high_watermark as usize;

    let mut state = PacerState::WarmingUp;
    let mut latency_error: f64 = 0.0;
    let mut last_sent: Option<OwnedFrame> = None;
    let mut warmup_started_at = Instant::now();
    let mut expanding = false;
    let mut was_paused = false;

    let start = Instant::now();
    let mut tick: u64 = 0;

    loop {
        let next_deadline = start + frame_duration * tick as u32;
        if !sleep::precise_sleep_until(next_deadline, &ctx.shutdown) {
            break;
        }

        let now = Instant::now();
        // Slip forward rather than firing multiple catch-up ticks if we
        // fell more than one frame behind.
        let elapsed_ticks = (now.duration_since(start).as_secs_f64() / frame_duration.as_secs_f64())
            .floor() as u64;
        tick = std::cmp::max(tick + 1, elapsed_ticks + 1);

        let backlog = ctx.queue.count() as i64;
        latency_error += (backlog - target_depth) as f64;

        match state {
            PacerState::WarmingUp => {
                if backlog >= target_depth && latency_error >= 0.0 {
                    let warmup_duration = warmup_started_at.elapsed();
                    ctx.counters.record_warmup_cycle(warmup_duration);
                    log::info!(
                        "pacer primed after {:?} (backlog={})",
                        warmup_duration,
                        backlog
                    );
                    state = PacerState::Primed;
                } else {
                    repeat_last(&ctx, &last_sent);
                    finish_tick(&ctx, &mut was_paused, backlog, high_watermark);
                    continue;
                }
            }
            PacerState::Primed => {
                if backlog as f64 <= low_watermark {
                    ctx.counters.record_underrun();
                    if ctx.options.allow_latency_expansion && backlog > 0 {
                        expanding = true;
                    } else {
                        state = PacerState::WarmingUp;
                        warmup_started_at = Instant::now();
                        latency_error = 0.0;
                        ctx.queue.drain_to_latest();
                        repeat_last(&ctx, &last_sent);
                        finish_tick(&ctx, &mut was_paused, backlog, high_watermark);
                        continue;
                    }
                }
            }
        }

        match ctx.queue.try_dequeue() {
            Some(frame) => {
                if send_frame(&ctx, &frame) {
                    ctx.counters.record_sent();
                }
                last_sent = Some(frame);
                if expanding && ctx.queue.count() == 0 {
                    expanding = false;
                }
            }
            None => {
                // Race: treat exactly like an underrun.
                ctx.counters.record_underrun();
                if !(ctx.options.allow_latency_expansion && backlog > 0) {
                    state = PacerState::WarmingUp;
                    warmup_started_at = Instant::now();
                    latency_error = 0.0;
                    ctx.queue.drain_to_latest();
                }
                repeat_last(&ctx, &last_sent);
                finish_tick(&ctx, &mut was_paused, backlog, high_watermark);
                continue;
            }
        }

        if state == PacerState::Primed && !expanding {
            while latency_error > 1.0 && ctx.queue.count() as i64 > target_depth {
                if ctx.queue.try_dequeue().is_none() {
                    break;
                }
                latency_error -= 1.0;
                ctx.counters.record_high_watermark_drop();
            }
        }

        // Use the tick's initial backlog snapshot (not the post-drain
        // count) for the back-pressure decision: the latency-integrator
        // drain above is this tick's own correction and would otherwise
        // mask the oversupply that the drain was reacting to in the first
        // place, making `count() > high_watermark` unreachable once the
        // integrator is keeping up.
        finish_tick(&ctx, &mut was_paused, backlog, high_watermark);
    }

    // Shutdown: release state, drain the queue, never block on the sink.
    ctx.queue.clear();
}

fn finish_tick(ctx: &LoopContext, was_paused: &mut bool, backlog: i64, high_watermark: usize) {
    // The queue is the sole source of truth for overflow/stale drops
    // (the producer thread's enqueue and the pacer's own drain_to_latest
    // both feed it); mirror its live totals into the externally-visible
    // counters every tick rather than trying to recreate them here.
    ctx.counters
        .sync_queue_drops(ctx.queue.dropped_from_overflow(), ctx.queue.dropped_as_stale());

    if let Some(invalidator) = &ctx.invalidator {
        if ctx.options.paced_invalidation {
            invalidator.request_next();
        }
        if ctx.options.capture_backpressure && backlog as usize > high_watermark {
            invalidator.pause();
            *was_paused = true;
        } else if *was_paused {
            invalidator.resume();
            *was_paused = false;
        }
        // Same reasoning as the queue sync above: the invalidator already
        // counts pause/resume transitions idempotently, so mirror its
        // totals rather than incrementing here (which would double-count
        // every tick the gate stays paused).
        ctx.counters
            .sync_capture_gate_counts(invalidator.capture_gate_pauses(), invalidator.capture_gate_resumes());
        if ctx.options.pump_cadence_adaptation {
            let configured = ctx.options.frame_rate.as_f64();
            if let Some(measured) = ctx.drift_tracker.measured_fps() {
                let drift = (measured - configured) / configured;
                invalidator.update_drift(drift);
            }
        }
    }
    ctx.telemetry.maybe_emit(&ctx.counters);
}

fn send_frame(ctx: &LoopContext, frame: &OwnedFrame) -> bool {
    let descriptor = build_descriptor(ctx, frame, false);
    let ok = ctx.sink.send(&descriptor);
    if !ok {
        log::warn!("sink send failed; frame dropped at sink boundary");
    }
    ok
}

fn repeat_last(ctx: &LoopContext, last_sent: &Option<OwnedFrame>) {
    let Some(frame) = last_sent else {
        return;
    };
    let descriptor = build_descriptor(ctx, frame, true);
    if !ctx.sink.send(&descriptor) {
        log::warn!("sink send failed while repeating last frame");
        return;
    }
    ctx.counters.record_repeated();
}

fn build_descriptor(ctx: &LoopContext, frame: &OwnedFrame, requires_retention: bool) -> FrameDescriptor {
    let advertised_rate = ctx
        .drift_tracker
        .measured_fps()
        .map(crate::frame_rate::FrameRate::from_double)
        .unwrap_or(ctx.options.frame_rate);
    let (aspect_numerator, aspect_denominator) = reduced_aspect_ratio(frame.width, frame.height);

    FrameDescriptor {
        pointer: frame.pixels().as_ptr(),
        len: frame.len(),
        width: frame.width,
        height: frame.height,
        stride: frame.stride,
        rate_numerator: advertised_rate.numerator() as u32,
        rate_denominator: advertised_rate.denominator() as u32,
        format: PixelFormat::Bgra8,
        progressive: true,
        timecode: frame.captured_wallclock_unix_nanos,
        aspect_ratio_numerator: aspect_numerator,
        aspect_ratio_denominator: aspect_denominator,
        requires_retention,
    }
}

fn reduced_aspect_ratio(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let divisor = gcd(width, height).max(1);
    (width / divisor, height / divisor)
}

fn gcd(a: u32, b: u32) -> u32 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

mod sleep {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const SPIN_THRESHOLD: Duration = Duration::from_micros(500);
    const MAX_CHUNK: Duration = Duration::from_millis(1);

    /// Sleeps precisely until `deadline`, checking `shutdown` between every
    /// chunk so cancellation latency stays bounded to roughly one chunk.
    /// Returns `false` if cancelled before the deadline was reached.
    pub fn precise_sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let remaining = deadline - now;
            if remaining <= SPIN_THRESHOLD {
                std::hint::spin_loop();
                continue;
            }
            let chunk = (remaining - SPIN_THRESHOLD).min(MAX_CHUNK);
            sleep_chunk(chunk);
        }
    }

    #[cfg(windows)]
    fn sleep_chunk(duration: Duration) {
        windows_high_res_sleep(duration);
    }

    #[cfg(not(windows))]
    fn sleep_chunk(duration: Duration) {
        std::thread::sleep(duration);
    }

    #[cfg(windows)]
    fn windows_high_res_sleep(duration: Duration) {
        use windows::Win32::System::Threading::{
            CreateWaitableTimerExW, SetWaitableTimer, WaitForSingleObject,
            CREATE_WAITABLE_TIMER_HIGH_RESOLUTION, TIMER_ALL_ACCESS,
        };

        unsafe {
            let Ok(timer) = CreateWaitableTimerExW(
                None,
                None,
                CREATE_WAITABLE_TIMER_HIGH_RESOLUTION.0,
                TIMER_ALL_ACCESS.0,
            ) else {
                std::thread::sleep(duration);
                return;
            };
            let due_time = -((duration.as_nanos() / 100) as i64).max(-1);
            if SetWaitableTimer(timer, &due_time, 0, None, None, false).is_err() {
                std::thread::sleep(duration);
                return;
            }
            let _ = WaitForSingleObject(timer, u32::MAX);
        }
    }
}
