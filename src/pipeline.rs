//! Wires a `FrameSource`, a `Sink`, the `FrameQueue`, the `CaptureInvalidator`
//! and the `Pacer` together into a single runnable pipeline.

use std::sync::Arc;

use frame_transport::{FrameDescriptor, PixelFormat};

use crate::config::PipelineOptions;
use crate::frame::OwnedFrame;
use crate::invalidator::{CaptureInvalidator, InvalidatorOptions};
use crate::pacer::Pacer;
use crate::queue::FrameQueue;
use crate::telemetry::{Counters, Telemetry};
use crate::traits::{FrameSource, Sink};

/// Owns every thread the pipeline spawns and exposes the same counters the
/// pacer updates, so an embedder can poll telemetry without reaching into
/// internals.
pub struct Pipeline {
    queue: Arc<FrameQueue>,
    counters: Arc<Counters>,
    invalidator: Option<Arc<CaptureInvalidator>>,
    pacer: Option<Pacer>,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn Sink>,
    buffering_enabled: bool,
}

impl Pipeline {
    /// Constructs and starts the pipeline. `source` and `sink` are the
    /// external collaborators; neither is owned by this crate's logic.
    pub fn start(options: PipelineOptions, source: Arc<dyn FrameSource>, sink: Arc<dyn Sink>) -> Self {
        let queue = Arc::new(FrameQueue::new(options.queue_capacity()));
        let counters = Arc::new(Counters::default());
        let telemetry = Arc::new(Telemetry::new(options.telemetry_interval));

        if !options.buffering_enabled {
            let direct_sink = Arc::clone(&sink);
            let direct_counters = Arc::clone(&counters);
            source.set_paint_callback(Box::new(move |captured| {
                direct_counters.record_captured();
                let owned = OwnedFrame::copy_from(&captured);
                let descriptor = direct_descriptor(&owned);
                if direct_sink.send(&descriptor) {
                    direct_counters.record_sent();
                } else {
                    log::warn!("sink send failed in unbuffered mode; frame dropped");
                }
            }));

            return Self {
                queue,
                counters,
                invalidator: None,
                pacer: None,
                source,
                sink,
                buffering_enabled: false,
            };
        }

        // An invalidator always runs, in free-running mode unless paced
        // invalidation is requested; only the invalidate_fn wiring differs.
        let source_for_invalidate = Arc::clone(&source);
        let invalidate_fn: crate::invalidator::InvalidateFn =
            Arc::new(move || source_for_invalidate.invalidate());
        let invalidator = Some(Arc::new(CaptureInvalidator::new(
            InvalidatorOptions {
                target_interval: options.frame_rate.frame_duration(),
                watchdog_interval: options.frame_rate.frame_duration() * 4,
                paced: options.paced_invalidation,
                cadence_adaptation: options.pump_cadence_adaptation,
            },
            invalidate_fn,
        )));

        let pacer = Pacer::new(
            options.clone(),
            Arc::clone(&queue),
            Arc::clone(&sink),
            invalidator.clone(),
            Arc::clone(&counters),
            telemetry,
        );
        let cadence_feed = pacer.cadence_feed();

        let queue_for_callback = Arc::clone(&queue);
        let counters_for_callback = Arc::clone(&counters);
        let invalidator_for_callback = invalidator.clone();
        source.set_paint_callback(Box::new(move |captured| {
            counters_for_callback.record_captured();
            cadence_feed.record_capture();
            if let Some(invalidator) = &invalidator_for_callback {
                invalidator.notify_paint();
            }
            let owned = OwnedFrame::copy_from(&captured);
            queue_for_callback.enqueue(owned);
        }));

        if let Some(invalidator) = &invalidator {
            invalidator.start();
        }

        Self {
            queue,
            counters,
            invalidator,
            pacer: Some(pacer),
            source,
            sink,
            buffering_enabled: true,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.count()
    }

    pub fn buffering_enabled(&self) -> bool {
        self.buffering_enabled
    }

    /// Idempotent. Cancels the pacer, stops the invalidator, tells the
    /// FrameSource to stop emitting, drains the queue, and releases the
    /// sink reference. Never blocks on the sink.
    pub fn stop(&mut self) {
        self.source.shutdown();
        if let Some(pacer) = self.pacer.take() {
            pacer.stop();
        }
        if let Some(invalidator) = self.invalidator.take() {
            invalidator.stop();
        }
        self.queue.clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn direct_descriptor(frame: &OwnedFrame) -> FrameDescriptor {
    FrameDescriptor {
        pointer: frame.pixels().as_ptr(),
        len: frame.len(),
        width: frame.width,
        height: frame.height,
        stride: frame.stride,
        rate_numerator: 0,
        rate_denominator: 1,
        format: PixelFormat::Bgra8,
        progressive: true,
        timecode: frame.captured_wallclock_unix_nanos,
        aspect_ratio_numerator: 0,
        aspect_ratio_denominator: 0,
        requires_retention: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_rate::FrameRate;
    use crate::traits::mocks::{MockFrameSource, MockSink};
    use std::sync::atomic::Ordering as AtomicOrdering;
    use std::time::Duration;

    #[test]
    fn unbuffered_mode_forwards_directly_without_a_pacer() {
        let mut options = PipelineOptions::new(FrameRate::try_new(60, 1).unwrap(), 2).unwrap();
        options.buffering_enabled = false;

        let source = Arc::new(MockFrameSource::new());
        let sink = Arc::new(MockSink::new());

        let pipeline = Pipeline::start(
            options,
            source.clone() as Arc<dyn FrameSource>,
            sink.clone() as Arc<dyn Sink>,
        );

        // Drive the registered callback directly, simulating a capture.
        let pixels = vec![0u8; 4 * 4 * 4];
        source.emit_frame(&pixels, 4, 4);

        assert_eq!(pipeline.counters().captured(), 1);
        assert_eq!(pipeline.counters().sent(), 1);
        drop(pipeline);
    }

    #[test]
    fn buffered_mode_starts_pacer_and_invalidator() {
        let options = PipelineOptions::new(FrameRate::try_new(200, 1).unwrap(), 2).unwrap();
        let source = Arc::new(MockFrameSource::new());
        let sink = Arc::new(MockSink::new());

        let mut pipeline = Pipeline::start(
            options,
            source.clone() as Arc<dyn FrameSource>,
            sink.clone() as Arc<dyn Sink>,
        );

        std::thread::sleep(Duration::from_millis(30));
        assert!(source.invalidate_calls.load(AtomicOrdering::SeqCst) >= 1);
        pipeline.stop();
        pipeline.stop();
    }

    #[test]
    fn burst_of_captures_overflows_then_pacer_drains_the_survivors() {
        let mut options = PipelineOptions::new(FrameRate::try_new(200, 1).unwrap(), 3).unwrap();
        options.paced_invalidation = true;

        let source = Arc::new(MockFrameSource::new());
        let sink = Arc::new(MockSink::new());

        let mut pipeline = Pipeline::start(
            options,
            source.clone() as Arc<dyn FrameSource>,
            sink.clone() as Arc<dyn Sink>,
        );

        let pixels = vec![0u8; 2 * 2 * 4];
        for _ in 0..30 {
            source.emit_frame(&pixels, 2, 2);
        }

        assert!(pipeline.queue_depth() <= pipeline.counters().captured() as usize);
        assert!(pipeline.counters().dropped_from_overflow() > 0);

        std::thread::sleep(Duration::from_millis(60));
        assert!(pipeline.counters().sent() > 0);
        pipeline.stop();
    }

    #[test]
    fn capture_backpressure_pauses_the_invalidator_under_sustained_overfill() {
        let mut options = PipelineOptions::new(FrameRate::try_new(50, 1).unwrap(), 3).unwrap();
        options.paced_invalidation = true;
        options.capture_backpressure = true;

        let source = Arc::new(MockFrameSource::new());
        let sink = Arc::new(MockSink::new());

        let mut pipeline = Pipeline::start(
            options,
            source.clone() as Arc<dyn FrameSource>,
            sink.clone() as Arc<dyn Sink>,
        );

        let pixels = vec![0u8; 2 * 2 * 4];
        for _ in 0..6 {
            source.emit_frame(&pixels, 2, 2);
        }

        let invalidator = pipeline.invalidator.clone().expect("paced mode has an invalidator");
        std::thread::sleep(Duration::from_millis(100));

        assert!(invalidator.capture_gate_pauses() >= 1);
        assert!(invalidator.capture_gate_resumes() >= 1);
        pipeline.stop();
    }

    #[test]
    fn producer_faster_than_pacer_sheds_backlog_via_high_watermark_drops() {
        let options = PipelineOptions::new(FrameRate::try_new(60, 1).unwrap(), 3).unwrap();
        let source = Arc::new(MockFrameSource::new());
        let sink = Arc::new(MockSink::new());

        let mut pipeline = Pipeline::start(
            options,
            source.clone() as Arc<dyn FrameSource>,
            sink.clone() as Arc<dyn Sink>,
        );

        let pixels = vec![0u8; 2 * 2 * 4];
        let deadline = std::time::Instant::now() + Duration::from_millis(200);
        while std::time::Instant::now() < deadline {
            source.emit_frame(&pixels, 2, 2);
            std::thread::sleep(Duration::from_micros(500));
        }

        assert!(pipeline.counters().high_watermark_drops() > 0 || pipeline.counters().dropped_from_overflow() > 0);
        pipeline.stop();
    }
}
