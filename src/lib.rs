//! Paced video pipeline core.
//!
//! Decouples the bursty capture cadence of an embedded web-rendering engine
//! from the constant cadence a downstream video-over-IP sink requires: a
//! drop-oldest frame queue, a pacing scheduler with a warm-up/primed state
//! machine and latency-error integrator, and a capture invalidator with
//! watchdog and back-pressure. The browser engine, the wire-protocol sink,
//! and logging initialization are external collaborators — see the
//! `traits` module for the seams this crate depends on but does not
//! implement.

pub mod config;
pub mod error;
pub mod frame;
pub mod frame_rate;
pub mod invalidator;
pub mod pacer;
pub mod pipeline;
pub mod queue;
pub mod telemetry;
pub mod traits;

pub use config::{PipelineOptions, RawConfig};
pub use error::{PipelineError, Result};
pub use frame::{CapturedFrame, OwnedFrame, StorageKind};
pub use frame_rate::FrameRate;
pub use pipeline::Pipeline;
pub use queue::FrameQueue;
pub use traits::{FrameSource, Sink};
