//! Collaborator interfaces the pipeline core depends on but does not
//! implement: the browser engine's capture surface (`FrameSource`) and the
//! wire-protocol SDK's send surface (`Sink`). Both are passed in explicitly
//! at construction — there is no ambient global handle.

use frame_transport::FrameDescriptor;

use crate::frame::CapturedFrame;

/// The producer side: something that can be told to repaint and that emits
/// captured frames through a registered callback.
pub trait FrameSource: Send + Sync {
    /// Registers the callback invoked with each captured frame. The
    /// `CapturedFrame` passed to the callback is only valid for the
    /// duration of the call.
    fn set_paint_callback(&self, callback: Box<dyn Fn(CapturedFrame<'_>) + Send + Sync>);

    /// Requests a repaint. Returns `false` on failure.
    fn invalidate(&self) -> bool;

    /// Stops emitting frames.
    fn shutdown(&self);
}

/// The consumer side: accepts a frame descriptor and transmits it
/// synchronously.
pub trait Sink: Send + Sync {
    /// Sends one frame. Returns `false` on failure; the pipeline logs and
    /// continues rather than propagating an error.
    fn send(&self, descriptor: &FrameDescriptor) -> bool;
}
