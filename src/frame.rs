//! Frame types: the transient, borrowed view a `FrameSource` hands to the
//! capture callback, and the owned copy the pipeline holds afterward.

use std::time::Instant;

pub use frame_transport::StorageKind;

/// A borrowed view into a single captured frame. Valid only for the
/// duration of the capture callback that produced it — the pipeline must
/// copy the pixels before the callback returns.
pub struct CapturedFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub captured_monotonic: Instant,
    pub captured_wallclock_unix_nanos: u64,
    pub storage_kind: StorageKind,
}

/// An owned pixel buffer copied out of a `CapturedFrame` at enqueue time.
///
/// Always BGRA8 with `stride == width * 4`; ownership passes from the
/// `FrameQueue` to the `Pacer` on dequeue and is released after the frame is
/// sent or superseded as the last-sent frame.
#[derive(Clone)]
pub struct OwnedFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub captured_monotonic: Instant,
    pub captured_wallclock_unix_nanos: u64,
}

impl OwnedFrame {
    /// Copies a borrowed `CapturedFrame` into an owned buffer.
    ///
    /// Panics if the source violates the fixed BGRA8 layout contract
    /// (`stride != width * 4` or a pixel buffer shorter than `stride *
    /// height`) — that would be a collaborator bug, not a runtime condition
    /// this pipeline recovers from.
    pub fn copy_from(captured: &CapturedFrame<'_>) -> Self {
        let expected_stride = captured.width * 4;
        assert_eq!(
            captured.stride, expected_stride,
            "capture stride must equal width * 4 for BGRA8"
        );
        let expected_len = (captured.stride as usize) * (captured.height as usize);
        assert!(
            captured.pixels.len() >= expected_len,
            "capture buffer shorter than stride * height"
        );

        Self {
            pixels: captured.pixels[..expected_len].to_vec(),
            width: captured.width,
            height: captured.height,
            stride: captured.stride,
            captured_monotonic: captured.captured_monotonic,
            captured_wallclock_unix_nanos: captured.captured_wallclock_unix_nanos,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_captured(pixels: &[u8], width: u32, height: u32) -> CapturedFrame<'_> {
        CapturedFrame {
            pixels,
            width,
            height,
            stride: width * 4,
            captured_monotonic: Instant::now(),
            captured_wallclock_unix_nanos: 0,
            storage_kind: StorageKind::CpuMemory,
        }
    }

    #[test]
    fn copy_from_preserves_dimensions_and_bytes() {
        let pixels = vec![0xAAu8; (2 * 2 * 4) as usize];
        let captured = sample_captured(&pixels, 2, 2);
        let owned = OwnedFrame::copy_from(&captured);
        assert_eq!(owned.len(), owned.stride as usize * owned.height as usize);
        assert_eq!(owned.pixels(), &pixels[..]);
    }

    #[test]
    #[should_panic(expected = "stride")]
    fn copy_from_rejects_mismatched_stride() {
        let pixels = vec![0u8; 16];
        let mut captured = sample_captured(&pixels, 2, 2);
        captured.stride = 5;
        OwnedFrame::copy_from(&captured);
    }
}
