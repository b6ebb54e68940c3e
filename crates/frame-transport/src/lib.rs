//! Plain-data types shared across the pipeline's native FFI boundary.
//!
//! These types intentionally carry no behavior: they describe the memory
//! layout a native host (the Chromium embedder, or a wire-protocol SDK
//! written in another language) can read without linking against this
//! crate's Rust types directly.

/// Pixel storage the frame lives in at capture time.
///
/// The pipeline core only copies `CpuMemory` frames itself; any other kind
/// must be adapted (copied into CPU memory) by the caller before the frame
/// reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum StorageKind {
    CpuMemory = 0,
    Other = 1,
}

/// Pixel format carried by every descriptor the pipeline produces.
///
/// The core is format-agnostic beyond this single layout: 8-bit BGRA,
/// stride always `width * 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum PixelFormat {
    Bgra8 = 0,
}

/// A frame descriptor handed to a `Sink` across the FFI boundary.
///
/// `pointer` is valid only until the call returns, unless `requires_retention`
/// is set, in which case the caller must keep the backing buffer alive until
/// the *next* call.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FrameDescriptor {
    pub pointer: *const u8,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub rate_numerator: u32,
    pub rate_denominator: u32,
    pub format: PixelFormat,
    pub progressive: bool,
    pub timecode: u64,
    pub aspect_ratio_numerator: u32,
    pub aspect_ratio_denominator: u32,
    pub requires_retention: bool,
}

// SAFETY: FrameDescriptor is a POD view into a buffer owned elsewhere; it is
// only ever read during the lifetime of a single `Sink::send` call.
unsafe impl Send for FrameDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_descriptor_is_plain_data() {
        let d = FrameDescriptor {
            pointer: std::ptr::null(),
            len: 0,
            width: 1920,
            height: 1080,
            stride: 1920 * 4,
            rate_numerator: 60,
            rate_denominator: 1,
            format: PixelFormat::Bgra8,
            progressive: true,
            timecode: 0,
            aspect_ratio_numerator: 16,
            aspect_ratio_denominator: 9,
            requires_retention: false,
        };
        assert_eq!(d.stride, d.width * 4);
    }

    #[test]
    fn storage_kind_distinguishes_cpu_memory() {
        assert_ne!(StorageKind::CpuMemory, StorageKind::Other);
    }
}
