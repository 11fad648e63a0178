//! Device that allocates nothing, used by graphs that never touch buffers

use super::{BufferHandle, GpuDevice, ImageProcessor, KernelKind, KernelParams, PixelFormat};

/// Device for pure math graphs. Buffers it hands out are never valid.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;

struct NullProcessor;

impl ImageProcessor for NullProcessor {
    fn process(&mut self, _: u32, _: u32, _: &[BufferHandle], _: BufferHandle, _: &KernelParams) {}

    fn complete(&mut self) {}

    fn release(&mut self) {}
}

impl GpuDevice for NullDevice {
    fn create_buffer(&self, width: u32, height: u32, format: PixelFormat) -> BufferHandle {
        BufferHandle { id: 0, width, height, format }
    }

    fn release_buffer(&self, _buffer: BufferHandle) {}

    fn create_processor(&self, _kind: KernelKind) -> Box<dyn ImageProcessor> {
        Box::new(NullProcessor)
    }

    fn read_pixels(&self, _buffer: BufferHandle) -> Option<Vec<u8>> {
        None
    }
}
