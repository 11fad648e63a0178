//! Buffer-backed image nodes
//!
//! Every node here owns at most one device buffer, allocated lazily on the
//! first `process` after a size or format change, plus the kernels it
//! dispatches.

pub mod ao;
pub mod input;
pub mod output;
pub mod uniform;

pub use ao::AoNode;
pub use input::InputNode;
pub use output::OutputNode;
pub use uniform::UniformColorNode;

use std::fmt;

use log::debug;

use crate::gpu::{BufferHandle, GpuDevice, ImageProcessor, KernelKind, PixelFormat};

/// Lazily sized buffer owned by a node
#[derive(Debug, Default)]
pub struct ImageBuffer {
    handle: Option<BufferHandle>,
}

impl ImageBuffer {
    /// Current buffer, reallocating when the requested layout differs
    pub fn ensure(&mut self, device: &dyn GpuDevice, width: u32, height: u32, format: PixelFormat) -> BufferHandle {
        if let Some(handle) = self.handle {
            if handle.matches(width, height, format) {
                return handle;
            }
            device.release_buffer(handle);
        }
        let handle = device.create_buffer(width, height, format);
        debug!("Allocated {}x{} {:?} node buffer", width, height, format);
        self.handle = Some(handle);
        handle
    }

    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// Releases the buffer if one is held. Repeated calls do nothing.
    pub fn release(&mut self, device: &dyn GpuDevice) -> Option<BufferHandle> {
        let handle = self.handle.take()?;
        device.release_buffer(handle);
        Some(handle)
    }
}

/// Kernel created on first use
pub struct Kernel {
    kind: KernelKind,
    processor: Option<Box<dyn ImageProcessor>>,
}

impl Kernel {
    pub fn new(kind: KernelKind) -> Self {
        Self { kind, processor: None }
    }

    pub fn get(&mut self, device: &dyn GpuDevice) -> &mut dyn ImageProcessor {
        let kind = self.kind;
        &mut **self.processor.get_or_insert_with(|| device.create_processor(kind))
    }

    pub fn release(&mut self) {
        if let Some(mut processor) = self.processor.take() {
            processor.release();
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("kind", &self.kind)
            .field("created", &self.processor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareDevice;

    #[test]
    fn test_buffer_reallocates_only_on_layout_change() {
        let device = SoftwareDevice::new();
        let mut buffer = ImageBuffer::default();

        let a = buffer.ensure(&device, 8, 8, PixelFormat::Rgba);
        let b = buffer.ensure(&device, 8, 8, PixelFormat::Rgba);
        assert_eq!(a, b);

        let c = buffer.ensure(&device, 16, 8, PixelFormat::Rgba);
        assert_ne!(a.id, c.id);
        assert!(!device.is_live(a));

        assert_eq!(buffer.release(&device), Some(c));
        assert_eq!(buffer.release(&device), None);
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_kernel_is_created_once() {
        let device = SoftwareDevice::new();
        let mut kernel = Kernel::new(KernelKind::Fill);
        let target = device.create_buffer(1, 1, PixelFormat::Rgba);
        kernel.get(&device).process(1, 1, &[], target, &Default::default());
        kernel.get(&device).process(1, 1, &[], target, &Default::default());
        assert_eq!(device.stats().dispatches, 2);
        kernel.release();
        kernel.release();
    }
}
