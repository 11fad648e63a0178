//! GPU collaborator boundary
//!
//! The graph core never talks to a driver directly. Buffer allocation and
//! kernel execution go through [`GpuDevice`] and [`ImageProcessor`], which a
//! host application implements on top of its graphics API.

pub mod null;
pub mod software;

pub use null::NullDevice;
pub use software::{DeviceStats, DispatchRecord, SoftwareDevice};

use serde::{Deserialize, Serialize};

/// Pixel storage format of a node buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    Rgba,
    Rgba16F,
    Rgba32F,
    Rgb,
    Luminance16F,
    Luminance32F,
}

impl PixelFormat {
    /// Number of channels stored per pixel
    pub fn channels(&self) -> u32 {
        match self {
            PixelFormat::Rgba | PixelFormat::Rgba16F | PixelFormat::Rgba32F => 4,
            PixelFormat::Rgb => 3,
            PixelFormat::Luminance16F | PixelFormat::Luminance32F => 1,
        }
    }
}

/// Opaque reference to a device buffer. Id 0 is never a live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferHandle {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BufferHandle {
    /// Check whether the handle refers to an allocated buffer
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }

    /// Check whether the buffer matches the requested layout
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == format
    }
}

/// Kernels a node may request from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    /// Gaussian-style blur, intensity is the radius
    Blur,
    /// Ambient occlusion estimate from a blurred height field and the original
    Occlusion,
    /// Solid fill with `color`
    Fill,
    /// Resampling copy of the first input
    Copy,
}

/// Uniform block uploaded with every kernel dispatch
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    pub color: [f32; 4],
    pub tile: [f32; 2],
    pub intensity: f32,
    pub _padding: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            tile: [1.0, 1.0],
            intensity: 0.0,
            _padding: 0.0,
        }
    }
}

impl KernelParams {
    pub fn with_tile(mut self, tile_x: f32, tile_y: f32) -> Self {
        self.tile = [tile_x, tile_y];
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// A compiled GPU kernel owned by a node
pub trait ImageProcessor: Send {
    /// Run the kernel over `inputs`, writing into `output`
    fn process(
        &mut self,
        width: u32,
        height: u32,
        inputs: &[BufferHandle],
        output: BufferHandle,
        params: &KernelParams,
    );

    /// Synchronization point; `output` is readable afterwards
    fn complete(&mut self);

    /// Free kernel resources. Further dispatches are ignored.
    fn release(&mut self);
}

/// Buffer allocation and kernel creation for one GPU context
pub trait GpuDevice: Send + Sync {
    /// Allocate a buffer of the given size and format
    fn create_buffer(&self, width: u32, height: u32, format: PixelFormat) -> BufferHandle;

    /// Free a buffer. Unknown or already released handles are ignored.
    fn release_buffer(&self, buffer: BufferHandle);

    /// Create a kernel of the requested kind
    fn create_processor(&self, kind: KernelKind) -> Box<dyn ImageProcessor>;

    /// Read a buffer back as RGBA8 bytes for previews
    fn read_pixels(&self, buffer: BufferHandle) -> Option<Vec<u8>>;
}
