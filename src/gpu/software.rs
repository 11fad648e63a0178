//! CPU reference device
//!
//! Stores every buffer in memory and runs the kernels on the calling thread.
//! Each dispatch is logged together with the raw uniform bytes it would have
//! uploaded, which lets tests inspect exactly what a node asked the GPU to do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use super::{BufferHandle, GpuDevice, ImageProcessor, KernelKind, KernelParams, PixelFormat};

/// One logged kernel dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub kind: KernelKind,
    pub width: u32,
    pub height: u32,
    pub inputs: Vec<u32>,
    pub output: u32,
    pub uniforms: Vec<u8>,
}

impl DispatchRecord {
    /// Decode the uploaded uniform block
    pub fn params(&self) -> KernelParams {
        bytemuck::pod_read_unaligned(&self.uniforms)
    }
}

/// Allocation and dispatch counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub live_buffers: usize,
    pub allocations: usize,
    pub releases: usize,
    pub dispatches: usize,
}

struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Texture {
    /// Nearest sample addressed in the coordinate space of a `width`x`height` target
    fn sample(&self, x: u32, y: u32, width: u32, height: u32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as u32 % self.width;
        let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as u32 % self.height;
        self.pixels[(sy * self.width + sx) as usize]
    }
}

#[derive(Default)]
struct DeviceState {
    textures: HashMap<u32, Texture>,
    dispatches: Vec<DispatchRecord>,
    next_id: u32,
    allocations: usize,
    releases: usize,
}

/// In-memory device. Cloning shares the same storage.
#[derive(Clone, Default)]
pub struct SoftwareDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        lock_state(&self.state)
    }

    /// Current counters
    pub fn stats(&self) -> DeviceStats {
        let state = self.lock();
        DeviceStats {
            live_buffers: state.textures.len(),
            allocations: state.allocations,
            releases: state.releases,
            dispatches: state.dispatches.len(),
        }
    }

    /// All dispatches so far, oldest first
    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.lock().dispatches.clone()
    }

    /// Whether a handle still refers to a live buffer
    pub fn is_live(&self, buffer: BufferHandle) -> bool {
        self.lock().textures.contains_key(&buffer.id)
    }

    /// Fill a buffer with a single color, as an upload from the host would
    pub fn upload_fill(&self, buffer: BufferHandle, color: [f32; 4]) {
        if let Some(texture) = self.lock().textures.get_mut(&buffer.id) {
            texture.pixels.iter_mut().for_each(|p| *p = color);
        }
    }

    /// Read a single pixel
    pub fn pixel(&self, buffer: BufferHandle, x: u32, y: u32) -> Option<[f32; 4]> {
        let state = self.lock();
        let texture = state.textures.get(&buffer.id)?;
        if x >= texture.width || y >= texture.height {
            return None;
        }
        Some(texture.pixels[(y * texture.width + x) as usize])
    }
}

fn lock_state(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    // a panicked kernel leaves plain pixel data behind, still usable
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GpuDevice for SoftwareDevice {
    fn create_buffer(&self, width: u32, height: u32, format: PixelFormat) -> BufferHandle {
        let mut state = self.lock();
        state.next_id += 1;
        state.allocations += 1;
        let id = state.next_id;
        state.textures.insert(
            id,
            Texture {
                width,
                height,
                pixels: vec![[0.0; 4]; (width as usize) * (height as usize)],
            },
        );
        debug!("Allocated buffer {} ({}x{}, {:?})", id, width, height, format);
        BufferHandle { id, width, height, format }
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        let mut state = self.lock();
        if state.textures.remove(&buffer.id).is_some() {
            state.releases += 1;
            debug!("Released buffer {}", buffer.id);
        }
    }

    fn create_processor(&self, kind: KernelKind) -> Box<dyn ImageProcessor> {
        Box::new(SoftwareProcessor {
            kind,
            state: Arc::clone(&self.state),
            released: false,
        })
    }

    fn read_pixels(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let state = self.lock();
        let texture = state.textures.get(&buffer.id)?;
        Some(
            texture
                .pixels
                .iter()
                .flat_map(|p| p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
                .collect(),
        )
    }
}

struct SoftwareProcessor {
    kind: KernelKind,
    state: Arc<Mutex<DeviceState>>,
    released: bool,
}

impl SoftwareProcessor {
    fn run(&self, state: &DeviceState, width: u32, height: u32, inputs: &[BufferHandle], params: &KernelParams) -> Option<Vec<[f32; 4]>> {
        let input = |index: usize| inputs.get(index).and_then(|b| state.textures.get(&b.id));
        let count = (width as usize) * (height as usize);
        match self.kind {
            KernelKind::Fill => Some(vec![params.color; count]),
            KernelKind::Copy => {
                let source = input(0)?;
                Some(pixels(width, height, |x, y| source.sample(x, y, width, height)))
            }
            KernelKind::Blur => {
                let source = input(0)?;
                let radius = params.intensity.max(0.0) as i64;
                Some(pixels(width, height, |x, y| {
                    let mut sum = [0.0f32; 4];
                    let mut taps = 0.0;
                    for dy in -radius..=radius {
                        for dx in -radius..=radius {
                            let sx = (x as i64 + dx).rem_euclid(width as i64) as u32;
                            let sy = (y as i64 + dy).rem_euclid(height as i64) as u32;
                            let p = source.sample(sx, sy, width, height);
                            for c in 0..4 {
                                sum[c] += p[c];
                            }
                            taps += 1.0;
                        }
                    }
                    sum.map(|c| c / taps)
                }))
            }
            KernelKind::Occlusion => {
                let blurred = input(0)?;
                let original = input(1)?;
                let [tile_x, tile_y] = params.tile;
                Some(pixels(width, height, |x, y| {
                    let tx = ((x as f32 * tile_x) as u32) % width.max(1);
                    let ty = ((y as f32 * tile_y) as u32) % height.max(1);
                    let b = blurred.sample(tx, ty, width, height)[0];
                    let o = original.sample(tx, ty, width, height)[0];
                    let ao = (1.0 - (b - o).max(0.0)).clamp(0.0, 1.0);
                    [ao, ao, ao, 1.0]
                }))
            }
        }
    }
}

fn pixels(width: u32, height: u32, f: impl Fn(u32, u32) -> [f32; 4]) -> Vec<[f32; 4]> {
    (0..height).flat_map(|y| (0..width).map(move |x| (x, y))).map(|(x, y)| f(x, y)).collect()
}

impl ImageProcessor for SoftwareProcessor {
    fn process(&mut self, width: u32, height: u32, inputs: &[BufferHandle], output: BufferHandle, params: &KernelParams) {
        if self.released {
            warn!("{:?} kernel used after release", self.kind);
            return;
        }
        let mut state = lock_state(&self.state);
        state.dispatches.push(DispatchRecord {
            kind: self.kind,
            width,
            height,
            inputs: inputs.iter().map(|b| b.id).collect(),
            output: output.id,
            uniforms: bytemuck::bytes_of(params).to_vec(),
        });

        let Some(result) = self.run(&state, width, height, inputs, params) else {
            debug!("{:?} kernel skipped, missing input buffer", self.kind);
            return;
        };
        match state.textures.get_mut(&output.id) {
            Some(target) if target.width == width && target.height == height => target.pixels = result,
            _ => warn!("{:?} kernel target {} missing or mis-sized", self.kind, output.id),
        }
    }

    fn complete(&mut self) {}

    fn release(&mut self) {
        self.released = true;
    }
}
