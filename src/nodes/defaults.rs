//! Default parameter values for nodes
//!
//! This module centralizes default values and ranges for node parameters
//! to keep them consistent across nodes and persisted graphs.

/// Defaults shared by buffer-backed nodes
pub struct ImageDefaults;

impl ImageDefaults {
    pub const SIZE_DEFAULT: u32 = 256;
    pub const TILE_DEFAULT: f32 = 1.0;
}

/// Ambient occlusion parameters
pub struct AoDefaults;

impl AoDefaults {
    pub const RAYS_MIN: i32 = 1;
    pub const RAYS_DEFAULT: i32 = 4;
}

/// Uniform color parameters
pub struct ColorDefaults;

impl ColorDefaults {
    pub const COLOR_DEFAULT: [f32; 4] = [0.5, 0.5, 0.5, 1.0];
}
