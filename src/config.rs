//! Engine configuration shared by graphs and the nodes they create

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::PixelFormat;
use crate::nodes::defaults::ImageDefaults;

/// Engine-wide settings. Every field has a default, so partial JSON documents load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Width given to nodes created without an explicit size
    pub default_width: u32,
    /// Height given to nodes created without an explicit size
    pub default_height: u32,
    /// Pixel format for newly allocated node buffers
    pub pixel_format: PixelFormat,
    /// Whether new graphs process on the caller's thread
    pub synchronized: bool,
    /// Upper bound on waiting for an embedded graph's completion signal
    pub inner_wait_ms: u64,
    /// Release interior buffers once an embedded graph finishes evaluating
    pub release_intermediate_buffers: bool,
    /// File extension accepted when loading an authored graph from disk
    pub graph_file_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_width: ImageDefaults::SIZE_DEFAULT,
            default_height: ImageDefaults::SIZE_DEFAULT,
            pixel_format: PixelFormat::Rgba,
            synchronized: true,
            inner_wait_ms: 2000,
            release_intermediate_buffers: true,
            graph_file_extension: "mgraph".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Bounded wait used when awaiting an embedded graph
    pub fn inner_wait(&self) -> Duration {
        Duration::from_millis(self.inner_wait_ms)
    }

    /// Check whether a path carries the graph file extension
    pub fn is_graph_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.graph_file_extension))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "default_width": 512, "synchronized": false }"#).unwrap();
        assert_eq!(config.default_width, 512);
        assert_eq!(config.default_height, ImageDefaults::SIZE_DEFAULT);
        assert!(!config.synchronized);
        assert!(config.release_intermediate_buffers);
    }

    #[test]
    fn test_graph_file_extension() {
        let config = EngineConfig::default();
        assert!(config.is_graph_file(Path::new("/tmp/brick.mgraph")));
        assert!(config.is_graph_file(Path::new("BRICK.MGRAPH")));
        assert!(!config.is_graph_file(Path::new("brick.json")));
        assert!(!config.is_graph_file(Path::new("brick")));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(EngineConfig::from_json_str("{ not json").is_err());
    }
}
