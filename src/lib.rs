pub mod capture;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod pipeline;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::{DisplayRotation, LensFacing, PixelFormat};
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub scanner: ScannerConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path; auto-detected when unset
    pub device: Option<String>,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Facing reported for every device (V4L2 cannot tell)
    pub facing: LensFacing,
    pub sensor_orientation: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub target_width: u32,
    pub target_height: u32,
    /// Alternate direct and inverted images to catch light-on-dark codes
    pub support_inverted: bool,
    /// Frames that may be alive at once in the frame channel
    pub max_images: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Current display rotation in degrees
    pub rotation: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            format: PixelFormat::Yuyv4,
            buffer_count: 4,
            facing: LensFacing::Back,
            sensor_orientation: 0,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_width: 640,
            target_height: 480,
            support_inverted: false,
            max_images: 5,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, overridden by `QRSCAN__SECTION__KEY`
    /// environment variables. Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("QRSCAN")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

/// Display rotation read from [`CONFIG`] on every query
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredRotation;

impl DisplayRotation for ConfiguredRotation {
    fn rotation_degrees(&self) -> i32 {
        CONFIG.load().display.rotation
    }
}
