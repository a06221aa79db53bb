pub mod capture;
pub mod display;
pub mod encoder;
pub mod pipeline;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::PixelFormat;
use pipeline::ledger::{TimestampMode, TimestampSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::Frame;
pub use pipeline::session::{Session, SessionError, SessionReport};

/// Environment variable prefix for configuration overrides, e.g.
/// `CAMREC__PIPELINE__QUEUE_CAPACITY=32`.
pub const ENV_PREFIX: &str = "CAMREC";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// System configuration, frozen before the session starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub encoder: EncoderConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device path; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub exposure_time_us: Option<u32>,
    pub gain_db: Option<f32>,
    pub gamma: Option<f32>,
    /// Hardware trigger input line, if the camera is externally triggered
    pub trigger_line: Option<u8>,
    /// Line carrying the exposure-active strobe
    pub output_line: Option<u8>,
    /// Driver-side ring buffer depth
    pub buffer_count: u32,
    pub capture_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub fps: f64,
    pub codec: String,
    /// Extra ffmpeg output arguments, inserted before the output path
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// Escalate to a device failure after this many timeouts in a row
    pub max_consecutive_timeouts: Option<u32>,
    /// Stop after this many frames (external trigger count)
    pub max_frames: Option<u64>,
    /// Pin the acquisition thread to this CPU core
    pub acquisition_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    /// Offer every Nth frame to the preview
    pub sample_every: u32,
    /// Preview height in pixels, width follows the aspect ratio
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub timestamp_mode: TimestampMode,
    pub timestamp_source: TimestampSource,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 1920,
            height: 1200,
            pixel_format: PixelFormat::Rgb24,
            exposure_time_us: None,
            gain_db: None,
            gamma: None,
            trigger_line: None,
            output_line: None,
            buffer_count: 10,
            capture_timeout_ms: 1000,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            fps: 60.0,
            codec: "libx264".into(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            max_consecutive_timeouts: None,
            max_frames: None,
            acquisition_core: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_every: 5,
            height: 600,
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Config {
    /// Layer defaults, an optional TOML settings profile and `CAMREC__*`
    /// environment variables.
    pub fn load(profile: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = profile {
            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera dimensions must be non-zero");
        }
        if self.pipeline.queue_capacity == 0 {
            return invalid("pipeline.queue_capacity must be at least 1");
        }
        if !(self.encoder.fps.is_finite() && self.encoder.fps > 0.0) {
            return invalid("encoder.fps must be positive");
        }
        if self.display.sample_every == 0 {
            return invalid("display.sample_every must be at least 1");
        }
        if self.pipeline.max_consecutive_timeouts == Some(0) {
            return invalid("pipeline.max_consecutive_timeouts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.queue_capacity, 10);
        assert_eq!(config.camera.capture_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn profile_overrides_defaults() {
        let mut profile = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            profile,
            "[camera]\nwidth = 1456\nheight = 1088\npixel_format = \"bayer_rg8\"\n\
             [pipeline]\nqueue_capacity = 4\nmax_frames = 100"
        )
        .unwrap();

        let config = Config::load(Some(profile.path())).unwrap();
        assert_eq!(config.camera.width, 1456);
        assert_eq!(config.camera.pixel_format, PixelFormat::BayerRg8);
        assert_eq!(config.pipeline.queue_capacity, 4);
        assert_eq!(config.pipeline.max_frames, Some(100));
        // untouched sections keep their defaults
        assert_eq!(config.display.sample_every, 5);
    }

    #[test]
    fn load_without_profile_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.encoder.extra_args.is_empty());
        assert_eq!(config.encoder.fps, 60.0);
        assert_eq!(config.camera.exposure_time_us, None);
        assert_eq!(config.ledger.timestamp_mode, TimestampMode::Relative);
    }

    #[test]
    fn environment_overrides_defaults() {
        // keys no other test in this module asserts on
        std::env::set_var("CAMREC__ENCODER__CODEC", "libx265");
        std::env::set_var("CAMREC__CAMERA__BUFFER_COUNT", "4");
        let loaded = Config::load(None);
        std::env::remove_var("CAMREC__ENCODER__CODEC");
        std::env::remove_var("CAMREC__CAMERA__BUFFER_COUNT");

        let config = loaded.unwrap();
        assert_eq!(config.encoder.codec, "libx265");
        assert_eq!(config.camera.buffer_count, 4);
        assert_eq!(config.display.height, 600);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = Config::default();
        config.pipeline.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
