pub mod capture;
pub mod codec;
pub mod control;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod playback;
pub mod session;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment prefix for overrides, e.g. `HINDSIGHT__BUFFER__RETENTION_SECS=600`
pub const ENV_PREFIX: &str = "HINDSIGHT";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub buffer: BufferConfig,
    pub playback: PlaybackConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Camera indexes recorded at startup when the scan does not find two.
    pub cameras: [u32; 2],
    /// Indexes `0..scan_range` are probed when looking for cameras.
    pub scan_range: u32,
    /// Frames are resized to this resolution before they are buffered.
    pub width: u32,
    pub height: u32,
    /// Frames per second written to each ring store.
    pub write_fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// How long a writer gets to exit before it is abandoned.
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub dir: PathBuf,
    pub retention_secs: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub fps: u32,
    pub jump_back_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub clip_secs: f64,
    pub quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                cameras: [0, 1],
                scan_range: 11,
                width: 1920,
                height: 1080,
                write_fps: 20,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
                stop_timeout_ms: 2000,
            },
            buffer: BufferConfig {
                dir: PathBuf::from("buffer_jpeg"),
                retention_secs: 60 * 60, // 1 hour
                jpeg_quality: 80,
            },
            playback: PlaybackConfig {
                fps: 30,
                jump_back_secs: 5.0,
            },
            export: ExportConfig {
                dir: PathBuf::from("exports"),
                width: 1920,
                height: 1080,
                fps: 30,
                clip_secs: 20.0,
                quality: 90,
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `HINDSIGHT__*` environment
    /// variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let cfg: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()
    }

    /// Clamp out-of-range knobs and reject values nothing can run with.
    pub fn validate(mut self) -> Result<Self> {
        self.buffer.jpeg_quality = self.buffer.jpeg_quality.min(100);
        self.export.quality = self.export.quality.min(100);
        self.capture.write_fps = self.capture.write_fps.max(1);
        self.playback.fps = self.playback.fps.max(1);
        self.export.fps = self.export.fps.max(1);

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::InvalidConfig("capture resolution must be non-zero".into()));
        }
        if self.export.width < 2 || self.export.height == 0 {
            return Err(Error::InvalidConfig("export canvas is too small".into()));
        }
        if self.buffer.retention_secs == 0 {
            return Err(Error::InvalidConfig("retention must be at least one second".into()));
        }
        if !(self.export.clip_secs > 0.0) {
            return Err(Error::InvalidConfig("clip length must be positive".into()));
        }
        Ok(self)
    }

    /// Frames each ring store keeps: one retention window at the write cadence.
    pub fn ring_capacity(&self) -> usize {
        let frames = self.capture.write_fps as usize * self.buffer.retention_secs as usize;
        frames.max(2)
    }

    pub fn retention(&self) -> f64 {
        self.buffer.retention_secs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_an_hour_at_twenty_fps() {
        let cfg = Config::default().validate().unwrap();
        assert_eq!(cfg.ring_capacity(), 72_000);
        assert_eq!(cfg.playback.fps, 30);
        assert_eq!(cfg.export.clip_secs, 20.0);
    }

    #[test]
    fn published_config_is_read_back() {
        let mut cfg = Config::default();
        cfg.export.clip_secs = 7.5;
        CONFIG.store(std::sync::Arc::new(cfg));
        assert_eq!(CONFIG.load_full().export.clip_secs, 7.5);
    }

    #[test]
    fn validate_clamps_quality_and_cadence() {
        let mut cfg = Config::default();
        cfg.buffer.jpeg_quality = 250;
        cfg.capture.write_fps = 0;
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.buffer.jpeg_quality, 100);
        assert_eq!(cfg.capture.write_fps, 1);
    }

    #[test]
    fn capacity_never_drops_below_two() {
        let mut cfg = Config::default();
        cfg.capture.write_fps = 1;
        cfg.buffer.retention_secs = 1;
        assert_eq!(cfg.ring_capacity(), 2);
    }

    #[test]
    fn load_reads_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hindsight.toml");
        std::fs::write(
            &path,
            "[buffer]\nretention_secs = 120\n\n[playback]\nfps = 25\n",
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.buffer.retention_secs, 120);
        assert_eq!(cfg.playback.fps, 25);
        // untouched sections keep their defaults
        assert_eq!(cfg.capture.write_fps, 20);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap();
        assert_eq!(cfg.buffer.retention_secs, 3600);
    }
}
