//! # Runtime Configuration
//!
//! All tunables of the runtime in one serializable tree. Every section has
//! defaults, so a config file only needs to name what it changes:
//!
//! ```toml
//! auto_exit = true
//!
//! [present]
//! frames_in_flight = 2
//! fence_timeout_ms = 1000
//!
//! [time]
//! target_fps = 144.0
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use crate::config::{Config, ConfigError};

/// Upper bound on frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Application name passed to the graphics API
    pub application_name: String,
    /// Default log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Quit the run loop once the last canvas closes
    pub auto_exit: bool,
    /// Pool capacities
    pub arena: ArenaConfig,
    /// Presentation engine settings
    pub present: PresentConfig,
    /// Frame timing settings
    pub time: TimeConfig,
    /// Input normalizer settings
    pub input: InputConfig,
    /// Run the validation layer every N ticks (`None` disables it)
    pub validation_interval: Option<u64>,
    /// Enable graphics API validation layers (auto-detect when `None`)
    pub gpu_validation: Option<bool>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            application_name: "Canvas Runtime Application".to_string(),
            log_level: "info".to_string(),
            auto_exit: true,
            arena: ArenaConfig::default(),
            present: PresentConfig::default(),
            time: TimeConfig::default(),
            input: InputConfig::default(),
            validation_interval: None,
            gpu_validation: None,
        }
    }
}

impl Config for RuntimeConfig {}

impl RuntimeConfig {
    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the frame-rate target (non-positive disables limiting)
    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.time.target_fps = fps;
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.present.frames_in_flight = frames;
        self
    }

    /// Enable or disable auto exit
    pub fn with_auto_exit(mut self, auto_exit: bool) -> Self {
        self.auto_exit = auto_exit;
        self
    }

    /// Run the validation layer every `interval` ticks
    pub fn with_validation_interval(mut self, interval: u64) -> Self {
        self.validation_interval = Some(interval);
        self
    }

    /// Whether graphics API validation layers should be requested
    pub fn gpu_validation_enabled(&self) -> bool {
        self.gpu_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }

        if self.arena.canvases == 0 || self.arena.displays == 0 || self.arena.pointers == 0 {
            return Err(ConfigError::Invalid("arena capacities must be at least 1".to_string()));
        }

        if self.arena.buffers == 0 {
            return Err(ConfigError::Invalid("buffer capacity must be at least 1".to_string()));
        }

        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.present.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.present.frames_in_flight
            )));
        }

        if self.present.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fence timeout must be non-zero".to_string()));
        }

        if self.input.sample_capacity < 2 {
            return Err(ConfigError::Invalid("pointer sample ring needs at least 2 slots".to_string()));
        }

        if self.validation_interval == Some(0) {
            return Err(ConfigError::Invalid("validation interval must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Pool capacities, fixed for the lifetime of a runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Maximum simultaneous canvases
    pub canvases: usize,
    /// Maximum tracked displays
    pub displays: usize,
    /// Maximum tracked pointers (mouse, touches, pens)
    pub pointers: usize,
    /// Maximum live GPU buffers across all canvases
    pub buffers: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            canvases: 16,
            displays: 16,
            pointers: 8,
            buffers: 256,
        }
    }
}

/// Presentation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentConfig {
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Upper bound on any single fence wait, in milliseconds
    pub fence_timeout_ms: u64,
    /// Prefer a non-tearing present mode for new canvases
    pub vsync: bool,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: 1000,
            vsync: false,
        }
    }
}

impl PresentConfig {
    /// Fence wait bound as a duration
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

/// Frame timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Frame-rate target for the limiter (non-positive disables it)
    pub target_fps: f64,
    /// Portion of each frame budget spent spinning, in microseconds
    pub spin_reserve_us: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            spin_reserve_us: 2000,
        }
    }
}

impl TimeConfig {
    /// Spin reserve as a duration
    pub fn spin_reserve(&self) -> Duration {
        Duration::from_micros(self.spin_reserve_us)
    }
}

/// Input normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Samples kept per pointer for velocity estimation
    pub sample_capacity: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_capacity: crate::input::DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_frames_in_flight() {
        let config = RuntimeConfig::default().with_frames_in_flight(0);
        assert!(config.validate().is_err());

        let config = RuntimeConfig::default().with_frames_in_flight(MAX_FRAMES_IN_FLIGHT + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_sample_ring() {
        let mut config = RuntimeConfig::default();
        config.input.sample_capacity = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            auto_exit = false

            [present]
            frames_in_flight = 3

            [time]
            target_fps = 144.0
        "#;
        let config = RuntimeConfig::from_str_with_format(text, "runtime.toml").unwrap();

        assert!(!config.auto_exit);
        assert_eq!(config.present.frames_in_flight, 3);
        assert_eq!(config.present.fence_timeout_ms, 1000);
        assert_eq!(config.time.target_fps, 144.0);
        assert_eq!(config.arena.canvases, 16);
    }

    #[test]
    fn test_ron_config_parses() {
        let text = "(log_level: \"debug\", arena: (canvases: 4))";
        let config = RuntimeConfig::from_str_with_format(text, "runtime.ron").unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.arena.canvases, 4);
        assert_eq!(config.arena.pointers, 8);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let result = RuntimeConfig::from_str_with_format("", "runtime.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
