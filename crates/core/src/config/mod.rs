use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{output::Curve, Result, StageError};

/// Highest channel index + 1 that a lighting universe accepts.
pub const MAX_LIGHTING_CHANNELS: usize = 512;

/// Top-level configuration structure for the installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub encoder: EncoderConfig,
    pub output: OutputConfig,
    pub mode: ModeConfig,
    pub content: ContentConfig,
    pub control: ControlConfig,
}

impl StageConfig {
    /// Reads a JSON configuration file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.encoder.ticks_per_second <= 0.0 {
            return Err(StageError::InvalidInput("ticks_per_second must be positive"));
        }
        if self.encoder.multiplier <= 0.0 {
            return Err(StageError::InvalidInput("multiplier must be positive"));
        }
        if self.encoder.min_pitch > self.encoder.max_pitch {
            return Err(StageError::InvalidInput("min_pitch must not exceed max_pitch"));
        }
        if self.control.fixed_step <= 0.0 {
            return Err(StageError::InvalidInput("fixed_step must be positive"));
        }
        if self.output.lighting_channels > MAX_LIGHTING_CHANNELS {
            return Err(StageError::InvalidInput("lighting_channels exceeds 512"));
        }
        Ok(())
    }
}

/// Calibration of the encoder and the playhead filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Raw encoder ticks that correspond to one second of timeline.
    pub ticks_per_second: f64,
    /// Operator scale applied on top of `ticks_per_second`.
    pub multiplier: f64,
    /// Exponential smoothing rate, per second.
    pub smoothing_rate: f64,
    pub min_pitch: f32,
    pub max_pitch: f32,
}

impl EncoderConfig {
    pub fn ticks_per_timeline_second(&self) -> f64 {
        self.ticks_per_second * self.multiplier
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 2000.0,
            multiplier: 1.0,
            smoothing_rate: 0.25,
            min_pitch: 0.5,
            max_pitch: 2.0,
        }
    }
}

/// Sink side parameters of the synchronized output driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Width of the tail window before the end of the timeline, in seconds.
    pub tail_epsilon: f64,
    pub volume_curve: Curve,
    pub pitch_curve: Curve,
    /// Number of lighting channels written per frame.
    pub lighting_channels: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            tail_epsilon: 0.1,
            volume_curve: Curve::constant(1.0),
            pitch_curve: Curve::constant(1.0),
            lighting_channels: MAX_LIGHTING_CHANNELS,
        }
    }
}

/// Which cover is used while returning to idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleStyle {
    #[default]
    Curtain,
    Overlay,
}

/// Timings of the mode transition pipelines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub idle_timeout: f32,
    /// Pause after the curtain closed, before one-shot effects fire.
    pub settle_delay: f32,
    /// Pause after the one-shot effects, before the mode becomes active.
    pub effect_delay: f32,
    /// Pause after the curtain reopened, before interaction is re-enabled.
    pub reactivate_delay: f32,
    pub sound_fade: f32,
    pub ambient_fade: f32,
    pub idle_style: IdleStyle,
}

impl ModeConfig {
    pub fn idle_timeout(&self) -> Duration {
        seconds(self.idle_timeout)
    }

    pub fn settle_delay(&self) -> Duration {
        seconds(self.settle_delay)
    }

    pub fn effect_delay(&self) -> Duration {
        seconds(self.effect_delay)
    }

    pub fn reactivate_delay(&self) -> Duration {
        seconds(self.reactivate_delay)
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: 180.0,
            settle_delay: 1.0,
            effect_delay: 0.0,
            reactivate_delay: 0.5,
            sound_fade: 1.0,
            ambient_fade: 0.5,
            idle_style: IdleStyle::Curtain,
        }
    }
}

/// Location and selection of lighting animations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub animation_root: PathBuf,
    pub active_animation: String,
    pub idle_animation: Option<String>,
    pub preload: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            animation_root: PathBuf::from("Animations"),
            active_animation: "default.chan".to_string(),
            idle_animation: None,
            preload: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Period of the fixed control tick, in seconds.
    pub fixed_step: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { fixed_step: 0.02 }
    }
}

fn seconds(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(Duration::ZERO)
}
