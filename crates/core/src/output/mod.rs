pub mod curve;

use std::sync::Arc;

use crate::{config::OutputConfig, config::MAX_LIGHTING_CHANNELS, AnimationComposition};

pub use curve::{Curve, CurveKey};

/// Video surface that is scrubbed rather than played.
pub trait VideoSink {
    /// Length of the loaded media in seconds; zero or less while not ready.
    fn duration_seconds(&self) -> f64;
    fn seek_to_time(&mut self, seconds: f64);
}

/// Per-channel lighting output, e.g. a DMX universe.
pub trait LightingSink {
    fn set_channel_value(&mut self, channel: usize, value: u8);
}

pub trait AudioSink {
    fn set_pitch(&mut self, pitch: f32);
    fn set_volume(&mut self, volume: f32);
    /// Stops the looping sound effect and plays it again from the start.
    fn restart_loop(&mut self);
}

/// Everything written to the sinks for one tick, all derived from
/// `wrapped_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFrame {
    pub duration: f64,
    pub wrapped_time: f64,
    pub fraction: f64,
    pub frame_index: Option<usize>,
    pub volume: f32,
    pub pitch: f32,
    pub in_tail: bool,
    /// First tick of a tail window; the loop sound was restarted.
    pub entered_tail: bool,
}

/// Fans one playhead value out to video, lighting and audio.
pub struct SynchronizedOutputDriver {
    config: OutputConfig,
    video: Box<dyn VideoSink>,
    lighting: Box<dyn LightingSink>,
    audio: Box<dyn AudioSink>,
    composition: Option<Arc<AnimationComposition>>,
    in_tail: bool,
}

impl SynchronizedOutputDriver {
    pub fn new(
        config: OutputConfig,
        video: Box<dyn VideoSink>,
        lighting: Box<dyn LightingSink>,
        audio: Box<dyn AudioSink>,
    ) -> Self {
        Self {
            config,
            video,
            lighting,
            audio,
            composition: None,
            in_tail: false,
        }
    }

    /// Swaps the animation the lighting lookup indexes into.
    pub fn set_composition(&mut self, composition: Option<Arc<AnimationComposition>>) {
        self.composition = composition;
    }

    pub fn composition(&self) -> Option<&Arc<AnimationComposition>> {
        self.composition.as_ref()
    }

    pub fn in_tail(&self) -> bool {
        self.in_tail
    }

    /// Applies playhead `time` to every sink. `pitch_signal` is the tracker's
    /// velocity pitch, shaped here by the pitch curve. Returns `None` while
    /// the media has no usable duration.
    pub fn apply_time(&mut self, time: f64, pitch_signal: f32) -> Option<AppliedFrame> {
        let duration = self.video.duration_seconds();
        if !(duration > 0.0) || !time.is_finite() {
            return None;
        }

        let mut wrapped_time = time.rem_euclid(duration);
        if wrapped_time >= duration {
            wrapped_time = 0.0;
        }
        let fraction = wrapped_time / duration;

        self.video.seek_to_time(wrapped_time);
        let frame_index = self.write_lighting(fraction);

        let curve_at = fraction as f32;
        let volume = self.config.volume_curve.evaluate(curve_at).unwrap_or(1.0);
        let pitch = pitch_signal * self.config.pitch_curve.evaluate(curve_at).unwrap_or(1.0);
        self.audio.set_volume(volume);
        self.audio.set_pitch(pitch);

        let in_tail = wrapped_time >= duration - self.config.tail_epsilon;
        let entered_tail = in_tail && !self.in_tail;
        if entered_tail {
            self.audio.restart_loop();
        }
        self.in_tail = in_tail;

        Some(AppliedFrame {
            duration,
            wrapped_time,
            fraction,
            frame_index,
            volume,
            pitch,
            in_tail,
            entered_tail,
        })
    }

    fn write_lighting(&mut self, fraction: f64) -> Option<usize> {
        let composition = self.composition.as_ref()?;
        let index = composition.index_at(fraction);
        let limit = self.config.lighting_channels.min(MAX_LIGHTING_CHANNELS);
        for (channel, value) in composition.frames()[index]
            .channels()
            .iter()
            .take(limit)
            .enumerate()
        {
            self.lighting.set_channel_value(channel, *value);
        }
        Some(index)
    }
}

impl std::fmt::Debug for SynchronizedOutputDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedOutputDriver")
            .field("config", &self.config)
            .field("composition", &self.composition.as_ref().map(|c| c.source_path()))
            .field("in_tail", &self.in_tail)
            .finish()
    }
}
