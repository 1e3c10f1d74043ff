//! Turns raw encoder ticks into the smoothed playhead that drives every sink.

pub mod slot;

use crate::{config::EncoderConfig, Result, StageError};

pub use slot::{RawSample, SampleSlot, SerialReader};

/// One decoded serial payload: `position \t <unused> \t velocity [\t ...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSample {
    pub raw_position: i64,
    pub raw_velocity: i64,
    pub timestamp_tick: u64,
}

impl EncoderSample {
    pub fn parse(line: &str, timestamp_tick: u64) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(StageError::malformed(
                line,
                format!("expected at least 3 fields, found {}", fields.len()),
            ));
        }

        let field = |index: usize, name: &str| {
            fields[index]
                .trim()
                .parse::<i64>()
                .map_err(|err| StageError::malformed(line, format!("{name}: {err}")))
        };

        Ok(Self {
            raw_position: field(0, "position")?,
            raw_velocity: field(2, "velocity")?,
            timestamp_tick,
        })
    }
}

impl TryFrom<&RawSample> for EncoderSample {
    type Error = StageError;

    fn try_from(sample: &RawSample) -> Result<Self> {
        Self::parse(&sample.line, sample.sequence)
    }
}

/// Snapshot of the tracker's filter state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayheadState {
    /// Raw position the delta is measured from; `None` while re-anchoring.
    pub base_position: Option<i64>,
    /// Filtered playhead, in timeline seconds.
    pub smoothed_time: f64,
    pub raw_delta: i64,
    pub in_loop_tail: bool,
}

/// Result of one tracker tick that consumed a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerTick {
    /// Smoothed playhead after this tick.
    pub time: f64,
    /// Unfiltered time the playhead is moving toward.
    pub target_time: f64,
    /// Velocity mapped into the configured pitch range.
    pub pitch: f32,
    /// The raw position differs from the previous tick's.
    pub moved: bool,
    /// The anchor was (re)set on this tick.
    pub reanchored: bool,
}

/// Filters the encoder position into a wraparound-safe playhead.
#[derive(Debug, Clone)]
pub struct EncoderPlayheadTracker {
    config: EncoderConfig,
    state: PlayheadState,
    last_raw_position: Option<i64>,
    pitch: f32,
}

impl EncoderPlayheadTracker {
    pub fn new(config: EncoderConfig) -> Self {
        let pitch = config.min_pitch;
        Self {
            config,
            state: PlayheadState::default(),
            last_raw_position: None,
            pitch,
        }
    }

    pub fn state(&self) -> PlayheadState {
        self.state
    }

    pub fn smoothed_time(&self) -> f64 {
        self.state.smoothed_time
    }

    /// Latest velocity signal, already clamped to the pitch range.
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Runs one control tick. Returns `None` when no sample arrived since the
    /// previous tick or the sample was malformed; the state is untouched in
    /// both cases.
    pub fn tick(&mut self, raw: Option<RawSample>, dt_seconds: f64) -> Option<TrackerTick> {
        let raw = raw?;
        match EncoderSample::try_from(&raw) {
            Ok(sample) => Some(self.advance(sample, dt_seconds)),
            Err(err) => {
                tracing::warn!(%err, "dropping encoder sample");
                None
            }
        }
    }

    /// Feeds one decoded sample through the anchor and the smoothing filter.
    pub fn advance(&mut self, sample: EncoderSample, dt_seconds: f64) -> TrackerTick {
        let raw = sample.raw_position;
        let mut reanchored = false;

        let delta = match self.state.base_position {
            None => {
                self.state.base_position = Some(raw);
                reanchored = true;
                0
            }
            Some(base) if raw < base => {
                tracing::debug!(raw, base, "encoder moved behind its anchor, re-anchoring");
                self.state.base_position = None;
                reanchored = true;
                0
            }
            Some(base) => raw - base,
        };
        self.state.raw_delta = delta;

        let scale = self.config.ticks_per_timeline_second();
        let target_time = delta as f64 / scale;
        let blend = (self.config.smoothing_rate * dt_seconds).clamp(0.0, 1.0);
        self.state.smoothed_time += (target_time - self.state.smoothed_time) * blend;

        let velocity = (sample.raw_velocity as f64 / scale) as f32;
        self.pitch = velocity.clamp(self.config.min_pitch, self.config.max_pitch);

        let moved = self
            .last_raw_position
            .map(|last| last != raw)
            .unwrap_or(false);
        self.last_raw_position = Some(raw);

        TrackerTick {
            time: self.state.smoothed_time,
            target_time,
            pitch: self.pitch,
            moved,
            reanchored,
        }
    }

    /// Tells the tracker whether the wrapped playhead sits in the tail window
    /// of a timeline `duration` seconds long. On entry into the tail the
    /// anchor is dropped and the playhead moved back one full loop, so the
    /// next cycle measures from a fresh anchor without a visible jump.
    pub fn observe_loop_position(&mut self, in_tail: bool, duration: f64) {
        if in_tail && !self.state.in_loop_tail && duration > 0.0 {
            let wrapped = self.state.smoothed_time.rem_euclid(duration);
            self.state.smoothed_time = wrapped - duration;
            self.state.base_position = None;
            self.state.raw_delta = 0;
            tracing::debug!(wrapped, "entering loop tail, re-anchoring");
        }
        self.state.in_loop_tail = in_tail;
    }

    /// Drops the anchor so the next sample starts a fresh measurement. The
    /// playhead itself is kept.
    pub fn reset(&mut self) {
        self.state.base_position = None;
        self.state.raw_delta = 0;
        self.state.in_loop_tail = false;
        self.last_raw_position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.02;

    fn tracker(smoothing_rate: f64) -> EncoderPlayheadTracker {
        EncoderPlayheadTracker::new(EncoderConfig {
            ticks_per_second: 2000.0,
            multiplier: 1.0,
            smoothing_rate,
            min_pitch: 0.5,
            max_pitch: 2.0,
        })
    }

    fn sample(position: i64) -> EncoderSample {
        EncoderSample {
            raw_position: position,
            raw_velocity: 0,
            timestamp_tick: 0,
        }
    }

    fn raw(line: &str) -> Option<RawSample> {
        Some(RawSample {
            line: line.to_string(),
            sequence: 1,
        })
    }

    #[test]
    fn parses_tab_separated_payload() {
        let sample = EncoderSample::parse("1050\t7\t-300\t9", 4).unwrap();

        assert_eq!(sample.raw_position, 1050);
        assert_eq!(sample.raw_velocity, -300);
        assert_eq!(sample.timestamp_tick, 4);
    }

    #[test]
    fn rejects_short_or_non_numeric_payloads() {
        assert!(EncoderSample::parse("1050\t7", 0).is_err());
        assert!(EncoderSample::parse("abc\t7\t1", 0).is_err());
        assert!(EncoderSample::parse("1\t7\tfast", 0).is_err());
    }

    #[test]
    fn anchors_then_measures_delta() {
        let mut tracker = tracker(0.25);
        for _ in 0..3 {
            tracker.advance(sample(1000), DT);
        }
        assert_eq!(tracker.state().base_position, Some(1000));
        assert_eq!(tracker.state().raw_delta, 0);

        let tick = tracker.advance(sample(1050), DT);
        assert_eq!(tracker.state().raw_delta, 50);
        assert!((tick.target_time - 0.025).abs() < 1e-12);
        assert!(tick.moved);

        let tick = tracker.advance(sample(900), DT);
        assert!(tick.reanchored);
        assert_eq!(tracker.state().base_position, None);
        assert_eq!(tracker.state().raw_delta, 0);
        assert_eq!(tick.target_time, 0.0);

        tracker.advance(sample(900), DT);
        assert_eq!(tracker.state().base_position, Some(900));
    }

    #[test]
    fn backward_jump_only_moves_one_smoothing_step() {
        let mut tracker = tracker(5.0);
        tracker.advance(sample(1000), DT);
        for _ in 0..500 {
            tracker.advance(sample(5000), DT);
        }
        let before = tracker.smoothed_time();

        let after = tracker.advance(sample(900), DT).time;
        let max_step = before * (5.0 * DT);
        assert!(before - after <= max_step + 1e-9);
        assert!(after > 0.0);
    }

    #[test]
    fn smoothed_time_converges_to_target() {
        let mut tracker = tracker(2.0);
        tracker.advance(sample(500), DT);
        for position in (500..=4500).step_by(100) {
            tracker.advance(sample(position), DT);
        }
        for _ in 0..2000 {
            tracker.advance(sample(4500), DT);
        }

        assert!((tracker.smoothed_time() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn velocity_is_scaled_and_clamped() {
        let mut tracker = tracker(1.0);
        let mut fast = sample(0);
        fast.raw_velocity = 3000;
        assert!((tracker.advance(fast, DT).pitch - 1.5).abs() < 1e-6);

        fast.raw_velocity = 10_000;
        assert_eq!(tracker.advance(fast, DT).pitch, 2.0);

        fast.raw_velocity = -10_000;
        assert_eq!(tracker.advance(fast, DT).pitch, 0.5);
    }

    #[test]
    fn missing_or_malformed_samples_leave_state_untouched() {
        let mut tracker = tracker(1.0);
        tracker.tick(raw("100\t0\t0"), DT).unwrap();
        tracker.tick(raw("300\t0\t0"), DT).unwrap();
        let before = tracker.state();

        assert!(tracker.tick(None, DT).is_none());
        assert!(tracker.tick(raw("garbage"), DT).is_none());
        assert!(tracker.tick(raw("1\t2"), DT).is_none());
        assert_eq!(tracker.state(), before);
    }

    #[test]
    fn entering_the_tail_reanchors_once_and_keeps_wrapped_time() {
        let mut tracker = tracker(1.0);
        tracker.advance(sample(0), DT);
        tracker.state.smoothed_time = 9.95;

        tracker.observe_loop_position(true, 10.0);
        let state = tracker.state();
        assert_eq!(state.base_position, None);
        assert!(state.in_loop_tail);
        assert!((state.smoothed_time.rem_euclid(10.0) - 9.95).abs() < 1e-9);

        tracker.advance(sample(20_000), DT);
        assert_eq!(tracker.state().base_position, Some(20_000));

        tracker.observe_loop_position(true, 10.0);
        assert_eq!(tracker.state().base_position, Some(20_000));

        tracker.observe_loop_position(false, 10.0);
        assert!(!tracker.state().in_loop_tail);
    }

    #[test]
    fn reset_clears_anchor_but_keeps_playhead() {
        let mut tracker = tracker(1.0);
        tracker.advance(sample(0), DT);
        tracker.advance(sample(2000), DT);
        let time = tracker.smoothed_time();

        tracker.reset();
        assert_eq!(tracker.state().base_position, None);
        assert_eq!(tracker.smoothed_time(), time);
        assert!(!tracker.advance(sample(5000), DT).moved);
    }
}
