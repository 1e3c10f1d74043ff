use std::time::Instant;

use crate::{
    AppliedFrame, EncoderPlayheadTracker, ModeChange, ModeStateMachine, OperatingMode, SampleSlot,
    SynchronizedOutputDriver, TrackerTick,
};

/// Turns variable frame times into whole fixed-length control ticks.
#[derive(Debug, Clone)]
pub struct FixedStep {
    step_seconds: f64,
    accumulator: f64,
}

impl FixedStep {
    pub fn new(step_seconds: f64) -> Self {
        Self {
            step_seconds: step_seconds.max(f64::EPSILON),
            accumulator: 0.0,
        }
    }

    pub fn step_seconds(&self) -> f64 {
        self.step_seconds
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    /// Adds `elapsed` seconds and returns how many ticks are now due.
    pub fn advance(&mut self, elapsed: f64) -> u32 {
        self.accumulator += elapsed.max(0.0);
        let due = (self.accumulator / self.step_seconds).floor();
        self.accumulator -= due * self.step_seconds;
        due as u32
    }
}

/// What one control tick did.
#[derive(Debug, Default, Clone)]
pub struct StepReport {
    pub mode_changes: Vec<ModeChange>,
    pub tracker: Option<TrackerTick>,
    pub frame: Option<AppliedFrame>,
}

/// Wires the tracker, the output driver and the mode state machine into one
/// fixed-rate loop fed from a [`SampleSlot`].
#[derive(Debug)]
pub struct ControlLoop {
    tracker: EncoderPlayheadTracker,
    driver: SynchronizedOutputDriver,
    modes: ModeStateMachine,
    slot: SampleSlot,
    clock: FixedStep,
    consuming: bool,
}

impl ControlLoop {
    pub fn new(
        tracker: EncoderPlayheadTracker,
        driver: SynchronizedOutputDriver,
        modes: ModeStateMachine,
        slot: SampleSlot,
        step_seconds: f64,
    ) -> Self {
        let consuming = modes.mode() == OperatingMode::Active;
        Self {
            tracker,
            driver,
            modes,
            slot,
            clock: FixedStep::new(step_seconds),
            consuming,
        }
    }

    pub fn tracker(&self) -> &EncoderPlayheadTracker {
        &self.tracker
    }

    pub fn driver(&self) -> &SynchronizedOutputDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut SynchronizedOutputDriver {
        &mut self.driver
    }

    pub fn modes(&self) -> &ModeStateMachine {
        &self.modes
    }

    /// Mode requests (`request_activate`, `request_idle`, ...) go through here.
    pub fn modes_mut(&mut self) -> &mut ModeStateMachine {
        &mut self.modes
    }

    pub fn is_consuming(&self) -> bool {
        self.consuming
    }

    /// Runs as many fixed ticks as `elapsed` seconds of wall time cover.
    pub fn run_frame(&mut self, now: Instant, elapsed: f64) -> Vec<StepReport> {
        let due = self.clock.advance(elapsed);
        let step = self.clock.step_seconds();
        (0..due).map(|_| self.step(now, step)).collect()
    }

    /// One control tick of `dt` seconds.
    pub fn step(&mut self, now: Instant, dt: f64) -> StepReport {
        let mode_changes = self.modes.tick(now);
        for change in &mode_changes {
            self.follow_mode(*change);
        }

        let mut report = StepReport {
            mode_changes,
            ..Default::default()
        };
        if !self.consuming {
            return report;
        }

        let raw = match self.slot.take() {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(%err, "sample slot unavailable");
                None
            }
        };
        let Some(tick) = self.tracker.tick(raw, dt) else {
            return report;
        };

        let frame = self.driver.apply_time(tick.time, tick.pitch);
        if let Some(frame) = &frame {
            self.tracker
                .observe_loop_position(frame.in_tail, frame.duration);
        }
        if tick.moved {
            self.modes.reset_idle_timer(now);
        }

        report.tracker = Some(tick);
        report.frame = frame;
        report
    }

    fn follow_mode(&mut self, change: ModeChange) {
        if change.to == OperatingMode::Active {
            self.tracker.reset();
            if let Err(err) = self.slot.take() {
                tracing::warn!(%err, "could not clear stale sample");
            }
            self.consuming = true;
            tracing::debug!("encoder consumption started");
        } else if change.from == OperatingMode::Active {
            self.tracker.reset();
            self.consuming = false;
            tracing::debug!("encoder consumption stopped");
        }
    }
}
