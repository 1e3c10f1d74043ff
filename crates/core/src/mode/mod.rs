//! Idle / Active / Transition orchestration.
//!
//! Each transition is a pipeline of phases advanced from [`ModeStateMachine::tick`].
//! A phase either finishes on the spot or waits for a [`PhaseSignal`] or a
//! deadline, in which case control returns to the caller until the next tick.
//! At most one pipeline exists at a time and requests that arrive while one is
//! running are dropped.

pub mod collaborators;

use std::time::{Duration, Instant};

use crate::config::{IdleStyle, ModeConfig};

pub use collaborators::{
    Ambient, Collaborators, ContentMode, Curtain, Effects, Interaction, Lighting, Overlay,
    PhaseSignal, Playback, Sound,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperatingMode {
    #[default]
    Idle,
    Active,
    Transition,
}

/// Recorded whenever the operating mode is reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: OperatingMode,
    pub to: OperatingMode,
}

#[derive(Debug)]
enum Pipeline {
    Activate(ActivatePhase),
    Idle(IdlePhase),
}

#[derive(Debug)]
enum ActivatePhase {
    CurtainClosing(PhaseSignal),
    Settling { until: Instant },
    EffectDelay { until: Instant },
    CurtainOpening(PhaseSignal),
    Reactivating { until: Instant },
}

#[derive(Debug)]
enum IdlePhase {
    Covering(PhaseSignal),
}

enum Step {
    Wait(Pipeline),
    Next(Pipeline),
    Done,
}

/// Owns the operating mode and sequences the subsystems around it.
#[derive(Debug)]
pub struct ModeStateMachine {
    config: ModeConfig,
    collaborators: Collaborators,
    mode: OperatingMode,
    pipeline: Option<Pipeline>,
    last_interaction: Instant,
    activation_trigger_enabled: bool,
    one_shot_armed: bool,
    changes: Vec<ModeChange>,
}

impl ModeStateMachine {
    /// Starts in `Idle` with the activation trigger enabled and interactive
    /// control disabled.
    pub fn new(config: ModeConfig, collaborators: Collaborators, now: Instant) -> Self {
        tracing::debug!(?collaborators, "mode state machine starting");
        let mut machine = Self {
            config,
            collaborators,
            mode: OperatingMode::Idle,
            pipeline: None,
            last_interaction: now,
            activation_trigger_enabled: true,
            one_shot_armed: false,
            changes: Vec::new(),
        };
        machine.set_activation_trigger(true);
        machine.set_interactive_control(false);
        machine
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn is_transitioning(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn activation_trigger_enabled(&self) -> bool {
        self.activation_trigger_enabled
    }

    /// Set while an activation is allowed to fire one-shot effects.
    pub fn one_shot_armed(&self) -> bool {
        self.one_shot_armed
    }

    pub fn last_interaction(&self) -> Instant {
        self.last_interaction
    }

    /// Starts the idle to active pipeline. Returns `false` and does nothing
    /// unless the machine is idle with no pipeline running.
    pub fn request_activate(&mut self, now: Instant) -> bool {
        if self.mode != OperatingMode::Idle || self.pipeline.is_some() {
            tracing::debug!(mode = ?self.mode, "activation request dropped");
            return false;
        }

        self.set_mode(OperatingMode::Transition, now);
        self.set_activation_trigger(false);
        self.one_shot_armed = true;

        let closing = self.close_curtain();
        self.pipeline = Some(Pipeline::Activate(ActivatePhase::CurtainClosing(closing)));
        self.advance(now);
        true
    }

    /// Starts the return to idle. Returns `false` and does nothing unless the
    /// machine is active with no pipeline running.
    pub fn request_idle(&mut self, now: Instant) -> bool {
        let accepts = matches!(self.mode, OperatingMode::Active | OperatingMode::Transition);
        if !accepts || self.pipeline.is_some() {
            tracing::debug!(mode = ?self.mode, "idle request dropped");
            return false;
        }

        self.set_mode(OperatingMode::Transition, now);
        self.reset_one_shots();
        self.set_interactive_control(false);

        let ambient_fade = secs(self.config.ambient_fade);
        let sound_fade = secs(self.config.sound_fade);
        with(&mut self.collaborators.ambient, "ambient", |ambient| {
            ambient.fade_out(ambient_fade)
        });
        with(&mut self.collaborators.lighting, "lighting", |lighting| {
            lighting.fade_in()
        });
        with(&mut self.collaborators.sound, "sound", |sound| {
            sound.fade_out(sound_fade)
        });

        let covering = match self.config.idle_style {
            IdleStyle::Curtain => self.close_curtain(),
            IdleStyle::Overlay => self.fade_in_overlay(),
        };
        self.pipeline = Some(Pipeline::Idle(IdlePhase::Covering(covering)));
        self.advance(now);
        true
    }

    /// Called by the external full-activation trigger. Ignored while the
    /// trigger is disabled.
    pub fn notify_activation_trigger(&mut self, now: Instant) -> bool {
        if !self.activation_trigger_enabled {
            return false;
        }
        self.request_activate(now)
    }

    /// Records visitor interaction, postponing the inactivity timeout.
    pub fn reset_idle_timer(&mut self, now: Instant) {
        if self.mode == OperatingMode::Active {
            self.last_interaction = now;
            tracing::trace!("idle timer reset");
        }
    }

    /// Switches straight to idle without any transition. Refused while a
    /// pipeline is running.
    pub fn force_idle(&mut self, now: Instant) -> bool {
        if self.pipeline.is_some() {
            return false;
        }

        if self.mode != OperatingMode::Idle {
            self.set_mode(OperatingMode::Idle, now);
        }
        self.set_interactive_control(false);
        with(&mut self.collaborators.curtain, "curtain", |curtain| curtain.reset());
        self.reset_one_shots();
        with(&mut self.collaborators.sound, "sound", |sound| sound.stop());
        self.switch_content(ContentMode::Idle);
        self.one_shot_armed = false;
        self.set_activation_trigger(true);
        tracing::info!("switched directly to idle");
        true
    }

    /// Advances the running pipeline and the inactivity watchdog, returning
    /// every mode change since the previous call.
    pub fn tick(&mut self, now: Instant) -> Vec<ModeChange> {
        self.advance(now);

        let timeout = self.config.idle_timeout();
        if self.mode == OperatingMode::Active
            && self.pipeline.is_none()
            && now.saturating_duration_since(self.last_interaction) > timeout
        {
            tracing::info!(?timeout, "idle timeout reached");
            self.request_idle(now);
        }

        std::mem::take(&mut self.changes)
    }

    fn advance(&mut self, now: Instant) {
        while let Some(pipeline) = self.pipeline.take() {
            match self.step(pipeline, now) {
                Step::Wait(pipeline) => {
                    self.pipeline = Some(pipeline);
                    break;
                }
                Step::Next(pipeline) => self.pipeline = Some(pipeline),
                Step::Done => break,
            }
        }
    }

    fn step(&mut self, pipeline: Pipeline, now: Instant) -> Step {
        match pipeline {
            Pipeline::Activate(phase) => self.step_activate(phase, now),
            Pipeline::Idle(phase) => self.step_idle(phase, now),
        }
    }

    fn step_activate(&mut self, phase: ActivatePhase, now: Instant) -> Step {
        use ActivatePhase::*;

        match phase {
            CurtainClosing(signal) if !signal.is_complete() => {
                Step::Wait(Pipeline::Activate(CurtainClosing(signal)))
            }
            CurtainClosing(_) => {
                tracing::debug!("curtain closed");
                let until = now + self.config.settle_delay();
                Step::Next(Pipeline::Activate(Settling { until }))
            }
            Settling { until } if now < until => Step::Wait(Pipeline::Activate(Settling { until })),
            Settling { .. } => {
                self.trigger_one_shots();
                let until = now + self.config.effect_delay();
                Step::Next(Pipeline::Activate(EffectDelay { until }))
            }
            EffectDelay { until } if now < until => {
                Step::Wait(Pipeline::Activate(EffectDelay { until }))
            }
            EffectDelay { .. } => {
                self.set_mode(OperatingMode::Active, now);
                self.switch_content(ContentMode::Active);

                let sound_fade = secs(self.config.sound_fade);
                with(&mut self.collaborators.lighting, "lighting", |lighting| {
                    lighting.fade_out()
                });
                with(&mut self.collaborators.sound, "sound", |sound| {
                    sound.reset_curve();
                    sound.fade_in(sound_fade);
                });

                let opening = self.open_curtain();
                Step::Next(Pipeline::Activate(CurtainOpening(opening)))
            }
            CurtainOpening(signal) if !signal.is_complete() => {
                Step::Wait(Pipeline::Activate(CurtainOpening(signal)))
            }
            CurtainOpening(_) => {
                tracing::debug!("curtain opened");
                let until = now + self.config.reactivate_delay();
                Step::Next(Pipeline::Activate(Reactivating { until }))
            }
            Reactivating { until } if now < until => {
                Step::Wait(Pipeline::Activate(Reactivating { until }))
            }
            Reactivating { .. } => {
                self.set_interactive_control(true);
                self.one_shot_armed = false;
                self.last_interaction = now;
                tracing::info!("transition to active completed");
                Step::Done
            }
        }
    }

    fn step_idle(&mut self, phase: IdlePhase, now: Instant) -> Step {
        match phase {
            IdlePhase::Covering(signal) if !signal.is_complete() => {
                Step::Wait(Pipeline::Idle(IdlePhase::Covering(signal)))
            }
            IdlePhase::Covering(_) => {
                self.set_mode(OperatingMode::Idle, now);
                match self.config.idle_style {
                    IdleStyle::Curtain => {
                        with(&mut self.collaborators.curtain, "curtain", |curtain| curtain.reset())
                    }
                    IdleStyle::Overlay => {
                        with(&mut self.collaborators.overlay, "overlay", |overlay| overlay.reset())
                    }
                }
                self.switch_content(ContentMode::Idle);
                self.one_shot_armed = false;
                self.set_activation_trigger(true);
                tracing::info!("transition to idle completed");
                Step::Done
            }
        }
    }

    fn set_mode(&mut self, mode: OperatingMode, now: Instant) {
        let change = ModeChange {
            from: self.mode,
            to: mode,
        };
        self.mode = mode;
        if mode == OperatingMode::Active {
            self.last_interaction = now;
        }
        tracing::info!(from = ?change.from, to = ?change.to, "mode changed");
        self.changes.push(change);
    }

    fn close_curtain(&mut self) -> PhaseSignal {
        let signal = PhaseSignal::new();
        match self.collaborators.curtain.as_deref_mut() {
            Some(curtain) => curtain.close(signal.clone()),
            None => skip(&signal, "curtain"),
        }
        signal
    }

    fn open_curtain(&mut self) -> PhaseSignal {
        let signal = PhaseSignal::new();
        match self.collaborators.curtain.as_deref_mut() {
            Some(curtain) => curtain.open(signal.clone()),
            None => skip(&signal, "curtain"),
        }
        signal
    }

    fn fade_in_overlay(&mut self) -> PhaseSignal {
        let signal = PhaseSignal::new();
        match self.collaborators.overlay.as_deref_mut() {
            Some(overlay) => overlay.fade_in(signal.clone()),
            None => skip(&signal, "overlay"),
        }
        signal
    }

    fn trigger_one_shots(&mut self) {
        if let Some(effects) = self.collaborators.effects.as_deref_mut() {
            for channel in effects.speed_synth_channels() {
                effects.trigger_one_shot(channel);
            }
        }
    }

    fn reset_one_shots(&mut self) {
        if let Some(effects) = self.collaborators.effects.as_deref_mut() {
            for channel in effects.speed_synth_channels() {
                effects.reset_one_shots(channel);
            }
        }
    }

    fn switch_content(&mut self, content: ContentMode) {
        with(&mut self.collaborators.playback, "playback", |playback| {
            playback.switch_content(content)
        });
    }

    fn set_activation_trigger(&mut self, enabled: bool) {
        self.activation_trigger_enabled = enabled;
        with(&mut self.collaborators.interaction, "interaction", |interaction| {
            interaction.set_activation_trigger(enabled)
        });
    }

    fn set_interactive_control(&mut self, enabled: bool) {
        with(&mut self.collaborators.interaction, "interaction", |interaction| {
            interaction.set_interactive_control(enabled)
        });
    }
}

fn with<T: ?Sized>(slot: &mut Option<Box<T>>, name: &'static str, apply: impl FnOnce(&mut T)) {
    match slot.as_deref_mut() {
        Some(collaborator) => apply(collaborator),
        None => tracing::warn!(collaborator = name, "collaborator missing, skipping"),
    }
}

fn skip(signal: &PhaseSignal, name: &'static str) {
    tracing::warn!(collaborator = name, "collaborator missing, phase skipped");
    signal.complete();
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Default)]
    struct Stage {
        log: Log,
        pending: Rc<RefCell<Vec<PhaseSignal>>>,
        instant: bool,
    }

    impl Stage {
        fn record(&self, event: impl Into<String>) {
            self.log.borrow_mut().push(event.into());
        }

        fn hold(&self, done: PhaseSignal) {
            if self.instant {
                done.complete();
            } else {
                self.pending.borrow_mut().push(done);
            }
        }
    }

    struct Probe(Rc<Stage>);

    impl Curtain for Probe {
        fn close(&mut self, done: PhaseSignal) {
            self.0.record("curtain.close");
            self.0.hold(done);
        }

        fn open(&mut self, done: PhaseSignal) {
            self.0.record("curtain.open");
            self.0.hold(done);
        }

        fn reset(&mut self) {
            self.0.record("curtain.reset");
        }
    }

    impl Overlay for Probe {
        fn fade_in(&mut self, done: PhaseSignal) {
            self.0.record("overlay.fade_in");
            self.0.hold(done);
        }

        fn reset(&mut self) {
            self.0.record("overlay.reset");
        }
    }

    impl Lighting for Probe {
        fn fade_out(&mut self) {
            self.0.record("led.fade_out");
        }

        fn fade_in(&mut self) {
            self.0.record("led.fade_in");
        }
    }

    impl Ambient for Probe {
        fn fade_out(&mut self, _duration: Duration) {
            self.0.record("ambient.fade_out");
        }
    }

    impl Sound for Probe {
        fn reset_curve(&mut self) {
            self.0.record("sound.reset_curve");
        }

        fn fade_in(&mut self, _duration: Duration) {
            self.0.record("sound.fade_in");
        }

        fn fade_out(&mut self, _duration: Duration) {
            self.0.record("sound.fade_out");
        }

        fn stop(&mut self) {
            self.0.record("sound.stop");
        }
    }

    impl Effects for Probe {
        fn speed_synth_channels(&self) -> Vec<usize> {
            vec![1, 3]
        }

        fn trigger_one_shot(&mut self, channel: usize) {
            self.0.record(format!("effects.trigger.{channel}"));
        }

        fn reset_one_shots(&mut self, channel: usize) {
            self.0.record(format!("effects.reset.{channel}"));
        }
    }

    impl Playback for Probe {
        fn switch_content(&mut self, content: ContentMode) {
            self.0.record(format!("playback.{content:?}"));
        }
    }

    impl Interaction for Probe {
        fn set_activation_trigger(&mut self, enabled: bool) {
            self.0.record(format!("trigger.{enabled}"));
        }

        fn set_interactive_control(&mut self, enabled: bool) {
            self.0.record(format!("control.{enabled}"));
        }
    }

    fn full_cast(stage: &Rc<Stage>) -> Collaborators {
        Collaborators::new()
            .with_curtain(Probe(stage.clone()))
            .with_overlay(Probe(stage.clone()))
            .with_lighting(Probe(stage.clone()))
            .with_ambient(Probe(stage.clone()))
            .with_sound(Probe(stage.clone()))
            .with_effects(Probe(stage.clone()))
            .with_playback(Probe(stage.clone()))
            .with_interaction(Probe(stage.clone()))
    }

    fn config() -> ModeConfig {
        ModeConfig {
            idle_timeout: 10.0,
            settle_delay: 1.0,
            effect_delay: 0.5,
            reactivate_delay: 0.5,
            ..Default::default()
        }
    }

    fn complete_pending(stage: &Stage) {
        for signal in stage.pending.borrow_mut().drain(..) {
            signal.complete();
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn activation_runs_phases_in_order() {
        let stage = Rc::new(Stage::default());
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), full_cast(&stage), t0);
        stage.log.borrow_mut().clear();

        assert!(machine.request_activate(t0));
        assert_eq!(machine.mode(), OperatingMode::Transition);
        assert!(!machine.activation_trigger_enabled());
        assert!(machine.one_shot_armed());

        machine.tick(t0 + ms(500));
        assert_eq!(*stage.log.borrow(), vec!["trigger.false", "curtain.close"]);

        complete_pending(&stage);
        machine.tick(t0 + ms(600));
        machine.tick(t0 + ms(1200));
        assert!(!stage.log.borrow().contains(&"effects.trigger.1".to_string()));

        machine.tick(t0 + ms(1600));
        assert!(stage.log.borrow().contains(&"effects.trigger.3".to_string()));
        assert_eq!(machine.mode(), OperatingMode::Transition);

        machine.tick(t0 + ms(2100));
        assert_eq!(machine.mode(), OperatingMode::Active);
        assert!(machine.is_transitioning());

        complete_pending(&stage);
        machine.tick(t0 + ms(2200));
        assert!(machine.one_shot_armed());
        machine.tick(t0 + ms(2700));
        assert!(!machine.is_transitioning());
        assert!(!machine.one_shot_armed());

        assert_eq!(
            *stage.log.borrow(),
            vec![
                "trigger.false",
                "curtain.close",
                "effects.trigger.1",
                "effects.trigger.3",
                "playback.Active",
                "led.fade_out",
                "sound.reset_curve",
                "sound.fade_in",
                "curtain.open",
                "control.true",
            ]
        );
    }

    #[test]
    fn concurrent_activation_requests_run_one_pipeline() {
        let stage = Rc::new(Stage::default());
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), full_cast(&stage), t0);

        assert!(machine.request_activate(t0));
        assert!(!machine.request_activate(t0 + ms(10)));
        assert!(!machine.request_idle(t0 + ms(20)));
        assert!(!machine.notify_activation_trigger(t0 + ms(30)));

        complete_pending(&stage);
        let mut changes = Vec::new();
        for step in 1..=40 {
            changes.extend(machine.tick(t0 + ms(step * 100)));
            complete_pending(&stage);
        }

        assert_eq!(machine.mode(), OperatingMode::Active);
        let closes = stage
            .log
            .borrow()
            .iter()
            .filter(|event| *event == "curtain.close")
            .count();
        assert_eq!(closes, 1);
        assert_eq!(
            changes,
            vec![
                ModeChange { from: OperatingMode::Idle, to: OperatingMode::Transition },
                ModeChange { from: OperatingMode::Transition, to: OperatingMode::Active },
            ]
        );
    }

    #[test]
    fn idle_with_curtain_style_restores_trigger() {
        let stage = Rc::new(Stage {
            instant: true,
            ..Default::default()
        });
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), full_cast(&stage), t0);
        machine.request_activate(t0);
        for step in 1..=40 {
            machine.tick(t0 + ms(step * 100));
        }
        assert_eq!(machine.mode(), OperatingMode::Active);
        assert!(!machine.is_transitioning());
        stage.log.borrow_mut().clear();

        assert!(machine.request_idle(t0 + ms(6000)));
        assert_eq!(machine.mode(), OperatingMode::Idle);
        assert!(machine.activation_trigger_enabled());
        assert_eq!(
            *stage.log.borrow(),
            vec![
                "effects.reset.1",
                "effects.reset.3",
                "control.false",
                "ambient.fade_out",
                "led.fade_in",
                "sound.fade_out",
                "curtain.close",
                "curtain.reset",
                "playback.Idle",
                "trigger.true",
            ]
        );
    }

    #[test]
    fn idle_with_overlay_style_waits_for_fade() {
        let stage = Rc::new(Stage::default());
        let t0 = Instant::now();
        let config = ModeConfig {
            idle_style: IdleStyle::Overlay,
            ..config()
        };
        let mut machine = ModeStateMachine::new(config, full_cast(&stage), t0);
        machine.request_activate(t0);
        for step in 1..=40 {
            complete_pending(&stage);
            machine.tick(t0 + ms(step * 100));
        }
        assert_eq!(machine.mode(), OperatingMode::Active);
        stage.log.borrow_mut().clear();

        assert!(machine.request_idle(t0 + ms(5000)));
        machine.tick(t0 + ms(5100));
        assert_eq!(machine.mode(), OperatingMode::Transition);
        assert!(stage.log.borrow().contains(&"overlay.fade_in".to_string()));
        assert!(!stage.log.borrow().contains(&"curtain.close".to_string()));

        complete_pending(&stage);
        let changes = machine.tick(t0 + ms(5200));
        assert_eq!(machine.mode(), OperatingMode::Idle);
        assert_eq!(
            changes,
            vec![ModeChange { from: OperatingMode::Transition, to: OperatingMode::Idle }]
        );
        assert!(stage.log.borrow().contains(&"overlay.reset".to_string()));
    }

    #[test]
    fn missing_collaborators_degrade_instead_of_stalling() {
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), Collaborators::new(), t0);

        assert!(machine.request_activate(t0));
        machine.tick(t0 + ms(1000));
        machine.tick(t0 + ms(1500));
        machine.tick(t0 + ms(2000));
        assert_eq!(machine.mode(), OperatingMode::Active);
        assert!(!machine.is_transitioning());

        assert!(machine.request_idle(t0 + ms(2100)));
        assert_eq!(machine.mode(), OperatingMode::Idle);
    }

    #[test]
    fn inactivity_returns_to_idle() {
        let stage = Rc::new(Stage {
            instant: true,
            ..Default::default()
        });
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), full_cast(&stage), t0);
        machine.request_activate(t0);
        for step in 1..=30 {
            machine.tick(t0 + ms(step * 100));
        }
        assert_eq!(machine.mode(), OperatingMode::Active);
        assert!(!machine.is_transitioning());

        machine.reset_idle_timer(t0 + ms(9000));
        machine.tick(t0 + ms(15_000));
        assert_eq!(machine.mode(), OperatingMode::Active);

        let changes = machine.tick(t0 + ms(19_500));
        assert_eq!(machine.mode(), OperatingMode::Idle);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn idle_timer_is_ignored_outside_active() {
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), Collaborators::new(), t0);

        machine.reset_idle_timer(t0 + ms(500));
        assert_eq!(machine.last_interaction(), t0);
        assert!(!machine.request_idle(t0));
    }

    #[test]
    fn force_idle_is_refused_mid_pipeline() {
        let stage = Rc::new(Stage::default());
        let t0 = Instant::now();
        let mut machine = ModeStateMachine::new(config(), full_cast(&stage), t0);
        machine.request_activate(t0);

        assert!(!machine.force_idle(t0));
        complete_pending(&stage);
        for step in 1..=40 {
            machine.tick(t0 + ms(step * 100));
            complete_pending(&stage);
        }
        stage.log.borrow_mut().clear();

        assert!(machine.force_idle(t0 + ms(5000)));
        assert_eq!(machine.mode(), OperatingMode::Idle);
        assert!(stage.log.borrow().contains(&"sound.stop".to_string()));
        assert!(stage.log.borrow().contains(&"trigger.true".to_string()));
    }
}
