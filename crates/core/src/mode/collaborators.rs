//! Subsystems the mode pipelines drive. Every one of them is optional; a
//! missing collaborator only skips the phases that need it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Completion flag handed to a collaborator that moves asynchronously.
#[derive(Debug, Clone, Default)]
pub struct PhaseSignal(Arc<AtomicBool>);

impl PhaseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the motion as finished. Safe to call more than once.
    pub fn complete(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Which content set the media players should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    Idle,
    Active,
}

pub trait Curtain {
    fn close(&mut self, done: PhaseSignal);
    fn open(&mut self, done: PhaseSignal);
    /// Snaps back to the rest position without animating.
    fn reset(&mut self);
}

/// Opaque image laid over the stage as an alternative to the curtain.
pub trait Overlay {
    fn fade_in(&mut self, done: PhaseSignal);
    fn reset(&mut self);
}

/// LED strips around the stage.
pub trait Lighting {
    fn fade_out(&mut self);
    fn fade_in(&mut self);
}

/// Ambient "sun" light.
pub trait Ambient {
    fn fade_out(&mut self, duration: Duration);
}

pub trait Sound {
    fn reset_curve(&mut self);
    fn fade_in(&mut self, duration: Duration);
    fn fade_out(&mut self, duration: Duration);
    fn stop(&mut self);
}

/// One-shot "comet" effects on LED channels in speed-synth display mode.
pub trait Effects {
    fn speed_synth_channels(&self) -> Vec<usize>;
    fn trigger_one_shot(&mut self, channel: usize);
    fn reset_one_shots(&mut self, channel: usize);
}

pub trait Playback {
    fn switch_content(&mut self, content: ContentMode);
}

/// External inputs the orchestrator gates while it transitions.
pub trait Interaction {
    /// The full-activation trigger that starts the idle to active pipeline.
    fn set_activation_trigger(&mut self, enabled: bool);
    /// Visitor control of the playhead.
    fn set_interactive_control(&mut self, enabled: bool);
}

#[derive(Default)]
pub struct Collaborators {
    pub curtain: Option<Box<dyn Curtain>>,
    pub overlay: Option<Box<dyn Overlay>>,
    pub lighting: Option<Box<dyn Lighting>>,
    pub ambient: Option<Box<dyn Ambient>>,
    pub sound: Option<Box<dyn Sound>>,
    pub effects: Option<Box<dyn Effects>>,
    pub playback: Option<Box<dyn Playback>>,
    pub interaction: Option<Box<dyn Interaction>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_curtain(mut self, curtain: impl Curtain + 'static) -> Self {
        self.curtain = Some(Box::new(curtain));
        self
    }

    pub fn with_overlay(mut self, overlay: impl Overlay + 'static) -> Self {
        self.overlay = Some(Box::new(overlay));
        self
    }

    pub fn with_lighting(mut self, lighting: impl Lighting + 'static) -> Self {
        self.lighting = Some(Box::new(lighting));
        self
    }

    pub fn with_ambient(mut self, ambient: impl Ambient + 'static) -> Self {
        self.ambient = Some(Box::new(ambient));
        self
    }

    pub fn with_sound(mut self, sound: impl Sound + 'static) -> Self {
        self.sound = Some(Box::new(sound));
        self
    }

    pub fn with_effects(mut self, effects: impl Effects + 'static) -> Self {
        self.effects = Some(Box::new(effects));
        self
    }

    pub fn with_playback(mut self, playback: impl Playback + 'static) -> Self {
        self.playback = Some(Box::new(playback));
        self
    }

    pub fn with_interaction(mut self, interaction: impl Interaction + 'static) -> Self {
        self.interaction = Some(Box::new(interaction));
        self
    }

    fn present(&self) -> Vec<&'static str> {
        [
            ("curtain", self.curtain.is_some()),
            ("overlay", self.overlay.is_some()),
            ("lighting", self.lighting.is_some()),
            ("ambient", self.ambient.is_some()),
            ("sound", self.sound.is_some()),
            ("effects", self.effects.is_some()),
            ("playback", self.playback.is_some()),
            ("interaction", self.interaction.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("present", &self.present())
            .finish()
    }
}
