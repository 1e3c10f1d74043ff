//! Core library for the installation controller.
//!
//! A rotary encoder, not a clock, moves the show. The crate turns the
//! encoder's serial tick stream into a smoothed playhead, fans that playhead
//! out to video, lighting and audio in lock step, and sequences the stage
//! subsystems whenever the installation switches between idle and active.

pub mod animation;
pub mod config;
pub mod control;
pub mod encoder;
pub mod error;
pub mod mode;
pub mod output;

pub use animation::{
    AnimationComposition, AnimationFormat, AnimationFrameStore, AnimationKey, AnimationParameters,
    FormatRegistry,
};
pub use config::{IdleStyle, StageConfig};
pub use control::{ControlLoop, FixedStep, StepReport};
pub use encoder::{
    EncoderPlayheadTracker, EncoderSample, PlayheadState, RawSample, SampleSlot, SerialReader,
    TrackerTick,
};
pub use error::{Result, StageError};
pub use mode::{Collaborators, ContentMode, ModeChange, ModeStateMachine, OperatingMode, PhaseSignal};
pub use output::{AppliedFrame, AudioSink, Curve, LightingSink, SynchronizedOutputDriver, VideoSink};
