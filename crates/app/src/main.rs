use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use stagesync_core::{
    mode::{Ambient, ContentMode, Curtain, Effects, Interaction, Lighting, Overlay, Playback, Sound},
    AnimationFrameStore, AudioSink, Collaborators, ControlLoop, EncoderPlayheadTracker,
    LightingSink, ModeStateMachine, PhaseSignal, SampleSlot, SerialReader, StageConfig,
    SynchronizedOutputDriver, VideoSink,
};
use tracing_subscriber::EnvFilter;

fn main() -> stagesync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            duration,
            activate,
        } => run(config.as_deref(), &input, duration, activate),
        Commands::Inspect { animation } => inspect(&animation),
    }
}

fn run(
    config_path: Option<&Path>,
    input: &str,
    duration: f64,
    activate: bool,
) -> stagesync_core::Result<()> {
    let config = match config_path {
        Some(path) => StageConfig::load(path)?,
        None => StageConfig::default(),
    };
    tracing::info!(?config_path, input, "starting controller");

    let mut store = AnimationFrameStore::with_builtin_formats(&config.content.animation_root);
    let preloaded = store.preload(&config.content.preload);
    for composition in store.loaded() {
        tracing::info!(path = %composition.source_path().display(), "preloaded");
    }
    tracing::debug!(preloaded, "preload finished");

    let composition = std::iter::once(config.content.active_animation.as_str())
        .chain(config.content.idle_animation.as_deref())
        .find_map(|name| store.load(store.resolve(name)));
    if composition.is_none() {
        tracing::warn!("no animation available, lighting output disabled");
    }

    let slot = SampleSlot::new();
    let reader = SerialReader::spawn(open_input(input)?, slot.clone())?;

    let tracker = EncoderPlayheadTracker::new(config.encoder.clone());
    let mut driver = SynchronizedOutputDriver::new(
        config.output.clone(),
        Box::new(LoggedVideo::new(duration)),
        Box::new(LoggedLighting),
        Box::new(LoggedAudio),
    );
    driver.set_composition(composition);

    let start = Instant::now();
    let modes = ModeStateMachine::new(config.mode.clone(), stage_collaborators(), start);
    let mut control = ControlLoop::new(tracker, driver, modes, slot, config.control.fixed_step);
    if activate {
        control.modes_mut().notify_activation_trigger(start);
    }

    let period = Duration::from_secs_f64(config.control.fixed_step);
    let mut last = start;
    while !reader.is_finished() {
        std::thread::sleep(period);
        let now = Instant::now();
        for report in control.run_frame(now, (now - last).as_secs_f64()) {
            if let Some(frame) = report.frame {
                tracing::debug!(
                    time = frame.wrapped_time,
                    frame = ?frame.frame_index,
                    volume = frame.volume,
                    pitch = frame.pitch,
                    "tick"
                );
            }
        }
        last = now;
    }

    // Drain the last line the reader published before it exited.
    let now = Instant::now();
    control.step(now, config.control.fixed_step);

    let lines = reader.join()?;
    tracing::info!(lines, mode = ?control.modes().mode(), "input finished");
    Ok(())
}

fn inspect(animation: &Path) -> stagesync_core::Result<()> {
    let root = animation.parent().unwrap_or_else(|| Path::new("."));
    let store = AnimationFrameStore::with_builtin_formats(root);
    let composition = store.read(animation)?;

    let widths: Vec<usize> = composition.frames().iter().map(|key| key.len()).collect();
    let min = widths.iter().copied().min().unwrap_or(0);
    let max = widths.iter().copied().max().unwrap_or(0);
    let parameters = composition.parameters();

    println!("{}", composition.source_path().display());
    println!("  frames:       {}", composition.frame_count());
    println!("  channels:     {min}..={max}");
    println!("  frame rate:   {}", parameters.frame_rate);
    println!("  shift frames: {}", parameters.shift_frames);
    Ok(())
}

fn open_input(input: &str) -> stagesync_core::Result<Box<dyn BufRead + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(std::io::stdin())));
    }
    let file = File::open(input)?;
    Ok(Box::new(BufReader::new(file)))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Encoder-driven installation controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the show from an encoder sample stream.
    Run {
        /// JSON configuration file; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Pre-configured serial device, capture file, or `-` for stdin.
        #[arg(short, long, default_value = "-")]
        input: String,
        /// Length of the scrubbed video, in seconds.
        #[arg(short, long, default_value_t = 60.0)]
        duration: f64,
        /// Fire the activation trigger as soon as the loop starts.
        #[arg(long)]
        activate: bool,
    },
    /// Load one animation file and print what it contains.
    Inspect {
        /// Path to a `.chan` or `.json` animation.
        animation: PathBuf,
    },
}

struct LoggedVideo {
    duration: f64,
}

impl LoggedVideo {
    fn new(duration: f64) -> Self {
        Self { duration }
    }
}

impl VideoSink for LoggedVideo {
    fn duration_seconds(&self) -> f64 {
        self.duration
    }

    fn seek_to_time(&mut self, seconds: f64) {
        tracing::trace!(seconds, "video seek");
    }
}

struct LoggedLighting;

impl LightingSink for LoggedLighting {
    fn set_channel_value(&mut self, channel: usize, value: u8) {
        tracing::trace!(channel, value, "lighting");
    }
}

struct LoggedAudio;

impl AudioSink for LoggedAudio {
    fn set_pitch(&mut self, pitch: f32) {
        tracing::trace!(pitch, "audio pitch");
    }

    fn set_volume(&mut self, volume: f32) {
        tracing::trace!(volume, "audio volume");
    }

    fn restart_loop(&mut self) {
        tracing::debug!("loop sound restarted");
    }
}

/// Stand-in for the stage hardware: logs each command and finishes motions
/// immediately.
struct LoggedStage;

impl Curtain for LoggedStage {
    fn close(&mut self, done: PhaseSignal) {
        tracing::info!("curtain closing");
        done.complete();
    }

    fn open(&mut self, done: PhaseSignal) {
        tracing::info!("curtain opening");
        done.complete();
    }

    fn reset(&mut self) {
        tracing::info!("curtain reset");
    }
}

impl Overlay for LoggedStage {
    fn fade_in(&mut self, done: PhaseSignal) {
        tracing::info!("overlay fading in");
        done.complete();
    }

    fn reset(&mut self) {
        tracing::info!("overlay reset");
    }
}

impl Lighting for LoggedStage {
    fn fade_out(&mut self) {
        tracing::info!("leds fading out");
    }

    fn fade_in(&mut self) {
        tracing::info!("leds fading in");
    }
}

impl Ambient for LoggedStage {
    fn fade_out(&mut self, duration: Duration) {
        tracing::info!(?duration, "ambient fading out");
    }
}

impl Sound for LoggedStage {
    fn reset_curve(&mut self) {
        tracing::info!("sound curve reset");
    }

    fn fade_in(&mut self, duration: Duration) {
        tracing::info!(?duration, "sound fading in");
    }

    fn fade_out(&mut self, duration: Duration) {
        tracing::info!(?duration, "sound fading out");
    }

    fn stop(&mut self) {
        tracing::info!("sound stopped");
    }
}

impl Effects for LoggedStage {
    fn speed_synth_channels(&self) -> Vec<usize> {
        Vec::new()
    }

    fn trigger_one_shot(&mut self, channel: usize) {
        tracing::info!(channel, "one-shot triggered");
    }

    fn reset_one_shots(&mut self, channel: usize) {
        tracing::info!(channel, "one-shots reset");
    }
}

impl Playback for LoggedStage {
    fn switch_content(&mut self, content: ContentMode) {
        tracing::info!(?content, "switching content");
    }
}

impl Interaction for LoggedStage {
    fn set_activation_trigger(&mut self, enabled: bool) {
        tracing::info!(enabled, "activation trigger");
    }

    fn set_interactive_control(&mut self, enabled: bool) {
        tracing::info!(enabled, "interactive control");
    }
}

fn stage_collaborators() -> Collaborators {
    Collaborators::new()
        .with_curtain(LoggedStage)
        .with_overlay(LoggedStage)
        .with_lighting(LoggedStage)
        .with_ambient(LoggedStage)
        .with_sound(LoggedStage)
        .with_effects(LoggedStage)
        .with_playback(LoggedStage)
        .with_interaction(LoggedStage)
}
