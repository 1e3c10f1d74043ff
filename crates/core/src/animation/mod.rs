pub mod formats;

use std::{
    collections::HashMap,
    ffi::OsString,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{Result, StageError};

pub use formats::{AnimationFormat, ChanFormat, FormatRegistry, JsonFormat, ParsedAnimation};

/// Most channel values one frame can carry.
pub const MAX_CHANNELS_PER_KEY: usize = 100;

const DEFAULT_FRAME_RATE: f32 = 60.0;

/// One lighting frame: a channel byte per lighting output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationKey {
    data: Box<[u8]>,
}

impl AnimationKey {
    /// Builds a key from a record whose first field is a frame index rather
    /// than channel data. The index is dropped and the remainder capped at
    /// [`MAX_CHANNELS_PER_KEY`].
    pub fn from_record(record: &[u8]) -> Self {
        let data = record
            .iter()
            .skip(1)
            .take(MAX_CHANNELS_PER_KEY)
            .copied()
            .collect();
        Self { data }
    }

    /// Builds a key from channel data that is already frame shaped.
    pub fn from_frame(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    pub fn channels(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Playback metadata stored next to an animation as `<file>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationParameters {
    #[serde(rename = "FrameRate", alias = "frame_rate")]
    pub frame_rate: f32,
    /// Offset applied to every frame lookup, in frames.
    #[serde(rename = "ShiftFrames", alias = "shift_frames")]
    pub shift_frames: i32,
}

impl Default for AnimationParameters {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            shift_frames: 0,
        }
    }
}

/// A fully loaded animation. Always holds at least one frame.
#[derive(Debug, Clone)]
pub struct AnimationComposition {
    source_path: PathBuf,
    frames: Vec<AnimationKey>,
    parameters: AnimationParameters,
}

impl AnimationComposition {
    /// Wraps loaded frames, refusing an empty sequence.
    pub fn new(
        source_path: impl Into<PathBuf>,
        frames: Vec<AnimationKey>,
        parameters: AnimationParameters,
    ) -> Result<Self> {
        let source_path = source_path.into();
        if frames.is_empty() {
            return Err(StageError::EmptyComposition(source_path));
        }
        Ok(Self {
            source_path,
            frames,
            parameters,
        })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn frames(&self) -> &[AnimationKey] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn parameters(&self) -> &AnimationParameters {
        &self.parameters
    }

    /// Index of the frame shown at `fraction` of the timeline, after the
    /// configured frame shift.
    pub fn index_at(&self, fraction: f64) -> usize {
        let last = (self.frames.len() - 1) as f64;
        let base = (fraction.clamp(0.0, 1.0) * last).round() as i64;
        let shifted = base + i64::from(self.parameters.shift_frames);
        shifted.rem_euclid(self.frames.len() as i64) as usize
    }

    pub fn frame_at(&self, fraction: f64) -> &AnimationKey {
        &self.frames[self.index_at(fraction)]
    }
}

/// Loads animations through the format registry and keeps the preloaded ones
/// keyed by resolved path.
#[derive(Debug)]
pub struct AnimationFrameStore {
    root: PathBuf,
    registry: FormatRegistry,
    preloaded: HashMap<PathBuf, Arc<AnimationComposition>>,
}

impl AnimationFrameStore {
    pub fn new(root: impl Into<PathBuf>, registry: FormatRegistry) -> Self {
        Self {
            root: root.into(),
            registry,
            preloaded: HashMap::new(),
        }
    }

    /// Store backed by every built-in format.
    pub fn with_builtin_formats(root: impl Into<PathBuf>) -> Self {
        Self::new(root, FormatRegistry::builtin())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of an animation name under the animation root.
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns the cached composition for `path` or reads it from disk.
    /// Failures are logged and reported as `None`; reads never populate the
    /// preload cache.
    pub fn load(&self, path: impl AsRef<Path>) -> Option<Arc<AnimationComposition>> {
        let path = path.as_ref();
        if let Some(cached) = self.preloaded.get(path) {
            return Some(cached.clone());
        }

        match self.read(path) {
            Ok(composition) => Some(Arc::new(composition)),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "animation not loaded");
                None
            }
        }
    }

    /// Reads and parses an animation, bypassing the cache.
    pub fn read(&self, path: &Path) -> Result<AnimationComposition> {
        let format = self.registry.for_path(path).ok_or_else(|| {
            StageError::UnsupportedFormat(
                path.extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        })?;

        if !path.is_file() {
            return Err(StageError::NotFound(path.to_path_buf()));
        }

        let file = File::open(path)?;
        let parsed = format.parse(Box::new(BufReader::new(file)))?;
        let parameters = load_parameters(path, parsed.frame_rate);
        let frames: Vec<AnimationKey> = parsed.frames.collect();
        let composition = AnimationComposition::new(path, frames, parameters)?;

        tracing::info!(
            path = %path.display(),
            frames = composition.frame_count(),
            "animation loaded"
        );
        Ok(composition)
    }

    /// Replaces the preload cache with the animations named in `names`,
    /// resolved under the animation root. Names that fail to load are
    /// skipped. Returns how many were cached.
    pub fn preload<S: AsRef<str>>(&mut self, names: &[S]) -> usize {
        let mut preloaded = HashMap::with_capacity(names.len());
        for name in names {
            let path = self.resolve(name.as_ref());
            match self.read(&path) {
                Ok(composition) => {
                    preloaded.insert(path, Arc::new(composition));
                }
                Err(err) => {
                    tracing::debug!(path = %path.display(), %err, "skipping preload");
                }
            }
        }

        self.preloaded = preloaded;
        self.preloaded.len()
    }

    /// Every composition currently held by the preload cache.
    pub fn loaded(&self) -> impl Iterator<Item = &Arc<AnimationComposition>> {
        self.preloaded.values()
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut sidecar = OsString::from(path.as_os_str());
    sidecar.push(".json");
    PathBuf::from(sidecar)
}

fn load_parameters(path: &Path, declared_frame_rate: Option<f32>) -> AnimationParameters {
    let sidecar = sidecar_path(path);
    if !sidecar.is_file() {
        return AnimationParameters {
            frame_rate: declared_frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
            ..Default::default()
        };
    }

    let parsed = std::fs::read_to_string(&sidecar)
        .map_err(StageError::from)
        .and_then(|text| serde_json::from_str(&text).map_err(StageError::from));

    match parsed {
        Ok(parameters) => parameters,
        Err(err) => {
            tracing::warn!(path = %sidecar.display(), %err, "ignoring animation parameters");
            AnimationParameters::default()
        }
    }
}
