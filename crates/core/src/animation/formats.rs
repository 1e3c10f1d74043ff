//! On-disk animation encodings and the extension registry that selects them.
//!
//! Two encodings describe the same logical timeline differently. The `chan`
//! text format carries a leading frame-index column on every line, which is
//! dropped when the key is built. The structured `json` format stores records
//! that are already frame shaped and are taken as-is.

use std::{
    collections::HashMap,
    io::{BufRead, Lines},
    path::Path,
};

use serde::Deserialize;

use crate::{AnimationKey, Result};

/// Lazy, finite, single-pass sequence of frames read from an open source.
pub type FrameStream<'a> = Box<dyn Iterator<Item = AnimationKey> + 'a>;

/// Constructor stored in the [`FormatRegistry`].
pub type FormatCtor = fn() -> Box<dyn AnimationFormat>;

/// Output of [`AnimationFormat::parse`].
pub struct ParsedAnimation<'a> {
    pub frames: FrameStream<'a>,
    /// Frame rate declared inside the file, when the encoding has one.
    pub frame_rate: Option<f32>,
}

/// A file encoding that can turn an open text source into frames.
pub trait AnimationFormat: Send + Sync {
    /// File extension, without the leading dot, that selects this format.
    fn extension(&self) -> &'static str;

    fn parse<'a>(&self, source: Box<dyn BufRead + 'a>) -> Result<ParsedAnimation<'a>>;
}

/// Line oriented numeric text, one frame per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChanFormat;

impl AnimationFormat for ChanFormat {
    fn extension(&self) -> &'static str {
        "chan"
    }

    fn parse<'a>(&self, source: Box<dyn BufRead + 'a>) -> Result<ParsedAnimation<'a>> {
        Ok(ParsedAnimation {
            frames: Box::new(ChanFrames {
                lines: source.lines(),
                finished: false,
            }),
            frame_rate: None,
        })
    }
}

struct ChanFrames<'a> {
    lines: Lines<Box<dyn BufRead + 'a>>,
    finished: bool,
}

impl ChanFrames<'_> {
    fn next_data_line(&mut self) -> Option<String> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(%err, "failed to read animation line");
                    return None;
                }
            };

            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                return None;
            }
            return Some(line.to_string());
        }
    }
}

impl Iterator for ChanFrames<'_> {
    type Item = AnimationKey;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let key = self.next_data_line().and_then(|line| match parse_record(&line) {
            Ok(record) => Some(AnimationKey::from_record(&record)),
            Err(err) => {
                tracing::warn!(line = %line, %err, "malformed animation line, stopping");
                None
            }
        });

        if key.is_none() {
            self.finished = true;
        }
        key
    }
}

/// Tokenises one data line, flooring each value into a byte.
fn parse_record(line: &str) -> std::result::Result<Vec<u8>, std::num::ParseFloatError> {
    line.split_whitespace()
        .map(|token| token.parse::<f32>().map(|value| value.floor() as u8))
        .collect()
}

/// Structured JSON with a frame rate and an array of frame records.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormat;

#[derive(Debug, Deserialize)]
struct JsonAnimation {
    #[serde(rename = "FrameRate", alias = "frameRate", alias = "frame_rate", default)]
    frame_rate: Option<f32>,
    #[serde(rename = "Data", alias = "data")]
    data: Vec<JsonRecord>,
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(alias = "Data")]
    data: Vec<u8>,
}

impl AnimationFormat for JsonFormat {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn parse<'a>(&self, source: Box<dyn BufRead + 'a>) -> Result<ParsedAnimation<'a>> {
        let animation: JsonAnimation = serde_json::from_reader(source)?;
        Ok(ParsedAnimation {
            frames: Box::new(
                animation
                    .data
                    .into_iter()
                    .map(|record| AnimationKey::from_frame(record.data)),
            ),
            frame_rate: animation.frame_rate,
        })
    }
}

fn chan_format() -> Box<dyn AnimationFormat> {
    Box::new(ChanFormat)
}

fn json_format() -> Box<dyn AnimationFormat> {
    Box::new(JsonFormat)
}

const BUILTIN_FORMATS: &[FormatCtor] = &[chan_format, json_format];

/// Maps file extensions to the format that parses them.
#[derive(Default)]
pub struct FormatRegistry {
    formats: HashMap<&'static str, FormatCtor>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every format shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for ctor in BUILTIN_FORMATS {
            registry.register(*ctor);
        }
        registry
    }

    /// Registers a format under the extension it declares, replacing any
    /// earlier binding for that extension.
    pub fn register(&mut self, ctor: FormatCtor) {
        let extension = ctor().extension();
        self.formats.insert(extension, ctor);
    }

    pub fn for_extension(&self, extension: &str) -> Option<Box<dyn AnimationFormat>> {
        self.formats.get(extension).map(|ctor| ctor())
    }

    pub fn for_path(&self, path: &Path) -> Option<Box<dyn AnimationFormat>> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.for_extension(ext))
    }

    pub fn extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<_> = self.formats.keys().copied().collect();
        extensions.sort_unstable();
        extensions
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn chan(text: &str) -> Vec<AnimationKey> {
        let source: Box<dyn BufRead> = Box::new(Cursor::new(text.to_string()));
        ChanFormat.parse(source).unwrap().frames.collect()
    }

    #[test]
    fn chan_drops_index_column_and_floors_values() {
        let frames = chan("0 10.9 20 30\n1\t11 21.2 31\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channels(), &[10, 20, 30]);
        assert_eq!(frames[1].channels(), &[11, 21, 31]);
    }

    #[test]
    fn chan_skips_comments_and_stops_at_blank_line() {
        let frames = chan("# header\n0 1 2\n# mid comment\n1 3 4\n\n2 5 6\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].channels(), &[3, 4]);
    }

    #[test]
    fn chan_malformed_line_ends_the_sequence() {
        let frames = chan("0 1 2\n1 x 3\n2 4 5\n");

        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn chan_caps_channels_at_one_hundred() {
        let line: Vec<String> = (0..150).map(|v| v.to_string()).collect();
        let frames = chan(&format!("{}\n", line.join(" ")));

        assert_eq!(frames[0].len(), 100);
        assert_eq!(frames[0].channels()[0], 1);
    }

    #[test]
    fn chan_saturates_out_of_range_values() {
        let frames = chan("0 300 -4 255.99\r\n");

        assert_eq!(frames[0].channels(), &[255, 0, 255]);
    }

    #[test]
    fn json_keeps_records_untrimmed() {
        let source: Box<dyn BufRead> = Box::new(Cursor::new(
            r#"{ "FrameRate": 30, "Data": [ { "data": [1, 2, 3] }, { "data": [4, 5, 6] } ] }"#,
        ));
        let parsed = JsonFormat.parse(source).unwrap();

        assert_eq!(parsed.frame_rate, Some(30.0));
        let frames: Vec<_> = parsed.frames.collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channels(), &[1, 2, 3]);
        assert_eq!(frames[1].channels(), &[4, 5, 6]);
    }

    #[test]
    fn json_rejects_garbage() {
        let source: Box<dyn BufRead> = Box::new(Cursor::new("not json"));
        assert!(JsonFormat.parse(source).is_err());
    }

    #[test]
    fn builtin_registry_selects_by_extension() {
        let registry = FormatRegistry::builtin();

        assert_eq!(registry.extensions(), vec!["chan", "json"]);
        assert!(registry.for_path(Path::new("a/b/show.chan")).is_some());
        assert!(registry.for_path(Path::new("show.json")).is_some());
        assert!(registry.for_path(Path::new("show.txt")).is_none());
        assert!(registry.for_path(Path::new("show")).is_none());
    }
}
