use std::path::PathBuf;

/// Result alias that carries the custom [`StageError`] type.
pub type Result<T> = std::result::Result<T, StageError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Free-form failure that has no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration, sidecar or structured animation JSON failed to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A value handed to the core is outside of its accepted range.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A serial payload that could not be decoded into an encoder sample.
    #[error("malformed sample `{line}`: {reason}")]
    MalformedSample { line: String, reason: String },
    /// No animation format is registered for the extension.
    #[error("no animation format registered for `{0}`")]
    UnsupportedFormat(String),
    /// The requested file does not exist.
    #[error("`{}` does not exist", .0.display())]
    NotFound(PathBuf),
    /// The file parsed but produced no frames.
    #[error("`{}` contains no frames", .0.display())]
    EmptyComposition(PathBuf),
}

impl StageError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedSample {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for StageError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StageError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
