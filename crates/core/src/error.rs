/// Result alias that carries the custom [`PilotError`] type.
pub type Result<T> = std::result::Result<T, PilotError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    /// Free-form failure that does not belong to a more specific category.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// A timeline line could not be understood. `line` is 1-based.
    #[error("parse error on line {line} (`{content}`): {reason}")]
    Parse {
        line: usize,
        content: String,
        reason: String,
    },
    /// Unusable configuration or an unreadable timeline file. Fatal before the
    /// first tick.
    #[error("configuration error: {0}")]
    Config(String),
    /// The external detector failed for one frame. Recoverable.
    #[error("detector unavailable: {0}")]
    Detector(String),
}

impl PilotError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn parse(line: usize, content: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            content: content.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true when the error only affects the current tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Detector(_))
    }
}

impl From<&str> for PilotError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PilotError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
