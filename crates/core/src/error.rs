use crate::{EventId, PlaybackState};

/// Result alias that carries the custom [`ShowlineError`] type.
pub type Result<T> = std::result::Result<T, ShowlineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ShowlineError {
    /// A required key is absent from a JSON object.
    #[error("the key `{key}` is missing")]
    SchemaKeyMissing { key: String },
    /// A JSON value has the wrong type for its key.
    #[error("the value for the key `{key}` has a wrong type: expected {expected}, found {actual}")]
    SchemaTypeMismatch {
        key: String,
        expected: String,
        actual: &'static str,
    },
    #[error("unknown control mode `{0}`")]
    UnknownControlMode(String),
    #[error("invalid control parameter: {0}")]
    InvalidControlParameter(String),
    #[error("event time must be a finite, non-negative number of seconds (got {0})")]
    InvalidEventTime(f64),
    /// Holds the port exactly as written in the document.
    #[error("listening port {0} is outside the range 0..=65535")]
    InvalidPort(String),
    /// An event was triggered before any sink was attached to it.
    #[error("no network sink configured for the event")]
    NoSinkConfigured,
    #[error("the timeline is already running")]
    AlreadyRunning,
    /// A playback command that is not valid in the current state.
    #[error("cannot {action} while the timeline is {state}")]
    InvalidTransition {
        action: &'static str,
        state: PlaybackState,
    },
    #[error("no event with id {0}")]
    NotFound(EventId),
    /// Failure reported by the network sink. Opaque to the scheduler.
    #[error("transport error: {0}")]
    Transport(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl ShowlineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// True for the errors raised while checking a document against the schema
    /// or while constructing controls and events from it.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::SchemaKeyMissing { .. }
                | Self::SchemaTypeMismatch { .. }
                | Self::UnknownControlMode(_)
                | Self::InvalidControlParameter(_)
                | Self::InvalidEventTime(_)
                | Self::InvalidPort(_)
        )
    }
}

impl From<&str> for ShowlineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ShowlineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
