//! Error type shared by every layer of the crate.
//!
//! An [`Error`] is either *critical* (corrupt local state, a broken contract,
//! a state that should be impossible) or *non-critical* (an expected
//! operational failure the caller may retry later). Each layer that passes an
//! error upward may [`Error::wrap`] it with a short message; the origin of
//! every frame is recorded from the caller's source location.

use std::{fmt, panic::Location};

use crate::{core::datastore::GetError, persist::PersistError};

/// One frame of an error's context stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What went wrong at this layer.
    pub message: String,
    /// Source file that produced the frame.
    pub file: &'static str,
    /// Source line that produced the frame.
    pub line: u32,
}

impl Frame {
    #[track_caller]
    fn here(message: impl Into<String>) -> Self {
        let loc = Location::caller();
        Self {
            message: message.into(),
            file: loc.file(),
            line: loc.line(),
        }
    }
}

/// Error with a criticality flag and an accumulated context stack.
///
/// Frames are stored innermost first; [`fmt::Display`] renders them
/// outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    critical: bool,
    frames: Vec<Frame>,
}

impl Error {
    /// A failure the caller cannot recover from without intervention.
    #[track_caller]
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            critical: true,
            frames: vec![Frame::here(message)],
        }
    }

    /// An expected failure; retrying later may succeed.
    #[track_caller]
    pub fn noncritical(message: impl Into<String>) -> Self {
        Self {
            critical: false,
            frames: vec![Frame::here(message)],
        }
    }

    /// Adds a context frame. Criticality is unchanged.
    #[track_caller]
    pub fn wrap(mut self, message: impl Into<String>) -> Self {
        self.frames.push(Frame::here(message));
        self
    }

    /// Whether this error is critical.
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Context frames, innermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The message of the innermost frame.
    pub fn root_message(&self) -> &str {
        self.frames.first().map(|f| f.message.as_str()).unwrap_or("")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, frame) in self.frames.iter().rev().enumerate() {
            if idx > 0 {
                f.write_str(": ")?;
            }
            write!(f, "{} ({}:{})", frame.message, frame.file, frame.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<PersistError> for Error {
    #[track_caller]
    fn from(value: PersistError) -> Self {
        Self::critical(value.to_string())
    }
}

impl From<GetError> for Error {
    #[track_caller]
    fn from(value: GetError) -> Self {
        Self::critical(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(value: serde_json::Error) -> Self {
        Self::critical(format!("json: {value}"))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Adds context to any result whose error converts into [`Error`].
pub trait ResultExt<T> {
    /// Wraps the error, if any, with `message`.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    #[track_caller]
    fn context(self, message: impl Into<String>) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(Error::from(err).wrap(message)),
        }
    }
}
