// SPDX-License-Identifier: MPL-2.0
//! Error types for the playback engine.
//!
//! [`PlaybackError`] is the taxonomy surfaced to event listeners, while
//! [`Error`] is the crate-level error returned by fallible APIs such as
//! configuration loading and [`Player::start`](crate::Player::start).

use thiserror::Error;

/// Crate-level error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Playback Error: {0}")]
    Playback(#[from] PlaybackError),
}

/// Failure causes of a playback session.
///
/// Every variant except [`PlaybackError::Cancelled`] may be delivered to the
/// event listener; see [`PlaybackError::is_fatal`] for which ones end the
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The frame source could not be opened. The loop never starts.
    #[error("failed to open media source: {0}")]
    OpenFailure(String),

    /// Neither the source nor any grabbed frame produced usable metadata.
    #[error("no usable stream metadata: {0}")]
    MetadataTimeout(String),

    /// No supported audio sink format. Video-only playback continues.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),

    /// Writing PCM data to an open sink failed.
    #[error("audio write failed: {0}")]
    AudioWriteFailed(String),

    /// The frame source failed mid-stream.
    #[error("failed to grab frame: {0}")]
    GrabError(String),

    /// Cooperative stop. Never surfaced as an error event.
    #[error("playback cancelled")]
    Cancelled,
}

impl PlaybackError {
    /// Returns true if this error ends the playback session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OpenFailure(_) | Self::MetadataTimeout(_) | Self::GrabError(_)
        )
    }

    /// Returns true if this error should be reported to the event listener.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
