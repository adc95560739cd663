// SPDX-License-Identifier: MPL-2.0
//! Frame source port definition.
//!
//! This module defines the [`FrameSource`] trait for pulling decoded frames.
//! Infrastructure adapters (like `FFmpeg`) implement this trait.
//!
//! # Design Notes
//!
//! - The source is **stateful** and pull-based: one frame per call
//! - Stream metadata may be incomplete right after `open()` and fill in later,
//!   so it is exposed as a snapshot rather than returned by `open()`
//! - Frames are returned owned; the source never sees them again

use crate::media::{Frame, PixelFormat};
use std::path::Path;
use thiserror::Error;

/// Errors raised by a frame source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The media could not be opened (missing file, unsupported container).
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Demuxing or decoding failed mid-stream.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The source was used before `open()` or after `close()`.
    #[error("frame source is not open")]
    NotOpen,
}

/// Snapshot of the stream properties currently known to the source.
///
/// Zero means "not known yet" for every numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate_hz: f64,
    pub audio_channels: u16,
    pub audio_sample_rate_hz: u32,
    pub has_video: bool,
    pub has_audio: bool,
}

impl SourceMetadata {
    /// Video side is usable, or there is no video to wait for.
    #[must_use]
    pub fn video_ready(&self) -> bool {
        !self.has_video || (self.width > 0 && self.height > 0 && self.frame_rate_hz > 0.0)
    }

    /// Audio side is usable, or there is no audio to wait for.
    #[must_use]
    pub fn audio_ready(&self) -> bool {
        !self.has_audio || self.has_audio_params()
    }

    /// Returns true if both channel count and sample rate are known.
    #[must_use]
    pub fn has_audio_params(&self) -> bool {
        self.audio_channels > 0 && self.audio_sample_rate_hz > 0
    }

    /// Both sides are usable.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.video_ready() && self.audio_ready()
    }
}

// =============================================================================
// FrameSource Trait
// =============================================================================

/// Port for a pull-based demuxer/decoder.
///
/// # Thread Safety
///
/// Implementations must be `Send`: the source is created on the caller's
/// thread and moved to the playback loop thread, which is its only user.
///
/// # Lifecycle
///
/// 1. Call `open()` once
/// 2. Poll `current_metadata()` until it is complete (or give up)
/// 3. Call `grab_next_frame()` until it returns `Ok(None)`
/// 4. Call `close()`; calling it twice must be harmless
pub trait FrameSource: Send {
    /// Opens the media at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] if the media cannot be opened.
    fn open(&mut self, path: &Path) -> Result<(), SourceError>;

    /// Pulls the next decoded frame. Blocks on I/O and decoding.
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if demuxing or decoding fails.
    fn grab_next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Returns the stream properties known right now.
    fn current_metadata(&self) -> SourceMetadata;

    /// Releases the underlying decoder.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that the trait is object-safe
    fn _assert_object_safe(_: &dyn FrameSource) {}

    #[test]
    fn empty_metadata_without_streams_is_complete() {
        let meta = SourceMetadata::default();
        assert!(meta.video_ready());
        assert!(meta.audio_ready());
    }

    #[test]
    fn video_requires_frame_rate() {
        let meta = SourceMetadata {
            width: 640,
            height: 480,
            has_video: true,
            ..SourceMetadata::default()
        };
        assert!(!meta.video_ready());

        let meta = SourceMetadata {
            frame_rate_hz: 25.0,
            ..meta
        };
        assert!(meta.video_ready());
    }

    #[test]
    fn audio_requires_channels_and_rate() {
        let meta = SourceMetadata {
            has_audio: true,
            audio_channels: 2,
            ..SourceMetadata::default()
        };
        assert!(!meta.audio_ready());
        assert!(!meta.is_complete());

        let meta = SourceMetadata {
            audio_sample_rate_hz: 44_100,
            ..meta
        };
        assert!(meta.audio_ready());
        assert!(meta.is_complete());
    }

    #[test]
    fn open_error_names_the_path() {
        let err = SourceError::Open {
            path: "/tmp/missing.mp4".into(),
            reason: "No such file".into(),
        };
        assert_eq!(err.to_string(), "cannot open /tmp/missing.mp4: No such file");
    }
}
