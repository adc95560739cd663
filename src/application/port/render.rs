// SPDX-License-Identifier: MPL-2.0
//! Consumer-facing ports: video rendering, player events and custom audio
//! handling.
//!
//! Closures implement [`VideoRenderer`] and [`PlayerEventListener`], which
//! keeps simple front-ends short:
//!
//! ```ignore
//! let player = Player::builder()
//!     .source_factory(|| Box::new(MySource::new()))
//!     .renderer(|image: &ImagePayload, ts: i64| upload(image, ts))
//!     .listener(|event: PlayerEvent| println!("{event:?}"))
//!     .build()?;
//! ```

use crate::error::PlaybackError;
use crate::media::{AudioPayload, ImagePayload, PixelFormat};
use crate::player::audio_output::AudioOutputManager;

/// Notification emitted by a playback session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Video parameters became known. At most once per session.
    VideoDimensionsDetected {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        frame_rate_hz: f64,
    },
    /// Streaming began. At most once per session.
    PlaybackStarted,
    /// The source ran out of frames. Terminal; not sent if an error ended
    /// the session.
    EndOfMedia,
    /// A failure, reported once per cause kind.
    Error {
        message: String,
        cause: PlaybackError,
    },
}

impl PlayerEvent {
    /// Builds an error event from its cause.
    #[must_use]
    pub fn error(cause: PlaybackError) -> Self {
        Self::Error {
            message: cause.to_string(),
            cause,
        }
    }
}

/// Receives decoded video frames on the video worker thread.
///
/// Implementations must return quickly; a slow renderer stalls the single
/// video worker and delays every subsequent frame.
pub trait VideoRenderer: Send + Sync {
    fn on_video_frame(&self, image: &ImagePayload, relative_timestamp_micros: i64);
}

impl<F> VideoRenderer for F
where
    F: Fn(&ImagePayload, i64) + Send + Sync,
{
    fn on_video_frame(&self, image: &ImagePayload, relative_timestamp_micros: i64) {
        self(image, relative_timestamp_micros);
    }
}

/// Receives [`PlayerEvent`]s. Called from the loop and worker threads.
pub trait PlayerEventListener: Send + Sync {
    fn on_event(&self, event: PlayerEvent);
}

impl<F> PlayerEventListener for F
where
    F: Fn(PlayerEvent) + Send + Sync,
{
    fn on_event(&self, event: PlayerEvent) {
        self(event);
    }
}

/// Replaces the built-in PCM write for every audio frame.
///
/// The handler runs on the audio worker and receives the session's audio
/// output, so it may still write through it (after mixing, say) or ignore it.
pub trait AudioDataHandler: Send + Sync {
    /// # Errors
    ///
    /// An error is logged and reported as a playback error event; the audio
    /// worker keeps running.
    fn on_audio_data(
        &self,
        audio: &AudioPayload,
        output: &AudioOutputManager,
    ) -> Result<(), PlaybackError>;
}
