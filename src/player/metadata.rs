// SPDX-License-Identifier: MPL-2.0
//! Stream metadata discovery.
//!
//! Some decoders fill in stream properties lazily, so metadata is resolved in
//! two tiers:
//!
//! 1. [`MetadataResolver`] polls the source snapshot right after `open()`,
//!    with jittered exponential backoff inside a fixed budget. Running out of
//!    budget is not an error.
//! 2. The scheduler then finalizes whatever is still missing from the frames
//!    themselves, through [`StreamMetadata`]. Only when neither tier produces
//!    usable values does the session fail with `MetadataTimeout`.

use crate::application::port::{FrameSource, SourceMetadata};
use crate::config::MetadataConfig;
use crate::media::{AudioPayload, ImagePayload, PixelFormat};
use crate::player::cancel::CancelToken;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of the polling phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The snapshot satisfied both the video and audio predicates.
    Resolved(SourceMetadata),
    /// Budget exhausted; frame-level finalization has to fill the gaps.
    Partial(SourceMetadata),
    /// Stop was requested while polling.
    Cancelled,
}

impl Resolution {
    /// Returns the last snapshot, if polling was not cancelled.
    #[must_use]
    pub fn snapshot(&self) -> Option<SourceMetadata> {
        match self {
            Resolution::Resolved(snapshot) | Resolution::Partial(snapshot) => Some(*snapshot),
            Resolution::Cancelled => None,
        }
    }
}

/// Bounded polling of the source's stream properties.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    min_interval: Duration,
    max_interval: Duration,
    budget: Duration,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(config: &MetadataConfig) -> Self {
        Self {
            min_interval: config.poll_min_interval(),
            max_interval: config.poll_max_interval(),
            budget: config.poll_budget(),
        }
    }

    /// Polls `source` until its metadata is complete, the budget runs out or
    /// `cancel` fires. Checks once before the first wait.
    pub fn resolve<S>(&self, source: &S, cancel: &CancelToken) -> Resolution
    where
        S: FrameSource + ?Sized,
    {
        let started = Instant::now();
        let mut snapshot = source.current_metadata();
        if snapshot.is_complete() {
            debug!(?snapshot, "stream metadata available at open");
            return Resolution::Resolved(snapshot);
        }

        let mut interval = self.min_interval;
        let mut attempt: u32 = 0;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                warn!(
                    attempts = attempt,
                    video_ready = snapshot.video_ready(),
                    audio_ready = snapshot.audio_ready(),
                    "metadata polling budget exhausted, falling back to frame metadata"
                );
                return Resolution::Partial(snapshot);
            }

            let wait = self.jittered(interval).min(self.budget - elapsed);
            if !cancel.sleep(wait) {
                return Resolution::Cancelled;
            }

            attempt += 1;
            snapshot = source.current_metadata();
            if snapshot.is_complete() {
                info!(attempts = attempt, ?snapshot, "stream metadata resolved");
                return Resolution::Resolved(snapshot);
            }
            debug!(
                attempt,
                wait_ms = wait.as_millis(),
                video_ready = snapshot.video_ready(),
                audio_ready = snapshot.audio_ready(),
                "stream metadata incomplete"
            );

            interval = interval.saturating_mul(2).min(self.max_interval);
        }
    }

    /// Random wait in `[interval / 2, interval]`, never below the minimum.
    #[allow(clippy::cast_possible_truncation)]
    fn jittered(&self, interval: Duration) -> Duration {
        let high = interval.as_millis() as u64;
        let low = (high / 2)
            .max(self.min_interval.as_millis() as u64)
            .min(high);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

/// Finalized video parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate_hz: f64,
}

impl VideoParams {
    /// Builds parameters from an image frame, completing them from the source
    /// snapshot: frame pixel format if known, else the source's; source frame
    /// rate if positive, else `fallback_frame_rate`.
    #[must_use]
    pub fn from_frame(image: &ImagePayload, source: &SourceMetadata, fallback_frame_rate: f64) -> Self {
        let pixel_format = if image.pixel_format.is_known() {
            image.pixel_format
        } else {
            source.pixel_format
        };
        let frame_rate_hz = if source.frame_rate_hz > 0.0 {
            source.frame_rate_hz
        } else {
            fallback_frame_rate
        };
        Self {
            width: image.width,
            height: image.height,
            pixel_format,
            frame_rate_hz,
        }
    }
}

/// Finalized audio parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub channels: u16,
    pub sample_rate_hz: u32,
}

impl AudioParams {
    /// Source-level parameters when both are valid, else the frame's own.
    #[must_use]
    pub fn resolve(audio: &AudioPayload, source: &SourceMetadata) -> Option<Self> {
        if source.has_audio_params() {
            Some(Self {
                channels: source.audio_channels,
                sample_rate_hz: source.audio_sample_rate_hz,
            })
        } else if audio.has_valid_params() {
            Some(Self {
                channels: audio.channels,
                sample_rate_hz: audio.sample_rate_hz,
            })
        } else {
            None
        }
    }
}

/// Result of offering parameters to [`StreamMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// First value: now finalized, consumers should be notified.
    First,
    /// Matches the finalized value.
    Same,
    /// Differs from the finalized value; kept unchanged.
    Conflict,
}

/// Per-session metadata; every field is finalized at most once.
#[derive(Debug, Clone, Default)]
pub struct StreamMetadata {
    video: Option<VideoParams>,
    audio: Option<AudioParams>,
    conflict_logged: bool,
}

impl StreamMetadata {
    #[must_use]
    pub fn video(&self) -> Option<&VideoParams> {
        self.video.as_ref()
    }

    #[must_use]
    pub fn audio(&self) -> Option<&AudioParams> {
        self.audio.as_ref()
    }

    pub fn finalize_video(&mut self, params: VideoParams) -> Finalization {
        match self.video {
            None => {
                info!(
                    width = params.width,
                    height = params.height,
                    frame_rate_hz = params.frame_rate_hz,
                    "video metadata finalized"
                );
                self.video = Some(params);
                Finalization::First
            }
            Some(current) if current.width == params.width && current.height == params.height => {
                Finalization::Same
            }
            Some(current) => {
                if !self.conflict_logged {
                    self.conflict_logged = true;
                    warn!(
                        finalized_width = current.width,
                        finalized_height = current.height,
                        width = params.width,
                        height = params.height,
                        "video dimensions changed mid-stream, keeping finalized values"
                    );
                }
                Finalization::Conflict
            }
        }
    }

    pub fn finalize_audio(&mut self, params: AudioParams) -> Finalization {
        match self.audio {
            None => {
                info!(
                    channels = params.channels,
                    sample_rate_hz = params.sample_rate_hz,
                    "audio metadata finalized"
                );
                self.audio = Some(params);
                Finalization::First
            }
            Some(current) if current == params => Finalization::Same,
            Some(_) => Finalization::Conflict,
        }
    }

    /// Describes what is still missing after the frame grace period, or
    /// `None` if playback has what it needs.
    ///
    /// `audio_attempted` is true once audio setup ran, successful or not.
    #[must_use]
    pub fn unresolved_reason(&self, source: &SourceMetadata, audio_attempted: bool) -> Option<String> {
        if source.has_video && self.video.is_none() {
            return Some("video stream reported but no frame carried dimensions".into());
        }
        if source.has_audio && !audio_attempted {
            return Some("audio stream reported but channel count and sample rate never became known".into());
        }
        if self.video.is_none() && !audio_attempted {
            return Some("neither source nor frames provided stream parameters".into());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{PixelFormat, SampleBuffer};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;

    /// Source whose metadata becomes complete after `ready_after` polls.
    struct LazySource {
        polls: Mutex<u32>,
        ready_after: u32,
    }

    impl FrameSource for LazySource {
        fn open(&mut self, _path: &Path) -> Result<(), crate::application::port::SourceError> {
            Ok(())
        }

        fn grab_next_frame(
            &mut self,
        ) -> Result<Option<crate::media::Frame>, crate::application::port::SourceError> {
            Ok(None)
        }

        fn current_metadata(&self) -> SourceMetadata {
            let mut polls = self.polls.lock();
            *polls += 1;
            let ready = *polls > self.ready_after;
            SourceMetadata {
                width: if ready { 640 } else { 0 },
                height: if ready { 480 } else { 0 },
                frame_rate_hz: if ready { 25.0 } else { 0.0 },
                has_video: true,
                ..SourceMetadata::default()
            }
        }

        fn close(&mut self) {}
    }

    fn fast_config(budget_ms: u64) -> MetadataConfig {
        MetadataConfig {
            poll_min_interval_ms: 1,
            poll_max_interval_ms: 4,
            poll_budget_ms: budget_ms,
            ..MetadataConfig::default()
        }
    }

    fn image(width: u32, height: u32, pixel_format: PixelFormat) -> ImagePayload {
        ImagePayload {
            width,
            height,
            stride: width as usize * 3,
            depth_bits: 8,
            channels: 3,
            pixel_format,
            data: Arc::from(vec![0u8; 0]),
        }
    }

    #[test]
    fn complete_metadata_resolves_without_waiting() {
        let source = LazySource {
            polls: Mutex::new(0),
            ready_after: 0,
        };
        let started = Instant::now();
        let resolution = MetadataResolver::new(&fast_config(1_000)).resolve(&source, &CancelToken::new());
        assert!(matches!(resolution, Resolution::Resolved(_)));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(*source.polls.lock(), 1);
    }

    #[test]
    fn late_metadata_is_picked_up_by_polling() {
        let source = LazySource {
            polls: Mutex::new(0),
            ready_after: 3,
        };
        let resolution = MetadataResolver::new(&fast_config(2_000)).resolve(&source, &CancelToken::new());
        let snapshot = resolution.snapshot().expect("not cancelled");
        assert!(matches!(resolution, Resolution::Resolved(_)));
        assert_eq!(snapshot.width, 640);
    }

    #[test]
    fn exhausted_budget_is_partial_not_error() {
        let source = LazySource {
            polls: Mutex::new(0),
            ready_after: u32::MAX,
        };
        let started = Instant::now();
        let resolution = MetadataResolver::new(&fast_config(30)).resolve(&source, &CancelToken::new());
        assert!(matches!(resolution, Resolution::Partial(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancellation_stops_polling() {
        let source = LazySource {
            polls: Mutex::new(0),
            ready_after: u32::MAX,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let resolution = MetadataResolver::new(&fast_config(10_000)).resolve(&source, &cancel);
        assert_eq!(resolution, Resolution::Cancelled);
        assert_eq!(resolution.snapshot(), None);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let resolver = MetadataResolver::new(&MetadataConfig::default());
        for _ in 0..100 {
            let wait = resolver.jittered(Duration::from_millis(800));
            assert!(wait >= Duration::from_millis(400));
            assert!(wait <= Duration::from_millis(800));
        }
        assert_eq!(
            resolver.jittered(resolver.min_interval),
            resolver.min_interval
        );
    }

    #[test]
    fn video_params_prefer_frame_format_and_source_rate() {
        let source = SourceMetadata {
            pixel_format: PixelFormat(7),
            frame_rate_hz: 30.0,
            ..SourceMetadata::default()
        };
        let params = VideoParams::from_frame(&image(320, 240, PixelFormat(3)), &source, 25.0);
        assert_eq!(params.pixel_format, PixelFormat(3));
        assert_eq!(params.frame_rate_hz, 30.0);

        let params =
            VideoParams::from_frame(&image(320, 240, PixelFormat::UNKNOWN), &SourceMetadata::default(), 25.0);
        assert_eq!(params.pixel_format, PixelFormat::UNKNOWN);
        assert_eq!(params.frame_rate_hz, 25.0);
    }

    #[test]
    fn audio_params_prefer_source_level() {
        let frame = AudioPayload {
            samples: SampleBuffer::S16(vec![0; 4]),
            channels: 1,
            sample_rate_hz: 22_050,
        };
        let source = SourceMetadata {
            audio_channels: 2,
            audio_sample_rate_hz: 44_100,
            ..SourceMetadata::default()
        };
        assert_eq!(
            AudioParams::resolve(&frame, &source),
            Some(AudioParams {
                channels: 2,
                sample_rate_hz: 44_100
            })
        );
        assert_eq!(
            AudioParams::resolve(&frame, &SourceMetadata::default()),
            Some(AudioParams {
                channels: 1,
                sample_rate_hz: 22_050
            })
        );

        let unknown = AudioPayload {
            channels: 0,
            ..frame
        };
        assert_eq!(AudioParams::resolve(&unknown, &SourceMetadata::default()), None);
    }

    #[test]
    fn video_finalizes_once() {
        let mut metadata = StreamMetadata::default();
        let params = VideoParams::from_frame(&image(640, 480, PixelFormat(3)), &SourceMetadata::default(), 25.0);
        assert_eq!(metadata.finalize_video(params), Finalization::First);
        for _ in 0..1_000 {
            assert_eq!(metadata.finalize_video(params), Finalization::Same);
        }
        let other = VideoParams {
            width: 1280,
            ..params
        };
        assert_eq!(metadata.finalize_video(other), Finalization::Conflict);
        assert_eq!(metadata.video().map(|v| v.width), Some(640));
    }

    #[test]
    fn unresolved_reason_tracks_expected_streams() {
        let mut metadata = StreamMetadata::default();
        let av = SourceMetadata {
            has_video: true,
            has_audio: true,
            ..SourceMetadata::default()
        };
        assert!(metadata.unresolved_reason(&av, false).is_some());

        metadata.finalize_video(VideoParams::from_frame(
            &image(2, 2, PixelFormat(3)),
            &av,
            25.0,
        ));
        assert!(metadata.unresolved_reason(&av, false).is_some());
        assert!(metadata.unresolved_reason(&av, true).is_none());

        let nothing = SourceMetadata::default();
        assert!(StreamMetadata::default().unresolved_reason(&nothing, false).is_some());
        assert!(StreamMetadata::default().unresolved_reason(&nothing, true).is_none());
    }
}
