// SPDX-License-Identifier: MPL-2.0
//! `FFmpeg` adapter implementing the [`FrameSource`] port trait.
//!
//! [`FfmpegFrameSource`] demuxes one input, decodes its best video and audio
//! streams and hands frames out in packet order:
//!
//! - video is converted to packed BGR24
//! - audio is resampled to interleaved signed 16-bit at the stream's own rate
//!   (anything beyond stereo is downmixed to stereo)
//!
//! [`FrameSource`]: crate::application::port::FrameSource

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use ffmpeg_next::format::{sample, Pixel, Sample};
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{codec, decoder, frame, media, ChannelLayout, Rational};
use tracing::{debug, warn};

use crate::application::port::{FrameSource, SourceError, SourceMetadata};
use crate::media::{AudioPayload, Frame, ImagePayload, PixelFormat, SampleBuffer};
use crate::player::time_units::pts_to_micros;

static FFMPEG_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initializes `FFmpeg` once per process and silences its own logging below
/// error level. A failed initialization is reported to every caller.
fn init_ffmpeg() -> Result<(), SourceError> {
    FFMPEG_INIT
        .get_or_init(|| {
            ffmpeg_next::init().map_err(|e| format!("FFmpeg initialization failed: {e}"))?;
            // SAFETY: av_log_set_level only updates a global log threshold.
            unsafe {
                ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
            }
            Ok(())
        })
        .clone()
        .map_err(SourceError::Decode)
}

fn to_micros(pts: Option<i64>, time_base: Rational) -> i64 {
    let Some(pts) = pts else {
        return 0;
    };
    if time_base.denominator() == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let secs = pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator());
    pts_to_micros(secs)
}

fn rational_hz(rate: Rational) -> f64 {
    if rate.denominator() == 0 || rate.numerator() <= 0 {
        0.0
    } else {
        f64::from(rate.numerator()) / f64::from(rate.denominator())
    }
}

struct VideoStream {
    index: usize,
    decoder: decoder::Video,
    scaler: Option<scaling::Context>,
    time_base: Rational,
    frame_rate_hz: f64,
    width: u32,
    height: u32,
}

impl VideoStream {
    fn convert(&mut self, decoded: &frame::Video) -> Result<Frame, SourceError> {
        let (width, height) = (decoded.width(), decoded.height());
        if self.scaler.is_none() || self.width != width || self.height != height {
            self.scaler = Some(
                scaling::Context::get(
                    decoded.format(),
                    width,
                    height,
                    Pixel::BGR24,
                    width,
                    height,
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| SourceError::Decode(format!("failed to create scaler: {e}")))?,
            );
            self.width = width;
            self.height = height;
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(SourceError::Decode("scaler unavailable".into()));
        };

        let mut bgr = frame::Video::empty();
        scaler
            .run(decoded, &mut bgr)
            .map_err(|e| SourceError::Decode(format!("scaling failed: {e}")))?;

        let stride = bgr.stride(0);
        let len = stride * height as usize;
        let data = bgr.data(0);
        let image = ImagePayload {
            width,
            height,
            stride,
            depth_bits: 8,
            channels: 3,
            pixel_format: PixelFormat(ffmpeg_next::ffi::AVPixelFormat::from(Pixel::BGR24) as i32),
            data: Arc::from(&data[..len.min(data.len())]),
        };
        Ok(Frame::image(to_micros(decoded.timestamp(), self.time_base), image))
    }
}

struct AudioStream {
    index: usize,
    decoder: decoder::Audio,
    resampler: resampling::Context,
    time_base: Rational,
    channels: u16,
    sample_rate_hz: u32,
}

impl AudioStream {
    fn convert(&mut self, decoded: &frame::Audio) -> Result<Frame, SourceError> {
        let mut resampled = frame::Audio::empty();
        self.resampler
            .run(decoded, &mut resampled)
            .map_err(|e| SourceError::Decode(format!("resampling failed: {e}")))?;

        let count = resampled.samples() * usize::from(self.channels);
        let samples = resampled
            .data(0)
            .chunks_exact(2)
            .take(count)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();

        let payload = AudioPayload {
            samples: SampleBuffer::S16(samples),
            channels: self.channels,
            sample_rate_hz: self.sample_rate_hz,
        };
        Ok(Frame::audio(to_micros(decoded.timestamp(), self.time_base), payload))
    }
}

/// Open input plus its decoders.
struct DecoderState {
    input: ffmpeg_next::format::context::Input,
    video: Option<VideoStream>,
    audio: Option<AudioStream>,
    pending: VecDeque<Frame>,
    flushed: bool,
}

// SAFETY: the contexts hold raw pointers but are owned exclusively by one
// `FfmpegFrameSource`, which only the playback loop thread touches.
unsafe impl Send for DecoderState {}

impl DecoderState {
    fn open_video(input: &ffmpeg_next::format::context::Input) -> Result<Option<VideoStream>, SourceError> {
        let Some(stream) = input.streams().best(media::Type::Video) else {
            return Ok(None);
        };
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| SourceError::Decode(format!("failed to create video decoder: {e}")))?;
        Ok(Some(VideoStream {
            index: stream.index(),
            width: decoder.width(),
            height: decoder.height(),
            decoder,
            scaler: None,
            time_base: stream.time_base(),
            frame_rate_hz: rational_hz(stream.avg_frame_rate()),
        }))
    }

    fn open_audio(input: &ffmpeg_next::format::context::Input) -> Result<Option<AudioStream>, SourceError> {
        let Some(stream) = input.streams().best(media::Type::Audio) else {
            return Ok(None);
        };
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().audio())
            .map_err(|e| SourceError::Decode(format!("failed to create audio decoder: {e}")))?;

        #[allow(clippy::cast_possible_truncation)]
        let (channels, layout) = match decoder.channels() as u16 {
            1 => (1, ChannelLayout::MONO),
            _ => (2, ChannelLayout::STEREO),
        };
        let resampler = resampling::Context::get(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            Sample::I16(sample::Type::Packed),
            layout,
            decoder.rate(),
        )
        .map_err(|e| SourceError::Decode(format!("failed to create resampler: {e}")))?;

        Ok(Some(AudioStream {
            index: stream.index(),
            sample_rate_hz: decoder.rate(),
            decoder,
            resampler,
            time_base: stream.time_base(),
            channels,
        }))
    }

    /// Moves every frame the decoders have ready into `pending`.
    fn drain_decoders(&mut self) -> Result<(), SourceError> {
        if let Some(video) = self.video.as_mut() {
            let mut decoded = frame::Video::empty();
            while video.decoder.receive_frame(&mut decoded).is_ok() {
                self.pending.push_back(video.convert(&decoded)?);
            }
        }
        if let Some(audio) = self.audio.as_mut() {
            let mut decoded = frame::Audio::empty();
            while audio.decoder.receive_frame(&mut decoded).is_ok() {
                self.pending.push_back(audio.convert(&decoded)?);
            }
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.flushed {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));

            match next {
                Some((index, packet)) => {
                    let sent = match (&mut self.video, &mut self.audio) {
                        (Some(video), _) if video.index == index => {
                            video.decoder.send_packet(&packet)
                        }
                        (_, Some(audio)) if audio.index == index => {
                            audio.decoder.send_packet(&packet)
                        }
                        _ => continue,
                    };
                    if let Err(e) = sent {
                        // A corrupt packet is skipped; the decoder resyncs on the next one.
                        debug!(stream = index, error = %e, "packet rejected by decoder");
                    }
                }
                None => {
                    if let Some(video) = self.video.as_mut() {
                        let _ = video.decoder.send_eof();
                    }
                    if let Some(audio) = self.audio.as_mut() {
                        let _ = audio.decoder.send_eof();
                    }
                    self.flushed = true;
                }
            }
            self.drain_decoders()?;
        }
    }
}

/// `FFmpeg`-backed [`FrameSource`].
///
/// # Example
///
/// ```ignore
/// use avsync::infrastructure::ffmpeg::FfmpegFrameSource;
/// use avsync::Player;
///
/// let player = Player::builder()
///     .source_factory(|| Box::new(FfmpegFrameSource::new()))
///     // ...
///     .build()?;
/// ```
#[derive(Default)]
pub struct FfmpegFrameSource {
    state: Option<DecoderState>,
}

impl FfmpegFrameSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for FfmpegFrameSource {
    fn open(&mut self, path: &Path) -> Result<(), SourceError> {
        init_ffmpeg()?;
        let open_error = |reason: String| SourceError::Open {
            path: path.display().to_string(),
            reason,
        };

        let input = ffmpeg_next::format::input(path).map_err(|e| open_error(e.to_string()))?;
        let video = DecoderState::open_video(&input)?;
        let audio = match DecoderState::open_audio(&input) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "audio stream present but not decodable, ignoring it");
                None
            }
        };
        if video.is_none() && audio.is_none() {
            return Err(open_error("no audio or video stream".into()));
        }

        self.state = Some(DecoderState {
            input,
            video,
            audio,
            pending: VecDeque::new(),
            flushed: false,
        });
        Ok(())
    }

    fn grab_next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.state.as_mut().ok_or(SourceError::NotOpen)?.read_next()
    }

    fn current_metadata(&self) -> SourceMetadata {
        let Some(state) = &self.state else {
            return SourceMetadata::default();
        };
        let mut metadata = SourceMetadata::default();
        if let Some(video) = &state.video {
            metadata.has_video = true;
            metadata.width = video.width;
            metadata.height = video.height;
            metadata.frame_rate_hz = video.frame_rate_hz;
            metadata.pixel_format = if video.width > 0 {
                PixelFormat(ffmpeg_next::ffi::AVPixelFormat::from(Pixel::BGR24) as i32)
            } else {
                PixelFormat::UNKNOWN
            };
        }
        if let Some(audio) = &state.audio {
            metadata.has_audio = true;
            metadata.audio_channels = audio.channels;
            metadata.audio_sample_rate_hz = audio.sample_rate_hz;
        }
        metadata
    }

    fn close(&mut self) {
        self.state = None;
    }
}
