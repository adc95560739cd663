// SPDX-License-Identifier: MPL-2.0
//! Audio output management on top of an [`AudioSink`].
//!
//! The manager negotiates a 16-bit PCM format (little-endian first, then
//! big-endian), sizes the device buffer, opens and starts the line, and
//! attaches it to the [`MediaClock`] so the device position becomes the
//! authoritative playback clock. It is the only component that opens or
//! closes the sink.

use crate::application::port::{AudioSink, Endianness, SinkFormat};
use crate::config::defaults::PCM_BIT_DEPTH;
use crate::config::AudioConfig;
use crate::error::PlaybackError;
use crate::media::AudioPayload;
use crate::player::clock::MediaClock;
use crate::player::metadata::AudioParams;
use crate::player::pcm;
use crate::player::state::{should_log, SessionStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns the session's audio sink from setup to teardown.
pub struct AudioOutputManager {
    sink: Arc<dyn AudioSink>,
    format: SinkFormat,
    buffer_size_bytes: usize,
    clock: Arc<MediaClock>,
    stats: Arc<SessionStats>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for AudioOutputManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutputManager")
            .field("format", &self.format)
            .field("buffer_size_bytes", &self.buffer_size_bytes)
            .field("torn_down", &self.torn_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Device buffer size for `format`: `buffer_ms` of audio, at least
/// `min_bytes`, rounded up to whole sample frames.
#[must_use]
pub fn buffer_size_for(format: &SinkFormat, buffer_ms: u64, min_bytes: usize) -> usize {
    let frame_bytes = format.bytes_per_frame().max(1);
    let wanted = (format.bytes_per_second() as u64).saturating_mul(buffer_ms) / 1_000;
    let size = usize::try_from(wanted).unwrap_or(usize::MAX).max(min_bytes);
    size.div_ceil(frame_bytes).saturating_mul(frame_bytes)
}

impl AudioOutputManager {
    /// Opens `sink` for `params` and makes it the clock's audio source.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::AudioUnavailable`] if the parameters are
    /// unusable, the sink supports neither byte order, or opening fails.
    pub fn setup(
        sink: Arc<dyn AudioSink>,
        params: AudioParams,
        config: &AudioConfig,
        clock: Arc<MediaClock>,
        stats: Arc<SessionStats>,
    ) -> Result<Self, PlaybackError> {
        if params.channels == 0 || params.sample_rate_hz == 0 {
            return Err(PlaybackError::AudioUnavailable(format!(
                "invalid audio parameters: {} Hz, {} channels",
                params.sample_rate_hz, params.channels
            )));
        }

        let format = [Endianness::Little, Endianness::Big]
            .into_iter()
            .map(|endianness| SinkFormat {
                sample_rate_hz: params.sample_rate_hz,
                channels: params.channels,
                bit_depth: PCM_BIT_DEPTH,
                endianness,
            })
            .find(|format| sink.is_format_supported(format))
            .ok_or_else(|| {
                PlaybackError::AudioUnavailable(format!(
                    "no 16-bit PCM line for {} Hz, {} channels",
                    params.sample_rate_hz, params.channels
                ))
            })?;

        let buffer_size_bytes = buffer_size_for(&format, config.buffer_ms, config.min_buffer_bytes);
        sink.open(&format, buffer_size_bytes)
            .map_err(|e| PlaybackError::AudioUnavailable(e.to_string()))?;
        sink.start();
        if !sink.is_running() {
            debug!("audio sink opened but not running yet");
        }

        info!(
            sample_rate_hz = format.sample_rate_hz,
            channels = format.channels,
            endianness = ?format.endianness,
            buffer_size_bytes,
            "audio output ready"
        );

        clock.attach_sink(Arc::clone(&sink));

        Ok(Self {
            sink,
            format,
            buffer_size_bytes,
            clock,
            stats,
            torn_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn format(&self) -> SinkFormat {
        self.format
    }

    #[must_use]
    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_bytes
    }

    /// Writes `duration` of silence, nudging drivers that only report
    /// "running" once data flows. Optional; off by default.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::AudioWriteFailed`] if the write fails.
    pub fn prime_silence(&self, duration: Duration) -> Result<usize, PlaybackError> {
        let frames = u64::from(self.format.sample_rate_hz)
            .saturating_mul(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            / 1_000;
        let bytes = usize::try_from(frames)
            .unwrap_or(0)
            .saturating_mul(self.format.bytes_per_frame());
        if bytes == 0 {
            return Ok(0);
        }
        debug!(bytes, "priming audio sink with silence");
        self.write(&vec![0u8; bytes])
    }

    /// Encodes `audio` in the sink's byte order and writes it.
    ///
    /// A sink that is open but stopped is restarted first.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::AudioWriteFailed`] if the write fails.
    pub fn play(&self, audio: &AudioPayload) -> Result<usize, PlaybackError> {
        if self.is_torn_down() {
            return Ok(0);
        }
        if self.sink.is_open() && !self.sink.is_running() {
            debug!("audio sink not running, restarting");
            self.sink.start();
        }
        let bytes = pcm::encode(&audio.samples, self.format.endianness);
        let written = self.write(&bytes)?;
        self.stats.record_audio_played();
        Ok(written)
    }

    /// Blocking write of PCM bytes. Partial writes are logged, not retried.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::AudioWriteFailed`] if the sink rejects the
    /// write.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, PlaybackError> {
        if self.is_torn_down() {
            return Ok(0);
        }
        let written = self
            .sink
            .write(bytes)
            .map_err(|e| PlaybackError::AudioWriteFailed(e.to_string()))?;
        self.stats.add_audio_bytes(written);

        if written < bytes.len() {
            let count = self.stats.record_partial_write();
            if should_log(count) {
                warn!(
                    written,
                    requested = bytes.len(),
                    count,
                    "partial audio write"
                );
            }
        }
        Ok(written)
    }

    /// Detaches from the clock, then drains, stops and closes the sink.
    /// Only the first call does anything.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clock.detach_sink();
        if self.sink.is_open() {
            self.sink.drain();
            self.sink.stop();
            self.sink.close();
        }
        info!("audio output closed");
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl Drop for AudioOutputManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
