// SPDX-License-Identifier: MPL-2.0
//! Audio sink port definition.
//!
//! An [`AudioSink`] is a push-based PCM output line. The engine negotiates a
//! [`SinkFormat`], opens and starts the line, writes interleaved 16-bit PCM
//! bytes, and reads back the device playback position to drive the media
//! clock.

use thiserror::Error;

/// Byte order of PCM samples written to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

/// PCM line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub endianness: Endianness,
}

impl SinkFormat {
    /// Bytes per interleaved sample frame (all channels).
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bit_depth / 8)
    }

    /// Bytes consumed by one second of audio.
    #[must_use]
    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate_hz as usize
    }
}

/// Errors raised by an audio sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    #[error("audio sink is not open")]
    NotOpen,

    #[error("audio write failed: {0}")]
    Write(String),
}

/// Port for a platform PCM output line.
///
/// All methods take `&self`: the audio worker writes while the playback loop
/// and the video worker read the position concurrently, so implementations
/// synchronize internally.
pub trait AudioSink: Send + Sync {
    fn is_format_supported(&self, format: &SinkFormat) -> bool;

    /// Opens the line with an internal buffer of `buffer_size_bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the device refuses the format.
    fn open(&self, format: &SinkFormat, buffer_size_bytes: usize) -> Result<(), SinkError>;

    fn start(&self);

    /// Writes PCM bytes, blocking while the device buffer is full.
    ///
    /// Returns the number of bytes accepted, which may be less than
    /// `bytes.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::NotOpen`] if the line is closed.
    fn write(&self, bytes: &[u8]) -> Result<usize, SinkError>;

    /// Device playback position in microseconds since `open()`.
    fn position_micros(&self) -> i64;

    fn is_open(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Blocks until queued data has been played.
    fn drain(&self);

    fn stop(&self);

    fn close(&self);
}
