// SPDX-License-Identifier: MPL-2.0
//! Decoded frames as produced by a [`FrameSource`](crate::application::port::FrameSource).
//!
//! A [`Frame`] carries an absolute source timestamp and exactly one payload:
//! an image, a block of audio samples, or nothing at all. Frames are owned
//! values; the scheduler moves each payload into the worker that consumes it,
//! so a source can never observe a buffer it has already handed out.

use std::sync::Arc;

/// Opaque pixel format identifier, as reported by the decoder.
///
/// The engine never interprets pixels; the value is passed through to the
/// renderer and to `VideoDimensionsDetected` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub i32);

impl PixelFormat {
    /// Sentinel for "not known yet".
    pub const UNKNOWN: PixelFormat = PixelFormat(-1);

    #[must_use]
    pub fn is_known(self) -> bool {
        self.0 >= 0
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// A decoded video image.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row, including padding.
    pub stride: usize,
    /// Bits per channel (usually 8).
    pub depth_bits: u8,
    /// Channels per pixel (3 for BGR24).
    pub channels: u8,
    pub pixel_format: PixelFormat,
    /// Raw pixel rows, `stride * height` bytes.
    pub data: Arc<[u8]>,
}

impl ImagePayload {
    /// Returns true if the image has usable dimensions.
    #[must_use]
    pub fn has_valid_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Returns the total size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Interleaved audio samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    /// Signed 16-bit samples.
    S16(Vec<i16>),
    /// Float samples normalized to [-1.0, 1.0].
    F32(Vec<f32>),
}

impl SampleBuffer {
    /// Returns the total number of samples (across all channels).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::S16(samples) => samples.len(),
            SampleBuffer::F32(samples) => samples.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block of decoded audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub samples: SampleBuffer,
    /// Channel count carried by the frame itself; 0 if unknown.
    pub channels: u16,
    /// Sample rate carried by the frame itself; 0 if unknown.
    pub sample_rate_hz: u32,
}

impl AudioPayload {
    /// Returns true if the frame carries its own usable audio parameters.
    #[must_use]
    pub fn has_valid_params(&self) -> bool {
        self.channels > 0 && self.sample_rate_hz > 0
    }
}

/// Payload of a decoded frame.
#[derive(Debug, Clone)]
pub enum FramePayload {
    Image(ImagePayload),
    Audio(AudioPayload),
    Empty,
}

/// Classification used by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
    Empty,
}

/// A decoded unit pulled from the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Absolute source timestamp in microseconds. Non-decreasing, but not
    /// guaranteed to start at zero.
    pub timestamp_micros: i64,
    pub payload: FramePayload,
}

impl Frame {
    #[must_use]
    pub fn image(timestamp_micros: i64, image: ImagePayload) -> Self {
        Self {
            timestamp_micros,
            payload: FramePayload::Image(image),
        }
    }

    #[must_use]
    pub fn audio(timestamp_micros: i64, audio: AudioPayload) -> Self {
        Self {
            timestamp_micros,
            payload: FramePayload::Audio(audio),
        }
    }

    #[must_use]
    pub fn empty(timestamp_micros: i64) -> Self {
        Self {
            timestamp_micros,
            payload: FramePayload::Empty,
        }
    }

    /// Classifies the frame.
    ///
    /// An image without valid dimensions and an audio block without samples
    /// both count as empty.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match &self.payload {
            FramePayload::Image(image) if image.has_valid_dimensions() => FrameKind::Video,
            FramePayload::Audio(audio) if !audio.samples.is_empty() => FrameKind::Audio,
            _ => FrameKind::Empty,
        }
    }
}
