// SPDX-License-Identifier: MPL-2.0
//! 16-bit PCM encoding for the audio sink.
//!
//! Float samples are clamped to [-1.0, 1.0] and scaled by `i16::MAX`, so
//! full-scale positive and negative values map symmetrically.

use crate::application::port::Endianness;
use crate::media::SampleBuffer;

/// Bytes per encoded sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Converts a normalized float sample to `i16`.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

#[inline]
fn push_sample(out: &mut Vec<u8>, sample: i16, endianness: Endianness) {
    match endianness {
        Endianness::Little => out.extend_from_slice(&sample.to_le_bytes()),
        Endianness::Big => out.extend_from_slice(&sample.to_be_bytes()),
    }
}

/// Appends `samples` to `out` as interleaved 16-bit PCM.
pub fn encode_into(samples: &SampleBuffer, endianness: Endianness, out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    match samples {
        SampleBuffer::S16(values) => {
            for &value in values {
                push_sample(out, value, endianness);
            }
        }
        SampleBuffer::F32(values) => {
            for &value in values {
                push_sample(out, f32_to_i16(value), endianness);
            }
        }
    }
}

/// Encodes `samples` into a new byte buffer.
#[must_use]
pub fn encode(samples: &SampleBuffer, endianness: Endianness) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    encode_into(samples, endianness, &mut out);
    out
}
