// SPDX-License-Identifier: MPL-2.0
//! Infrastructure layer adapters.
//!
//! Concrete implementations of the port traits defined in
//! `application::port`, each behind its cargo feature.
//!
//! # Available Adapters
//!
//! - [`ffmpeg`] (feature `ffmpeg`): demuxing and decoding, implements [`FrameSource`]
//! - [`cpal_sink`] (feature `cpal`): default output device, implements [`AudioSink`]
//!
//! [`FrameSource`]: crate::application::port::FrameSource
//! [`AudioSink`]: crate::application::port::AudioSink

#[cfg(feature = "cpal")]
pub mod cpal_sink;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "cpal")]
pub use cpal_sink::CpalAudioSink;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegFrameSource;
