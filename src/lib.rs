// SPDX-License-Identifier: MPL-2.0
//! `avsync` is an audio/video playback synchronization engine.
//!
//! It pulls decoded frames from a pluggable [`FrameSource`], keeps video in
//! step with an audio-driven [`MediaClock`](player::MediaClock), writes PCM to
//! an [`AudioSink`] and bounds how far decoding may run ahead of playback.
//! Decoding, rendering and audio devices stay behind the traits in
//! [`application::port`]; `FFmpeg` and `cpal` adapters live in
//! [`infrastructure`] behind cargo features.

#![doc(html_root_url = "https://docs.rs/avsync/0.3.0")]

pub mod application;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod media;
pub mod player;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use application::port::{
    AudioDataHandler, AudioSink, Endianness, FrameSource, PlayerEvent, PlayerEventListener,
    SinkError, SinkFormat, SourceError, SourceMetadata, VideoRenderer,
};
pub use config::EngineConfig;
pub use error::{Error, PlaybackError, Result};
pub use player::{Player, PlayerBuilder, PlaybackState, StatsSnapshot};
