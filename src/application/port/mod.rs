// SPDX-License-Identifier: MPL-2.0
//! Port definitions (traits) for dependency inversion.
//!
//! This module defines the interfaces through which the engine talks to its
//! external collaborators.
//!
//! # Available Ports
//!
//! - [`source`]: Pull-based frame source (demuxer + decoder)
//! - [`audio_sink`]: Push-based PCM audio output device
//! - [`render`]: Video render callback, player events and custom audio handling
//!
//! # Design Notes
//!
//! - Ports use crate types only (no `FFmpeg` or `cpal` types)
//! - The frame source is `Send` but not `Sync`: only the playback loop touches it
//! - The sink, renderer and listener are `Send + Sync`: several threads share them
//! - No `async fn`; the engine runs on dedicated threads
//!
//! # Example
//!
//! ```ignore
//! use avsync::application::port::FrameSource;
//! use avsync::media::Frame;
//! use std::path::Path;
//!
//! fn first_frame(source: &mut impl FrameSource, path: &Path) -> Option<Frame> {
//!     source.open(path).ok()?;
//!     source.grab_next_frame().ok().flatten()
//! }
//! ```

pub mod audio_sink;
pub mod render;
pub mod source;

// Re-export main types for convenience
pub use audio_sink::{AudioSink, Endianness, SinkError, SinkFormat};
pub use render::{AudioDataHandler, PlayerEvent, PlayerEventListener, VideoRenderer};
pub use source::{FrameSource, SourceError, SourceMetadata};
