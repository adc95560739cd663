// SPDX-License-Identifier: MPL-2.0
//! Application layer - boundaries of the playback engine.
//!
//! - [`port`]: Trait definitions (interfaces) for dependency inversion
//!
//! # Dependency Rule
//!
//! - The engine (`player`) depends only on the ports and on `media` types
//! - Infrastructure adapters (`FFmpeg`, `cpal`) implement the ports
//! - Front-ends (the CLI, a UI) provide the renderer and event listener
//!
//! # Example
//!
//! ```ignore
//! use avsync::application::port::{FrameSource, VideoRenderer};
//!
//! // Infrastructure implements the port trait
//! struct MyDecoder { /* ... */ }
//! impl FrameSource for MyDecoder { /* ... */ }
//! ```

pub mod port;
