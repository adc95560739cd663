// SPDX-License-Identifier: MPL-2.0
//! Media data types shared by the engine and its ports.

pub mod frame;

pub use frame::{
    AudioPayload, Frame, FrameKind, FramePayload, ImagePayload, PixelFormat, SampleBuffer,
};
