// SPDX-License-Identifier: MPL-2.0
//! The playback engine.
//!
//! One loop thread pulls frames from the [`FrameSource`](crate::application::port::FrameSource),
//! paces them against the [`MediaClock`] and hands them to two single-thread
//! workers: one renders video, the other writes PCM to the audio sink.
//!
//! The loop never gets more than `max_read_ahead` ahead of the clock, and the
//! clock follows the audio device once audio is playing.

pub mod audio_output;
pub mod cancel;
pub mod clock;
pub mod events;
pub mod lifecycle;
pub mod metadata;
pub mod pcm;
pub mod scheduler;
pub mod state;
pub mod time_units;
pub mod worker;

pub use audio_output::AudioOutputManager;
pub use clock::MediaClock;
pub use events::{event_channel, ChannelListener, EventChannel};
pub use lifecycle::{Player, PlayerBuilder, SourceFactory};
pub use scheduler::SinkFactory;
pub use state::{PlaybackState, StatsSnapshot};
