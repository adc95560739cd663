// SPDX-License-Identifier: MPL-2.0
//! Playback state machine and per-session bookkeeping.
//!
//! Everything here lives for exactly one `start()`: a new session gets a new
//! clock, new metadata, new counters. Nothing is process-wide.

use crate::player::audio_output::AudioOutputManager;
use crate::player::clock::MediaClock;
use crate::player::metadata::StreamMetadata;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Scheduler state.
///
/// ```text
/// Idle → MetadataResolving → Warmup (optional) → Streaming → Draining → Stopped
/// ```
///
/// Any state may go straight to `Stopped` on error or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No session has run yet.
    #[default]
    Idle,
    /// Source opened, waiting for stream metadata.
    MetadataResolving,
    /// Feeding the first audio frames until the device clock engages.
    Warmup,
    /// Steady state: frames are paced against the media clock.
    Streaming,
    /// Source exhausted, releasing resources.
    Draining,
    /// Session over.
    Stopped,
}

impl PlaybackState {
    /// Returns true while a session is between open and cleanup.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::MetadataResolving | Self::Warmup | Self::Streaming | Self::Draining
        )
    }

    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }

    #[must_use]
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// State published by the loop thread and read by [`Player`](crate::Player).
#[derive(Debug, Default)]
pub struct StateCell(Mutex<PlaybackState>);

impl StateCell {
    #[must_use]
    pub fn get(&self) -> PlaybackState {
        *self.0.lock()
    }

    pub fn set(&self, next: PlaybackState) {
        let mut current = self.0.lock();
        if *current != next {
            debug!(from = ?*current, to = ?next, "playback state");
            *current = next;
        }
    }
}

/// Per-iteration log throttle: the first ten, then every hundredth.
#[must_use]
pub fn should_log(count: u64) -> bool {
    count <= 10 || count % 100 == 1
}

/// Session counters, updated from the loop and both workers.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_grabbed: AtomicU64,
    empty_frames: AtomicU64,
    video_frames_rendered: AtomicU64,
    late_video_frames: AtomicU64,
    late_frames_dropped: AtomicU64,
    video_frames_dropped: AtomicU64,
    audio_frames_dropped: AtomicU64,
    audio_frames_played: AtomicU64,
    audio_bytes_written: AtomicU64,
    partial_writes: AtomicU64,
    backpressure_sleep_micros: AtomicU64,
    audio_clock_engaged: AtomicBool,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_grabbed: u64,
    pub empty_frames: u64,
    pub video_frames_rendered: u64,
    pub late_video_frames: u64,
    pub late_frames_dropped: u64,
    /// Video frames discarded because the video worker queue was full.
    pub video_frames_dropped: u64,
    /// Audio frames discarded because the audio worker queue was full.
    pub audio_frames_dropped: u64,
    pub audio_frames_played: u64,
    pub audio_bytes_written: u64,
    pub partial_writes: u64,
    pub backpressure_sleep_micros: u64,
    /// The audio device drove the clock at some point in the session.
    pub audio_clock_engaged: bool,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl SessionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new frame count.
    pub fn record_frame_grabbed(&self) -> u64 {
        bump(&self.frames_grabbed)
    }

    pub fn record_empty_frame(&self) -> u64 {
        bump(&self.empty_frames)
    }

    pub fn record_video_rendered(&self) -> u64 {
        bump(&self.video_frames_rendered)
    }

    pub fn record_late_video(&self) -> u64 {
        bump(&self.late_video_frames)
    }

    pub fn record_late_dropped(&self) -> u64 {
        bump(&self.late_frames_dropped)
    }

    pub fn record_video_dropped(&self) -> u64 {
        bump(&self.video_frames_dropped)
    }

    pub fn record_audio_dropped(&self) -> u64 {
        bump(&self.audio_frames_dropped)
    }

    pub fn record_audio_played(&self) -> u64 {
        bump(&self.audio_frames_played)
    }

    pub fn record_partial_write(&self) -> u64 {
        bump(&self.partial_writes)
    }

    pub fn add_audio_bytes(&self, bytes: usize) {
        self.audio_bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_backpressure_sleep(&self, micros: u64) {
        self.backpressure_sleep_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn mark_audio_clock_engaged(&self) {
        self.audio_clock_engaged.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_grabbed: self.frames_grabbed.load(Ordering::Relaxed),
            empty_frames: self.empty_frames.load(Ordering::Relaxed),
            video_frames_rendered: self.video_frames_rendered.load(Ordering::Relaxed),
            late_video_frames: self.late_video_frames.load(Ordering::Relaxed),
            late_frames_dropped: self.late_frames_dropped.load(Ordering::Relaxed),
            video_frames_dropped: self.video_frames_dropped.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            audio_frames_played: self.audio_frames_played.load(Ordering::Relaxed),
            audio_bytes_written: self.audio_bytes_written.load(Ordering::Relaxed),
            partial_writes: self.partial_writes.load(Ordering::Relaxed),
            backpressure_sleep_micros: self.backpressure_sleep_micros.load(Ordering::Relaxed),
            audio_clock_engaged: self.audio_clock_engaged.load(Ordering::Relaxed),
        }
    }
}

/// Where the session stands with its audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    /// No audio frame with usable parameters seen yet.
    #[default]
    Pending,
    /// Sink opened and attached to the clock.
    Ready,
    /// Setup failed or no sink configured; audio frames are ignored.
    Disabled,
}

impl AudioState {
    /// Setup has run, whatever the outcome.
    #[must_use]
    pub fn attempted(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Mutable state of one playback session, owned by the loop thread.
pub struct PlaybackSession {
    pub clock: Arc<MediaClock>,
    pub metadata: StreamMetadata,
    pub audio: Option<Arc<AudioOutputManager>>,
    pub audio_state: AudioState,
    pub stats: Arc<SessionStats>,
    pub state: Arc<StateCell>,
    pub loop_iteration: u64,
    pub missing_audio_params_logged: bool,
    pub audio_clock_seen: bool,
}

impl PlaybackSession {
    #[must_use]
    pub fn new(clock: Arc<MediaClock>, stats: Arc<SessionStats>, state: Arc<StateCell>) -> Self {
        Self {
            clock,
            metadata: StreamMetadata::default(),
            audio: None,
            audio_state: AudioState::Pending,
            stats,
            state,
            loop_iteration: 0,
            missing_audio_params_logged: false,
            audio_clock_seen: false,
        }
    }

    /// Advances the loop counter and returns it.
    pub fn next_iteration(&mut self) -> u64 {
        self.loop_iteration += 1;
        self.loop_iteration
    }

    pub fn transition(&self, next: PlaybackState) {
        self.state.set(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
        assert!(!PlaybackState::Idle.is_active());
    }

    #[test]
    fn active_states() {
        assert!(PlaybackState::MetadataResolving.is_active());
        assert!(PlaybackState::Warmup.is_active());
        assert!(PlaybackState::Streaming.is_active());
        assert!(PlaybackState::Draining.is_active());
        assert!(!PlaybackState::Stopped.is_active());
        assert!(PlaybackState::Stopped.is_stopped());
        assert!(PlaybackState::Streaming.is_streaming());
    }

    #[test]
    fn throttle_logs_first_ten_then_every_hundredth() {
        let logged: Vec<u64> = (1..=305).filter(|n| should_log(*n)).collect();
        assert_eq!(logged, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 101, 201, 301]);
    }

    #[test]
    fn stats_snapshot_reflects_counters() {
        let stats = SessionStats::new();
        assert_eq!(stats.record_frame_grabbed(), 1);
        assert_eq!(stats.record_frame_grabbed(), 2);
        stats.record_video_dropped();
        stats.add_audio_bytes(4_096);
        stats.add_backpressure_sleep(1_500);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_grabbed, 2);
        assert_eq!(snapshot.video_frames_dropped, 1);
        assert_eq!(snapshot.audio_bytes_written, 4_096);
        assert_eq!(snapshot.backpressure_sleep_micros, 1_500);
        assert_eq!(snapshot.late_video_frames, 0);
    }

    #[test]
    fn state_cell_publishes_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), PlaybackState::Idle);
        cell.set(PlaybackState::Streaming);
        assert_eq!(cell.get(), PlaybackState::Streaming);
    }

    #[test]
    fn session_counts_iterations() {
        let mut session = PlaybackSession::new(
            Arc::new(MediaClock::new()),
            Arc::new(SessionStats::new()),
            Arc::new(StateCell::default()),
        );
        assert_eq!(session.next_iteration(), 1);
        assert_eq!(session.next_iteration(), 2);
        assert!(!session.audio_state.attempted());
    }
}
