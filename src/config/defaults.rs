// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all engine tuning constants.
//!
//! This module serves as the single source of truth for the numeric
//! heuristics used by the playback engine. Constants are organized by
//! category.
//!
//! # Categories
//!
//! - **Sync**: Read-ahead, sleep caps and video pacing thresholds
//! - **Metadata**: Polling schedule and frame-level grace period
//! - **Audio**: Sink buffer sizing, warm-up and silence priming
//! - **Workers/Lifecycle**: Queue depth and shutdown timeouts

// ==========================================================================
// Sync Defaults
// ==========================================================================

/// Maximum distance (ms) the decode loop may run ahead of the media clock.
pub const DEFAULT_MAX_READ_AHEAD_MS: u64 = 700;

/// Upper bound (ms) for a single pre-render sleep of an early video frame.
/// The clock may jump when audio engages, so never sleep longer than this.
pub const DEFAULT_VIDEO_MAX_SLEEP_IF_EARLY_MS: u64 = 100;

/// Delays below this (ms) are not worth sleeping for.
pub const DEFAULT_MIN_MEANINGFUL_DELAY_MS: u64 = 5;

/// A video frame later than this (ms) behind an audio-backed clock is "late".
pub const DEFAULT_VIDEO_CATCH_UP_THRESHOLD_MS: u64 = 200;

/// Backpressure sleep cap (ms) while the clock runs on the wall-clock fallback.
pub const DEFAULT_LOOP_SLEEP_CAP_FALLBACK_MS: u64 = 200;

/// Backpressure sleep cap (ms) while the clock is backed by the audio device.
pub const DEFAULT_LOOP_SLEEP_CAP_AUDIO_MS: u64 = 2000;

/// Yield (ms) after an empty frame when no backpressure sleep happened.
pub const EMPTY_FRAME_YIELD_MS: u64 = 1;

/// Yield (ms) when a frame is skipped because the clock could not be anchored.
pub const UNANCHORED_FRAME_YIELD_MS: u64 = 10;

// ==========================================================================
// Metadata Defaults
// ==========================================================================

/// Shortest wait (ms) between two metadata polls.
pub const DEFAULT_POLL_MIN_INTERVAL_MS: u64 = 50;

/// Longest wait (ms) between two metadata polls.
pub const DEFAULT_POLL_MAX_INTERVAL_MS: u64 = 1_500;

/// Total polling budget (ms) before falling through to frame-level metadata.
pub const DEFAULT_POLL_BUDGET_MS: u64 = 15_000;

/// Frames grabbed without finalizing expected metadata before giving up.
pub const DEFAULT_METADATA_FRAME_GRACE: u64 = 300;

/// Frame rate reported when neither source nor frames provide one.
pub const DEFAULT_FALLBACK_FRAME_RATE: f64 = 25.0;

// ==========================================================================
// Audio Defaults
// ==========================================================================

/// Audio sink buffer length (ms). Absorbs scheduling jitter.
pub const DEFAULT_AUDIO_BUFFER_MS: u64 = 750;

/// Lower bound for the audio sink buffer, in bytes.
pub const DEFAULT_AUDIO_MIN_BUFFER_BYTES: usize = 16_384;

/// Silence written right after sink setup (ms). 0 disables priming.
pub const DEFAULT_AUDIO_PRIME_SILENCE_MS: u64 = 0;

/// Maximum number of frames processed by the audio warm-up stage.
pub const DEFAULT_WARMUP_MAX_FRAMES: u32 = 30;

/// Yield (ms) between two warm-up frames.
pub const WARMUP_YIELD_MS: u64 = 5;

/// Sample width written to the audio sink.
pub const PCM_BIT_DEPTH: u16 = 16;

// ==========================================================================
// Worker / Lifecycle Defaults
// ==========================================================================

/// Time (ms) granted to a worker to finish after its queue is closed.
pub const DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS: u64 = 500;

/// Time (ms) `stop()` waits for the playback loop before forcing cleanup.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 1_500;

// ==========================================================================
// Compile-time Validation
// ==========================================================================

const _: () = {
    // Sync validation
    assert!(DEFAULT_MAX_READ_AHEAD_MS > 0);
    assert!(DEFAULT_VIDEO_MAX_SLEEP_IF_EARLY_MS > DEFAULT_MIN_MEANINGFUL_DELAY_MS);
    assert!(DEFAULT_LOOP_SLEEP_CAP_FALLBACK_MS < DEFAULT_LOOP_SLEEP_CAP_AUDIO_MS);

    // Metadata validation
    assert!(DEFAULT_POLL_MIN_INTERVAL_MS > 0);
    assert!(DEFAULT_POLL_MAX_INTERVAL_MS >= DEFAULT_POLL_MIN_INTERVAL_MS);
    assert!(DEFAULT_POLL_BUDGET_MS >= DEFAULT_POLL_MAX_INTERVAL_MS);
    assert!(DEFAULT_METADATA_FRAME_GRACE > 0);

    // Audio validation
    assert!(DEFAULT_AUDIO_BUFFER_MS >= 500 && DEFAULT_AUDIO_BUFFER_MS <= 750);
    assert!(DEFAULT_AUDIO_MIN_BUFFER_BYTES > 0);

    // Worker/lifecycle validation
    assert!(DEFAULT_STOP_TIMEOUT_MS + 2 * DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS < 3_000);
};
