// SPDX-License-Identifier: MPL-2.0
//! Media clock for audio/video synchronization.
//!
//! The clock answers one question: "where is playback right now?", in
//! microseconds relative to the first frame of the session.
//!
//! # Clock Sources
//!
//! - **Audio** (authoritative): the device-reported position of the attached
//!   sink, used while the sink is open, running and reports a non-negative
//!   position. It reflects what was actually heard, not what was decoded.
//! - **Wall clock** (fallback): time elapsed since the first frame, used
//!   before the audio path exists, for video-only media and whenever the
//!   device stalls.
//!
//! # Reconciliation
//!
//! The two sources disagree by an arbitrary amount when playback switches
//! between them. The clock never reports a value lower than the previous one:
//!
//! ```text
//!   fallback ──────────┐ switch: audio_offset = max(0, last - device)
//!                      ▼
//!   audio    ──────────────────┐ switch: fallback_offset = last - elapsed
//!                              ▼
//!   fallback ─────────────────────────
//! ```
//!
//! Every reported position is also clamped to `>= last`.

use crate::application::port::AudioSink;
use crate::player::time_units::duration_to_micros;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sentinel for "no first-frame timestamp recorded".
pub const UNSET_TIMESTAMP: i64 = -1;

struct ClockState {
    first_frame_absolute_micros: i64,
    system_anchor: Option<Instant>,
    initialized: bool,
    /// Last value handed out by `position_micros`.
    last_position_micros: i64,
    audio_offset_micros: i64,
    fallback_offset_micros: i64,
    audio_active: bool,
    sink: Option<Arc<dyn AudioSink>>,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            first_frame_absolute_micros: UNSET_TIMESTAMP,
            system_anchor: None,
            initialized: false,
            last_position_micros: 0,
            audio_offset_micros: 0,
            fallback_offset_micros: 0,
            audio_active: false,
            sink: None,
        }
    }
}

/// Session media clock, shared by the playback loop, the video worker and
/// the audio output.
#[derive(Default)]
pub struct MediaClock {
    state: Mutex<ClockState>,
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MediaClock")
            .field("first_frame_absolute_micros", &state.first_frame_absolute_micros)
            .field("initialized", &state.initialized)
            .field("last_position_micros", &state.last_position_micros)
            .field("audio_active", &state.audio_active)
            .field("sink_attached", &state.sink.is_some())
            .finish()
    }
}

impl MediaClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchors the clock to the first usable frame timestamp.
    ///
    /// The first call with `timestamp >= 0` anchors the clock. Later calls are
    /// no-ops, except that an anchor of `<= 0` is replaced by the first
    /// positive timestamp (sources sometimes stamp their first frame 0).
    ///
    /// Returns `true` if the anchor changed.
    pub fn initialize(&self, first_timestamp_micros: i64) -> bool {
        let mut state = self.state.lock();
        if !state.initialized {
            if first_timestamp_micros < 0 {
                return false;
            }
            state.first_frame_absolute_micros = first_timestamp_micros;
            state.system_anchor = Some(Instant::now());
            state.initialized = true;
            state.last_position_micros = 0;
            state.audio_offset_micros = 0;
            state.fallback_offset_micros = 0;
            debug!(first_timestamp_micros, "media clock anchored");
            return true;
        }

        if state.first_frame_absolute_micros <= 0 && first_timestamp_micros > 0 {
            let previous = state.first_frame_absolute_micros;
            state.first_frame_absolute_micros = first_timestamp_micros;
            state.system_anchor = Some(Instant::now());
            state.fallback_offset_micros = 0;
            debug!(
                previous,
                first_timestamp_micros, "media clock re-anchored past zero timestamp"
            );
            return true;
        }

        false
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Absolute timestamp of the anchor frame, or [`UNSET_TIMESTAMP`].
    #[must_use]
    pub fn first_frame_timestamp_micros(&self) -> i64 {
        self.state.lock().first_frame_absolute_micros
    }

    /// Converts an absolute source timestamp to session-relative time.
    #[must_use]
    pub fn relative_micros(&self, absolute_micros: i64) -> i64 {
        absolute_micros - self.state.lock().first_frame_absolute_micros
    }

    /// Current playback position in microseconds. Never decreases.
    ///
    /// Returns 0 before the clock is initialized.
    pub fn position_micros(&self) -> i64 {
        let mut state = self.state.lock();
        let Some(anchor) = state.system_anchor.filter(|_| state.initialized) else {
            return 0;
        };

        let elapsed = duration_to_micros(anchor.elapsed());
        let device = state.sink.as_ref().and_then(|sink| device_position(sink.as_ref()));
        let last = state.last_position_micros;

        let candidate = match device {
            Some(device_micros) => {
                if !state.audio_active {
                    state.audio_active = true;
                    state.audio_offset_micros = (last - device_micros).max(0);
                    info!(
                        device_micros,
                        offset_micros = state.audio_offset_micros,
                        "audio clock engaged"
                    );
                }
                device_micros + state.audio_offset_micros
            }
            None => {
                if state.audio_active {
                    state.audio_active = false;
                    state.fallback_offset_micros = last - elapsed;
                    warn!(
                        position_micros = last,
                        "audio clock stalled, reverting to wall clock"
                    );
                }
                elapsed + state.fallback_offset_micros
            }
        };

        let position = candidate.max(last);
        state.last_position_micros = position;
        position
    }

    /// Returns true if the attached sink currently drives the clock.
    #[must_use]
    pub fn is_audio_clock_active(&self) -> bool {
        let state = self.state.lock();
        state.initialized
            && state
                .sink
                .as_ref()
                .is_some_and(|sink| device_position(sink.as_ref()).is_some())
    }

    /// Makes `sink` a candidate clock source. Called by the audio output.
    pub fn attach_sink(&self, sink: Arc<dyn AudioSink>) {
        self.state.lock().sink = Some(sink);
    }

    /// Removes the sink; the clock continues on the wall clock from its last
    /// position.
    pub fn detach_sink(&self) {
        let mut state = self.state.lock();
        if state.sink.take().is_some() && state.audio_active {
            state.audio_active = false;
            if let Some(anchor) = state.system_anchor {
                state.fallback_offset_micros =
                    state.last_position_micros - duration_to_micros(anchor.elapsed());
            }
        }
    }

    /// Returns the clock to the unset state.
    pub fn reset(&self) {
        *self.state.lock() = ClockState::default();
    }
}

fn device_position(sink: &dyn AudioSink) -> Option<i64> {
    if !(sink.is_open() && sink.is_running()) {
        return None;
    }
    let position = sink.position_micros();
    (position >= 0).then_some(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeAudioSink;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn position_is_zero_before_initialization() {
        let clock = MediaClock::new();
        assert_eq!(clock.position_micros(), 0);
        assert_eq!(clock.first_frame_timestamp_micros(), UNSET_TIMESTAMP);
    }

    #[test]
    fn negative_timestamp_does_not_initialize() {
        let clock = MediaClock::new();
        assert!(!clock.initialize(-5));
        assert!(!clock.is_initialized());
    }

    #[test]
    fn second_initialize_is_a_no_op() {
        let clock = MediaClock::new();
        assert!(clock.initialize(1_000));
        assert!(!clock.initialize(2_000));
        assert_eq!(clock.first_frame_timestamp_micros(), 1_000);
    }

    #[test]
    fn zero_anchor_is_replaced_by_first_positive_timestamp() {
        let clock = MediaClock::new();
        assert!(clock.initialize(0));
        assert!(clock.initialize(40_000));
        assert_eq!(clock.first_frame_timestamp_micros(), 40_000);
        assert!(!clock.initialize(80_000));
        assert_eq!(clock.relative_micros(120_000), 80_000);
    }

    #[test]
    fn wall_clock_fallback_is_monotonic() {
        let clock = MediaClock::new();
        clock.initialize(0);
        let mut previous = clock.position_micros();
        for _ in 0..200 {
            let current = clock.position_micros();
            assert!(current >= previous);
            previous = current;
        }
        thread::sleep(Duration::from_millis(15));
        assert!(clock.position_micros() >= 15_000);
    }

    #[test]
    fn switching_to_audio_never_regresses() {
        let clock = MediaClock::new();
        clock.initialize(0);
        thread::sleep(Duration::from_millis(30));
        let before = clock.position_micros();
        assert!(before >= 30_000);

        // Device just started: it reports a position far behind the fallback.
        let sink = Arc::new(FakeAudioSink::new());
        sink.set_running(true);
        sink.set_position_micros(1_000);
        clock.attach_sink(sink.clone());

        let after = clock.position_micros();
        assert!(after >= before);
        assert!(clock.is_audio_clock_active());

        sink.set_position_micros(11_000);
        let advanced = clock.position_micros();
        assert!(advanced >= after + 10_000 - 1);
    }

    #[test]
    fn stalled_device_reverts_to_wall_clock_without_regression() {
        let clock = MediaClock::new();
        clock.initialize(0);
        let sink = Arc::new(FakeAudioSink::new());
        sink.set_running(true);
        sink.set_position_micros(500_000);
        clock.attach_sink(sink.clone());
        let audio_position = clock.position_micros();
        assert_eq!(audio_position, 500_000);

        sink.set_running(false);
        assert!(!clock.is_audio_clock_active());
        let fallback = clock.position_micros();
        assert!(fallback >= audio_position);

        thread::sleep(Duration::from_millis(10));
        assert!(clock.position_micros() >= audio_position + 10_000);
    }

    #[test]
    fn negative_device_position_is_ignored() {
        let clock = MediaClock::new();
        clock.initialize(0);
        let sink = Arc::new(FakeAudioSink::new());
        sink.set_running(true);
        sink.set_position_micros(-1);
        clock.attach_sink(sink);
        assert!(!clock.is_audio_clock_active());
    }

    #[test]
    fn reset_returns_to_unset_state() {
        let clock = MediaClock::new();
        clock.initialize(5_000);
        clock.attach_sink(Arc::new(FakeAudioSink::new()));
        clock.reset();
        assert!(!clock.is_initialized());
        assert_eq!(clock.position_micros(), 0);
        assert!(!clock.is_audio_clock_active());
    }
}
