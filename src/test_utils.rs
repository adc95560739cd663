// SPDX-License-Identifier: MPL-2.0
//! Scripted fakes for exercising the engine without real media or devices.
//!
//! - [`ScriptedSource`]: a frame source replaying a fixed list of frames
//! - [`FakeAudioSink`]: an in-memory PCM line that "plays" in real time
//! - [`RecordingRenderer`] / [`RecordingListener`]: capture what the engine
//!   delivers

use crate::application::port::{
    AudioSink, Endianness, FrameSource, PlayerEvent, PlayerEventListener, SinkError, SinkFormat,
    SourceError, SourceMetadata, VideoRenderer,
};
use crate::media::{AudioPayload, Frame, ImagePayload, PixelFormat, SampleBuffer};
use crate::player::time_units::frames_to_micros;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Frame helpers
// =============================================================================

/// A BGR24 image of the given size.
#[must_use]
pub fn test_image(width: u32, height: u32) -> ImagePayload {
    let stride = width as usize * 3;
    ImagePayload {
        width,
        height,
        stride,
        depth_bits: 8,
        channels: 3,
        pixel_format: PixelFormat(3),
        data: Arc::from(vec![0u8; stride * height as usize]),
    }
}

/// `samples_per_channel` frames of silence.
#[must_use]
pub fn test_audio(samples_per_channel: usize, channels: u16, sample_rate_hz: u32) -> AudioPayload {
    AudioPayload {
        samples: SampleBuffer::S16(vec![0; samples_per_channel * usize::from(channels)]),
        channels,
        sample_rate_hz,
    }
}

/// `count` video frames spaced `interval_micros` apart, starting at
/// `start_micros`.
#[must_use]
pub fn video_frames(
    count: usize,
    start_micros: i64,
    interval_micros: i64,
    width: u32,
    height: u32,
) -> Vec<Frame> {
    (0..count)
        .map(|i| Frame::image(start_micros + i as i64 * interval_micros, test_image(width, height)))
        .collect()
}

/// `count` audio frames of `interval_micros` each.
#[must_use]
pub fn audio_frames(count: usize, interval_micros: i64, channels: u16, sample_rate_hz: u32) -> Vec<Frame> {
    let per_frame = usize::try_from(i64::from(sample_rate_hz) * interval_micros / 1_000_000).unwrap_or(0);
    (0..count)
        .map(|i| {
            Frame::audio(
                i as i64 * interval_micros,
                test_audio(per_frame, channels, sample_rate_hz),
            )
        })
        .collect()
}

/// Video and audio frames interleaved in timestamp order.
#[must_use]
pub fn interleaved_frames(
    count: usize,
    interval_micros: i64,
    width: u32,
    height: u32,
    channels: u16,
    sample_rate_hz: u32,
) -> Vec<Frame> {
    let video = video_frames(count, 0, interval_micros, width, height);
    let audio = audio_frames(count, interval_micros, channels, sample_rate_hz);
    video
        .into_iter()
        .zip(audio)
        .flat_map(|(v, a)| [v, a])
        .collect()
}

// =============================================================================
// ScriptedSource
// =============================================================================

enum ScriptStep {
    Frame(Frame),
    Error(SourceError),
}

/// What a [`ScriptedSource`] observed, shared with the test.
#[derive(Debug, Default)]
pub struct SourceProbe {
    inner: Mutex<ProbeState>,
}

#[derive(Debug, Default)]
struct ProbeState {
    opened_path: Option<PathBuf>,
    open_calls: u32,
    close_calls: u32,
    grabs: Vec<Instant>,
}

impl SourceProbe {
    #[must_use]
    pub fn open_calls(&self) -> u32 {
        self.inner.lock().open_calls
    }

    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.inner.lock().close_calls
    }

    #[must_use]
    pub fn opened_path(&self) -> Option<PathBuf> {
        self.inner.lock().opened_path.clone()
    }

    /// Instants at which each successful grab returned a frame.
    #[must_use]
    pub fn grab_instants(&self) -> Vec<Instant> {
        self.inner.lock().grabs.clone()
    }
}

/// Metadata snapshot that changes after a number of `current_metadata` calls
/// or grabs.
#[derive(Debug, Clone, Copy)]
struct MetadataSchedule {
    initial: SourceMetadata,
    later: Option<(u64, SourceMetadata)>,
}

/// A frame source that replays a script.
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    metadata: MetadataSchedule,
    open_error: Option<SourceError>,
    grab_delay: Duration,
    grabbed: u64,
    probe: Arc<SourceProbe>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            steps: frames.into_iter().map(ScriptStep::Frame).collect(),
            metadata: MetadataSchedule {
                initial: SourceMetadata::default(),
                later: None,
            },
            open_error: None,
            grab_delay: Duration::ZERO,
            grabbed: 0,
            probe: Arc::new(SourceProbe::default()),
        }
    }

    /// Metadata reported from the start.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata.initial = metadata;
        self
    }

    /// Metadata reported once `grabs` frames have been grabbed.
    #[must_use]
    pub fn with_metadata_after_grabs(mut self, grabs: u64, metadata: SourceMetadata) -> Self {
        self.metadata.later = Some((grabs, metadata));
        self
    }

    #[must_use]
    pub fn with_open_error(mut self, error: SourceError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Appends a grab failure after the scripted frames.
    #[must_use]
    pub fn then_error(mut self, error: SourceError) -> Self {
        self.steps.push_back(ScriptStep::Error(error));
        self
    }

    /// Simulated decode time per grab.
    #[must_use]
    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    #[must_use]
    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }

    /// Wraps the source in a factory that hands it out once; later calls get
    /// an empty source.
    pub fn into_factory(self) -> impl Fn() -> Box<dyn FrameSource> + Send + Sync + 'static {
        let slot = Mutex::new(Some(self));
        move || -> Box<dyn FrameSource> {
            match slot.lock().take() {
                Some(source) => Box::new(source),
                None => Box::new(ScriptedSource::new(Vec::new())),
            }
        }
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self, path: &Path) -> Result<(), SourceError> {
        let mut probe = self.probe.inner.lock();
        probe.open_calls += 1;
        if let Some(error) = self.open_error.clone() {
            return Err(error);
        }
        probe.opened_path = Some(path.to_path_buf());
        Ok(())
    }

    fn grab_next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.grab_delay.is_zero() {
            thread::sleep(self.grab_delay);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => {
                self.grabbed += 1;
                self.probe.inner.lock().grabs.push(Instant::now());
                Ok(Some(frame))
            }
            Some(ScriptStep::Error(error)) => Err(error),
            None => Ok(None),
        }
    }

    fn current_metadata(&self) -> SourceMetadata {
        match self.metadata.later {
            Some((after, later)) if self.grabbed >= after => later,
            _ => self.metadata.initial,
        }
    }

    fn close(&mut self) {
        self.probe.inner.lock().close_calls += 1;
    }
}

// =============================================================================
// FakeAudioSink
// =============================================================================

#[derive(Debug, Default)]
struct SinkState {
    open: bool,
    started: bool,
    running_override: Option<bool>,
    position_override: Option<i64>,
    format: Option<SinkFormat>,
    buffer_size_bytes: usize,
    written: Vec<u8>,
    play_started: Option<Instant>,
    open_calls: u32,
    start_calls: u32,
    write_calls: u32,
    drain_calls: u32,
    close_calls: u32,
}

/// In-memory audio line.
///
/// Once started it "plays" in real time: the reported position is the
/// smaller of wall time since start and the duration of audio written.
#[derive(Debug)]
pub struct FakeAudioSink {
    supported: Vec<Endianness>,
    write_limit: Option<usize>,
    state: Mutex<SinkState>,
}

impl Default for FakeAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAudioSink {
    /// Supports both byte orders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: vec![Endianness::Little, Endianness::Big],
            write_limit: None,
            state: Mutex::new(SinkState::default()),
        }
    }

    #[must_use]
    pub fn with_supported_endianness(mut self, supported: &[Endianness]) -> Self {
        self.supported = supported.to_vec();
        self
    }

    /// Accept at most `limit` bytes per write.
    #[must_use]
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Forces the running state. `true` also marks the line open.
    pub fn set_running(&self, running: bool) {
        let mut state = self.state.lock();
        if running {
            state.open = true;
        }
        state.running_override = Some(running);
    }

    /// Forces the reported device position.
    pub fn set_position_micros(&self, position: i64) {
        self.state.lock().position_override = Some(position);
    }

    #[must_use]
    pub fn opened_format(&self) -> Option<SinkFormat> {
        self.state.lock().format
    }

    #[must_use]
    pub fn buffer_size_bytes(&self) -> usize {
        self.state.lock().buffer_size_bytes
    }

    #[must_use]
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    #[must_use]
    pub fn open_calls(&self) -> u32 {
        self.state.lock().open_calls
    }

    #[must_use]
    pub fn start_calls(&self) -> u32 {
        self.state.lock().start_calls
    }

    #[must_use]
    pub fn write_calls(&self) -> u32 {
        self.state.lock().write_calls
    }

    #[must_use]
    pub fn drain_calls(&self) -> u32 {
        self.state.lock().drain_calls
    }

    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }
}

impl AudioSink for FakeAudioSink {
    fn is_format_supported(&self, format: &SinkFormat) -> bool {
        format.bit_depth == 16 && self.supported.contains(&format.endianness)
    }

    fn open(&self, format: &SinkFormat, buffer_size_bytes: usize) -> Result<(), SinkError> {
        if !self.is_format_supported(format) {
            return Err(SinkError::Unsupported(format!("{format:?}")));
        }
        let mut state = self.state.lock();
        state.open = true;
        state.format = Some(*format);
        state.buffer_size_bytes = buffer_size_bytes;
        state.open_calls += 1;
        Ok(())
    }

    fn start(&self) {
        let mut state = self.state.lock();
        state.started = true;
        state.running_override = None;
        state.start_calls += 1;
        if state.play_started.is_none() {
            state.play_started = Some(Instant::now());
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, SinkError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(SinkError::NotOpen);
        }
        state.write_calls += 1;
        let accepted = self.write_limit.map_or(bytes.len(), |limit| bytes.len().min(limit));
        state.written.extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    fn position_micros(&self) -> i64 {
        let state = self.state.lock();
        if let Some(position) = state.position_override {
            return position;
        }
        let (Some(format), Some(started)) = (state.format, state.play_started) else {
            return 0;
        };
        let frame_bytes = format.bytes_per_frame().max(1);
        let written = frames_to_micros((state.written.len() / frame_bytes) as u64, format.sample_rate_hz);
        let elapsed = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
        written.min(elapsed)
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn is_running(&self) -> bool {
        let state = self.state.lock();
        state.open && state.running_override.unwrap_or(state.started)
    }

    fn drain(&self) {
        self.state.lock().drain_calls += 1;
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.started = false;
        state.running_override = None;
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.close_calls += 1;
    }
}

// =============================================================================
// Recorders
// =============================================================================

/// A frame delivered to [`RecordingRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    pub relative_timestamp_micros: i64,
    pub thread_is_video_worker: bool,
}

/// Records every rendered frame.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    frames: Mutex<Vec<RenderedFrame>>,
}

impl RecordingRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frames(&self) -> Vec<RenderedFrame> {
        self.frames.lock().clone()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl VideoRenderer for RecordingRenderer {
    fn on_video_frame(&self, image: &ImagePayload, relative_timestamp_micros: i64) {
        self.frames.lock().push(RenderedFrame {
            width: image.width,
            height: image.height,
            relative_timestamp_micros,
            thread_is_video_worker: thread::current().name() == Some("player-video"),
        });
    }
}

/// Records every event and lets tests wait for one.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<PlayerEvent>>,
    arrived: Condvar,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&PlayerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(|e| matches!(e, PlayerEvent::Error { .. }))
    }

    /// Waits until an event matching `predicate` was recorded. Returns false
    /// on timeout.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&PlayerEvent) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if events.iter().any(&predicate) {
                return true;
            }
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.iter().any(&predicate);
            }
        }
    }

    /// Waits for `EndOfMedia` or an `Error`, whichever comes first.
    pub fn wait_for_terminal(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |e| {
            matches!(e, PlayerEvent::EndOfMedia | PlayerEvent::Error { .. })
        })
    }
}

impl PlayerEventListener for RecordingListener {
    fn on_event(&self, event: PlayerEvent) {
        self.events.lock().push(event);
        self.arrived.notify_all();
    }
}
