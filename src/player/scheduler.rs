// SPDX-License-Identifier: MPL-2.0
//! The playback loop.
//!
//! One [`Scheduler`] runs per session on the `player-loop` thread. It owns the
//! frame source and drives the state machine:
//!
//! ```text
//! Idle → MetadataResolving → Warmup (optional) → Streaming → Draining → Stopped
//! ```
//!
//! Each iteration grabs one frame, finalizes metadata from it, anchors the
//! media clock, hands the payload to the video or audio worker, and then
//! sleeps if decoding has run too far ahead of the clock (backpressure).
//! Resource cleanup happens in `Drop`, so every exit path (end of stream,
//! error, cancellation, panic) releases the workers, the audio sink and the
//! source.

use crate::application::port::{
    AudioDataHandler, AudioSink, FrameSource, SinkError, SourceMetadata, VideoRenderer,
};
use crate::config::defaults::{EMPTY_FRAME_YIELD_MS, UNANCHORED_FRAME_YIELD_MS, WARMUP_YIELD_MS};
use crate::config::{EngineConfig, LateFramePolicy, SyncConfig};
use crate::error::PlaybackError;
use crate::media::{Frame, FrameKind, FramePayload, ImagePayload};
use crate::player::audio_output::AudioOutputManager;
use crate::player::cancel::CancelToken;
use crate::player::clock::MediaClock;
use crate::player::events::EventDispatcher;
use crate::player::lifecycle::SessionResources;
use crate::player::metadata::{AudioParams, Finalization, MetadataResolver, Resolution, VideoParams};
use crate::player::state::{should_log, AudioState, PlaybackSession, PlaybackState, SessionStats};
use crate::player::time_units::{micros_to_duration, micros_to_secs};
use crate::player::worker::{DispatchError, Job};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates the session's audio sink. Called at most once per session.
pub type SinkFactory = Arc<dyn Fn() -> Result<Arc<dyn AudioSink>, SinkError> + Send + Sync>;

/// What the video worker does with a frame, given its delay against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingDecision {
    /// Early: wait, then render.
    Sleep(Duration),
    /// On time (or late against an unreliable clock): render now.
    RenderNow,
    /// Late against the audio clock: handled per [`LateFramePolicy`].
    Late,
}

/// Video frame pacing parameters, copied into every video job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoPacing {
    min_meaningful_delay_micros: i64,
    max_sleep: Duration,
    catch_up_threshold_micros: i64,
    late_policy: LateFramePolicy,
}

impl VideoPacing {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            min_meaningful_delay_micros: config.min_meaningful_delay_micros(),
            max_sleep: config.video_max_sleep_if_early(),
            catch_up_threshold_micros: config.video_catch_up_threshold_micros(),
            late_policy: config.late_frame_policy,
        }
    }

    /// `delay` is the frame's relative timestamp minus the clock position.
    #[must_use]
    pub fn decide(&self, delay_micros: i64, audio_clock_active: bool) -> PacingDecision {
        if delay_micros > self.min_meaningful_delay_micros {
            PacingDecision::Sleep(micros_to_duration(delay_micros).min(self.max_sleep))
        } else if delay_micros < -self.catch_up_threshold_micros && audio_clock_active {
            PacingDecision::Late
        } else {
            PacingDecision::RenderNow
        }
    }
}

/// Everything a session needs, moved onto the loop thread.
pub(crate) struct SessionContext {
    pub path: PathBuf,
    pub source: Box<dyn FrameSource>,
    pub renderer: Arc<dyn VideoRenderer>,
    pub events: Arc<EventDispatcher>,
    pub sink_factory: Option<SinkFactory>,
    pub audio_handler: Option<Arc<dyn AudioDataHandler>>,
    pub config: Arc<EngineConfig>,
    pub cancel: Arc<CancelToken>,
    pub resources: Arc<SessionResources>,
}

enum Step {
    Continue,
    EndOfStream,
}

/// Runs one playback session.
pub(crate) struct Scheduler {
    ctx: SessionContext,
    session: PlaybackSession,
    pacing: VideoPacing,
    source_meta: SourceMetadata,
    source_opened: bool,
    grace_checked: bool,
    /// Set once a frame has been dispatched against the clock anchor.
    anchor_committed: bool,
}

impl Scheduler {
    pub(crate) fn new(ctx: SessionContext) -> Self {
        let session = PlaybackSession::new(
            ctx.resources.clock(),
            ctx.resources.stats(),
            ctx.resources.state(),
        );
        let pacing = VideoPacing::new(&ctx.config.sync);
        Self {
            ctx,
            session,
            pacing,
            source_meta: SourceMetadata::default(),
            source_opened: false,
            grace_checked: false,
            anchor_committed: false,
        }
    }

    /// Runs the session to completion. Cleanup happens when `self` drops.
    pub(crate) fn run(mut self) {
        match self.run_inner() {
            Ok(()) | Err(PlaybackError::Cancelled) => {}
            Err(err) => {
                warn!(%err, "playback session failed");
                self.ctx.events.report_error(err);
            }
        }
    }

    fn run_inner(&mut self) -> Result<(), PlaybackError> {
        self.checkpoint()?;
        self.ctx
            .source
            .open(&self.ctx.path)
            .map_err(|e| PlaybackError::OpenFailure(e.to_string()))?;
        self.source_opened = true;
        info!(path = %self.ctx.path.display(), "media source opened");

        self.session.transition(PlaybackState::MetadataResolving);
        let resolver = MetadataResolver::new(&self.ctx.config.metadata);
        self.source_meta = match resolver.resolve(self.ctx.source.as_ref(), &self.ctx.cancel) {
            Resolution::Resolved(snapshot) | Resolution::Partial(snapshot) => snapshot,
            Resolution::Cancelled => return Err(PlaybackError::Cancelled),
        };

        if self.ctx.config.audio.warmup_enabled && self.source_meta.has_audio {
            self.session.transition(PlaybackState::Warmup);
            if let Step::EndOfStream = self.warmup()? {
                return self.finish_stream();
            }
        }

        self.ctx.events.playback_started();
        self.session.transition(PlaybackState::Streaming);

        loop {
            if let Step::EndOfStream = self.step(true)? {
                return self.finish_stream();
            }
        }
    }

    fn checkpoint(&self) -> Result<(), PlaybackError> {
        if self.ctx.cancel.is_cancelled() {
            Err(PlaybackError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Feeds the first frames without backpressure until the audio clock
    /// engages.
    fn warmup(&mut self) -> Result<Step, PlaybackError> {
        let max_frames = self.ctx.config.audio.warmup_max_frames;
        for _ in 0..max_frames {
            if let Step::EndOfStream = self.step(false)? {
                return Ok(Step::EndOfStream);
            }
            if self.session.clock.is_audio_clock_active() {
                info!(
                    frames = self.session.loop_iteration,
                    "audio clock engaged during warm-up"
                );
                return Ok(Step::Continue);
            }
            if !self
                .ctx
                .cancel
                .sleep(Duration::from_millis(WARMUP_YIELD_MS))
            {
                return Err(PlaybackError::Cancelled);
            }
        }
        warn!(max_frames, "audio clock did not engage during warm-up");
        Ok(Step::Continue)
    }

    /// Lets queued work finish, then reports end of media.
    ///
    /// Workers that miss the drain deadline are forced down and end of media
    /// is still reported. Only an explicit stop suppresses it.
    fn finish_stream(&mut self) -> Result<(), PlaybackError> {
        self.session.transition(PlaybackState::Draining);
        info!(
            frames = self.session.loop_iteration,
            position_secs = micros_to_secs(self.session.clock.position_micros()),
            "end of stream, draining"
        );
        let drain_timeout = self.ctx.config.workers.shutdown_timeout()
            + micros_to_duration(self.ctx.config.sync.max_read_ahead_micros());
        let drained = self.ctx.resources.shutdown_workers(drain_timeout);
        if self.ctx.resources.stop_requested() {
            return Err(PlaybackError::Cancelled);
        }
        if !drained {
            warn!(
                timeout_ms = drain_timeout.as_millis(),
                "workers did not drain in time, pending frames discarded"
            );
        }
        self.ctx.events.end_of_media();
        Ok(())
    }

    fn step(&mut self, streaming: bool) -> Result<Step, PlaybackError> {
        self.checkpoint()?;
        let iteration = self.session.next_iteration();

        let frame = match self.ctx.source.grab_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Step::EndOfStream),
            Err(e) => return Err(PlaybackError::GrabError(e.to_string())),
        };
        let grabbed = self.session.stats.record_frame_grabbed();

        self.finalize_metadata(&frame);
        self.check_metadata_grace(grabbed)?;

        let timestamp = frame.timestamp_micros;
        let clock = Arc::clone(&self.session.clock);
        // A zero anchor may still move, but not once a frame was timed against it.
        let anchor_movable = !self.anchor_committed && clock.first_frame_timestamp_micros() <= 0;
        if !clock.is_initialized() || anchor_movable {
            clock.initialize(timestamp);
        }
        if !clock.is_initialized() {
            if should_log(iteration) {
                debug!(iteration, timestamp, "frame timestamp unusable, clock not anchored");
            }
            self.ctx
                .cancel
                .sleep(Duration::from_millis(UNANCHORED_FRAME_YIELD_MS));
            return Ok(Step::Continue);
        }
        let relative = clock.relative_micros(timestamp);

        let kind = frame.kind();
        match kind {
            FrameKind::Video if self.session.metadata.video().is_some() => {
                self.dispatch_video(frame, relative, iteration);
                self.anchor_committed = true;
            }
            FrameKind::Audio if self.session.audio_state == AudioState::Ready => {
                self.dispatch_audio(frame, iteration);
                self.anchor_committed = true;
            }
            FrameKind::Empty => {
                self.session.stats.record_empty_frame();
            }
            FrameKind::Video | FrameKind::Audio => {}
        }

        if !self.session.audio_clock_seen && clock.is_audio_clock_active() {
            self.session.audio_clock_seen = true;
            self.session.stats.mark_audio_clock_engaged();
        }

        let slept = streaming && self.apply_backpressure(relative, iteration);
        if kind == FrameKind::Empty && !slept {
            self.ctx
                .cancel
                .sleep(Duration::from_millis(EMPTY_FRAME_YIELD_MS));
        }
        Ok(Step::Continue)
    }

    fn finalize_metadata(&mut self, frame: &Frame) {
        match &frame.payload {
            FramePayload::Image(image) if image.has_valid_dimensions() => {
                if self.session.metadata.video().is_none() {
                    self.source_meta = self.ctx.source.current_metadata();
                }
                let params = VideoParams::from_frame(
                    image,
                    &self.source_meta,
                    self.ctx.config.metadata.fallback_frame_rate,
                );
                if self.session.metadata.finalize_video(params) == Finalization::First {
                    self.ctx.events.video_dimensions_detected(&params);
                }
            }
            FramePayload::Audio(audio)
                if !audio.samples.is_empty() && self.session.audio_state == AudioState::Pending =>
            {
                self.source_meta = self.ctx.source.current_metadata();
                match AudioParams::resolve(audio, &self.source_meta) {
                    Some(params) => self.setup_audio(params),
                    None => {
                        if !self.session.missing_audio_params_logged {
                            self.session.missing_audio_params_logged = true;
                            warn!("audio frame without channel count or sample rate, waiting");
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn setup_audio(&mut self, params: AudioParams) {
        self.session.metadata.finalize_audio(params);

        let Some(factory) = self.ctx.sink_factory.as_ref() else {
            info!("no audio sink configured, audio disabled");
            self.session.audio_state = AudioState::Disabled;
            return;
        };

        let result = factory()
            .map_err(|e| PlaybackError::AudioUnavailable(e.to_string()))
            .and_then(|sink| {
                AudioOutputManager::setup(
                    sink,
                    params,
                    &self.ctx.config.audio,
                    Arc::clone(&self.session.clock),
                    Arc::clone(&self.session.stats),
                )
            });

        match result {
            Ok(output) => {
                let output = Arc::new(output);
                let prime_ms = self.ctx.config.audio.prime_silence_ms;
                if prime_ms > 0 {
                    if let Err(err) = output.prime_silence(Duration::from_millis(prime_ms)) {
                        warn!(%err, "failed to prime audio sink");
                    }
                }
                self.ctx.resources.set_audio(Arc::clone(&output));
                self.session.audio = Some(output);
                self.session.audio_state = AudioState::Ready;
            }
            Err(err) => {
                warn!(%err, "audio output unavailable, continuing without audio");
                self.session.audio_state = AudioState::Disabled;
                self.ctx.events.report_error(err);
            }
        }
    }

    /// Fails the session if expected streams are still unknown once the
    /// grace period is over. Checked once.
    fn check_metadata_grace(&mut self, grabbed: u64) -> Result<(), PlaybackError> {
        if self.grace_checked || grabbed <= self.ctx.config.metadata.frame_grace {
            return Ok(());
        }
        self.grace_checked = true;
        let snapshot = self.ctx.source.current_metadata();
        match self
            .session
            .metadata
            .unresolved_reason(&snapshot, self.session.audio_state.attempted())
        {
            Some(reason) => Err(PlaybackError::MetadataTimeout(reason)),
            None => Ok(()),
        }
    }

    fn dispatch_video(&mut self, frame: Frame, relative: i64, iteration: u64) {
        let FramePayload::Image(image) = frame.payload else {
            return;
        };
        let job = video_job(
            image,
            relative,
            self.pacing,
            Arc::clone(&self.session.clock),
            Arc::clone(&self.ctx.renderer),
            Arc::clone(&self.ctx.cancel),
            Arc::clone(&self.session.stats),
        );
        if let Err(err) = self.ctx.resources.dispatch_video(job) {
            if err == DispatchError::Full {
                let dropped = self.session.stats.record_video_dropped();
                if should_log(dropped) {
                    warn!(iteration, dropped, "video worker busy, frame dropped");
                }
            }
        }
    }

    fn dispatch_audio(&mut self, frame: Frame, iteration: u64) {
        let FramePayload::Audio(audio) = frame.payload else {
            return;
        };
        let Some(output) = self.session.audio.as_ref().map(Arc::clone) else {
            return;
        };
        let handler = self.ctx.audio_handler.clone();
        let cancel = Arc::clone(&self.ctx.cancel);
        let job: Job = Box::new(move || {
            if cancel.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            match handler {
                Some(handler) => handler.on_audio_data(&audio, &output),
                None => output.play(&audio).map(|_| ()),
            }
        });
        if let Err(err) = self.ctx.resources.dispatch_audio(job) {
            if err == DispatchError::Full {
                let dropped = self.session.stats.record_audio_dropped();
                if should_log(dropped) {
                    warn!(iteration, dropped, "audio worker busy, frame dropped");
                }
            }
        }
    }

    /// Sleeps while decoding is more than the read-ahead limit ahead of the
    /// clock. Returns whether it slept.
    fn apply_backpressure(&self, relative: i64, iteration: u64) -> bool {
        let sync = &self.ctx.config.sync;
        let clock = &self.session.clock;
        let read_ahead = relative - clock.position_micros();
        let max_read_ahead = sync.max_read_ahead_micros();
        if read_ahead <= max_read_ahead {
            return false;
        }

        let audio_active = clock.is_audio_clock_active();
        let sleep_micros = (read_ahead - max_read_ahead).min(sync.loop_sleep_cap_micros(audio_active));
        if should_log(iteration) {
            debug!(
                iteration,
                read_ahead_micros = read_ahead,
                sleep_micros,
                audio_clock = audio_active,
                "backpressure"
            );
        }
        self.ctx.cancel.sleep(micros_to_duration(sleep_micros));
        self.session
            .stats
            .add_backpressure_sleep(u64::try_from(sleep_micros).unwrap_or(0));
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.ctx.resources.release();
        if self.source_opened {
            self.ctx.source.close();
        }
        let stats = self.session.stats.snapshot();
        self.session.transition(PlaybackState::Stopped);
        info!(
            iterations = self.session.loop_iteration,
            frames = stats.frames_grabbed,
            rendered = stats.video_frames_rendered,
            late = stats.late_video_frames,
            audio_bytes = stats.audio_bytes_written,
            "playback session finished"
        );
    }
}

fn video_job(
    image: ImagePayload,
    relative: i64,
    pacing: VideoPacing,
    clock: Arc<MediaClock>,
    renderer: Arc<dyn VideoRenderer>,
    cancel: Arc<CancelToken>,
    stats: Arc<SessionStats>,
) -> Job {
    Box::new(move || {
        if cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let delay = relative - clock.position_micros();
        match pacing.decide(delay, clock.is_audio_clock_active()) {
            PacingDecision::Sleep(duration) => {
                if !cancel.sleep(duration) {
                    return Err(PlaybackError::Cancelled);
                }
            }
            PacingDecision::Late => {
                let late = stats.record_late_video();
                if should_log(late) {
                    debug!(delay_micros = delay, relative, late, "late video frame");
                }
                if pacing.late_policy == LateFramePolicy::Drop {
                    stats.record_late_dropped();
                    return Ok(());
                }
            }
            PacingDecision::RenderNow => {}
        }
        renderer.on_video_frame(&image, relative);
        stats.record_video_rendered();
        Ok(())
    })
}
