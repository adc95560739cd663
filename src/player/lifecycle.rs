// SPDX-License-Identifier: MPL-2.0
//! Player lifecycle: `start`, `stop`, `close`.
//!
//! A [`Player`] runs at most one session at a time. Each session gets a fresh
//! clock, fresh workers and fresh counters; nothing carries over.
//!
//! # Example
//!
//! ```ignore
//! use avsync::{Player, PlayerEvent};
//!
//! let mut player = Player::builder()
//!     .source_factory(|| Box::new(MySource::new()))
//!     .renderer(|image: &ImagePayload, ts: i64| present(image, ts))
//!     .listener(|event: PlayerEvent| println!("{event:?}"))
//!     .build()?;
//!
//! player.start("movie.mkv")?;
//! // ...
//! player.close();
//! ```

use crate::application::port::{
    AudioDataHandler, AudioSink, FrameSource, PlayerEventListener, SinkError, VideoRenderer,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::player::audio_output::AudioOutputManager;
use crate::player::cancel::{CancelToken, CompletionLatch, LatchGuard};
use crate::player::clock::MediaClock;
use crate::player::events::EventDispatcher;
use crate::player::scheduler::{Scheduler, SessionContext, SinkFactory};
use crate::player::state::{PlaybackState, SessionStats, StateCell, StatsSnapshot};
use crate::player::worker::{DispatchError, Job, QueueBound, Worker};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Creates a fresh frame source for each session.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Resources shared between the loop thread and the controlling thread.
///
/// Whoever gets there first releases them: the loop on its way out, or
/// `stop()` when the loop does not finish in time.
pub(crate) struct SessionResources {
    video_worker: Mutex<Option<Worker>>,
    audio_worker: Mutex<Option<Worker>>,
    audio: Mutex<Option<Arc<AudioOutputManager>>>,
    clock: Arc<MediaClock>,
    stats: Arc<SessionStats>,
    state: Arc<StateCell>,
    cancel: Arc<CancelToken>,
    worker_shutdown_timeout: Duration,
    stop_requested: AtomicBool,
    released: AtomicBool,
}

impl SessionResources {
    pub(crate) fn clock(&self) -> Arc<MediaClock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn state(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub(crate) fn set_audio(&self, output: Arc<AudioOutputManager>) {
        *self.audio.lock() = Some(output);
    }

    pub(crate) fn dispatch_video(&self, job: Job) -> std::result::Result<(), DispatchError> {
        match self.video_worker.lock().as_ref() {
            Some(worker) => worker.dispatch(job),
            None => Err(DispatchError::Closed),
        }
    }

    pub(crate) fn dispatch_audio(&self, job: Job) -> std::result::Result<(), DispatchError> {
        match self.audio_worker.lock().as_ref() {
            Some(worker) => worker.dispatch(job),
            None => Err(DispatchError::Closed),
        }
    }

    /// Cancels the session on behalf of the controlling thread.
    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// True once `stop()` has been called. A cancellation caused by a worker
    /// timing out does not count.
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Closes both worker queues and waits up to `timeout` for each. A
    /// worker that does not finish is cancelled and detached.
    ///
    /// Returns `true` if every worker finished in time.
    pub(crate) fn shutdown_workers(&self, timeout: Duration) -> bool {
        let mut drained = true;
        for slot in [&self.video_worker, &self.audio_worker] {
            let worker = slot.lock().take();
            if let Some(mut worker) = worker {
                if !worker.shutdown(timeout) {
                    self.cancel.cancel();
                    drained = false;
                }
            }
        }
        drained
    }

    /// Workers first, then the audio sink, then the clock. Runs once.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_workers(self.worker_shutdown_timeout);
        let audio = self.audio.lock().take();
        if let Some(audio) = audio {
            audio.teardown();
        }
        self.clock.reset();
    }
}

/// Handles of the session currently owned by the player.
struct ActiveSession {
    handle: Option<JoinHandle<()>>,
    done: Arc<CompletionLatch>,
    cancel: Arc<CancelToken>,
    resources: Arc<SessionResources>,
    state: Arc<StateCell>,
    stats: Arc<SessionStats>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.done.is_set() && !self.cancel.is_cancelled()
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("playback loop thread panicked");
            }
        }
    }
}

/// Builder for [`Player`].
#[derive(Default)]
pub struct PlayerBuilder {
    source_factory: Option<SourceFactory>,
    renderer: Option<Arc<dyn VideoRenderer>>,
    listener: Option<Arc<dyn PlayerEventListener>>,
    sink_factory: Option<SinkFactory>,
    audio_handler: Option<Arc<dyn AudioDataHandler>>,
    config: EngineConfig,
}

impl PlayerBuilder {
    /// Required. Called once per `start()`.
    #[must_use]
    pub fn source_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn FrameSource> + Send + Sync + 'static,
    {
        self.source_factory = Some(Arc::new(factory));
        self
    }

    /// Required.
    #[must_use]
    pub fn renderer<R>(mut self, renderer: R) -> Self
    where
        R: VideoRenderer + 'static,
    {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Same as [`renderer`](Self::renderer), for an already shared renderer.
    #[must_use]
    pub fn shared_renderer(mut self, renderer: Arc<dyn VideoRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    #[must_use]
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: PlayerEventListener + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    #[must_use]
    pub fn shared_listener(mut self, listener: Arc<dyn PlayerEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Without a sink factory, audio frames are ignored.
    #[must_use]
    pub fn audio_sink_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<Arc<dyn AudioSink>, SinkError> + Send + Sync + 'static,
    {
        self.sink_factory = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn audio_data_handler<H>(mut self, handler: H) -> Self
    where
        H: AudioDataHandler + 'static,
    {
        self.audio_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the source factory or renderer is missing
    /// or the configuration is inconsistent.
    pub fn build(self) -> Result<Player> {
        let source_factory = self
            .source_factory
            .ok_or_else(|| Error::Config("a frame source factory is required".into()))?;
        let renderer = self
            .renderer
            .ok_or_else(|| Error::Config("a video renderer is required".into()))?;
        self.config.validate()?;

        Ok(Player {
            source_factory,
            renderer,
            listener: self.listener,
            sink_factory: self.sink_factory,
            audio_handler: self.audio_handler,
            config: Arc::new(self.config),
            session: None,
            final_state: PlaybackState::Idle,
            final_stats: StatsSnapshot::default(),
        })
    }
}

/// Playback controller.
pub struct Player {
    source_factory: SourceFactory,
    renderer: Arc<dyn VideoRenderer>,
    listener: Option<Arc<dyn PlayerEventListener>>,
    sink_factory: Option<SinkFactory>,
    audio_handler: Option<Arc<dyn AudioDataHandler>>,
    config: Arc<EngineConfig>,
    session: Option<ActiveSession>,
    final_state: PlaybackState,
    final_stats: StatsSnapshot,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Player {
    #[must_use]
    pub fn builder() -> PlayerBuilder {
        PlayerBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts playing `path` on a new session.
    ///
    /// Returns `Ok(false)` without doing anything if a session is still
    /// running. Open failures are reported asynchronously as an `Error`
    /// event, not through this result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a thread cannot be spawned.
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if self.is_running() {
            warn!(path = %path.display(), "start ignored, playback already running");
            return Ok(false);
        }
        self.reap();

        let cancel = Arc::new(CancelToken::new());
        let events = Arc::new(EventDispatcher::new(self.listener.clone()));
        let video_bound = self
            .config
            .workers
            .video_queue_depth
            .map_or(QueueBound::Unbounded, QueueBound::Bounded);
        let video_worker = Worker::spawn("player-video", video_bound, Arc::clone(&cancel), Arc::clone(&events))?;
        let audio_worker = Worker::spawn(
            "player-audio",
            QueueBound::Unbounded,
            Arc::clone(&cancel),
            Arc::clone(&events),
        )?;

        let state = Arc::new(StateCell::default());
        let stats = Arc::new(SessionStats::new());
        let resources = Arc::new(SessionResources {
            video_worker: Mutex::new(Some(video_worker)),
            audio_worker: Mutex::new(Some(audio_worker)),
            audio: Mutex::new(None),
            clock: Arc::new(MediaClock::new()),
            stats: Arc::clone(&stats),
            state: Arc::clone(&state),
            cancel: Arc::clone(&cancel),
            worker_shutdown_timeout: self.config.workers.shutdown_timeout(),
            stop_requested: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });

        let ctx = SessionContext {
            path: path.to_path_buf(),
            source: (self.source_factory)(),
            renderer: Arc::clone(&self.renderer),
            events,
            sink_factory: self.sink_factory.clone(),
            audio_handler: self.audio_handler.clone(),
            config: Arc::clone(&self.config),
            cancel: Arc::clone(&cancel),
            resources: Arc::clone(&resources),
        };

        let done = Arc::new(CompletionLatch::new());
        let latch = Arc::clone(&done);
        let spawned = thread::Builder::new()
            .name("player-loop".into())
            .spawn(move || {
                let _done = LatchGuard(&latch);
                if catch_unwind(AssertUnwindSafe(|| Scheduler::new(ctx).run())).is_err() {
                    error!("playback loop panicked");
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                resources.release();
                return Err(e.into());
            }
        };

        info!(path = %path.display(), "playback session started");
        self.session = Some(ActiveSession {
            handle: Some(handle),
            done,
            cancel,
            resources,
            state,
            stats,
        });
        Ok(true)
    }

    /// Requests the loop to stop and waits for it up to the configured
    /// timeout, then releases session resources regardless.
    pub fn stop(&mut self) {
        let timeout = self.config.lifecycle.stop_timeout();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.resources.request_stop();
        if session.done.wait_timeout(timeout) {
            session.join();
        } else {
            warn!(
                timeout_ms = timeout.as_millis(),
                "playback loop did not stop in time, forcing cleanup"
            );
        }
        session.resources.release();
    }

    /// `stop()` plus full session reset. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.stop();
        self.reap();
    }

    /// Returns true while a session is playing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(ActiveSession::is_running)
    }

    /// Current (or last) session state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map_or(self.final_state, |session| session.state.get())
    }

    /// Counters of the current (or last) session.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.session
            .as_ref()
            .map_or(self.final_stats, |session| session.stats.snapshot())
    }

    /// Drops the finished session, keeping its final state and counters.
    fn reap(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if session.done.is_set() {
            session.join();
        }
        session.resources.release();
        self.final_state = PlaybackState::Stopped;
        self.final_stats = session.stats.snapshot();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}
