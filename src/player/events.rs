// SPDX-License-Identifier: MPL-2.0
//! Event delivery to the player's listener.
//!
//! [`EventDispatcher`] enforces the per-session delivery rules:
//!
//! - `VideoDimensionsDetected` and `PlaybackStarted`: at most once
//! - `EndOfMedia`: at most once, and never after a fatal error
//! - `Error`: once per distinct cause kind; `Cancelled` is never reported
//!
//! [`event_channel`] adapts the listener callback to a Tokio channel for
//! async or UI consumers.

use crate::application::port::{PlayerEvent, PlayerEventListener};
use crate::error::PlaybackError;
use crate::player::metadata::VideoParams;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::mem::{discriminant, Discriminant};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Default)]
struct DeliveryFlags {
    dimensions_sent: bool,
    started_sent: bool,
    end_sent: bool,
    failed: bool,
    reported: HashSet<Discriminant<PlaybackError>>,
}

/// Per-session event gate in front of the listener.
pub struct EventDispatcher {
    listener: Option<Arc<dyn PlayerEventListener>>,
    flags: Mutex<DeliveryFlags>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("has_listener", &self.listener.is_some())
            .field("failed", &self.flags.lock().failed)
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new(listener: Option<Arc<dyn PlayerEventListener>>) -> Self {
        Self {
            listener,
            flags: Mutex::new(DeliveryFlags::default()),
        }
    }

    /// Sends `VideoDimensionsDetected` the first time only.
    pub fn video_dimensions_detected(&self, params: &VideoParams) -> bool {
        {
            let mut flags = self.flags.lock();
            if flags.dimensions_sent {
                return false;
            }
            flags.dimensions_sent = true;
        }
        self.deliver(PlayerEvent::VideoDimensionsDetected {
            width: params.width,
            height: params.height,
            pixel_format: params.pixel_format,
            frame_rate_hz: params.frame_rate_hz,
        });
        true
    }

    /// Sends `PlaybackStarted` the first time only.
    pub fn playback_started(&self) -> bool {
        {
            let mut flags = self.flags.lock();
            if flags.started_sent {
                return false;
            }
            flags.started_sent = true;
        }
        self.deliver(PlayerEvent::PlaybackStarted);
        true
    }

    /// Sends `EndOfMedia` unless already sent or a fatal error ended the
    /// session.
    pub fn end_of_media(&self) -> bool {
        {
            let mut flags = self.flags.lock();
            if flags.end_sent || flags.failed {
                return false;
            }
            flags.end_sent = true;
        }
        self.deliver(PlayerEvent::EndOfMedia);
        true
    }

    /// Reports `err` once per kind. Returns whether an event was sent.
    pub fn report_error(&self, err: PlaybackError) -> bool {
        if !err.is_reportable() {
            return false;
        }
        {
            let mut flags = self.flags.lock();
            if err.is_fatal() {
                flags.failed = true;
            }
            if !flags.reported.insert(discriminant(&err)) {
                debug!(%err, "suppressing repeated error");
                return false;
            }
        }
        self.deliver(PlayerEvent::error(err));
        true
    }

    /// Returns true once a fatal error has been reported.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.flags.lock().failed
    }

    fn deliver(&self, event: PlayerEvent) {
        let Some(listener) = &self.listener else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
            error!("event listener panicked");
        }
    }
}

/// Listener half of [`event_channel`].
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<PlayerEvent>,
}

impl PlayerEventListener for ChannelListener {
    fn on_event(&self, event: PlayerEvent) {
        // The receiver may be gone; events are then discarded.
        let _ = self.sender.send(event);
    }
}

/// Receiving half of [`event_channel`].
#[derive(Debug)]
pub struct EventChannel {
    receiver: mpsc::UnboundedReceiver<PlayerEvent>,
}

impl EventChannel {
    /// Waits for the next event. Returns `None` once every listener is gone.
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is ready (non-blocking).
    pub fn try_recv(&mut self) -> Option<PlayerEvent> {
        self.receiver.try_recv().ok()
    }

    /// Blocks the current thread for the next event. Must not be called from
    /// inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<PlayerEvent> {
        self.receiver.blocking_recv()
    }
}

/// Creates a listener that forwards every event into an unbounded channel.
#[must_use]
pub fn event_channel() -> (ChannelListener, EventChannel) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelListener { sender }, EventChannel { receiver })
}
