// SPDX-License-Identifier: MPL-2.0
//! Audio output through the system's default device using cpal.
//!
//! cpal pulls samples from a callback; [`CpalAudioSink`] turns that into the
//! blocking, push-based line the engine expects. Written PCM goes into a
//! bounded buffer that the device callback drains, and `write` blocks while
//! the buffer is full.
//!
//! The `cpal::Stream` itself is not `Send` on every platform, so it lives on
//! a dedicated `cpal-output` thread driven by commands.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::application::port::{AudioSink, Endianness, SinkError, SinkFormat};
use crate::player::time_units::frames_to_micros;

/// How long a blocked `write` waits before re-checking the line state.
const WRITE_POLL: Duration = Duration::from_millis(50);

/// Extra time granted to `drain` beyond the buffered audio duration.
const DRAIN_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Control {
    Play,
    Pause,
    Close,
}

#[derive(Debug, Default)]
struct Ring {
    samples: VecDeque<i16>,
    capacity: usize,
    closed: bool,
}

/// State shared with the device callback.
#[derive(Debug, Default)]
struct Shared {
    ring: Mutex<Ring>,
    consumed: Condvar,
    played_frames: AtomicU64,
    running: AtomicBool,
}

struct Line {
    format: SinkFormat,
    control: mpsc::UnboundedSender<Control>,
    thread: Option<JoinHandle<()>>,
}

/// Push-based PCM line over the default cpal output device.
pub struct CpalAudioSink {
    shared: Arc<Shared>,
    line: Mutex<Option<Line>>,
}

impl Default for CpalAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalAudioSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            line: Mutex::new(None),
        }
    }

    fn format(&self) -> Option<SinkFormat> {
        self.line.lock().as_ref().map(|line| line.format)
    }

    fn send(&self, command: Control) {
        if let Some(line) = self.line.lock().as_ref() {
            // The output thread only exits after `Close`.
            let _ = line.control.send(command);
        }
    }
}

/// Decodes 16-bit PCM bytes in the given byte order.
fn decode_samples(bytes: &[u8], endianness: Endianness) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| match endianness {
            Endianness::Little => i16::from_le_bytes([b[0], b[1]]),
            Endianness::Big => i16::from_be_bytes([b[0], b[1]]),
        })
        .collect()
}

fn default_device() -> Result<cpal::Device, SinkError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| SinkError::Unavailable("no audio output device found".into()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream, SinkError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = u64::from(config.channels.max(1));
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut ring = shared.ring.lock();
                let available = data.len().min(ring.samples.len());
                for (out, sample) in data.iter_mut().zip(ring.samples.drain(..available)) {
                    *out = T::from_sample(sample);
                }
                for out in &mut data[available..] {
                    *out = T::from_sample(0i16);
                }
                drop(ring);
                shared
                    .played_frames
                    .fetch_add(available as u64 / channels, Ordering::Relaxed);
                shared.consumed.notify_all();
            },
            |err| warn!(error = %err, "audio output stream error"),
            None,
        )
        .map_err(|e| SinkError::Unavailable(format!("failed to build audio stream: {e}")))
}

/// Body of the `cpal-output` thread: owns the stream until `Close`.
fn run_output(
    format: SinkFormat,
    shared: Arc<Shared>,
    mut control: mpsc::UnboundedReceiver<Control>,
    ready: oneshot::Sender<Result<(), SinkError>>,
) {
    let opened = default_device().and_then(|device| {
        let supported = device
            .default_output_config()
            .map_err(|e| SinkError::Unavailable(format!("failed to get audio config: {e}")))?;
        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate_hz,
            buffer_size: cpal::BufferSize::Default,
        };
        match supported.sample_format() {
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared),
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shared),
            other => Err(SinkError::Unsupported(format!("device sample format {other:?}"))),
        }
    });

    let stream = match opened {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Some(command) = control.blocking_recv() {
        let result = match command {
            Control::Play => stream.play().map_err(|e| e.to_string()),
            Control::Pause => stream.pause().map_err(|e| e.to_string()),
            Control::Close => break,
        };
        if let Err(e) = result {
            warn!(?command, error = %e, "audio stream command failed");
        }
    }
    debug!("audio output thread exiting");
}

impl AudioSink for CpalAudioSink {
    fn is_format_supported(&self, format: &SinkFormat) -> bool {
        if format.bit_depth != 16 || format.channels == 0 {
            return false;
        }
        let Ok(device) = default_device() else {
            return false;
        };
        let Ok(mut ranges) = device.supported_output_configs() else {
            return false;
        };
        ranges.any(|range| {
            range.channels() == format.channels
                && range.min_sample_rate() <= format.sample_rate_hz
                && format.sample_rate_hz <= range.max_sample_rate()
        })
    }

    fn open(&self, format: &SinkFormat, buffer_size_bytes: usize) -> Result<(), SinkError> {
        if !self.is_format_supported(format) {
            return Err(SinkError::Unsupported(format!(
                "{} Hz, {} channels, {}-bit",
                format.sample_rate_hz, format.channels, format.bit_depth
            )));
        }
        self.close();

        {
            let mut ring = self.shared.ring.lock();
            ring.samples.clear();
            ring.capacity = (buffer_size_bytes / 2).max(usize::from(format.channels));
            ring.closed = false;
        }
        self.shared.played_frames.store(0, Ordering::Relaxed);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let line_format = *format;
        let thread = thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || run_output(line_format, shared, control_rx, ready_tx))
            .map_err(|e| SinkError::Unavailable(format!("failed to spawn output thread: {e}")))?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SinkError::Unavailable("audio output thread died".into()));
            }
        }

        *self.line.lock() = Some(Line {
            format: *format,
            control: control_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn start(&self) {
        self.send(Control::Play);
        self.shared.running.store(true, Ordering::SeqCst);
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, SinkError> {
        let format = self.format().ok_or(SinkError::NotOpen)?;
        let samples = decode_samples(bytes, format.endianness);
        let mut offset = 0;
        let mut ring = self.shared.ring.lock();

        while offset < samples.len() {
            if ring.closed {
                break;
            }
            let room = ring.capacity.saturating_sub(ring.samples.len());
            if room == 0 {
                let timed_out = self.shared.consumed.wait_for(&mut ring, WRITE_POLL).timed_out();
                if timed_out && !self.shared.running.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            let take = room.min(samples.len() - offset);
            ring.samples.extend(&samples[offset..offset + take]);
            offset += take;
        }
        Ok(offset * 2)
    }

    fn position_micros(&self) -> i64 {
        let Some(format) = self.format() else {
            return 0;
        };
        frames_to_micros(
            self.shared.played_frames.load(Ordering::Relaxed),
            format.sample_rate_hz,
        )
    }

    fn is_open(&self) -> bool {
        self.line.lock().is_some()
    }

    fn is_running(&self) -> bool {
        self.is_open() && self.shared.running.load(Ordering::SeqCst)
    }

    fn drain(&self) {
        let Some(format) = self.format() else {
            return;
        };
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        let mut ring = self.shared.ring.lock();
        let frames = (ring.samples.len() / usize::from(format.channels.max(1))) as u64;
        let buffered = Duration::from_micros(frames_to_micros(frames, format.sample_rate_hz).unsigned_abs());
        let deadline = Instant::now() + buffered + DRAIN_SLACK;
        while !ring.samples.is_empty() && !ring.closed {
            if self.shared.consumed.wait_until(&mut ring, deadline).timed_out() {
                debug!(remaining = ring.samples.len(), "audio drain timed out");
                break;
            }
        }
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.send(Control::Pause);
    }

    fn close(&self) {
        let Some(mut line) = self.line.lock().take() else {
            return;
        };
        {
            let mut ring = self.shared.ring.lock();
            ring.closed = true;
            ring.samples.clear();
        }
        self.shared.consumed.notify_all();
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = line.control.send(Control::Close);
        if let Some(thread) = line.thread.take() {
            if thread.join().is_err() {
                warn!("audio output thread panicked");
            }
        }
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_both_byte_orders() {
        let bytes = [0x34, 0x12, 0xff, 0x7f];
        assert_eq!(decode_samples(&bytes, Endianness::Little), vec![0x1234, i16::MAX]);
        assert_eq!(
            decode_samples(&bytes, Endianness::Big),
            vec![0x3412, i16::from_be_bytes([0xff, 0x7f])]
        );
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        assert_eq!(decode_samples(&[1, 0, 9], Endianness::Little), vec![1]);
    }

    #[test]
    fn write_before_open_fails() {
        let sink = CpalAudioSink::new();
        assert!(matches!(sink.write(&[0, 0]), Err(SinkError::NotOpen)));
        assert!(!sink.is_open());
        assert!(!sink.is_running());
        assert_eq!(sink.position_micros(), 0);
    }

    #[test]
    fn rejects_non_16_bit_formats() {
        let sink = CpalAudioSink::new();
        let format = SinkFormat {
            sample_rate_hz: 48_000,
            channels: 2,
            bit_depth: 24,
            endianness: Endianness::Little,
        };
        assert!(!sink.is_format_supported(&format));
    }

    #[test]
    fn close_without_open_is_a_no_op() {
        let sink = CpalAudioSink::new();
        sink.close();
        sink.drain();
        sink.stop();
        assert!(!sink.is_open());
    }
}
