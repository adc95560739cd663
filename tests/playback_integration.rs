// SPDX-License-Identifier: MPL-2.0
//! End-to-end playback scenarios against scripted sources and fake sinks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use avsync::application::port::{AudioSink, Endianness, SourceError, SourceMetadata};
use avsync::config::EngineConfig;
use avsync::media::{Frame, ImagePayload, PixelFormat};
use avsync::player::MediaClock;
use avsync::test_utils::{
    audio_frames, interleaved_frames, test_image, video_frames, FakeAudioSink, RecordingListener,
    RecordingRenderer, ScriptedSource,
};
use avsync::{PlaybackError, PlaybackState, Player, PlayerEvent};

const TERMINAL_TIMEOUT: Duration = Duration::from_secs(15);
const FRAME_40MS: i64 = 40_000;

/// Short metadata polling so tests do not sit in the resolver.
fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.metadata.poll_min_interval_ms = 5;
    config.metadata.poll_max_interval_ms = 20;
    config.metadata.poll_budget_ms = 100;
    config
}

fn av_metadata() -> SourceMetadata {
    SourceMetadata {
        width: 640,
        height: 480,
        pixel_format: PixelFormat(3),
        frame_rate_hz: 25.0,
        audio_channels: 2,
        audio_sample_rate_hz: 44_100,
        has_video: true,
        has_audio: true,
    }
}

struct Harness {
    player: Player,
    renderer: Arc<RecordingRenderer>,
    listener: Arc<RecordingListener>,
    sink: Arc<FakeAudioSink>,
    sink_requests: Arc<AtomicUsize>,
}

fn harness(source: ScriptedSource, sink: FakeAudioSink, config: EngineConfig) -> Harness {
    let renderer = Arc::new(RecordingRenderer::new());
    let listener = Arc::new(RecordingListener::new());
    let sink = Arc::new(sink);
    let sink_requests = Arc::new(AtomicUsize::new(0));

    let factory_sink = Arc::clone(&sink);
    let requests = Arc::clone(&sink_requests);
    let player = Player::builder()
        .source_factory(source.into_factory())
        .shared_renderer(renderer.clone())
        .shared_listener(listener.clone())
        .audio_sink_factory(move || {
            requests.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&factory_sink) as Arc<dyn AudioSink>)
        })
        .config(config)
        .build()
        .expect("player builds");

    Harness {
        player,
        renderer,
        listener,
        sink,
        sink_requests,
    }
}

fn dimension_events(listener: &RecordingListener) -> Vec<PlayerEvent> {
    listener
        .events()
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::VideoDimensionsDetected { .. }))
        .collect()
}

fn count(listener: &RecordingListener, wanted: &PlayerEvent) -> usize {
    listener.count(|e| e == wanted)
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn happy_path_plays_video_and_audio_to_the_end() {
    let frames = interleaved_frames(25, FRAME_40MS, 640, 480, 2, 44_100);
    let source = ScriptedSource::new(frames).with_metadata(av_metadata());
    let probe = source.probe();
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    assert!(h.player.start("clip.mkv").expect("start"));
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(
        dimension_events(&h.listener),
        vec![PlayerEvent::VideoDimensionsDetected {
            width: 640,
            height: 480,
            pixel_format: PixelFormat(3),
            frame_rate_hz: 25.0,
        }]
    );
    assert_eq!(count(&h.listener, &PlayerEvent::PlaybackStarted), 1);
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 1);
    assert_eq!(h.listener.error_count(), 0);

    let rendered = h.renderer.frames();
    assert_eq!(rendered.len(), 25);
    assert!(rendered.iter().all(|f| f.thread_is_video_worker));
    assert_eq!(rendered[0].relative_timestamp_micros, 0);
    assert_eq!(rendered[1].relative_timestamp_micros, FRAME_40MS);
    assert_eq!(rendered[24].relative_timestamp_micros, 24 * FRAME_40MS);
    assert!(rendered
        .windows(2)
        .all(|w| w[0].relative_timestamp_micros < w[1].relative_timestamp_micros));

    let format = h.sink.opened_format().expect("sink opened");
    assert_eq!(format.sample_rate_hz, 44_100);
    assert_eq!(format.channels, 2);
    assert_eq!(format.bit_depth, 16);
    assert_eq!(format.endianness, Endianness::Little);
    // 1764 samples per channel per 40 ms frame, two channels, two bytes each.
    assert_eq!(h.sink.written_bytes().len(), 25 * 1_764 * 2 * 2);
    assert_eq!(h.sink.close_calls(), 1);

    let stats = h.player.stats();
    assert_eq!(stats.frames_grabbed, 50);
    assert_eq!(stats.video_frames_rendered, 25);
    assert_eq!(stats.audio_bytes_written, 25 * 1_764 * 2 * 2);
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(probe.close_calls(), 1);
    assert_eq!(probe.opened_path().as_deref(), Some(std::path::Path::new("clip.mkv")));
}

#[test]
fn audio_only_media_plays_without_video_events() {
    let metadata = SourceMetadata {
        audio_channels: 2,
        audio_sample_rate_hz: 44_100,
        has_audio: true,
        ..SourceMetadata::default()
    };
    let source = ScriptedSource::new(audio_frames(20, FRAME_40MS, 2, 44_100)).with_metadata(metadata);
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    h.player.start("song.flac").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert!(dimension_events(&h.listener).is_empty());
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 1);
    assert_eq!(h.listener.error_count(), 0);
    assert_eq!(h.renderer.frame_count(), 0);
    assert_eq!(h.sink.written_bytes().len(), 20 * 1_764 * 2 * 2);
    assert!(h.player.stats().audio_clock_engaged);
}

#[test]
fn metadata_arriving_at_frame_eleven_does_not_time_out() {
    let metadata = SourceMetadata {
        has_video: true,
        ..SourceMetadata::default()
    };
    // The first ten frames carry no usable dimensions.
    let mut frames: Vec<Frame> = (0..10)
        .map(|i| Frame::image(i * FRAME_40MS, test_image(0, 0)))
        .collect();
    frames.extend(video_frames(15, 10 * FRAME_40MS, FRAME_40MS, 320, 240));
    let source = ScriptedSource::new(frames)
        .with_metadata(metadata)
        .with_metadata_after_grabs(
            5,
            SourceMetadata {
                width: 320,
                height: 240,
                pixel_format: PixelFormat(3),
                frame_rate_hz: 30.0,
                ..metadata
            },
        );
    let mut config = fast_config();
    config.metadata.frame_grace = 300;
    let mut h = harness(source, FakeAudioSink::new(), config);

    h.player.start("late.ts").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(h.listener.error_count(), 0);
    assert_eq!(
        dimension_events(&h.listener),
        vec![PlayerEvent::VideoDimensionsDetected {
            width: 320,
            height: 240,
            pixel_format: PixelFormat(3),
            frame_rate_hz: 30.0,
        }]
    );
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 1);
    assert_eq!(h.renderer.frame_count(), 15);
}

#[test]
fn missing_metadata_past_grace_period_times_out() {
    let metadata = SourceMetadata {
        has_video: true,
        ..SourceMetadata::default()
    };
    let frames: Vec<Frame> = (0..40)
        .map(|i| Frame::image(i * 1_000, test_image(0, 0)))
        .collect();
    let mut config = fast_config();
    config.metadata.frame_grace = 20;
    let mut h = harness(
        ScriptedSource::new(frames).with_metadata(metadata),
        FakeAudioSink::new(),
        config,
    );

    h.player.start("broken.ts").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(
        h.listener.count(|e| matches!(
            e,
            PlayerEvent::Error {
                cause: PlaybackError::MetadataTimeout(_),
                ..
            }
        )),
        1
    );
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 0);
}

#[test]
fn finalization_happens_at_most_once_over_a_thousand_frames() {
    let frames = interleaved_frames(500, 2_000, 64, 48, 2, 44_100);
    let source = ScriptedSource::new(frames).with_metadata(SourceMetadata {
        width: 64,
        height: 48,
        ..av_metadata()
    });
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    h.player.start("many.mkv").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(dimension_events(&h.listener).len(), 1);
    assert_eq!(count(&h.listener, &PlayerEvent::PlaybackStarted), 1);
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 1);
    assert_eq!(h.sink_requests.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.open_calls(), 1);

    // Dense frames must not overflow either worker.
    let stats = h.player.stats();
    assert_eq!(stats.frames_grabbed, 1_000);
    assert_eq!(stats.audio_frames_dropped, 0);
    assert_eq!(stats.audio_frames_played, 500);
    assert_eq!(stats.video_frames_dropped, 0);
    assert_eq!(stats.video_frames_rendered, 500);
    // 88 samples per channel per 2 ms frame.
    assert_eq!(h.sink.written_bytes().len(), 500 * 88 * 2 * 2);
}

#[test]
fn stuck_renderer_at_drain_still_ends_with_end_of_media() {
    let mut config = fast_config();
    config.workers.shutdown_timeout_ms = 50;
    config.sync.max_read_ahead_ms = 100;
    let listener = Arc::new(RecordingListener::new());
    let source = ScriptedSource::new(video_frames(3, 0, FRAME_40MS, 16, 16));
    let mut player = Player::builder()
        .source_factory(source.into_factory())
        .renderer(|_: &ImagePayload, _: i64| std::thread::sleep(Duration::from_secs(2)))
        .shared_listener(listener.clone())
        .config(config)
        .build()
        .expect("player builds");

    player.start("stuck.mkv").expect("start");
    assert!(listener.wait_for(Duration::from_secs(5), |e| *e == PlayerEvent::EndOfMedia));
    player.close();

    assert_eq!(count(&listener, &PlayerEvent::EndOfMedia), 1);
    assert_eq!(listener.error_count(), 0);
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[test]
fn close_is_idempotent() {
    let source = ScriptedSource::new(interleaved_frames(200, FRAME_40MS, 64, 48, 2, 44_100))
        .with_metadata(SourceMetadata {
            width: 64,
            height: 48,
            ..av_metadata()
        });
    let probe = source.probe();
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    h.player.start("clip.mkv").expect("start");
    let sink = Arc::clone(&h.sink);
    assert!(wait_until(TERMINAL_TIMEOUT, || sink.open_calls() == 1));

    h.player.close();
    h.player.close();
    h.player.close();

    assert!(!h.player.is_running());
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(h.sink.open_calls(), 1);
    assert_eq!(h.sink.close_calls(), 1);
    assert_eq!(probe.close_calls(), 1);
    assert_eq!(h.listener.error_count(), 0);
}

#[test]
fn backpressure_keeps_decoding_within_read_ahead() {
    let mut config = fast_config();
    config.sync.max_read_ahead_ms = 200;
    let source = ScriptedSource::new(video_frames(30, 0, FRAME_40MS, 32, 24)).with_metadata(SourceMetadata {
        width: 32,
        height: 24,
        pixel_format: PixelFormat(3),
        frame_rate_hz: 25.0,
        has_video: true,
        ..SourceMetadata::default()
    });
    let probe = source.probe();
    let mut h = harness(source, FakeAudioSink::new(), config);

    h.player.start("pace.mkv").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    let grabs = probe.grab_instants();
    assert_eq!(grabs.len(), 30);
    let origin = grabs[0];
    let tolerance = 30_000;
    for (i, grabbed_at) in grabs.iter().enumerate().skip(1) {
        let elapsed = i64::try_from(grabbed_at.duration_since(origin).as_micros()).unwrap_or(i64::MAX);
        // Frame i is only grabbed after frame i - 1 came within the limit.
        let previous_ts = (i as i64 - 1) * FRAME_40MS;
        assert!(
            elapsed >= previous_ts - 200_000 - tolerance,
            "frame {i} grabbed {elapsed}us after start, more than 200ms ahead"
        );
    }
    assert!(h.player.stats().backpressure_sleep_micros > 0);
}

#[test]
fn stop_mid_stream_returns_promptly() {
    let source = ScriptedSource::new(video_frames(1_000, 0, FRAME_40MS, 64, 48)).with_metadata(SourceMetadata {
        width: 64,
        height: 48,
        pixel_format: PixelFormat(3),
        frame_rate_hz: 25.0,
        has_video: true,
        ..SourceMetadata::default()
    });
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    h.player.start("long.mkv").expect("start");
    assert!(h
        .listener
        .wait_for(TERMINAL_TIMEOUT, |e| *e == PlayerEvent::PlaybackStarted));
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.renderer.frame_count() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let stopping = Instant::now();
    h.player.close();
    assert!(stopping.elapsed() < Duration::from_secs(3));

    assert!(!h.player.is_running());
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 0);
    assert_eq!(h.listener.error_count(), 0);
    assert!(h.renderer.frame_count() < 1_000);
}

#[test]
fn stop_interrupts_a_pending_video_sleep() {
    let mut config = fast_config();
    config.sync.video_max_sleep_if_early_ms = 10_000;
    config.sync.max_read_ahead_ms = 10_000;
    // Frame 1 is due five seconds after frame 0, so its job sleeps.
    let source = ScriptedSource::new(video_frames(100, 0, 5_000_000, 64, 48)).with_metadata(SourceMetadata {
        width: 64,
        height: 48,
        pixel_format: PixelFormat(3),
        frame_rate_hz: 0.2,
        has_video: true,
        ..SourceMetadata::default()
    });
    let mut h = harness(source, FakeAudioSink::new(), config);

    h.player.start("slides.mkv").expect("start");
    let renderer = Arc::clone(&h.renderer);
    assert!(wait_until(TERMINAL_TIMEOUT, || renderer.frame_count() == 1));
    std::thread::sleep(Duration::from_millis(50));

    let stopping = Instant::now();
    h.player.close();
    assert!(
        stopping.elapsed() < Duration::from_secs(1),
        "close took {:?}",
        stopping.elapsed()
    );

    assert_eq!(h.renderer.frame_count(), 1);
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 0);
    assert_eq!(h.player.state(), PlaybackState::Stopped);
}

#[test]
fn start_while_running_is_rejected() {
    let source = ScriptedSource::new(video_frames(500, 0, FRAME_40MS, 16, 16));
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    assert!(h.player.start("a.mkv").expect("start"));
    assert!(h
        .listener
        .wait_for(TERMINAL_TIMEOUT, |e| *e == PlayerEvent::PlaybackStarted));
    assert!(!h.player.start("b.mkv").expect("second start"));
    h.player.close();
}

#[test]
fn open_failure_is_reported_as_event() {
    let source = ScriptedSource::new(Vec::new()).with_open_error(SourceError::Open {
        path: "missing.mkv".into(),
        reason: "no such file".into(),
    });
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    assert!(h.player.start("missing.mkv").expect("start"));
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    let events = h.listener.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        PlayerEvent::Error {
            cause: PlaybackError::OpenFailure(_),
            ..
        }
    ));
}

#[test]
fn grab_error_ends_session_without_end_of_media() {
    let source = ScriptedSource::new(video_frames(5, 0, FRAME_40MS, 16, 16))
        .then_error(SourceError::Decode("corrupt packet".into()));
    let mut h = harness(source, FakeAudioSink::new(), fast_config());

    h.player.start("bad.mkv").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(
        h.listener.count(|e| matches!(
            e,
            PlayerEvent::Error {
                cause: PlaybackError::GrabError(_),
                ..
            }
        )),
        1
    );
    assert_eq!(count(&h.listener, &PlayerEvent::EndOfMedia), 0);
}

#[test]
fn unsupported_audio_format_keeps_video_playing() {
    let frames = interleaved_frames(10, FRAME_40MS, 64, 48, 2, 44_100);
    let source = ScriptedSource::new(frames).with_metadata(SourceMetadata {
        width: 64,
        height: 48,
        ..av_metadata()
    });
    let mut h = harness(
        source,
        FakeAudioSink::new().with_supported_endianness(&[]),
        fast_config(),
    );

    h.player.start("clip.mkv").expect("start");
    assert!(h
        .listener
        .wait_for(TERMINAL_TIMEOUT, |e| *e == PlayerEvent::EndOfMedia));
    h.player.close();

    assert_eq!(
        h.listener.count(|e| matches!(
            e,
            PlayerEvent::Error {
                cause: PlaybackError::AudioUnavailable(_),
                ..
            }
        )),
        1
    );
    assert_eq!(h.renderer.frame_count(), 10);
    assert!(h.sink.written_bytes().is_empty());
}

#[test]
fn big_endian_only_sink_gets_big_endian_pcm() {
    let frames = interleaved_frames(5, FRAME_40MS, 64, 48, 2, 44_100);
    let source = ScriptedSource::new(frames).with_metadata(SourceMetadata {
        width: 64,
        height: 48,
        ..av_metadata()
    });
    let mut h = harness(
        source,
        FakeAudioSink::new().with_supported_endianness(&[Endianness::Big]),
        fast_config(),
    );

    h.player.start("clip.mkv").expect("start");
    assert!(h.listener.wait_for_terminal(TERMINAL_TIMEOUT));
    h.player.close();

    assert_eq!(
        h.sink.opened_format().map(|f| f.endianness),
        Some(Endianness::Big)
    );
    assert_eq!(h.listener.error_count(), 0);
}

#[test]
fn clock_never_runs_backwards_across_source_switches() {
    let clock = MediaClock::new();
    assert!(clock.initialize(0));
    let sink = Arc::new(FakeAudioSink::new());

    let mut last = clock.position_micros();
    let mut check = |clock: &MediaClock| {
        let now = clock.position_micros();
        assert!(now >= last, "clock went back from {last} to {now}");
        last = now;
    };

    std::thread::sleep(Duration::from_millis(30));
    check(&clock);

    // Audio engages with a device position far behind the wall clock.
    sink.set_running(true);
    sink.set_position_micros(1_000);
    clock.attach_sink(sink.clone());
    check(&clock);

    sink.set_position_micros(20_000);
    check(&clock);

    // Device position jumps backwards, e.g. after a driver reset.
    sink.set_position_micros(5_000);
    check(&clock);

    clock.detach_sink();
    check(&clock);
    std::thread::sleep(Duration::from_millis(10));
    check(&clock);
}
