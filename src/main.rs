// SPDX-License-Identifier: MPL-2.0
//! `avsync-play`: plays a media file through `FFmpeg` and the default audio
//! device, logging what the engine does.
//!
//! ```text
//! avsync-play [--config engine.toml] [--log-level debug] [--seconds 10] <media>
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avsync::application::port::AudioSink;
use avsync::infrastructure::{CpalAudioSink, FfmpegFrameSource};
use avsync::media::ImagePayload;
use avsync::player::event_channel;
use avsync::{config, Error, Player, PlayerEvent, Result};
use tracing::{info, warn};

const EVENT_POLL: Duration = Duration::from_millis(50);

struct Args {
    media: PathBuf,
    config: Option<PathBuf>,
    log_level: Option<String>,
    seconds: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = pico_args::Arguments::from_env();
    let usage = |e: pico_args::Error| Error::Config(format!("{e}"));

    let config = args.opt_value_from_str("--config").map_err(usage)?;
    let log_level = args.opt_value_from_str("--log-level").map_err(usage)?;
    let seconds = args.opt_value_from_str("--seconds").map_err(usage)?;
    let media = args
        .finish()
        .into_iter()
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Config("usage: avsync-play [--config FILE] [--log-level LEVEL] [--seconds N] <media>".into())
        })?;

    Ok(Args {
        media,
        config,
        log_level,
        seconds,
    })
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args = parse_args()?;
    init_logging(args.log_level.as_deref());

    let engine_config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load()?,
    };
    engine_config.validate()?;

    let rendered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&rendered);
    let (listener, mut events) = event_channel();

    let mut player = Player::builder()
        .source_factory(|| Box::new(FfmpegFrameSource::new()))
        .renderer(move |image: &ImagePayload, relative_micros: i64| {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 100 == 1 {
                info!(
                    frame = n,
                    width = image.width,
                    height = image.height,
                    at_ms = relative_micros / 1_000,
                    "video frame"
                );
            }
        })
        .listener(listener)
        .audio_sink_factory(|| Ok(Arc::new(CpalAudioSink::new()) as Arc<dyn AudioSink>))
        .config(engine_config)
        .build()?;

    player.start(&args.media)?;
    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        match events.try_recv() {
            Some(PlayerEvent::EndOfMedia) => {
                info!("end of media");
                break;
            }
            Some(PlayerEvent::Error { message, cause }) if cause.is_fatal() => {
                warn!(%message, "playback failed");
                break;
            }
            Some(event) => info!(?event, "player event"),
            None => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    info!("time limit reached");
                    break;
                }
                if !player.is_running() {
                    info!("playback session ended");
                    break;
                }
                thread::sleep(EVENT_POLL);
            }
        }
    }

    player.close();
    let stats = player.stats();
    info!(
        rendered = rendered.load(Ordering::Relaxed),
        grabbed = stats.frames_grabbed,
        late = stats.late_video_frames,
        audio_bytes = stats.audio_bytes_written,
        "playback finished"
    );
    Ok(())
}
