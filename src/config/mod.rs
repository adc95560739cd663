//! This module handles the engine configuration, including loading and saving
//! tuning values to an `engine.toml` file.
//!
//! Every section is optional in the file; missing values fall back to the
//! constants in [`defaults`].
//!
//! # Examples
//!
//! ```no_run
//! use avsync::config::{self, EngineConfig};
//! use std::path::PathBuf;
//!
//! // Load existing configuration
//! let mut config = config::load().unwrap_or_default();
//!
//! // Modify a setting
//! config.sync.max_read_ahead_ms = 500;
//!
//! // Save the modified configuration
//! config::save(&config).expect("Failed to save config");
//!
//! // To load/save from a specific path (e.g., for testing)
//! let temp_dir = PathBuf::from("./temp_config_dir");
//! std::fs::create_dir_all(&temp_dir).unwrap();
//! let temp_file = temp_dir.join("engine.toml");
//! config::save_to_path(&config, &temp_file).expect("Failed to save to path");
//! let loaded = config::load_from_path(&temp_file).expect("Failed to load from path");
//! assert_eq!(loaded.sync.max_read_ahead_ms, 500);
//! std::fs::remove_dir_all(&temp_dir).unwrap();
//! ```

pub mod defaults;

use crate::error::{Error, Result};
use defaults::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "engine.toml";
const APP_NAME: &str = "avsync";

/// What to do with a video frame that is far behind an audio-backed clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateFramePolicy {
    /// Render immediately without sleeping.
    #[default]
    Render,
    /// Discard the frame.
    Drop,
}

/// Frame pacing and backpressure tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_read_ahead_ms: u64,
    pub video_max_sleep_if_early_ms: u64,
    pub min_meaningful_delay_ms: u64,
    pub video_catch_up_threshold_ms: u64,
    pub loop_sleep_cap_fallback_ms: u64,
    pub loop_sleep_cap_audio_ms: u64,
    pub late_frame_policy: LateFramePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_read_ahead_ms: DEFAULT_MAX_READ_AHEAD_MS,
            video_max_sleep_if_early_ms: DEFAULT_VIDEO_MAX_SLEEP_IF_EARLY_MS,
            min_meaningful_delay_ms: DEFAULT_MIN_MEANINGFUL_DELAY_MS,
            video_catch_up_threshold_ms: DEFAULT_VIDEO_CATCH_UP_THRESHOLD_MS,
            loop_sleep_cap_fallback_ms: DEFAULT_LOOP_SLEEP_CAP_FALLBACK_MS,
            loop_sleep_cap_audio_ms: DEFAULT_LOOP_SLEEP_CAP_AUDIO_MS,
            late_frame_policy: LateFramePolicy::default(),
        }
    }
}

/// Metadata polling schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub poll_min_interval_ms: u64,
    pub poll_max_interval_ms: u64,
    pub poll_budget_ms: u64,
    /// Frames grabbed without finalizing expected metadata before aborting.
    pub frame_grace: u64,
    pub fallback_frame_rate: f64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            poll_min_interval_ms: DEFAULT_POLL_MIN_INTERVAL_MS,
            poll_max_interval_ms: DEFAULT_POLL_MAX_INTERVAL_MS,
            poll_budget_ms: DEFAULT_POLL_BUDGET_MS,
            frame_grace: DEFAULT_METADATA_FRAME_GRACE,
            fallback_frame_rate: DEFAULT_FALLBACK_FRAME_RATE,
        }
    }
}

/// Audio sink sizing and optional warm-up behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub buffer_ms: u64,
    pub min_buffer_bytes: usize,
    pub prime_silence_ms: u64,
    pub warmup_enabled: bool,
    pub warmup_max_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_AUDIO_BUFFER_MS,
            min_buffer_bytes: DEFAULT_AUDIO_MIN_BUFFER_BYTES,
            prime_silence_ms: DEFAULT_AUDIO_PRIME_SILENCE_MS,
            warmup_enabled: false,
            warmup_max_frames: DEFAULT_WARMUP_MAX_FRAMES,
        }
    }
}

/// Video/audio worker contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Caps the video queue; a full queue drops the frame. Unset means
    /// unbounded. The audio queue is always unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_queue_depth: Option<usize>,
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            video_queue_depth: None,
            shutdown_timeout_ms: DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

/// Start/stop behavior of the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub stop_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub metadata: MetadataConfig,
    pub audio: AudioConfig,
    pub workers: WorkerConfig,
    pub lifecycle: LifecycleConfig,
}

impl EngineConfig {
    /// Checks that the values are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.sync.max_read_ahead_ms == 0 {
            return fail("sync.max_read_ahead_ms must be greater than zero");
        }
        if self.sync.video_max_sleep_if_early_ms == 0 {
            return fail("sync.video_max_sleep_if_early_ms must be greater than zero");
        }
        if self.sync.loop_sleep_cap_fallback_ms == 0 || self.sync.loop_sleep_cap_audio_ms == 0 {
            return fail("sync loop sleep caps must be greater than zero");
        }
        if self.metadata.poll_min_interval_ms == 0 {
            return fail("metadata.poll_min_interval_ms must be greater than zero");
        }
        if self.metadata.poll_min_interval_ms > self.metadata.poll_max_interval_ms {
            return fail("metadata.poll_min_interval_ms exceeds poll_max_interval_ms");
        }
        if self.metadata.frame_grace == 0 {
            return fail("metadata.frame_grace must be greater than zero");
        }
        if !(self.metadata.fallback_frame_rate > 0.0) {
            return fail("metadata.fallback_frame_rate must be positive");
        }
        if self.audio.buffer_ms == 0 {
            return fail("audio.buffer_ms must be greater than zero");
        }
        if self.workers.video_queue_depth == Some(0) {
            return fail("workers.video_queue_depth must be greater than zero");
        }
        Ok(())
    }
}

impl SyncConfig {
    #[must_use]
    pub fn max_read_ahead_micros(&self) -> i64 {
        ms_to_micros(self.max_read_ahead_ms)
    }

    #[must_use]
    pub fn video_max_sleep_if_early(&self) -> Duration {
        Duration::from_millis(self.video_max_sleep_if_early_ms)
    }

    #[must_use]
    pub fn min_meaningful_delay_micros(&self) -> i64 {
        ms_to_micros(self.min_meaningful_delay_ms)
    }

    #[must_use]
    pub fn video_catch_up_threshold_micros(&self) -> i64 {
        ms_to_micros(self.video_catch_up_threshold_ms)
    }

    /// Backpressure cap for the current clock source.
    #[must_use]
    pub fn loop_sleep_cap_micros(&self, audio_clock_active: bool) -> i64 {
        if audio_clock_active {
            ms_to_micros(self.loop_sleep_cap_audio_ms)
        } else {
            ms_to_micros(self.loop_sleep_cap_fallback_ms)
        }
    }
}

impl MetadataConfig {
    #[must_use]
    pub fn poll_min_interval(&self) -> Duration {
        Duration::from_millis(self.poll_min_interval_ms)
    }

    #[must_use]
    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms)
    }

    #[must_use]
    pub fn poll_budget(&self) -> Duration {
        Duration::from_millis(self.poll_budget_ms)
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[allow(clippy::cast_possible_wrap)] // configured milliseconds are far below i64::MAX / 1000
fn ms_to_micros(ms: u64) -> i64 {
    (ms as i64).saturating_mul(1_000)
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(APP_NAME);
        path.push(CONFIG_FILE);
        path
    })
}

pub fn load() -> Result<EngineConfig> {
    if let Some(path) = get_default_config_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(EngineConfig::default())
}

pub fn save(config: &EngineConfig) -> Result<()> {
    if let Some(path) = get_default_config_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content).unwrap_or_default())
}

pub fn save_to_path(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
