//! Daemon and Stream Configuration (SPEC_FULL.md §1)

use serde::{Deserialize, Serialize};

/// Per-direction default device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub buffer_frames: usize,
    pub cb_threshold: usize,
    pub min_cb_level: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 4096,
            cb_threshold: 480,
            min_cb_level: 240,
        }
    }
}

impl StreamConfig {
    pub fn latency_ms(&self) -> f32 {
        (self.cb_threshold as f32 / self.sample_rate as f32) * 1000.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels as usize > wavehub_proto::CH_MAX {
            return Err(format!("invalid channel count: {}", self.channels));
        }
        if !self.buffer_frames.is_power_of_two() {
            return Err(format!("buffer_frames must be a power of two: {}", self.buffer_frames));
        }
        if self.cb_threshold == 0 || self.cb_threshold > self.buffer_frames {
            return Err(format!(
                "cb_threshold {} must be in (0, buffer_frames={}]",
                self.cb_threshold, self.buffer_frames
            ));
        }
        if self.min_cb_level > self.cb_threshold {
            return Err(format!(
                "min_cb_level {} must be <= cb_threshold {}",
                self.min_cb_level, self.cb_threshold
            ));
        }
        Ok(())
    }
}

/// Top-level daemon configuration: the socket directory, audio group, and
/// the default per-direction device config. DSP/UCM config *loading* stays
/// out of scope (spec.md §1); this is only the surface such config would
/// ultimately populate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_dir: String,
    pub audio_group: String,
    pub playback: StreamConfig,
    pub capture: StreamConfig,
    pub connect_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_dir: "/run/wavehub".to_string(),
            audio_group: "audio".to_string(),
            playback: StreamConfig::default(),
            capture: StreamConfig::default(),
            connect_timeout_ms: 500,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.socket_dir.is_empty() {
            return Err("socket_dir must not be empty".to_string());
        }
        self.playback.validate()?;
        self.capture.validate()?;
        Ok(())
    }
}
