use std::path::PathBuf;

use super::format::AudioFormat;

/// Configuration for a voice-loop session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Canonical sample format for the whole graph and all file I/O.
    pub format: AudioFormat,

    /// Fixed path of the recording file. Each new take truncates it.
    pub recording_path: PathBuf,

    /// Frames per input tap buffer. Small to keep monitor latency low;
    /// at 48 kHz, 256 frames is one delivery every ~5.3 ms.
    pub tap_buffer_frames: u32,

    /// Padding appended to the loop buffer's capacity, in milliseconds,
    /// absorbing rounding in frame-count bookkeeping during decode.
    pub loop_padding_ms: u32,

    /// Capacity of the capture spill buffer in seconds of audio. Sized so
    /// the writer thread can stall briefly without the tap dropping samples.
    pub spill_capacity_secs: f32,

    /// Write a JSON metadata sidecar next to each finalized take.
    pub write_sidecar: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.format.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.format.channels == 0 {
            return Err("channel count must be positive".into());
        }
        if self.tap_buffer_frames == 0 {
            return Err("tap buffer size must be positive".into());
        }
        if self.spill_capacity_secs <= 0.0 {
            return Err("spill capacity must be positive".into());
        }
        Ok(())
    }

    /// Spill buffer capacity in samples for the configured format.
    pub fn spill_capacity_samples(&self) -> usize {
        (self.format.sample_rate as f32 * self.spill_capacity_secs) as usize
            * self.format.channels as usize
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::canonical(),
            recording_path: std::env::temp_dir().join("input.wav"),
            tap_buffer_frames: 256,
            loop_padding_ms: 100,
            spill_capacity_secs: 5.0,
            write_sidecar: true,
        }
    }
}
