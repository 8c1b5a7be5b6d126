use std::sync::Arc;

use parking_lot::Mutex;

/// A decoded take, scheduled on the player for looped playback.
///
/// Capacity is the take's frame count plus a small padding margin so
/// frame-count rounding during decode never forces a reallocation; looping
/// wraps at the actual frame count, not the capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
}

impl PlaybackBuffer {
    /// Allocate an empty buffer able to hold `frames + padding_frames`
    /// mono frames without reallocating.
    pub fn with_capacity(frames: usize, padding_frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frames + padding_frames),
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.samples.push(sample);
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerStatus {
    Stopped,
    Playing,
    Paused,
}

/// Player node state: one scheduled buffer, looped until stopped.
///
/// `fill` runs on the realtime render thread; everything else runs on the
/// control thread. Both sides go through the shared handle's mutex, which
/// is held only for bounded copies.
#[derive(Debug)]
pub struct LoopPlayer {
    buffer: Option<PlaybackBuffer>,
    position: usize,
    status: PlayerStatus,
}

/// Handle shared between the session controller and the graph backend.
pub type SharedLoopPlayer = Arc<Mutex<LoopPlayer>>;

pub fn shared() -> SharedLoopPlayer {
    Arc::new(Mutex::new(LoopPlayer::new()))
}

impl LoopPlayer {
    pub fn new() -> Self {
        Self {
            buffer: None,
            position: 0,
            status: PlayerStatus::Stopped,
        }
    }

    /// Replace the scheduled buffer and rewind. The previous buffer, if
    /// any, is discarded.
    pub fn schedule_looped(&mut self, buffer: PlaybackBuffer) {
        self.buffer = Some(buffer);
        self.position = 0;
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Start or resume playback. No-op without a scheduled buffer.
    pub fn play(&mut self) {
        if self.buffer.is_some() {
            self.status = PlayerStatus::Playing;
        }
    }

    /// Pause, preserving the playback position.
    pub fn pause(&mut self) {
        if self.status == PlayerStatus::Playing {
            self.status = PlayerStatus::Paused;
        }
    }

    /// Stop and rewind. The scheduled buffer stays cached for later reuse.
    pub fn stop(&mut self) {
        self.status = PlayerStatus::Stopped;
        self.position = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlayerStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status == PlayerStatus::Paused
    }

    /// Render the next `out.len()` mono frames, looping over the scheduled
    /// buffer. Writes silence and returns 0 unless playing.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let playing = self.status == PlayerStatus::Playing;
        let buffer = match self.buffer.as_ref() {
            Some(buffer) if playing && !buffer.is_empty() => buffer,
            _ => {
                out.fill(0.0);
                return 0;
            }
        };

        let frames = buffer.frames();
        let samples = buffer.samples();
        let mut position = self.position;
        for slot in out.iter_mut() {
            *slot = samples[position];
            position += 1;
            if position >= frames {
                position = 0;
            }
        }
        self.position = position;
        out.len()
    }
}

impl Default for LoopPlayer {
    fn default() -> Self {
        Self::new()
    }
}
