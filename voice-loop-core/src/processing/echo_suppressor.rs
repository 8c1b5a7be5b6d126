/// Far-end ducking suppressor backing the voice-processing switch.
///
/// While the loop player is audible, its rendered level couples back into
/// the microphone. A full acoustic echo canceller is out of reach without
/// platform support, so the input path instead ducks the captured signal by
/// an envelope that follows the far-end (playback) level: loud playback
/// attenuates the mic, silence restores unity gain.
///
/// All state is a handful of floats; `process` is allocation-free and safe
/// on the realtime thread.
#[derive(Debug, Clone)]
pub struct EchoSuppressor {
    /// Per-sample envelope decay toward silence.
    release: f32,
    /// Maximum gain reduction at full-scale far-end level (0..1).
    depth: f32,
    envelope: f32,
}

impl EchoSuppressor {
    /// Release time constant is ~50 ms regardless of rate.
    pub fn new(sample_rate: u32) -> Self {
        let release_samples = sample_rate as f32 * 0.05;
        Self {
            release: (-1.0 / release_samples.max(1.0)).exp(),
            depth: 0.85,
            envelope: 0.0,
        }
    }

    /// Duck `mic` in place given the far-end peak level observed for the
    /// same period (0.0 = silent playback, 1.0 = full scale).
    pub fn process(&mut self, mic: &mut [f32], far_end_peak: f32) {
        let target = far_end_peak.clamp(0.0, 1.0);
        for sample in mic.iter_mut() {
            // Attack instantly, release exponentially.
            self.envelope = if target > self.envelope {
                target
            } else {
                self.envelope * self.release
            };
            let gain = 1.0 - self.depth * self.envelope;
            *sample *= gain;
        }
    }

    /// Current envelope value, for metering.
    pub fn envelope(&self) -> f32 {
        self.envelope
    }
}
