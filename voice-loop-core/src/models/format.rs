/// Sample format shared by every node in the graph and every file on disk.
///
/// The kit is 32-bit-float native: samples are `f32` everywhere, so only the
/// rate, channel count, and interleaving are carried here. The format is
/// fixed when a session is constructed; graph connections, the input tap,
/// and file I/O all validate against it rather than converting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 = mono).
    pub channels: u16,
    /// Whether multi-channel data is interleaved. Mono data is trivially
    /// interleaved; the flag matters only for future multi-channel use.
    pub interleaved: bool,
}

impl AudioFormat {
    /// Bits per sample for the kit's native `f32` representation.
    pub const BITS_PER_SAMPLE: u16 = 32;

    /// The canonical duplex format: 48 kHz, mono, interleaved f32.
    pub const fn canonical() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            interleaved: true,
        }
    }

    /// Frame count covering `millis` of audio at this format's rate.
    pub fn frames_for_millis(&self, millis: u32) -> usize {
        (self.sample_rate as u64 * millis as u64 / 1000) as usize
    }

    /// Duration in seconds of `frames` frames at this format's rate.
    pub fn duration_secs(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// The `hound` spec for reading/writing takes in this format.
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: Self::BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Whether a WAV spec matches this format exactly.
    pub fn matches_spec(&self, spec: &hound::WavSpec) -> bool {
        spec.channels == self.channels
            && spec.sample_rate == self.sample_rate
            && spec.bits_per_sample == Self::BITS_PER_SAMPLE
            && spec.sample_format == hound::SampleFormat::Float
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::canonical()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz / {} ch / f32", self.sample_rate, self.channels)
    }
}
