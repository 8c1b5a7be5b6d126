use std::sync::atomic::{AtomicU32, Ordering};

/// RMS level of normalized samples (0.0–1.0).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Lock-free f32 cell for publishing levels out of realtime callbacks.
///
/// Stores the float's bit pattern in an `AtomicU32`, so writers on the
/// audio thread never take a lock and readers on the control thread never
/// see torn values.
#[derive(Debug, Default)]
pub struct LevelCell(AtomicU32);

impl LevelCell {
    pub fn new() -> Self {
        Self(AtomicU32::new(0.0f32.to_bits()))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
