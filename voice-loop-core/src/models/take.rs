use serde::{Deserialize, Serialize};

/// Metadata describing a finalized take.
///
/// Produced when a recording stops; serializable for the JSON sidecar
/// written next to the take file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    /// Frames actually written to disk (mono: one sample per frame).
    pub frames: u64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// SHA-256 hex digest of the finalized file.
    pub checksum: String,
}

impl TakeMetadata {
    pub fn new(
        file_path: &str,
        frames: u64,
        duration_secs: f64,
        sample_rate: u32,
        channels: u16,
        checksum: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            file_path: file_path.to_string(),
            frames,
            duration_secs,
            sample_rate,
            channels,
            checksum: checksum.to_string(),
        }
    }
}
