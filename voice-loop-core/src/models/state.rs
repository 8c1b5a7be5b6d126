use std::path::PathBuf;

/// Recording-side state machine.
///
/// Transitions:
/// ```text
/// NoRecording → Recording → Available → Loaded
///                   ↑___________|__________|
///            (a new recording replaces any prior take)
/// ```
///
/// `Loaded` means the take has been decoded and scheduled on the loop
/// player, which owns the buffer from then on; later playback toggles reuse
/// it without touching the file again. Playback status is tracked by the
/// player itself and is orthogonal to this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingState {
    /// No take exists yet (or the last one was discarded).
    NoRecording,
    /// A take is being captured to the recording file.
    Recording,
    /// A finished take exists on disk and has not been loaded for playback.
    Available { path: PathBuf },
    /// The take has been decoded and handed to the loop player.
    Loaded { path: PathBuf },
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Whether a finished take exists, loaded or not.
    pub fn has_take(&self) -> bool {
        matches!(self, Self::Available { .. } | Self::Loaded { .. })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// Path of the finished take, if one exists.
    pub fn take_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Available { path } | Self::Loaded { path } => Some(path),
            _ => None,
        }
    }
}
