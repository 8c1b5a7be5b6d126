use crate::models::error::SessionError;
use crate::models::state::RecordingState;
use crate::models::take::TakeMetadata;

/// Event delegate for session notifications.
///
/// Methods may be called from the writer or monitor threads, never from the
/// realtime audio thread. Implementations should marshal to their UI thread
/// if needed.
pub trait SessionDelegate: Send + Sync {
    /// Called when the recording state machine transitions.
    fn on_recording_state_changed(&self, state: &RecordingState);

    /// Called when a take is finalized and its metadata is known.
    fn on_take_finished(&self, take: &TakeMetadata);

    /// Called after the engine was restarted by the recovery handler.
    fn on_engine_recovered(&self);

    /// Called for errors that cannot be returned to a caller, e.g. write
    /// failures on the drain thread or a failed recovery attempt.
    fn on_error(&self, error: &SessionError);
}
