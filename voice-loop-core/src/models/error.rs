use thiserror::Error;

/// Errors surfaced by session construction, setup, and I/O operations.
///
/// Construction and setup errors are returned to the caller; errors hit on
/// the realtime path or the writer thread are logged and reported through
/// the delegate instead (see `SessionDelegate::on_error`), never thrown
/// across the callback boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The canonical format cannot be constructed or the hardware cannot
    /// serve it exactly. Fatal for the operation that raised it.
    #[error("unsupported audio format: {0}")]
    FormatUnsupported(String),

    /// Duplex-session negotiation (category, preferred rate) was rejected.
    /// Recoverable; the session continues with what the hardware granted.
    #[error("audio session configuration rejected: {0}")]
    ConfigRejected(String),

    /// The input path cannot enable echo suppression. Aborts `setup()`
    /// without undoing connections already made.
    #[error("voice processing unavailable: {0}")]
    VoiceProcessingUnavailable(String),

    /// The graph refused to start. The caller may retry; the recovery
    /// handler retries on the next configuration-change event.
    #[error("engine failed to start: {0}")]
    EngineStart(String),

    /// The recording file could not be created or opened for writing.
    #[error("failed to create recording file: {0}")]
    FileCreate(String),

    /// The recorded take could not be read back for playback.
    #[error("failed to read recording file: {0}")]
    FileRead(String),

    /// A captured buffer could not be appended to the open take. Reported
    /// via log/delegate only; recording continues.
    #[error("failed to write captured buffer: {0}")]
    BufferWrite(String),

    /// An illegal topology change, e.g. installing a second input tap.
    #[error("graph topology error: {0}")]
    Topology(String),

    /// An operation was requested in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Metadata or finalization I/O failed.
    #[error("storage error: {0}")]
    Storage(String),
}
