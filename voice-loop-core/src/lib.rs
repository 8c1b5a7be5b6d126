//! # voice-loop-core
//!
//! Platform-agnostic duplex voice session core.
//!
//! Records the microphone to a fixed-path take file while simultaneously
//! looping the last take back through the output, without file I/O on the
//! realtime audio thread. Platform backends (cpal, others) implement the
//! `AudioGraph` trait and plug into the generic `VoiceSession`.
//!
//! ## Architecture
//!
//! ```text
//! voice-loop-core (this crate)
//! ├── traits/       ← AudioGraph, SessionDelegate
//! ├── models/       ← SessionError, RecordingState, SessionConfig, AudioFormat, TakeMetadata
//! ├── processing/   ← SpillBuffer, LoopPlayer, EchoSuppressor, level meters
//! ├── session/      ← VoiceSession (generic controller)
//! └── storage/      ← TakeWriter, take reader, metadata sidecar
//! ```
//!
//! Recording path: `input tap (realtime) → SpillBuffer → writer thread →
//! TakeWriter`. Playback path: `take file → PlaybackBuffer → LoopPlayer →
//! output render (realtime)`.

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::SessionConfig;
pub use models::error::SessionError;
pub use models::format::AudioFormat;
pub use models::state::RecordingState;
pub use models::take::TakeMetadata;
pub use processing::echo_suppressor::EchoSuppressor;
pub use processing::loop_player::{LoopPlayer, PlaybackBuffer, SharedLoopPlayer};
pub use processing::spill_buffer::SpillBuffer;
pub use session::controller::{SessionDiagnostics, SessionLevels, VoiceSession};
pub use storage::take_writer::TakeWriter;
pub use traits::audio_graph::{AudioGraph, GraphEvent, InputTap, RoutePolicy};
pub use traits::session_delegate::SessionDelegate;
