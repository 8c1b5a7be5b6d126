//! # voice-loop-cpal
//!
//! cpal duplex backend for voice-loop-kit.
//!
//! Provides:
//! - `CpalDuplexGraph` — input stream (mic tap) + output stream (loop
//!   player render) over the host's default devices
//! - `device` — device resolution, route policy, format validation
//!
//! ## Usage
//! ```ignore
//! use voice_loop_core::{SessionConfig, VoiceSession};
//! use voice_loop_cpal::{CpalDuplexGraph, CpalGraphConfig};
//!
//! let graph = CpalDuplexGraph::new(CpalGraphConfig::default());
//! let mut session = VoiceSession::new(graph, SessionConfig::default())?;
//! session.setup()?;
//! session.start()?;
//! session.toggle_recording()?;
//! ```

pub mod device;
pub mod duplex_graph;

pub use duplex_graph::{CpalDuplexGraph, CpalGraphConfig};
