//! Record a short take from the default microphone, then loop it back
//! through the speakers until stopped.
//!
//! Run with `RUST_LOG=debug` to watch device selection and recovery.

use std::time::Duration;

use voice_loop_core::{SessionConfig, VoiceSession};
use voice_loop_cpal::{CpalDuplexGraph, CpalGraphConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let graph = CpalDuplexGraph::new(CpalGraphConfig::default());
    let mut session = VoiceSession::new(graph, SessionConfig::default())?;
    session.setup()?;
    session.start()?;

    println!("recording 3 seconds...");
    session.toggle_recording()?;
    std::thread::sleep(Duration::from_secs(3));
    session.toggle_recording()?;

    if let Some(take) = session.last_take() {
        println!(
            "captured {} frames ({:.2} s) to {}",
            take.frames, take.duration_secs, take.file_path
        );
    }

    println!("looping playback for 6 seconds...");
    session.toggle_playing()?;
    std::thread::sleep(Duration::from_secs(6));
    session.stop_recording_and_players()?;

    Ok(())
}
