use std::path::Path;

use crate::models::error::SessionError;
use crate::models::format::AudioFormat;
use crate::processing::loop_player::PlaybackBuffer;

/// Decode a whole take into a playback buffer.
///
/// The file must match `format` exactly; a differing rate, channel count,
/// or sample representation is an error rather than a silent resample.
/// `padding_frames` extra capacity is reserved beyond the file's declared
/// frame count to absorb rounding in frame bookkeeping.
pub fn load_take(
    path: &Path,
    format: &AudioFormat,
    padding_frames: usize,
) -> Result<PlaybackBuffer, SessionError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SessionError::FileRead(e.to_string()))?;

    let spec = reader.spec();
    if !format.matches_spec(&spec) {
        return Err(SessionError::FormatUnsupported(format!(
            "take is {} Hz / {} ch / {:?}{}, expected {}",
            spec.sample_rate, spec.channels, spec.sample_format, spec.bits_per_sample, format
        )));
    }

    let frames = reader.duration() as usize;
    let mut buffer = PlaybackBuffer::with_capacity(frames * format.channels as usize, padding_frames);
    for sample in reader.samples::<f32>() {
        buffer.push(sample.map_err(|e| SessionError::FileRead(e.to_string()))?);
    }

    Ok(buffer)
}
