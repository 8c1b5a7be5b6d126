use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::SessionError;
use crate::models::format::AudioFormat;
use crate::models::take::TakeMetadata;

/// Streaming writer for a take file.
///
/// Opened when a recording starts (truncating any prior take at the same
/// path), fed by the writer thread, and finalized when the recording stops.
/// Finalization patches the WAV header sizes, closes the handle, and
/// returns the take's metadata. Only the control thread and the writer
/// thread ever touch this type; the realtime tap does not.
pub struct TakeWriter {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl std::fmt::Debug for TakeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakeWriter")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("writer_open", &self.writer.is_some())
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

impl TakeWriter {
    /// Create the take file and write its header.
    pub fn create(path: &Path, format: &AudioFormat) -> Result<Self, SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SessionError::FileCreate(format!("create directory: {}", e)))?;
        }

        let writer = hound::WavWriter::create(path, format.wav_spec())
            .map_err(|e| SessionError::FileCreate(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            format: *format,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    /// Append a block of samples to the take.
    pub fn append(&mut self, samples: &[f32]) -> Result<(), SessionError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::BufferWrite("take already finalized".into()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SessionError::BufferWrite(e.to_string()))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.samples_written / self.format.channels as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Patch header sizes, close the file, and describe the finished take.
    pub fn finalize(mut self) -> Result<TakeMetadata, SessionError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| SessionError::Storage("take already finalized".into()))?;
        writer
            .finalize()
            .map_err(|e| SessionError::Storage(format!("finalize take: {}", e)))?;

        let frames = self.samples_written / self.format.channels as u64;
        let checksum = sha256_file(&self.path)?;

        Ok(TakeMetadata::new(
            &self.path.to_string_lossy(),
            frames,
            self.format.duration_secs(frames),
            self.format.sample_rate,
            self.format.channels,
            &checksum,
        ))
    }
}

/// SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, SessionError> {
    let data = fs::read(path)
        .map_err(|e| SessionError::Storage(format!("read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voice_loop_writer_{}", name))
    }

    #[test]
    fn create_append_finalize() {
        let path = temp_path("basic.wav");
        let format = AudioFormat::canonical();

        let mut writer = TakeWriter::create(&path, &format).unwrap();
        writer.append(&[0.1, -0.2, 0.3, -0.4]).unwrap();
        assert_eq!(writer.frames_written(), 4);

        let meta = writer.finalize().unwrap();
        assert_eq!(meta.frames, 4);
        assert_eq!(meta.sample_rate, 48_000);
        assert!(!meta.checksum.is_empty());

        // The finalized header must be readable again.
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 4);
        assert!(format.matches_spec(&reader.spec()));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn create_truncates_prior_take() {
        let path = temp_path("truncate.wav");
        let format = AudioFormat::canonical();

        let mut writer = TakeWriter::create(&path, &format).unwrap();
        writer.append(&[0.5; 100]).unwrap();
        writer.finalize().unwrap();

        let writer = TakeWriter::create(&path, &format).unwrap();
        let meta = writer.finalize().unwrap();
        assert_eq!(meta.frames, 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 0);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn create_fails_on_bad_path() {
        let path = std::env::temp_dir().join("voice_loop_writer_dir");
        fs::create_dir_all(&path).unwrap();

        // The target is a directory, so file creation must fail cleanly.
        let err = TakeWriter::create(&path, &AudioFormat::canonical()).unwrap_err();
        assert!(matches!(err, SessionError::FileCreate(_)));
    }

    #[test]
    fn duration_follows_frames() {
        let path = temp_path("duration.wav");
        let format = AudioFormat::canonical();

        let mut writer = TakeWriter::create(&path, &format).unwrap();
        writer.append(&vec![0.0; 4800]).unwrap();
        let meta = writer.finalize().unwrap();

        assert!((meta.duration_secs - 0.1).abs() < 1e-9);

        fs::remove_file(&path).ok();
    }
}
