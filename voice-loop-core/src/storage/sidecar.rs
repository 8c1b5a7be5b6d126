use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::SessionError;
use crate::models::take::TakeMetadata;

/// Write take metadata as a JSON sidecar file.
///
/// Creates `{take_path}.metadata.json` alongside the take.
pub fn write_sidecar(metadata: &TakeMetadata, take_path: &Path) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SessionError::Storage(format!("serialize metadata: {}", e)))?;
    fs::write(sidecar_path(take_path), json)
        .map_err(|e| SessionError::Storage(format!("write metadata: {}", e)))?;
    Ok(())
}

/// Read take metadata from a JSON sidecar file.
pub fn read_sidecar(take_path: &Path) -> Result<TakeMetadata, SessionError> {
    let json = fs::read_to_string(sidecar_path(take_path))
        .map_err(|e| SessionError::Storage(format!("read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| SessionError::Storage(format!("parse metadata: {}", e)))
}

fn sidecar_path(take_path: &Path) -> PathBuf {
    take_path.with_extension("metadata.json")
}
