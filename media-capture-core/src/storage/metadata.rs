use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingMetadata;

/// `<recording>.metadata.json`, next to the recording.
pub fn sidecar_path(recording_path: &Path) -> PathBuf {
    let mut name = recording_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".metadata.json");
    recording_path.with_file_name(name)
}

/// Write recording metadata as a JSON sidecar file.
pub fn write_metadata(
    metadata: &RecordingMetadata,
    recording_path: &Path,
) -> Result<PathBuf, CaptureError> {
    let metadata_path = sidecar_path(recording_path);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| CaptureError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&metadata_path, json)
        .map_err(|e| CaptureError::StorageError(format!("failed to write metadata: {}", e)))?;
    log::debug!("wrote recording metadata to {}", metadata_path.display());
    Ok(metadata_path)
}

/// Read recording metadata from a JSON sidecar file.
pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, CaptureError> {
    let metadata_path = sidecar_path(recording_path);
    let json = fs::read_to_string(&metadata_path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json)
        .map_err(|e| CaptureError::StorageError(format!("failed to parse metadata: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::metadata::MetaData;

    #[test]
    fn sidecar_keeps_the_recording_extension() {
        assert_eq!(
            sidecar_path(Path::new("/data/testclip_0003.ogg")),
            PathBuf::from("/data/testclip_0003.ogg.metadata.json")
        );
    }

    #[test]
    fn metadata_survives_the_sidecar() {
        let dir = std::env::temp_dir().join(format!("sidecar-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let recording = dir.join("testclip_0001.mkv");

        let mut tags = MetaData::new();
        tags.insert("title".into(), "Interview".into());
        tags.insert("track".into(), 3i64.into());
        let metadata = RecordingMetadata::new(
            Duration::from_millis(1500),
            &recording.to_string_lossy(),
            Some("matroska".into()),
            Some("opus".into()),
            None,
            tags,
        );

        let written = write_metadata(&metadata, &recording).unwrap();
        assert!(written.exists());
        assert_eq!(read_metadata(&recording).unwrap(), metadata);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_sidecar_is_a_storage_error() {
        let err = read_metadata(Path::new("/nonexistent/clip.ogg")).unwrap_err();
        assert!(matches!(err, CaptureError::StorageError(_)));
    }
}
