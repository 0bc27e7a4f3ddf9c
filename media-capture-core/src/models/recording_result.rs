use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::metadata::MetaData;

/// Result reported when a recording branch has been finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration: Duration,
    pub metadata: RecordingMetadata,
}

/// Metadata stored alongside a recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_ms: u64,
    pub file_path: String,
    pub container: Option<String>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub created_at: String,
    pub tags: MetaData,
}

impl RecordingMetadata {
    pub fn new(
        duration: Duration,
        file_path: &str,
        container: Option<String>,
        audio_codec: Option<String>,
        video_codec: Option<String>,
        tags: MetaData,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_ms: duration.as_millis() as u64,
            file_path: file_path.to_string(),
            container,
            audio_codec,
            video_codec,
            created_at: chrono::Utc::now().to_rfc3339(),
            tags,
        }
    }
}
