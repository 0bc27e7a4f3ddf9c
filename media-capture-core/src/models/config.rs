use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::state::CaptureMode;

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfiguration {
    /// Media captured by the session (default: audio only).
    pub capture_mode: CaptureMode,

    /// Root directory for generated output file names.
    /// None = first writable of Documents, home, current directory, temp.
    pub output_directory: Option<PathBuf>,

    /// Requested container, e.g. "ogg". None = negotiate.
    pub container: Option<String>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,

    pub audio_source_factory: String,
    pub video_source_factory: String,
    /// Sink for the audio preview branch. None = audio is not previewed.
    pub audio_preview_factory: Option<String>,
    pub video_preview_factory: String,
    pub image_encoder_factory: String,
    pub file_sink_factory: String,

    /// Upper bound for synchronous pipeline state waits.
    pub state_change_timeout: Duration,

    /// How long a stop waits for end-of-stream from the recording branch.
    pub eos_timeout: Duration,

    /// Position polling interval while recording.
    pub duration_update_interval: Duration,

    /// Write `<output>.metadata.json` next to each finished recording.
    pub write_metadata_sidecar: bool,
}

impl SessionConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.capture_mode.is_empty() {
            return Err("capture mode must not be empty".into());
        }
        for (name, value) in [
            ("audio source", &self.audio_source_factory),
            ("video source", &self.video_source_factory),
            ("video preview", &self.video_preview_factory),
            ("image encoder", &self.image_encoder_factory),
            ("file sink", &self.file_sink_factory),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} factory name is empty", name));
            }
        }
        if matches!(&self.audio_preview_factory, Some(f) if f.trim().is_empty()) {
            return Err("audio preview factory name is empty".into());
        }
        if self.state_change_timeout.is_zero() {
            return Err("state change timeout must be positive".into());
        }
        if self.eos_timeout.is_zero() {
            return Err("EOS timeout must be positive".into());
        }
        if self.duration_update_interval.is_zero() {
            return Err("duration update interval must be positive".into());
        }
        Ok(())
    }
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            capture_mode: CaptureMode::AUDIO,
            output_directory: None,
            container: None,
            audio_codec: None,
            video_codec: None,
            audio_source_factory: "autoaudiosrc".into(),
            video_source_factory: "autovideosrc".into(),
            audio_preview_factory: None,
            video_preview_factory: "fakesink".into(),
            image_encoder_factory: "jpegenc".into(),
            file_sink_factory: "filesink".into(),
            state_change_timeout: Duration::from_millis(100),
            eos_timeout: Duration::from_secs(5),
            duration_update_interval: Duration::from_millis(250),
            write_metadata_sidecar: false,
        }
    }
}
