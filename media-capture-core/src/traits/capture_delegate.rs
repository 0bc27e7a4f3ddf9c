use std::path::Path;
use std::time::Duration;

use crate::models::error::ErrorCode;
use crate::models::recording_result::RecordingResult;
use crate::models::state::CaptureState;

/// Event delegate for capture session notifications.
///
/// All methods are called from the session thread, not the caller's thread.
/// Implementations should marshal to a UI thread if needed.
pub trait CaptureDelegate: Send + Sync {
    fn on_state_changed(&self, state: CaptureState);

    /// Recording position, polled while recording.
    fn on_duration_changed(&self, duration: Duration);

    /// Always followed by `on_state_changed(Stopped)` for fatal errors.
    fn on_error(&self, code: ErrorCode, message: &str);

    fn on_muted_changed(&self, _muted: bool) {}

    fn on_volume_changed(&self, _volume: f64) {}

    fn on_ready_changed(&self, _ready: bool) {}

    fn on_image_exposed(&self, _request_id: i32) {}

    fn on_image_captured(&self, _request_id: i32) {}

    fn on_image_saved(&self, _request_id: i32, _path: &Path) {}

    fn on_image_capture_error(&self, _request_id: i32, _code: ErrorCode, _message: &str) {}

    /// Called once the recording branch is torn down and the file is final.
    fn on_recording_finished(&self, _result: &RecordingResult) {}
}
