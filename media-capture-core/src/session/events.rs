use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::models::error::ErrorCode;
use crate::models::recording_result::RecordingResult;
use crate::models::state::CaptureState;
use crate::traits::capture_delegate::CaptureDelegate;

/// Session notification as a value, for consumers that prefer a channel
/// over a delegate object.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(CaptureState),
    DurationChanged(Duration),
    Error(ErrorCode, String),
    MutedChanged(bool),
    VolumeChanged(f64),
    ReadyChanged(bool),
    ImageExposed(i32),
    ImageCaptured(i32),
    ImageSaved(i32, PathBuf),
    ImageCaptureError(i32, ErrorCode, String),
    RecordingFinished(RecordingResult),
}

/// Forwards every notification into the channel. A closed receiver drops
/// events silently.
impl CaptureDelegate for Sender<SessionEvent> {
    fn on_state_changed(&self, state: CaptureState) {
        let _ = self.send(SessionEvent::StateChanged(state));
    }

    fn on_duration_changed(&self, duration: Duration) {
        let _ = self.send(SessionEvent::DurationChanged(duration));
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        let _ = self.send(SessionEvent::Error(code, message.to_string()));
    }

    fn on_muted_changed(&self, muted: bool) {
        let _ = self.send(SessionEvent::MutedChanged(muted));
    }

    fn on_volume_changed(&self, volume: f64) {
        let _ = self.send(SessionEvent::VolumeChanged(volume));
    }

    fn on_ready_changed(&self, ready: bool) {
        let _ = self.send(SessionEvent::ReadyChanged(ready));
    }

    fn on_image_exposed(&self, request_id: i32) {
        let _ = self.send(SessionEvent::ImageExposed(request_id));
    }

    fn on_image_captured(&self, request_id: i32) {
        let _ = self.send(SessionEvent::ImageCaptured(request_id));
    }

    fn on_image_saved(&self, request_id: i32, path: &Path) {
        let _ = self.send(SessionEvent::ImageSaved(request_id, path.to_path_buf()));
    }

    fn on_image_capture_error(&self, request_id: i32, code: ErrorCode, message: &str) {
        let _ = self.send(SessionEvent::ImageCaptureError(
            request_id,
            code,
            message.to_string(),
        ));
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        let _ = self.send(SessionEvent::RecordingFinished(result.clone()));
    }
}
