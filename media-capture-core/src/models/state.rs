use std::fmt;

use serde::{Deserialize, Serialize};

/// Application-level capture state.
///
/// ```text
/// stopped ⇄ preview ⇄ recording ⇄ paused
///    ↑__________________________________|
/// ```
///
/// Layered on top of the pipeline's own `ElementState`; `pending_state`
/// differs from `state` only while a pipeline transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureState {
    Stopped,
    Preview,
    Paused,
    Recording,
}

impl CaptureState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether the state keeps the recording branch attached.
    pub fn is_recording_or_paused(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

/// Which branches hang off the audio/video tees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineMode {
    Empty,
    Preview,
    Recording,
    PreviewAndRecording,
}

impl PipelineMode {
    pub fn has_preview(&self) -> bool {
        matches!(self, Self::Preview | Self::PreviewAndRecording)
    }

    pub fn has_recording(&self) -> bool {
        matches!(self, Self::Recording | Self::PreviewAndRecording)
    }

    /// Graph shape needed to serve `state`.
    ///
    /// `preview_capable` is false when the capture mode has no branch that
    /// could be previewed (e.g. audio-only without an audio preview sink).
    pub fn for_state(state: CaptureState, preview_capable: bool) -> Self {
        match state {
            CaptureState::Stopped => Self::Empty,
            CaptureState::Preview => Self::Preview,
            CaptureState::Recording | CaptureState::Paused => {
                if preview_capable {
                    Self::PreviewAndRecording
                } else {
                    Self::Recording
                }
            }
        }
    }
}

/// Native pipeline element state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VoidPending => "VOID_PENDING",
            Self::Null => "NULL",
            Self::Ready => "READY",
            Self::Paused => "PAUSED",
            Self::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Capture mode bitmask: which media the session captures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CaptureMode: u8 {
        const AUDIO = 1;
        const VIDEO = 1 << 1;
        const IMAGE = 1 << 2;
    }
}

impl Default for CaptureMode {
    fn default() -> Self {
        Self::AUDIO
    }
}
