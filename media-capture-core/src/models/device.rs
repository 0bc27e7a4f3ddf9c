use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

/// Device record supplied by the (external) device enumeration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Backend-specific identifier, passed to the source element as `device`.
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub capabilities: Vec<String>,
}

impl DeviceDescriptor {
    pub fn audio_input(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::AudioInput,
            capabilities: Vec::new(),
        }
    }

    pub fn video_input(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::VideoInput,
            capabilities: Vec::new(),
        }
    }
}
