//! Container and codec registry, and negotiation of a compatible set.

use crate::models::error::CaptureError;
use crate::models::state::CaptureMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Codec {
    pub name: &'static str,
    pub kind: StreamKind,
    /// Element factory producing this codec from raw media.
    pub encoder: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ContainerFormat {
    pub name: &'static str,
    pub extension: &'static str,
    pub muxer: &'static str,
    /// Codecs the muxer accepts, in order of preference.
    pub codecs: &'static [&'static str],
}

impl ContainerFormat {
    pub fn accepts(&self, codec: &Codec) -> bool {
        self.codecs.contains(&codec.name)
    }
}

pub static CODECS: &[Codec] = &[
    Codec { name: "vorbis", kind: StreamKind::Audio, encoder: "vorbisenc" },
    Codec { name: "opus", kind: StreamKind::Audio, encoder: "opusenc" },
    Codec { name: "flac", kind: StreamKind::Audio, encoder: "flacenc" },
    Codec { name: "aac", kind: StreamKind::Audio, encoder: "avenc_aac" },
    Codec { name: "pcm", kind: StreamKind::Audio, encoder: "audioconvert" },
    Codec { name: "theora", kind: StreamKind::Video, encoder: "theoraenc" },
    Codec { name: "vp8", kind: StreamKind::Video, encoder: "vp8enc" },
    Codec { name: "vp9", kind: StreamKind::Video, encoder: "vp9enc" },
    Codec { name: "h264", kind: StreamKind::Video, encoder: "x264enc" },
];

pub static CONTAINERS: &[ContainerFormat] = &[
    ContainerFormat {
        name: "ogg",
        extension: "ogg",
        muxer: "oggmux",
        codecs: &["vorbis", "opus", "theora"],
    },
    ContainerFormat {
        name: "matroska",
        extension: "mkv",
        muxer: "matroskamux",
        codecs: &["opus", "vorbis", "flac", "vp8", "vp9", "h264"],
    },
    ContainerFormat {
        name: "webm",
        extension: "webm",
        muxer: "webmmux",
        codecs: &["opus", "vorbis", "vp8", "vp9"],
    },
    ContainerFormat {
        name: "mp4",
        extension: "mp4",
        muxer: "mp4mux",
        codecs: &["aac", "h264"],
    },
    ContainerFormat {
        name: "wav",
        extension: "wav",
        muxer: "wavenc",
        codecs: &["pcm"],
    },
];

pub fn find_codec(name: &str) -> Option<&'static Codec> {
    CODECS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn find_container(name: &str) -> Option<&'static ContainerFormat> {
    CONTAINERS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// A compatible container/codec selection for one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub container: &'static ContainerFormat,
    pub audio: Option<&'static Codec>,
    pub video: Option<&'static Codec>,
}

/// Requested encoding; `None` fields are free to negotiate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodingRequest {
    pub container: Option<String>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
}

/// Picks the first container whose muxer accepts a codec for every
/// captured stream, honouring the requested names.
pub fn negotiate(
    request: &EncodingRequest,
    mode: CaptureMode,
) -> Result<EncoderSettings, CaptureError> {
    let incompatible =
        || CaptureError::UnsupportedFormat("Not compatible codecs and container format.".into());

    let containers: Vec<&'static ContainerFormat> = match &request.container {
        Some(name) => vec![find_container(name).ok_or_else(incompatible)?],
        None => CONTAINERS.iter().collect(),
    };
    let pick = |requested: &Option<String>,
                kind: StreamKind,
                container: &ContainerFormat|
     -> Result<Option<&'static Codec>, CaptureError> {
        match requested {
            Some(name) => {
                let codec = find_codec(name).ok_or_else(incompatible)?;
                Ok((codec.kind == kind && container.accepts(codec)).then_some(codec))
            }
            None => Ok(container
                .codecs
                .iter()
                .filter_map(|name| find_codec(name))
                .find(|codec| codec.kind == kind)),
        }
    };

    let wants_audio = mode.contains(CaptureMode::AUDIO);
    let wants_video = mode.contains(CaptureMode::VIDEO);
    if !wants_audio && !wants_video {
        return Err(CaptureError::UnsupportedFormat(
            "nothing to record in this capture mode".into(),
        ));
    }

    for container in containers {
        let audio = if wants_audio {
            match pick(&request.audio_codec, StreamKind::Audio, container)? {
                Some(codec) => Some(codec),
                None => continue,
            }
        } else {
            None
        };
        let video = if wants_video {
            match pick(&request.video_codec, StreamKind::Video, container)? {
                Some(codec) => Some(codec),
                None => continue,
            }
        } else {
            None
        };
        return Ok(EncoderSettings {
            container,
            audio,
            video,
        });
    }
    Err(incompatible())
}
