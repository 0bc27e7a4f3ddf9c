//! Capture graph: sources, tees and the branches hanging off them.
//!
//! ```text
//! audio-src → audio-volume → audio-tee ─┬→ audio-preview-queue → audio-preview
//!                                       └→ audio-encode-queue → audio-convert → audio-encoder ─┐
//! video-src → video-tee ─┬→ video-preview-queue → video-preview                                ├→ muxer → file-sink
//!                        ├→ video-encode-queue → video-convert → video-encoder ────────────────┘
//!                        └→ image-queue → image-convert → image-encoder → image-sink
//! ```
//!
//! Branches are only added or removed while the pipeline is not playing.
//! Obsolete branches are removed before new ones are requested from the
//! same tee, and only the new elements are synced to the pipeline state.

use std::path::{Path, PathBuf};

use crate::models::config::SessionConfiguration;
use crate::models::device::DeviceDescriptor;
use crate::models::error::CaptureError;
use crate::models::metadata::MetaData;
use crate::models::state::{CaptureMode, ElementState, PipelineMode};
use crate::traits::pipeline_backend::{PipelineBackend, PropertyValue};

use super::encoding::{EncoderSettings, StreamKind};

pub const AUDIO_VOLUME: &str = "audio-volume";
pub const FILE_SINK: &str = "file-sink";
pub const IMAGE_SINK: &str = "image-sink";

/// What the next rebuild should produce besides the mode itself.
#[derive(Debug, Clone, Copy)]
pub struct GraphRequest<'a> {
    pub capture_mode: CaptureMode,
    pub encoder: Option<&'a EncoderSettings>,
    pub output_location: Option<&'a Path>,
    pub audio_device: Option<&'a DeviceDescriptor>,
    pub video_device: Option<&'a DeviceDescriptor>,
}

/// A run of elements fed from a tee request pad. The first element is the
/// entry the pad links to.
struct TeeBranch<B: PipelineBackend> {
    tee: B::Element,
    pad: Option<B::Pad>,
    elements: Vec<B::Element>,
}

struct SourceChain<B: PipelineBackend> {
    elements: Vec<B::Element>,
    tee: B::Element,
}

struct RecordingBranch<B: PipelineBackend> {
    inputs: Vec<TeeBranch<B>>,
    muxer: B::Element,
    sink: B::Element,
    location: PathBuf,
    settings: EncoderSettings,
    detached: bool,
}

/// Recording branch details handed back once it is removed.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRecording {
    pub location: PathBuf,
    pub settings: EncoderSettings,
}

/// Elements added so far for one branch, removed again on failure.
struct Staging<'b, B: PipelineBackend> {
    backend: &'b mut B,
    added: Vec<B::Element>,
}

impl<'b, B: PipelineBackend> Staging<'b, B> {
    fn new(backend: &'b mut B) -> Self {
        Self {
            backend,
            added: Vec::new(),
        }
    }

    fn element(&mut self, factory: &str, name: &str) -> Result<B::Element, CaptureError> {
        let element = self.backend.make_element(factory, name)?;
        self.adopt(&element)?;
        Ok(element)
    }

    fn adopt(&mut self, element: &B::Element) -> Result<(), CaptureError> {
        self.backend.add(element)?;
        self.added.push(element.clone());
        Ok(())
    }

    fn chain(&mut self, elements: &[B::Element]) -> Result<(), CaptureError> {
        for pair in elements.windows(2) {
            self.backend.link(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    /// Syncs everything added, downstream first so data meets ready sinks.
    fn sync(&mut self) -> Result<(), CaptureError> {
        for element in self.added.iter().rev() {
            self.backend.sync_state_with_pipeline(element)?;
        }
        Ok(())
    }

    fn rollback(self) {
        for element in self.added.iter().rev() {
            let _ = self.backend.set_element_state(element, ElementState::Null);
            if let Err(e) = self.backend.remove(element) {
                log::warn!("rollback could not remove {:?}: {}", element, e);
            }
        }
    }

    fn commit(self) -> Vec<B::Element> {
        self.added
    }
}

/// Owns the element handles of the capture pipeline graph.
pub struct CaptureGraph<B: PipelineBackend> {
    config: SessionConfiguration,
    mode: PipelineMode,
    audio_source: Option<SourceChain<B>>,
    video_source: Option<SourceChain<B>>,
    audio_preview: Option<TeeBranch<B>>,
    video_preview: Option<TeeBranch<B>>,
    image: Option<TeeBranch<B>>,
    recording: Option<RecordingBranch<B>>,
    external_video_preview: Option<B::Element>,
}

impl<B: PipelineBackend> CaptureGraph<B> {
    pub fn new(config: SessionConfiguration) -> Self {
        Self {
            config,
            mode: PipelineMode::Empty,
            audio_source: None,
            video_source: None,
            audio_preview: None,
            video_preview: None,
            image: None,
            recording: None,
            external_video_preview: None,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Whether `mode` has anything that can be previewed.
    pub fn preview_capable(&self, mode: CaptureMode) -> bool {
        mode.contains(CaptureMode::VIDEO)
            || mode.contains(CaptureMode::IMAGE)
            || (mode.contains(CaptureMode::AUDIO) && self.config.audio_preview_factory.is_some())
    }

    pub fn volume_element(&self) -> Option<&B::Element> {
        self.audio_source.as_ref().and_then(|s| s.elements.get(1))
    }

    pub fn muxer(&self) -> Option<&B::Element> {
        self.recording.as_ref().map(|r| &r.muxer)
    }

    pub fn image_sink(&self) -> Option<&B::Element> {
        self.image.as_ref().and_then(|b| b.elements.last())
    }

    pub fn recording_location(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.location.as_path())
    }

    pub fn has_recording_branch(&self) -> bool {
        self.recording.is_some()
    }

    pub fn is_recording_detached(&self) -> bool {
        self.recording.as_ref().map(|r| r.detached).unwrap_or(false)
    }

    /// Reshapes the graph for `target`.
    ///
    /// Failure leaves the partially built branch rolled back; the caller is
    /// expected to `clear` the graph and stop.
    pub fn rebuild(
        &mut self,
        backend: &mut B,
        target: PipelineMode,
        request: &GraphRequest<'_>,
    ) -> Result<(), CaptureError> {
        if target == self.mode && target.has_recording() == self.recording.is_some() {
            return Ok(());
        }
        log::debug!("rebuilding capture graph {:?} → {:?}", self.mode, target);
        backend.dump_graph("before-rebuild");
        self.pause_if_playing(backend)?;

        if !target.has_preview() {
            self.remove_previews(backend);
        }
        if !target.has_recording() {
            self.remove_recording(backend);
        }
        if target == PipelineMode::Empty {
            Self::remove_branch(backend, self.image.take());
            self.remove_sources(backend);
        }

        if target != PipelineMode::Empty {
            self.ensure_sources(backend, request)?;
            if request.capture_mode.contains(CaptureMode::IMAGE) && self.image.is_none() {
                self.image = Some(self.build_image(backend)?);
            }
        }
        if target.has_preview() {
            self.ensure_previews(backend, request.capture_mode);
        }
        if target.has_recording() && self.recording.is_none() {
            let settings = request.encoder.ok_or_else(|| {
                CaptureError::NotReady("recording requested without encoder settings".into())
            })?;
            let location = request.output_location.ok_or_else(|| {
                CaptureError::NotReady("recording requested without output location".into())
            })?;
            self.recording = Some(self.build_recording(backend, settings, location)?);
        }

        self.mode = target;
        backend.dump_graph("after-rebuild");
        Ok(())
    }

    /// Removes every branch and source, leaving an empty pipeline.
    pub fn clear(&mut self, backend: &mut B) {
        self.remove_previews(backend);
        self.remove_recording(backend);
        Self::remove_branch(backend, self.image.take());
        self.remove_sources(backend);
        self.mode = PipelineMode::Empty;
    }

    /// Cuts the recording branch off its tees and pushes end-of-stream into
    /// it. Returns false if there is no attached recording branch.
    pub fn detach_recording(&mut self, backend: &mut B) -> Result<bool, CaptureError> {
        let Some(recording) = self.recording.as_mut() else {
            return Ok(false);
        };
        if recording.detached {
            return Ok(false);
        }
        for input in &mut recording.inputs {
            if let (Some(pad), Some(entry)) = (input.pad.take(), input.elements.first()) {
                backend.unlink_pad(&pad, entry);
                backend.release_pad(&input.tee, pad);
            }
        }
        for input in &recording.inputs {
            if let Some(entry) = input.elements.first() {
                backend.send_eos(entry)?;
            }
        }
        recording.detached = true;
        Ok(true)
    }

    /// Removes the recording branch, returning what it wrote. The mode is
    /// left alone; the next `rebuild` settles the rest of the graph.
    pub fn remove_recording(&mut self, backend: &mut B) -> Option<FinishedRecording> {
        let recording = self.recording.take()?;
        for input in recording.inputs {
            Self::remove_branch(backend, Some(input));
        }
        for element in [&recording.muxer, &recording.sink] {
            let _ = backend.set_element_state(element, ElementState::Null);
            if let Err(e) = backend.remove(element) {
                log::warn!("failed to remove {:?}: {}", element, e);
            }
        }
        Some(FinishedRecording {
            location: recording.location,
            settings: recording.settings,
        })
    }

    /// Merges `tags` into the muxer.
    pub fn apply_tags(&self, backend: &mut B, tags: &MetaData) -> Result<(), CaptureError> {
        match self.muxer() {
            Some(muxer) if !tags.is_empty() => backend.set_tags(muxer, tags),
            _ => Ok(()),
        }
    }

    /// Replaces the video preview sink. `None` falls back to the configured
    /// preview factory. The pipeline is paused during the swap and put back
    /// to playing afterwards.
    pub fn set_video_preview(
        &mut self,
        backend: &mut B,
        element: Option<B::Element>,
        capture_mode: CaptureMode,
    ) -> Result<(), CaptureError> {
        let was_playing = backend.current_state() == ElementState::Playing;
        let rebuild = self.video_preview.is_some();
        if rebuild {
            self.pause_if_playing(backend)?;
            Self::remove_branch(backend, self.video_preview.take());
        }
        self.external_video_preview = element;
        if rebuild {
            self.ensure_previews(backend, capture_mode);
            if was_playing {
                backend.set_state(ElementState::Playing)?;
            }
        }
        Ok(())
    }

    fn pause_if_playing(&self, backend: &mut B) -> Result<(), CaptureError> {
        if backend.current_state() != ElementState::Playing {
            return Ok(());
        }
        backend.set_state(ElementState::Paused)?;
        if let Err(e) = backend.wait_for_state(self.config.state_change_timeout) {
            log::warn!("pipeline did not settle in PAUSED before rebuild: {}", e);
        }
        Ok(())
    }

    fn remove_previews(&mut self, backend: &mut B) {
        Self::remove_branch(backend, self.audio_preview.take());
        Self::remove_branch(backend, self.video_preview.take());
    }

    fn remove_sources(&mut self, backend: &mut B) {
        for chain in [self.audio_source.take(), self.video_source.take()]
            .into_iter()
            .flatten()
        {
            for element in chain.elements.iter().rev() {
                let _ = backend.set_element_state(element, ElementState::Null);
                if let Err(e) = backend.remove(element) {
                    log::warn!("failed to remove {:?}: {}", element, e);
                }
            }
        }
    }

    fn remove_branch(backend: &mut B, branch: Option<TeeBranch<B>>) {
        let Some(branch) = branch else {
            return;
        };
        if let (Some(pad), Some(entry)) = (&branch.pad, branch.elements.first()) {
            backend.unlink_pad(pad, entry);
        }
        for element in &branch.elements {
            let _ = backend.set_element_state(element, ElementState::Null);
            if let Err(e) = backend.remove(element) {
                log::warn!("failed to remove {:?}: {}", element, e);
            }
        }
        if let Some(pad) = branch.pad {
            backend.release_pad(&branch.tee, pad);
        }
    }

    fn ensure_sources(
        &mut self,
        backend: &mut B,
        request: &GraphRequest<'_>,
    ) -> Result<(), CaptureError> {
        let mode = request.capture_mode;
        if mode.contains(CaptureMode::AUDIO) && self.audio_source.is_none() {
            let mut staging = Staging::new(backend);
            match Self::build_audio_source(&mut staging, &self.config, request.audio_device) {
                Ok(tee) => {
                    let elements = staging.commit();
                    self.audio_source = Some(SourceChain { elements, tee });
                }
                Err(e) => {
                    staging.rollback();
                    return Err(e);
                }
            }
        }
        let needs_video = mode.contains(CaptureMode::VIDEO) || mode.contains(CaptureMode::IMAGE);
        if needs_video && self.video_source.is_none() {
            let mut staging = Staging::new(backend);
            match Self::build_video_source(&mut staging, &self.config, request.video_device) {
                Ok(tee) => {
                    let elements = staging.commit();
                    self.video_source = Some(SourceChain { elements, tee });
                }
                Err(e) => {
                    staging.rollback();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn build_audio_source(
        staging: &mut Staging<'_, B>,
        config: &SessionConfiguration,
        device: Option<&DeviceDescriptor>,
    ) -> Result<B::Element, CaptureError> {
        let src = staging.element(&config.audio_source_factory, "audio-src")?;
        if let Some(device) = device {
            staging
                .backend
                .set_property(&src, "device", PropertyValue::Str(device.id.clone()))?;
        }
        let volume = staging.element("volume", AUDIO_VOLUME)?;
        let tee = staging.element("tee", "audio-tee")?;
        staging
            .backend
            .set_property(&tee, "allow-not-linked", PropertyValue::Bool(true))?;
        staging.chain(&[src, volume, tee.clone()])?;
        staging.sync()?;
        Ok(tee)
    }

    fn build_video_source(
        staging: &mut Staging<'_, B>,
        config: &SessionConfiguration,
        device: Option<&DeviceDescriptor>,
    ) -> Result<B::Element, CaptureError> {
        let src = staging.element(&config.video_source_factory, "video-src")?;
        if let Some(device) = device {
            staging
                .backend
                .set_property(&src, "device", PropertyValue::Str(device.id.clone()))?;
        }
        let tee = staging.element("tee", "video-tee")?;
        staging
            .backend
            .set_property(&tee, "allow-not-linked", PropertyValue::Bool(true))?;
        staging.chain(&[src, tee.clone()])?;
        staging.sync()?;
        Ok(tee)
    }

    /// Builds `elements` (already created) into a branch fed from `tee`.
    fn attach(
        staging: &mut Staging<'_, B>,
        tee: &B::Element,
        elements: Vec<B::Element>,
    ) -> Result<TeeBranch<B>, CaptureError> {
        staging.chain(&elements)?;
        let entry = elements
            .first()
            .ok_or_else(|| CaptureError::Resource("empty branch".into()))?;
        let pad = staging.backend.request_pad(tee)?;
        if let Err(e) = staging.backend.link_pad(&pad, entry) {
            staging.backend.release_pad(tee, pad);
            return Err(e);
        }
        if let Err(e) = staging.sync() {
            staging.backend.unlink_pad(&pad, entry);
            staging.backend.release_pad(tee, pad);
            return Err(e);
        }
        Ok(TeeBranch {
            tee: tee.clone(),
            pad: Some(pad),
            elements,
        })
    }

    fn ensure_previews(&mut self, backend: &mut B, mode: CaptureMode) {
        if mode.contains(CaptureMode::AUDIO) && self.audio_preview.is_none() {
            if let (Some(factory), Some(source)) =
                (self.config.audio_preview_factory.clone(), self.audio_source.as_ref())
            {
                let tee = source.tee.clone();
                let mut staging = Staging::new(backend);
                let built = (|| {
                    let queue = staging.element("queue", "audio-preview-queue")?;
                    let sink = staging.element(&factory, "audio-preview")?;
                    Self::attach(&mut staging, &tee, vec![queue, sink])
                })();
                match built {
                    Ok(branch) => {
                        staging.commit();
                        self.audio_preview = Some(branch);
                    }
                    Err(e) => {
                        staging.rollback();
                        log::warn!("audio preview unavailable, continuing without it: {}", e);
                    }
                }
            }
        }

        if mode.contains(CaptureMode::VIDEO) && self.video_preview.is_none() {
            let Some(tee) = self.video_source.as_ref().map(|s| s.tee.clone()) else {
                return;
            };
            let external = self.external_video_preview.clone();
            let factory = self.config.video_preview_factory.clone();
            let mut staging = Staging::new(backend);
            let built = (|| {
                let queue = staging.element("queue", "video-preview-queue")?;
                let sink = match external {
                    Some(sink) => {
                        staging.adopt(&sink)?;
                        sink
                    }
                    None => staging.element(&factory, "video-preview")?,
                };
                Self::attach(&mut staging, &tee, vec![queue, sink])
            })();
            match built {
                Ok(branch) => {
                    staging.commit();
                    self.video_preview = Some(branch);
                }
                Err(e) => {
                    staging.rollback();
                    log::warn!("video preview unavailable, continuing without it: {}", e);
                }
            }
        }
    }

    fn build_image(&self, backend: &mut B) -> Result<TeeBranch<B>, CaptureError> {
        let tee = self
            .video_source
            .as_ref()
            .map(|s| s.tee.clone())
            .ok_or_else(|| CaptureError::NotReady("image capture needs a video source".into()))?;
        let encoder_factory = self.config.image_encoder_factory.clone();
        let mut staging = Staging::new(backend);
        let built = (|| {
            let queue = staging.element("queue", "image-queue")?;
            let convert = staging.element("videoconvert", "image-convert")?;
            let encoder = staging
                .element(&encoder_factory, "image-encoder")
                .map_err(as_format_error)?;
            let sink = staging.element("fakesink", IMAGE_SINK)?;
            staging
                .backend
                .set_property(&sink, "enable-last-sample", PropertyValue::Bool(true))?;
            Self::attach(&mut staging, &tee, vec![queue, convert, encoder, sink])
        })();
        match built {
            Ok(branch) => {
                staging.commit();
                Ok(branch)
            }
            Err(e) => {
                staging.rollback();
                Err(e)
            }
        }
    }

    fn build_recording(
        &self,
        backend: &mut B,
        settings: &EncoderSettings,
        location: &Path,
    ) -> Result<RecordingBranch<B>, CaptureError> {
        let mut streams = Vec::new();
        if let (Some(codec), Some(source)) = (settings.audio, self.audio_source.as_ref()) {
            streams.push((StreamKind::Audio, codec, source.tee.clone()));
        }
        if let (Some(codec), Some(source)) = (settings.video, self.video_source.as_ref()) {
            streams.push((StreamKind::Video, codec, source.tee.clone()));
        }
        if streams.is_empty() {
            return Err(CaptureError::NotReady("no stream to record".into()));
        }

        let file_sink_factory = self.config.file_sink_factory.clone();
        let mut staging = Staging::new(backend);
        let built = (|| {
            let muxer = staging
                .element(settings.container.muxer, "muxer")
                .map_err(as_format_error)?;
            let sink = staging.element(&file_sink_factory, FILE_SINK)?;
            staging.backend.set_property(
                &sink,
                "location",
                PropertyValue::Str(location.to_string_lossy().into_owned()),
            )?;
            staging.chain(&[muxer.clone(), sink.clone()])?;

            let mut inputs = Vec::new();
            for (kind, codec, tee) in &streams {
                let prefix = match kind {
                    StreamKind::Audio => "audio",
                    StreamKind::Video => "video",
                };
                let convert_factory = match kind {
                    StreamKind::Audio => "audioconvert",
                    StreamKind::Video => "videoconvert",
                };
                let queue = staging.element("queue", &format!("{}-encode-queue", prefix))?;
                let convert = staging.element(convert_factory, &format!("{}-convert", prefix))?;
                let mut elements = vec![queue, convert];
                if codec.encoder != convert_factory {
                    let encoder = staging
                        .element(codec.encoder, &format!("{}-encoder", prefix))
                        .map_err(as_format_error)?;
                    elements.push(encoder);
                }
                if let Some(last) = elements.last() {
                    staging.backend.link(last, &muxer)?;
                }
                let branch = Self::attach(&mut staging, tee, elements)?;
                inputs.push(branch);
            }
            Ok::<_, CaptureError>((inputs, muxer, sink))
        })();

        match built {
            Ok((inputs, muxer, sink)) => {
                staging.commit();
                Ok(RecordingBranch {
                    inputs,
                    muxer,
                    sink,
                    location: location.to_path_buf(),
                    settings: *settings,
                    detached: false,
                })
            }
            Err(e) => {
                staging.rollback();
                Err(e)
            }
        }
    }
}

/// Missing encoders mean the requested format cannot be produced.
fn as_format_error(err: CaptureError) -> CaptureError {
    match err {
        CaptureError::MissingElement(factory) => {
            CaptureError::UnsupportedFormat(format!("no encoder available: {}", factory))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::ErrorCode;
    use crate::pipeline::encoding::{negotiate, EncodingRequest};
    use crate::pipeline::memory::{GraphEvent, MemoryBackend, MemoryBackendHandle};
    use crate::pipeline::message::BusMessage;

    fn setup(
        mode: CaptureMode,
        config: SessionConfiguration,
    ) -> (CaptureGraph<MemoryBackend>, MemoryBackend, MemoryBackendHandle) {
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        let config = SessionConfiguration {
            capture_mode: mode,
            ..config
        };
        (CaptureGraph::new(config), backend, handle)
    }

    fn settings(mode: CaptureMode) -> EncoderSettings {
        negotiate(&EncodingRequest::default(), mode).unwrap()
    }

    fn request<'a>(
        mode: CaptureMode,
        encoder: Option<&'a EncoderSettings>,
        location: Option<&'a Path>,
    ) -> GraphRequest<'a> {
        GraphRequest {
            capture_mode: mode,
            encoder,
            output_location: location,
            audio_device: None,
            video_device: None,
        }
    }

    fn position(events: &[GraphEvent], event: &GraphEvent) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{:?} not in {:?}", event, events))
    }

    fn has(handle: &MemoryBackendHandle, name: &str) -> bool {
        handle.elements_in_bin().iter().any(|e| e == name)
    }

    #[test]
    fn audio_recording_links_source_through_tee_to_file() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let encoder = settings(mode);
        let location = Path::new("/tmp/testclip_0001.ogg");
        graph
            .rebuild(&mut backend, PipelineMode::Recording, &request(mode, Some(&encoder), Some(location)))
            .unwrap();

        let links = handle.links();
        for link in [
            ("audio-src", "audio-volume"),
            ("audio-volume", "audio-tee"),
            ("audio-tee", "audio-encode-queue"),
            ("audio-encode-queue", "audio-convert"),
            ("audio-convert", "audio-encoder"),
            ("audio-encoder", "muxer"),
            ("muxer", "file-sink"),
        ] {
            assert!(
                links.contains(&(link.0.to_string(), link.1.to_string())),
                "missing link {:?}",
                link
            );
        }
        assert_eq!(
            handle.property(FILE_SINK, "location"),
            Some(PropertyValue::Str("/tmp/testclip_0001.ogg".into()))
        );
        assert_eq!(
            handle.property("audio-tee", "allow-not-linked"),
            Some(PropertyValue::Bool(true))
        );
        assert_eq!(graph.mode(), PipelineMode::Recording);
        assert_eq!(graph.recording_location(), Some(location));
        assert!(graph.volume_element().is_some());
    }

    #[test]
    fn pcm_recording_skips_separate_encoder() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let encoder = negotiate(
            &EncodingRequest {
                container: Some("wav".into()),
                ..Default::default()
            },
            mode,
        )
        .unwrap();
        graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/a.wav"))),
            )
            .unwrap();
        assert!(!has(&handle, "audio-encoder"));
        assert!(handle
            .links()
            .contains(&("audio-convert".to_string(), "muxer".to_string())));
    }

    #[test]
    fn adding_recording_to_preview_pauses_first_and_syncs_only_new_elements() {
        let mode = CaptureMode::AUDIO | CaptureMode::VIDEO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        backend.set_state(ElementState::Playing).unwrap();
        handle.clear_events();

        let encoder = settings(mode);
        graph
            .rebuild(
                &mut backend,
                PipelineMode::PreviewAndRecording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/clip.mkv"))),
            )
            .unwrap();

        let events = handle.events();
        let paused = position(&events, &GraphEvent::PipelineState(ElementState::Paused));
        let first_add = events
            .iter()
            .position(|e| matches!(e, GraphEvent::Added(_)))
            .unwrap();
        assert!(paused < first_add);
        assert!(events.contains(&GraphEvent::ElementState("muxer".into(), ElementState::Paused)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, GraphEvent::ElementState(name, _) if name == "video-src")));
        assert!(has(&handle, "video-preview"));
    }

    #[test]
    fn obsolete_branches_go_before_new_ones() {
        let mode = CaptureMode::VIDEO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let encoder = settings(mode);
        graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/clip.mkv"))),
            )
            .unwrap();
        handle.clear_events();

        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        let events = handle.events();
        let removed = position(&events, &GraphEvent::Removed("muxer".into()));
        let added = position(&events, &GraphEvent::Added("video-preview-queue".into()));
        assert!(removed < added);
        assert!(!graph.has_recording_branch());
    }

    #[test]
    fn missing_encoder_rolls_back_with_format_error() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        handle.remove_factory("vorbisenc");
        let encoder = settings(mode);
        let err = graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/x.ogg"))),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FormatError);
        assert_eq!(graph.mode(), PipelineMode::Empty);
        assert!(!has(&handle, "muxer"));
        assert!(!has(&handle, "audio-encode-queue"));
        assert!(!handle
            .links()
            .iter()
            .any(|(src, _)| src == "audio-tee"));

        graph.clear(&mut backend);
        assert!(handle.elements_in_bin().is_empty());
    }

    #[test]
    fn missing_source_is_a_resource_error() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        handle.remove_factory("autoaudiosrc");
        let encoder = settings(mode);
        let err = graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/x.ogg"))),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceError);
        assert!(handle.elements_in_bin().is_empty());
    }

    #[test]
    fn unavailable_preview_sink_is_skipped() {
        let mode = CaptureMode::VIDEO;
        let config = SessionConfiguration {
            video_preview_factory: "glimagesink".into(),
            ..Default::default()
        };
        let (mut graph, mut backend, handle) = setup(mode, config);
        handle.remove_factory("glimagesink");
        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        assert_eq!(graph.mode(), PipelineMode::Preview);
        assert!(has(&handle, "video-src"));
        assert!(!has(&handle, "video-preview"));
        assert!(!has(&handle, "video-preview-queue"));
    }

    #[test]
    fn audio_preview_only_with_a_sink_factory() {
        let mode = CaptureMode::AUDIO;
        let plain: CaptureGraph<MemoryBackend> = CaptureGraph::new(SessionConfiguration::default());
        assert!(!plain.preview_capable(mode));

        let config = SessionConfiguration {
            audio_preview_factory: Some("autoaudiosink".into()),
            ..Default::default()
        };
        let (mut graph, mut backend, handle) = setup(mode, config);
        assert!(graph.preview_capable(mode));
        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        assert!(has(&handle, "audio-preview"));
    }

    #[test]
    fn image_branch_keeps_last_sample() {
        let mode = CaptureMode::VIDEO | CaptureMode::IMAGE;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        assert_eq!(graph.image_sink().map(|e| e.name.as_str()), Some(IMAGE_SINK));
        assert_eq!(
            handle.property(IMAGE_SINK, "enable-last-sample"),
            Some(PropertyValue::Bool(true))
        );
        assert!(handle
            .links()
            .contains(&("video-tee".to_string(), "image-queue".to_string())));
    }

    #[test]
    fn detach_pushes_eos_through_muxer_to_file_sink() {
        let mode = CaptureMode::AUDIO | CaptureMode::VIDEO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let bus = backend.bus();
        let encoder = settings(mode);
        graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/clip.ogg"))),
            )
            .unwrap();
        backend.set_state(ElementState::Playing).unwrap();
        let _: Vec<BusMessage> = bus.try_iter().collect();

        assert!(graph.detach_recording(&mut backend).unwrap());
        assert!(graph.is_recording_detached());
        assert!(!graph.detach_recording(&mut backend).unwrap());
        assert_eq!(bus.try_recv().unwrap(), BusMessage::Eos { source: FILE_SINK.into() });
        assert!(!handle
            .links()
            .iter()
            .any(|(src, sink)| src.ends_with("-tee") && sink.ends_with("-encode-queue")));

        let finished = graph.remove_recording(&mut backend).unwrap();
        assert_eq!(finished.location, PathBuf::from("/tmp/clip.ogg"));
        assert_eq!(finished.settings.container.name, "ogg");
        assert!(!has(&handle, "muxer"));

        graph
            .rebuild(&mut backend, PipelineMode::Empty, &request(mode, None, None))
            .unwrap();
        assert!(handle.elements_in_bin().is_empty());
    }

    #[test]
    fn source_gets_selected_device() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let device = DeviceDescriptor::audio_input("hw:1", "USB Mic");
        let encoder = settings(mode);
        let req = GraphRequest {
            audio_device: Some(&device),
            ..request(mode, Some(&encoder), Some(Path::new("/tmp/x.ogg")))
        };
        graph.rebuild(&mut backend, PipelineMode::Recording, &req).unwrap();
        assert_eq!(
            handle.property("audio-src", "device"),
            Some(PropertyValue::Str("hw:1".into()))
        );
    }

    #[test]
    fn video_preview_sink_can_be_swapped() {
        let mode = CaptureMode::VIDEO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        graph
            .rebuild(&mut backend, PipelineMode::Preview, &request(mode, None, None))
            .unwrap();
        backend.set_state(ElementState::Playing).unwrap();

        let window = backend.make_element("glimagesink", "window-sink").unwrap();
        graph
            .set_video_preview(&mut backend, Some(window), mode)
            .unwrap();
        assert!(has(&handle, "window-sink"));
        assert!(!has(&handle, "video-preview"));
        assert_eq!(backend.current_state(), ElementState::Playing);

        graph.set_video_preview(&mut backend, None, mode).unwrap();
        assert!(has(&handle, "video-preview"));
        assert!(!has(&handle, "window-sink"));
    }

    #[test]
    fn tags_go_to_the_muxer() {
        let mode = CaptureMode::AUDIO;
        let (mut graph, mut backend, handle) = setup(mode, SessionConfiguration::default());
        let encoder = settings(mode);
        graph
            .rebuild(
                &mut backend,
                PipelineMode::Recording,
                &request(mode, Some(&encoder), Some(Path::new("/tmp/x.ogg"))),
            )
            .unwrap();
        let mut tags = MetaData::new();
        tags.insert("title".into(), "Take 1".into());
        graph.apply_tags(&mut backend, &tags).unwrap();
        assert!(handle.events().contains(&GraphEvent::Tags("muxer".into(), tags)));
    }
}
