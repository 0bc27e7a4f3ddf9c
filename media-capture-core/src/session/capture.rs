use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::models::config::SessionConfiguration;
use crate::models::device::DeviceDescriptor;
use crate::models::error::{CaptureError, ErrorCode};
use crate::models::metadata::MetaData;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::state::{CaptureMode, CaptureState, ElementState, PipelineMode};
use crate::pipeline::encoding::{negotiate, EncoderSettings, EncodingRequest};
use crate::pipeline::graph::{CaptureGraph, FinishedRecording, GraphRequest, FILE_SINK};
use crate::pipeline::message::BusMessage;
use crate::policy::resource_policy::{ResourceClient, ResourceEvent, ResourcePolicy};
use crate::storage::metadata::write_metadata;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::pipeline_backend::{PipelineBackend, PropertyValue};

use super::output::{default_directory, generate_file_name, IMAGE_PREFIX, RECORDING_PREFIX};

const MAX_VOLUME: f64 = 10.0;

enum Command<E> {
    SetState(CaptureState),
    SetCaptureMode(CaptureMode, Sender<Result<(), CaptureError>>),
    SetOutputLocation(Option<PathBuf>),
    SetAudioDevice(Option<DeviceDescriptor>),
    SetVideoDevice(Option<DeviceDescriptor>),
    SetMetaData(MetaData),
    SetMuted(bool),
    SetVolume(f64),
    CaptureImage(i32, String),
    SetVideoPreview(Option<E>, Sender<Result<(), CaptureError>>),
    Shutdown,
}

/// Values readable from any thread without a round trip to the session.
#[derive(Debug, Clone)]
struct Snapshot {
    state: CaptureState,
    pending: CaptureState,
    duration: Duration,
    ready: bool,
    muted: bool,
    volume: f64,
    error: ErrorCode,
    error_string: String,
    capture_mode: CaptureMode,
    output_location: Option<PathBuf>,
    actual_location: Option<PathBuf>,
}

/// Capture session orchestrator.
///
/// The pipeline, its graph and all session state live on a dedicated
/// `capture-session` thread. Public methods enqueue commands; bus messages,
/// resource events and the duration timer are consumed by the same loop:
/// ```text
/// [API calls] ─┐
/// [bus] ───────┼→ select! → SessionWorker → PipelineBackend
/// [resources] ─┤                 └→ CaptureDelegate
/// [ticker] ────┘
/// ```
pub struct CaptureSession<B: PipelineBackend> {
    commands: Sender<Command<B::Element>>,
    snapshot: Arc<Mutex<Snapshot>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<B: PipelineBackend> CaptureSession<B> {
    pub fn new(
        backend: B,
        config: SessionConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Result<Self, CaptureError> {
        Self::spawn(backend, config, delegate, None)
    }

    /// Like `new`, but leaving `StoppedState` first acquires resources
    /// from `policy`.
    pub fn with_resource_policy(
        backend: B,
        config: SessionConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
        policy: &ResourcePolicy,
    ) -> Result<Self, CaptureError> {
        Self::spawn(backend, config, delegate, Some(policy.register()))
    }

    fn spawn(
        backend: B,
        config: SessionConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
        resources: Option<ResourceClient>,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let snapshot = Arc::new(Mutex::new(Snapshot {
            state: CaptureState::Stopped,
            pending: CaptureState::Stopped,
            duration: Duration::ZERO,
            ready: true,
            muted: false,
            volume: 1.0,
            error: ErrorCode::NoError,
            error_string: String::new(),
            capture_mode: config.capture_mode,
            output_location: None,
            actual_location: None,
        }));
        let (tx, rx) = unbounded();
        let worker = SessionWorker::new(backend, config, delegate, resources, Arc::clone(&snapshot));

        let handle = thread::Builder::new()
            .name("capture-session".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| CaptureError::Resource(format!("failed to spawn session thread: {}", e)))?;

        Ok(Self {
            commands: tx,
            snapshot,
            worker: Some(handle),
        })
    }

    fn send(&self, command: Command<B::Element>) -> Result<(), CaptureError> {
        self.commands
            .send(command)
            .map_err(|_| CaptureError::SessionClosed)
    }

    /// Requests a state change. Progress and failures are reported through
    /// the delegate.
    pub fn set_state(&self, state: CaptureState) -> Result<(), CaptureError> {
        self.send(Command::SetState(state))
    }

    /// Changes the captured media. Only allowed while stopped.
    pub fn set_capture_mode(&self, mode: CaptureMode) -> Result<(), CaptureError> {
        let (tx, rx) = bounded(1);
        self.send(Command::SetCaptureMode(mode, tx))?;
        rx.recv().map_err(|_| CaptureError::SessionClosed)?
    }

    /// File or directory for the next recording. `None` generates
    /// `testclip_NNNN.<ext>` in the configured output directory.
    pub fn set_output_location(&self, location: Option<PathBuf>) -> Result<(), CaptureError> {
        self.send(Command::SetOutputLocation(location))
    }

    pub fn set_audio_capture_device(
        &self,
        device: Option<DeviceDescriptor>,
    ) -> Result<(), CaptureError> {
        self.send(Command::SetAudioDevice(device))
    }

    pub fn set_video_capture_device(
        &self,
        device: Option<DeviceDescriptor>,
    ) -> Result<(), CaptureError> {
        self.send(Command::SetVideoDevice(device))
    }

    /// Tags written into the next (or current) recording.
    pub fn set_metadata(&self, metadata: MetaData) -> Result<(), CaptureError> {
        self.send(Command::SetMetaData(metadata))
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), CaptureError> {
        self.send(Command::SetMuted(muted))
    }

    /// Linear gain, clamped to `0.0..=10.0`.
    pub fn set_volume(&self, volume: f64) -> Result<(), CaptureError> {
        self.send(Command::SetVolume(volume))
    }

    /// Saves the next video frame. An empty `file_name` generates
    /// `img_NNNN.jpg` in the output directory.
    pub fn capture_image(&self, request_id: i32, file_name: &str) -> Result<(), CaptureError> {
        self.send(Command::CaptureImage(request_id, file_name.to_string()))
    }

    /// Installs a caller-owned video sink, or restores the configured one
    /// with `None`. Detach before dropping the element.
    pub fn set_video_preview(&self, element: Option<B::Element>) -> Result<(), CaptureError> {
        let (tx, rx) = bounded(1);
        self.send(Command::SetVideoPreview(element, tx))?;
        rx.recv().map_err(|_| CaptureError::SessionClosed)?
    }

    pub fn state(&self) -> CaptureState {
        self.snapshot.lock().state
    }

    pub fn pending_state(&self) -> CaptureState {
        self.snapshot.lock().pending
    }

    pub fn duration(&self) -> Duration {
        self.snapshot.lock().duration
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.lock().ready
    }

    pub fn is_muted(&self) -> bool {
        self.snapshot.lock().muted
    }

    pub fn volume(&self) -> f64 {
        self.snapshot.lock().volume
    }

    pub fn error(&self) -> ErrorCode {
        self.snapshot.lock().error
    }

    pub fn error_string(&self) -> String {
        self.snapshot.lock().error_string.clone()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.snapshot.lock().capture_mode
    }

    pub fn output_location(&self) -> Option<PathBuf> {
        self.snapshot.lock().output_location.clone()
    }

    /// File the current or last recording was written to.
    pub fn actual_location(&self) -> Option<PathBuf> {
        self.snapshot.lock().actual_location.clone()
    }

    /// Finishes any recording (waiting up to the EOS timeout), tears the
    /// pipeline down and joins the session thread.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("capture session thread panicked");
            }
        }
    }
}

impl<B: PipelineBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stop in progress: EOS sent into the recording branch, not yet seen on
/// the bus.
struct EosWait {
    deadline: Instant,
    next: CaptureState,
}

struct SessionWorker<B: PipelineBackend> {
    backend: B,
    graph: CaptureGraph<B>,
    config: SessionConfiguration,
    delegate: Arc<dyn CaptureDelegate>,
    snapshot: Arc<Mutex<Snapshot>>,
    bus: Receiver<BusMessage>,
    resources: Option<ResourceClient>,

    state: CaptureState,
    pending: CaptureState,
    capture_mode: CaptureMode,
    output_location: Option<PathBuf>,
    metadata: MetaData,
    audio_device: Option<DeviceDescriptor>,
    video_device: Option<DeviceDescriptor>,
    device_change_deferred: bool,
    muted: bool,
    volume: f64,
    duration: Duration,
    ready: bool,
    error: ErrorCode,
    error_string: String,
    eos_wait: Option<EosWait>,
    waiting_resources: Option<CaptureState>,
    actual_location: Option<PathBuf>,
}

impl<B: PipelineBackend> SessionWorker<B> {
    fn new(
        backend: B,
        config: SessionConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
        resources: Option<ResourceClient>,
        snapshot: Arc<Mutex<Snapshot>>,
    ) -> Self {
        let bus = backend.bus();
        Self {
            backend,
            graph: CaptureGraph::new(config.clone()),
            capture_mode: config.capture_mode,
            config,
            delegate,
            snapshot,
            bus,
            resources,
            state: CaptureState::Stopped,
            pending: CaptureState::Stopped,
            output_location: None,
            metadata: MetaData::new(),
            audio_device: None,
            video_device: None,
            device_change_deferred: false,
            muted: false,
            volume: 1.0,
            duration: Duration::ZERO,
            ready: true,
            error: ErrorCode::NoError,
            error_string: String::new(),
            eos_wait: None,
            waiting_resources: None,
            actual_location: None,
        }
    }

    fn run(mut self, commands: Receiver<Command<B::Element>>) {
        let bus = self.bus.clone();
        let resource_events = self
            .resources
            .as_ref()
            .map(|client| client.events().clone())
            .unwrap_or_else(never);
        let ticker = tick(self.config.duration_update_interval);
        log::debug!("capture session started ({:?})", self.capture_mode);

        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(bus) -> message => {
                    if let Ok(message) = message {
                        self.handle_bus_message(message);
                    }
                }
                recv(resource_events) -> event => {
                    if let Ok(event) = event {
                        self.handle_resource_event(event);
                    }
                }
                recv(ticker) -> _ => self.on_tick(),
            }
            self.publish();
        }

        self.shutdown();
        self.publish();
        log::debug!("capture session finished");
    }

    fn handle_command(&mut self, command: Command<B::Element>) {
        match command {
            Command::SetState(state) => self.request_state(state),
            Command::SetCaptureMode(mode, reply) => {
                let _ = reply.send(self.set_capture_mode(mode));
            }
            Command::SetOutputLocation(location) => {
                log::debug!("output location set to {:?}", location);
                self.output_location = location;
            }
            Command::SetAudioDevice(device) => {
                if self.audio_device != device {
                    self.audio_device = device;
                    self.on_device_changed();
                }
            }
            Command::SetVideoDevice(device) => {
                if self.video_device != device {
                    self.video_device = device;
                    self.on_device_changed();
                }
            }
            Command::SetMetaData(metadata) => {
                self.metadata = metadata;
                if self.graph.has_recording_branch() {
                    if let Err(e) = self.graph.apply_tags(&mut self.backend, &self.metadata) {
                        log::warn!("failed to update recording tags: {}", e);
                    }
                }
            }
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::CaptureImage(request_id, file_name) => {
                self.capture_image(request_id, &file_name)
            }
            Command::SetVideoPreview(element, reply) => {
                let result =
                    self.graph
                        .set_video_preview(&mut self.backend, element, self.capture_mode);
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    // --- State handling ---

    fn request_state(&mut self, target: CaptureState) {
        if let Some(wait) = self.eos_wait.as_mut() {
            log::debug!("{:?} requested while finishing a recording", target);
            wait.next = target;
            self.set_pending(target);
            return;
        }
        if target == self.pending && self.waiting_resources.is_none() {
            return;
        }
        log::debug!("capture state {:?} → {:?}", self.state, target);

        if target.is_stopped() {
            if self.waiting_resources.take().is_some() {
                self.release_resources();
            }
        } else if self.resources.as_ref().is_some_and(|c| !c.is_granted()) {
            self.waiting_resources = Some(target);
            self.set_pending(target);
            self.acquire_resources();
            return;
        }
        self.apply_state(target);
    }

    fn apply_state(&mut self, target: CaptureState) {
        if target.is_recording_or_paused() {
            if !self.graph.has_recording_branch() {
                self.start_pipeline(target);
                return;
            }
            // Already recording: only the pipeline state flips.
            self.set_pending(target);
            let element_state = if target == CaptureState::Paused {
                ElementState::Paused
            } else {
                ElementState::Playing
            };
            if let Err(e) = self.backend.set_state(element_state) {
                self.fail(e);
            }
        } else if target.is_stopped() {
            self.begin_stop(CaptureState::Stopped);
        } else if self.graph.has_recording_branch() {
            self.begin_stop(CaptureState::Preview);
        } else {
            self.start_pipeline(CaptureState::Preview);
        }
    }

    /// Builds the graph for `target` and starts the pipeline transition.
    /// The state itself changes once the pipeline reports it.
    fn start_pipeline(&mut self, target: CaptureState) {
        self.set_pending(target);
        self.set_error(ErrorCode::NoError, String::new());

        let mode = PipelineMode::for_state(target, self.graph.preview_capable(self.capture_mode));
        let mut encoder: Option<EncoderSettings> = None;
        let mut location: Option<PathBuf> = None;
        if mode.has_recording() && !self.graph.has_recording_branch() {
            let request = EncodingRequest {
                container: self.config.container.clone(),
                audio_codec: self.config.audio_codec.clone(),
                video_codec: self.config.video_codec.clone(),
            };
            let settings = match negotiate(&request, self.capture_mode) {
                Ok(settings) => settings,
                Err(e) => return self.fail(e),
            };
            location = Some(self.recording_location(settings.container.extension));
            encoder = Some(settings);
            self.update_duration(Duration::ZERO);
        }

        let request = GraphRequest {
            capture_mode: self.capture_mode,
            encoder: encoder.as_ref(),
            output_location: location.as_deref(),
            audio_device: self.audio_device.as_ref(),
            video_device: self.video_device.as_ref(),
        };
        if let Err(e) = self.graph.rebuild(&mut self.backend, mode, &request) {
            return self.fail(e);
        }
        if location.is_some() {
            self.actual_location = location;
        }

        self.apply_volume();
        if mode.has_recording() {
            if let Err(e) = self.graph.apply_tags(&mut self.backend, &self.metadata) {
                log::warn!("failed to apply recording tags: {}", e);
            }
        }

        let element_state = if target == CaptureState::Paused {
            ElementState::Paused
        } else {
            ElementState::Playing
        };
        if let Err(e) = self.backend.set_state(element_state) {
            log::error!("pipeline refused {}: {}", element_state, e);
            self.backend.dump_graph("state-change-failure");
            self.fail(e);
        }
    }

    fn recording_location(&self, extension: &str) -> PathBuf {
        match &self.output_location {
            Some(path) if path.is_dir() => generate_file_name(path, RECORDING_PREFIX, extension),
            Some(path) if path.extension().is_none() => path.with_extension(extension),
            Some(path) => path.clone(),
            None => {
                let dir = self
                    .config
                    .output_directory
                    .clone()
                    .unwrap_or_else(default_directory);
                generate_file_name(&dir, RECORDING_PREFIX, extension)
            }
        }
    }

    /// Moves towards `next`, finishing the recording first if there is one.
    fn begin_stop(&mut self, next: CaptureState) {
        self.set_pending(next);
        if !self.graph.has_recording_branch() {
            return self.leave_recording(next);
        }

        // EOS only flows through a playing pipeline.
        if self.backend.current_state() != ElementState::Playing {
            if let Err(e) = self.backend.set_state(ElementState::Playing) {
                log::warn!("could not resume pipeline to flush recording: {}", e);
            }
        }
        match self.graph.detach_recording(&mut self.backend) {
            Ok(true) => {
                log::debug!("waiting for EOS from the recording branch");
                self.eos_wait = Some(EosWait {
                    deadline: Instant::now() + self.config.eos_timeout,
                    next,
                });
            }
            Ok(false) => self.finish_recording(next),
            Err(e) => {
                log::warn!("failed to send EOS into the recording branch: {}", e);
                self.finish_recording(next);
            }
        }
    }

    /// EOS was observed (or timed out): the file is final.
    fn finish_recording(&mut self, next: CaptureState) {
        self.eos_wait = None;
        let duration = self.backend.query_position().unwrap_or(self.duration);
        if let Some(finished) = self.graph.remove_recording(&mut self.backend) {
            self.report_recording(finished, duration);
        }
        self.leave_recording(next);
    }

    fn leave_recording(&mut self, next: CaptureState) {
        if self.device_change_deferred {
            self.device_change_deferred = false;
            if !next.is_stopped() {
                self.restart_empty();
            }
        }
        match next {
            CaptureState::Stopped => self.teardown(),
            target => self.apply_state(target),
        }
    }

    fn report_recording(&mut self, finished: FinishedRecording, duration: Duration) {
        let FinishedRecording { location, settings } = finished;
        log::info!(
            "recording finished: {} ({} ms)",
            location.display(),
            duration.as_millis()
        );
        let metadata = RecordingMetadata::new(
            duration,
            &location.to_string_lossy(),
            Some(settings.container.name.to_string()),
            settings.audio.map(|c| c.name.to_string()),
            settings.video.map(|c| c.name.to_string()),
            self.metadata.clone(),
        );
        if self.config.write_metadata_sidecar {
            if let Err(e) = write_metadata(&metadata, &location) {
                log::warn!("failed to write metadata sidecar: {}", e);
            }
        }
        let result = RecordingResult {
            file_path: location,
            duration,
            metadata,
        };
        self.delegate.on_recording_finished(&result);
    }

    /// Empties the graph and stops the pipeline.
    fn teardown(&mut self) {
        self.restart_empty();
        self.set_pending(CaptureState::Stopped);
        self.set_state(CaptureState::Stopped);
        self.release_resources();
    }

    fn restart_empty(&mut self) {
        self.graph.clear(&mut self.backend);
        if let Err(e) = self.backend.set_state(ElementState::Null) {
            log::warn!("pipeline did not stop cleanly: {}", e);
        }
        self.backend.dump_graph("stopped");
    }

    /// Reports `error` and forces the session into `StoppedState`.
    fn fail(&mut self, error: CaptureError) {
        log::error!("capture session error: {}", error);
        self.fail_with(error.code(), error.to_string());
    }

    fn fail_with(&mut self, code: ErrorCode, message: String) {
        self.set_error(code, message.clone());
        self.delegate.on_error(code, &message);
        self.eos_wait = None;
        self.waiting_resources = None;
        self.device_change_deferred = false;
        if self.graph.remove_recording(&mut self.backend).is_some() {
            log::warn!("recording aborted, output may be incomplete");
        }
        self.teardown();
    }

    fn set_state(&mut self, state: CaptureState) {
        if self.state == state {
            return;
        }
        log::info!("capture state: {:?}", state);
        self.state = state;
        self.backend.dump_graph(match state {
            CaptureState::Stopped => "state-stopped",
            CaptureState::Preview => "state-preview",
            CaptureState::Paused => "state-paused",
            CaptureState::Recording => "state-recording",
        });
        self.delegate.on_state_changed(state);
    }

    fn set_pending(&mut self, state: CaptureState) {
        self.pending = state;
    }

    fn set_error(&mut self, code: ErrorCode, message: String) {
        self.error = code;
        self.error_string = message;
    }

    fn set_capture_mode(&mut self, mode: CaptureMode) -> Result<(), CaptureError> {
        if mode.is_empty() {
            return Err(CaptureError::ConfigurationFailed(
                "capture mode must not be empty".into(),
            ));
        }
        if !self.state.is_stopped() || !self.pending.is_stopped() {
            return Err(CaptureError::NotReady(
                "capture mode can only change while stopped".into(),
            ));
        }
        self.capture_mode = mode;
        Ok(())
    }

    fn on_device_changed(&mut self) {
        if self.eos_wait.is_some() || self.graph.has_recording_branch() {
            log::debug!("device change deferred until the recording stops");
            self.device_change_deferred = true;
            return;
        }
        if self.graph.mode() == PipelineMode::Empty {
            return;
        }
        let target = self.pending;
        log::debug!("restarting pipeline for device change");
        self.restart_empty();
        self.start_pipeline(target);
    }

    // --- Bus ---

    fn handle_bus_message(&mut self, message: BusMessage) {
        match message {
            BusMessage::StateChanged {
                source,
                old,
                new,
                pending,
            } => {
                if source != self.backend.pipeline_name() {
                    return;
                }
                log::debug!("pipeline {} → {} (pending {})", old, new, pending);
                if self.eos_wait.is_some() || pending != ElementState::VoidPending {
                    return;
                }
                match new {
                    ElementState::Playing
                        if matches!(
                            self.pending,
                            CaptureState::Preview | CaptureState::Recording
                        ) =>
                    {
                        self.set_state(self.pending);
                    }
                    ElementState::Paused if self.pending == CaptureState::Paused => {
                        self.set_state(CaptureState::Paused);
                    }
                    _ => {}
                }
            }
            BusMessage::Eos { source } => {
                if self.eos_wait.is_some() && self.is_recording_eos(&source) {
                    let next = self
                        .eos_wait
                        .as_ref()
                        .map(|wait| wait.next)
                        .unwrap_or(CaptureState::Stopped);
                    self.finish_recording(next);
                } else {
                    log::debug!("ignoring EOS from {}", source);
                }
            }
            BusMessage::Error {
                source,
                domain,
                message,
                debug,
            } => {
                log::error!(
                    "error from {}: {} ({})",
                    source,
                    message,
                    debug.as_deref().unwrap_or("no debug info")
                );
                self.backend.dump_graph("bus-error");
                self.fail_with(domain.error_code(), message);
            }
            BusMessage::Warning { source, message } => {
                log::warn!("warning from {}: {}", source, message);
            }
            BusMessage::Info { source, message } => {
                log::debug!("info from {}: {}", source, message);
            }
            BusMessage::DurationChanged { .. } => self.poll_duration(),
            BusMessage::ImageExposed { request_id } => self.delegate.on_image_exposed(request_id),
            BusMessage::ImageCaptured { request_id } => {
                self.delegate.on_image_captured(request_id)
            }
            BusMessage::ImageSaved { request_id, path } => {
                self.delegate.on_image_saved(request_id, &path)
            }
        }
    }

    fn is_recording_eos(&self, source: &str) -> bool {
        source == FILE_SINK || source == self.backend.pipeline_name()
    }

    // --- Resources ---

    fn handle_resource_event(&mut self, event: ResourceEvent) {
        log::debug!("resource event: {:?}", event);
        match event {
            ResourceEvent::Granted => {
                if let Some(target) = self.waiting_resources.take() {
                    self.apply_state(target);
                }
            }
            ResourceEvent::Denied => {
                if self.waiting_resources.take().is_some() {
                    let message = "capture resources were denied".to_string();
                    self.set_error(ErrorCode::ResourceError, message.clone());
                    self.delegate.on_error(ErrorCode::ResourceError, &message);
                    self.set_pending(self.state);
                }
            }
            ResourceEvent::Lost => {
                self.waiting_resources = None;
                if self.state.is_stopped() && self.pending.is_stopped() {
                    return;
                }
                let message = "capture resources were lost".to_string();
                self.set_error(ErrorCode::ResourceError, message.clone());
                self.delegate.on_error(ErrorCode::ResourceError, &message);
                self.begin_stop(CaptureState::Stopped);
            }
        }
    }

    fn acquire_resources(&mut self) {
        if let Some(client) = self.resources.as_ref() {
            client.acquire();
        }
    }

    fn release_resources(&mut self) {
        if let Some(client) = self.resources.as_ref() {
            client.release();
        }
    }

    // --- Timer ---

    fn on_tick(&mut self) {
        if let Some(deadline) = self.eos_wait.as_ref().map(|wait| wait.deadline) {
            if Instant::now() >= deadline {
                log::warn!(
                    "no EOS within {:?}, finalizing recording anyway",
                    self.config.eos_timeout
                );
                let next = self
                    .eos_wait
                    .as_ref()
                    .map(|wait| wait.next)
                    .unwrap_or(CaptureState::Stopped);
                self.finish_recording(next);
            }
            return;
        }
        if self.state == CaptureState::Recording && self.pending == CaptureState::Recording {
            self.poll_duration();
        }
    }

    fn poll_duration(&mut self) {
        if let Some(position) = self.backend.query_position() {
            self.update_duration(position);
        }
    }

    fn update_duration(&mut self, duration: Duration) {
        if self.duration != duration {
            self.duration = duration;
            self.delegate.on_duration_changed(duration);
        }
    }

    // --- Volume ---

    fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.apply_volume();
        self.delegate.on_muted_changed(muted);
    }

    fn set_volume(&mut self, volume: f64) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, MAX_VOLUME)
        };
        if self.volume == volume {
            return;
        }
        self.volume = volume;
        self.apply_volume();
        self.delegate.on_volume_changed(volume);
    }

    fn apply_volume(&mut self) {
        let Some(element) = self.graph.volume_element().cloned() else {
            return;
        };
        for (name, value) in [
            ("mute", PropertyValue::Bool(self.muted)),
            ("volume", PropertyValue::Double(self.volume)),
        ] {
            if let Err(e) = self.backend.set_property(&element, name, value) {
                log::warn!("failed to set {} on {:?}: {}", name, element, e);
            }
        }
    }

    // --- Images ---

    fn capture_image(&mut self, request_id: i32, file_name: &str) {
        let ready = self.capture_mode.contains(CaptureMode::IMAGE)
            && !self.state.is_stopped()
            && self.state == self.pending
            && self.eos_wait.is_none();
        let sink = match self.graph.image_sink() {
            Some(sink) if ready => sink.clone(),
            _ => {
                self.delegate.on_image_capture_error(
                    request_id,
                    ErrorCode::NotReadyError,
                    "Camera is not ready.",
                );
                return;
            }
        };

        let dir = self
            .config
            .output_directory
            .clone()
            .unwrap_or_else(default_directory);
        let path = if file_name.is_empty() {
            generate_file_name(&dir, IMAGE_PREFIX, "jpg")
        } else if Path::new(file_name).is_relative() {
            dir.join(file_name)
        } else {
            PathBuf::from(file_name)
        };
        log::debug!("capturing image {} to {}", request_id, path.display());
        if let Err(e) = self.backend.capture_still(&sink, request_id, &path) {
            self.delegate
                .on_image_capture_error(request_id, e.code(), &e.to_string());
        }
    }

    // --- Snapshot ---

    fn publish(&mut self) {
        let ready = self.state == self.pending
            && self.eos_wait.is_none()
            && self.waiting_resources.is_none();
        if ready != self.ready {
            self.ready = ready;
            self.delegate.on_ready_changed(ready);
        }

        let mut snapshot = self.snapshot.lock();
        snapshot.state = self.state;
        snapshot.pending = self.pending;
        snapshot.duration = self.duration;
        snapshot.ready = self.ready;
        snapshot.muted = self.muted;
        snapshot.volume = self.volume;
        snapshot.error = self.error;
        snapshot.error_string.clone_from(&self.error_string);
        snapshot.capture_mode = self.capture_mode;
        snapshot.output_location.clone_from(&self.output_location);
        snapshot.actual_location.clone_from(&self.actual_location);
    }

    /// Finishes a running recording within the EOS timeout, then stops.
    fn shutdown(&mut self) {
        if self.eos_wait.is_none() && self.graph.has_recording_branch() {
            self.begin_stop(CaptureState::Stopped);
        }
        if let Some(wait) = self.eos_wait.as_mut() {
            wait.next = CaptureState::Stopped;
        }
        while let Some(deadline) = self.eos_wait.as_ref().map(|wait| wait.deadline) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.bus.recv_timeout(remaining) {
                Ok(BusMessage::Eos { source }) if self.is_recording_eos(&source) => {
                    self.finish_recording(CaptureState::Stopped);
                }
                Ok(_) => {}
                Err(_) => {
                    log::warn!("no EOS before shutdown, finalizing recording anyway");
                    self.finish_recording(CaptureState::Stopped);
                }
            }
        }
        if !self.state.is_stopped() || self.backend.current_state() != ElementState::Null {
            self.teardown();
        }
    }
}
