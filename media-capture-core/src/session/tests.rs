use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};

use super::capture::CaptureSession;
use super::events::SessionEvent;
use crate::models::config::SessionConfiguration;
use crate::models::device::DeviceDescriptor;
use crate::models::error::{CaptureError, ErrorCode};
use crate::models::metadata::MetaData;
use crate::models::state::{CaptureMode, CaptureState, ElementState};
use crate::pipeline::memory::{GraphEvent, MemoryBackend, MemoryBackendHandle};
use crate::pipeline::message::{BusMessage, ErrorDomain, StreamErrorKind};
use crate::policy::resource_policy::{Decision, ResourceArbiter, ResourcePolicy};
use crate::storage::metadata::read_metadata;
use crate::traits::pipeline_backend::PropertyValue;

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    session: CaptureSession<MemoryBackend>,
    handle: MemoryBackendHandle,
    events: Receiver<SessionEvent>,
    dir: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.session.shutdown();
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("capture-session-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(mode: CaptureMode, dir: &Path) -> SessionConfiguration {
    SessionConfiguration {
        capture_mode: mode,
        output_directory: Some(dir.to_path_buf()),
        eos_timeout: Duration::from_millis(300),
        duration_update_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn harness_with(mode: CaptureMode, tweak: impl FnOnce(&mut SessionConfiguration)) -> Harness {
    let dir = scratch_dir();
    let mut config = config(mode, &dir);
    tweak(&mut config);
    let backend = MemoryBackend::new();
    let handle = backend.handle();
    let (tx, events) = unbounded();
    let session = CaptureSession::new(backend, config, Arc::new(tx)).unwrap();
    Harness {
        session,
        handle,
        events,
        dir,
    }
}

fn harness(mode: CaptureMode) -> Harness {
    harness_with(mode, |_| {})
}

/// Collects events (ignoring duration updates) until one matches.
fn wait_for(
    events: &Receiver<SessionEvent>,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(SessionEvent::DurationChanged(_)) => {}
            Ok(event) => {
                let done = matches(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(_) => panic!("timed out waiting for event, saw {:?}", seen),
        }
    }
}

fn wait_for_state(events: &Receiver<SessionEvent>, state: CaptureState) -> Vec<SessionEvent> {
    wait_for(events, |e| *e == SessionEvent::StateChanged(state))
}

fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn drain(events: &Receiver<SessionEvent>) {
    while events.try_recv().is_ok() {}
}

fn index_of(events: &[GraphEvent], event: &GraphEvent) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("{:?} not recorded", event))
}

fn in_bin(handle: &MemoryBackendHandle, name: &str) -> bool {
    handle.elements_in_bin().iter().any(|e| e == name)
}

#[test]
fn record_then_stop_finalizes_after_eos() {
    let h = harness(CaptureMode::AUDIO);
    h.handle.set_hold_eos(true);
    let mut tags = MetaData::new();
    tags.insert("title".into(), "Take 1".into());
    h.session.set_metadata(tags.clone()).unwrap();

    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    let graph = h.handle.events();
    let playing = index_of(&graph, &GraphEvent::PipelineState(ElementState::Playing));
    let location = graph
        .iter()
        .position(|e| matches!(e, GraphEvent::Property(el, name, _) if el == "file-sink" && name == "location"))
        .unwrap();
    let tagged = index_of(&graph, &GraphEvent::Tags("muxer".into(), tags.clone()));
    assert!(location < playing);
    assert!(tagged < playing);

    h.session.set_state(CaptureState::Stopped).unwrap();
    eventually(|| h.handle.held_eos_count() > 0);
    assert!(in_bin(&h.handle, "muxer"), "recording branch torn down before EOS");
    eventually(|| !h.session.is_ready());
    assert_eq!(h.session.state(), CaptureState::Recording);

    h.handle.release_eos();
    let events = wait_for_state(&h.events, CaptureState::Stopped);
    let finished = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::RecordingFinished(result) => Some(result.clone()),
            _ => None,
        })
        .expect("recording result before stop");
    assert_eq!(finished.file_path, h.dir.join("testclip_0001.ogg"));
    assert_eq!(finished.metadata.container.as_deref(), Some("ogg"));
    assert_eq!(finished.metadata.tags, tags);

    let graph = h.handle.events();
    let eos = index_of(&graph, &GraphEvent::Eos("audio-encode-queue".into()));
    let removed = index_of(&graph, &GraphEvent::Removed("muxer".into()));
    assert!(eos < removed);

    eventually(|| h.session.state() == CaptureState::Stopped);
    assert_eq!(h.session.error(), ErrorCode::NoError);
    assert!(h.handle.elements_in_bin().is_empty());
    assert_eq!(h.session.actual_location(), Some(h.dir.join("testclip_0001.ogg")));
}

#[test]
fn codec_not_found_on_the_bus_is_a_format_error() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    h.handle.post(BusMessage::Error {
        source: "audio-encoder".into(),
        domain: ErrorDomain::Stream(StreamErrorKind::CodecNotFound),
        message: "no suitable codec".into(),
        debug: None,
    });
    let events = wait_for_state(&h.events, CaptureState::Stopped);
    let error = events.iter().position(|e| {
        *e == SessionEvent::Error(ErrorCode::FormatError, "no suitable codec".into())
    });
    assert!(error.is_some());
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));

    eventually(|| h.session.state() == CaptureState::Stopped);
    assert_eq!(h.session.error(), ErrorCode::FormatError);
    assert!(h.handle.elements_in_bin().is_empty());
}

#[test]
fn bus_warnings_are_not_errors() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    eventually(|| h.session.is_ready());
    drain(&h.events);
    h.handle.post(BusMessage::Warning {
        source: "audio-src".into(),
        message: "clock drift".into(),
    });
    h.session.set_muted(true).unwrap();
    let events = wait_for(&h.events, |e| *e == SessionEvent::MutedChanged(true));
    assert_eq!(events, vec![SessionEvent::MutedChanged(true)]);
    assert_eq!(h.session.state(), CaptureState::Recording);
}

#[test]
fn missing_encoder_plugin_rolls_back() {
    let h = harness(CaptureMode::AUDIO);
    h.handle.remove_factory("vorbisenc");
    h.session.set_state(CaptureState::Recording).unwrap();

    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::Error(..)));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Error(ErrorCode::FormatError, _))
    ));
    eventually(|| h.session.pending_state() == CaptureState::Stopped);
    assert_eq!(h.session.state(), CaptureState::Stopped);
    assert!(h.handle.elements_in_bin().is_empty());
}

#[test]
fn incompatible_encoding_is_reported() {
    let h = harness_with(CaptureMode::AUDIO, |c| {
        c.container = Some("wav".into());
        c.audio_codec = Some("opus".into());
    });
    h.session.set_state(CaptureState::Recording).unwrap();
    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::Error(..)));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Error(
            ErrorCode::FormatError,
            CaptureError::UnsupportedFormat("Not compatible codecs and container format.".into())
                .to_string()
        ))
    );
}

#[test]
fn pause_and_resume_keep_the_recording_branch() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    h.session.set_state(CaptureState::Paused).unwrap();
    wait_for_state(&h.events, CaptureState::Paused);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    let added = h
        .handle
        .events()
        .iter()
        .filter(|e| **e == GraphEvent::Added("muxer".into()))
        .count();
    assert_eq!(added, 1);
}

#[test]
fn stopping_to_preview_keeps_the_preview_branch() {
    let h = harness(CaptureMode::AUDIO | CaptureMode::VIDEO);
    h.session.set_state(CaptureState::Preview).unwrap();
    wait_for_state(&h.events, CaptureState::Preview);
    assert!(in_bin(&h.handle, "video-preview"));

    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert!(in_bin(&h.handle, "muxer"));
    assert!(in_bin(&h.handle, "video-encoder"));

    h.session.set_state(CaptureState::Preview).unwrap();
    let events = wait_for_state(&h.events, CaptureState::Preview);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));
    assert!(!in_bin(&h.handle, "muxer"));
    assert!(in_bin(&h.handle, "video-preview"));
}

#[test]
fn file_sink_eos_is_seen_while_the_preview_keeps_running() {
    let h = harness_with(CaptureMode::AUDIO | CaptureMode::VIDEO, |c| {
        c.eos_timeout = Duration::from_secs(60);
    });
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert!(in_bin(&h.handle, "video-preview"));

    // The preview sink never reaches EOS, so only the forwarded file-sink
    // EOS can end the recording before the timeout.
    h.session.set_state(CaptureState::Preview).unwrap();
    let events = wait_for_state(&h.events, CaptureState::Preview);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));
    assert!(!in_bin(&h.handle, "muxer"));
}

#[test]
fn image_capture_needs_a_running_camera() {
    let h = harness(CaptureMode::VIDEO | CaptureMode::IMAGE);
    h.session.capture_image(1, "").unwrap();
    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::ImageCaptureError(..)));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::ImageCaptureError(1, ErrorCode::NotReadyError, _))
    ));

    h.session.set_state(CaptureState::Preview).unwrap();
    wait_for_state(&h.events, CaptureState::Preview);
    eventually(|| h.session.is_ready());
    drain(&h.events);
    h.session.capture_image(2, "").unwrap();
    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::ImageSaved(..)));
    let expected = h.dir.join("img_0001.jpg");
    assert_eq!(
        events,
        vec![
            SessionEvent::ImageExposed(2),
            SessionEvent::ImageCaptured(2),
            SessionEvent::ImageSaved(2, expected.clone()),
        ]
    );
    assert!(expected.exists());
}

#[test]
fn mute_and_volume_emit_only_on_change() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_muted(true).unwrap();
    h.session.set_muted(true).unwrap();
    h.session.set_volume(20.0).unwrap();
    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::VolumeChanged(_)));
    assert_eq!(
        events,
        vec![SessionEvent::MutedChanged(true), SessionEvent::VolumeChanged(10.0)]
    );

    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert_eq!(
        h.handle.property("audio-volume", "mute"),
        Some(PropertyValue::Bool(true))
    );
    assert_eq!(
        h.handle.property("audio-volume", "volume"),
        Some(PropertyValue::Double(10.0))
    );
    assert!(h.session.is_muted());
    assert_eq!(h.session.volume(), 10.0);
}

#[test]
fn ready_drops_while_a_transition_is_in_flight() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_state(CaptureState::Recording).unwrap();
    let events = wait_for(&h.events, |e| *e == SessionEvent::ReadyChanged(true));
    assert_eq!(
        events,
        vec![
            SessionEvent::ReadyChanged(false),
            SessionEvent::StateChanged(CaptureState::Recording),
            SessionEvent::ReadyChanged(true),
        ]
    );
}

#[test]
fn eos_timeout_still_finalizes() {
    let h = harness(CaptureMode::AUDIO);
    h.handle.set_hold_eos(true);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    let started = Instant::now();
    h.session.set_state(CaptureState::Stopped).unwrap();
    let events = wait_for_state(&h.events, CaptureState::Stopped);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));
}

#[test]
fn metadata_sidecar_is_written_on_request() {
    let h = harness_with(CaptureMode::AUDIO, |c| c.write_metadata_sidecar = true);
    let mut tags = MetaData::new();
    tags.insert("artist".into(), "Field Team".into());
    h.session.set_metadata(tags.clone()).unwrap();
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    h.session.set_state(CaptureState::Stopped).unwrap();
    wait_for_state(&h.events, CaptureState::Stopped);

    let sidecar = read_metadata(&h.dir.join("testclip_0001.ogg")).unwrap();
    assert_eq!(sidecar.tags, tags);
    assert_eq!(sidecar.audio_codec.as_deref(), Some("vorbis"));
}

#[test]
fn explicit_output_location_is_used() {
    let h = harness(CaptureMode::AUDIO);
    let target = h.dir.join("interview");
    h.session.set_output_location(Some(target.clone())).unwrap();
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert_eq!(
        h.handle.property("file-sink", "location"),
        Some(PropertyValue::Str(target.with_extension("ogg").to_string_lossy().into_owned()))
    );
    assert_eq!(h.session.output_location(), Some(target));
}

#[test]
fn recording_position_is_published() {
    let h = harness(CaptureMode::AUDIO);
    h.handle.set_position(Some(Duration::from_millis(1500)));
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);

    let deadline = Instant::now() + WAIT;
    loop {
        match h.events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(SessionEvent::DurationChanged(d)) if d == Duration::from_millis(1500) => break,
            Ok(_) => {}
            Err(_) => panic!("no duration update"),
        }
    }
    eventually(|| h.session.duration() == Duration::from_millis(1500));
}

#[test]
fn device_change_restarts_preview() {
    let h = harness(CaptureMode::VIDEO);
    h.session.set_state(CaptureState::Preview).unwrap();
    wait_for_state(&h.events, CaptureState::Preview);

    h.session
        .set_video_capture_device(Some(DeviceDescriptor::video_input("/dev/video1", "USB Camera")))
        .unwrap();
    eventually(|| {
        h.handle.property("video-src", "device")
            == Some(PropertyValue::Str("/dev/video1".into()))
    });
    eventually(|| h.session.is_ready());
    assert_eq!(h.session.state(), CaptureState::Preview);
    assert!(in_bin(&h.handle, "video-preview"));
}

#[test]
fn device_change_waits_for_the_recording() {
    let h = harness(CaptureMode::AUDIO);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    h.session
        .set_audio_capture_device(Some(DeviceDescriptor::audio_input("hw:2", "Line In")))
        .unwrap();
    h.session.set_muted(true).unwrap();
    wait_for(&h.events, |e| *e == SessionEvent::MutedChanged(true));
    assert_eq!(h.handle.property("audio-src", "device"), None);

    h.session.set_state(CaptureState::Stopped).unwrap();
    wait_for_state(&h.events, CaptureState::Stopped);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert_eq!(
        h.handle.property("audio-src", "device"),
        Some(PropertyValue::Str("hw:2".into()))
    );
}

#[test]
fn capture_mode_changes_only_while_stopped() {
    let h = harness(CaptureMode::VIDEO);
    h.session.set_state(CaptureState::Preview).unwrap();
    wait_for_state(&h.events, CaptureState::Preview);
    assert!(matches!(
        h.session.set_capture_mode(CaptureMode::AUDIO),
        Err(CaptureError::NotReady(_))
    ));

    h.session.set_state(CaptureState::Stopped).unwrap();
    wait_for_state(&h.events, CaptureState::Stopped);
    h.session.set_capture_mode(CaptureMode::AUDIO).unwrap();
    eventually(|| h.session.capture_mode() == CaptureMode::AUDIO);
    assert!(h.session.set_capture_mode(CaptureMode::empty()).is_err());
}

#[test]
fn dropping_the_session_finishes_the_recording() {
    let dir = scratch_dir();
    let backend = MemoryBackend::new();
    let handle = backend.handle();
    let (tx, events) = unbounded();
    let session =
        CaptureSession::new(backend, config(CaptureMode::AUDIO, &dir), Arc::new(tx)).unwrap();
    session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&events, CaptureState::Recording);

    drop(session);
    let remaining: Vec<SessionEvent> = events.try_iter().collect();
    assert!(remaining
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));
    assert!(handle.elements_in_bin().is_empty());
    fs::remove_dir_all(&dir).unwrap();
}

struct DenyingArbiter;

impl ResourceArbiter for DenyingArbiter {
    fn acquire(&self, _video: bool) -> Decision {
        Decision::Denied
    }

    fn release(&self) {}
}

fn harness_with_policy(policy: &ResourcePolicy) -> Harness {
    let dir = scratch_dir();
    let backend = MemoryBackend::new();
    let handle = backend.handle();
    let (tx, events) = unbounded();
    let session = CaptureSession::with_resource_policy(
        backend,
        config(CaptureMode::AUDIO, &dir),
        Arc::new(tx),
        policy,
    )
    .unwrap();
    Harness {
        session,
        handle,
        events,
        dir,
    }
}

#[test]
fn denied_resources_keep_the_session_stopped() {
    let policy = ResourcePolicy::new(DenyingArbiter);
    let h = harness_with_policy(&policy);
    h.session.set_state(CaptureState::Recording).unwrap();
    let events = wait_for(&h.events, |e| matches!(e, SessionEvent::Error(..)));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Error(ErrorCode::ResourceError, _))
    ));
    eventually(|| h.session.pending_state() == CaptureState::Stopped);
    assert!(h.handle.elements_in_bin().is_empty());
}

#[test]
fn lost_resources_stop_the_recording() {
    let policy = ResourcePolicy::local();
    let h = harness_with_policy(&policy);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    assert_eq!(policy.acquired_count(), 1);

    policy.resources_lost();
    let events = wait_for_state(&h.events, CaptureState::Stopped);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Error(ErrorCode::ResourceError, _))));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RecordingFinished(_))));
}

#[test]
fn stopping_releases_resources() {
    let policy = ResourcePolicy::local();
    let h = harness_with_policy(&policy);
    h.session.set_state(CaptureState::Recording).unwrap();
    wait_for_state(&h.events, CaptureState::Recording);
    h.session.set_state(CaptureState::Stopped).unwrap();
    wait_for_state(&h.events, CaptureState::Stopped);
    eventually(|| policy.acquired_count() == 0);
}
