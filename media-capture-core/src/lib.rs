//! # media-capture-core
//!
//! Platform-agnostic media capture core library.
//!
//! Provides the capture session state machine, the capture graph builder,
//! the audio device state machine and ambisonic decoding. Native media
//! frameworks (GStreamer) implement the `PipelineBackend` trait and plug
//! into the generic `CaptureSession`.
//!
//! ## Architecture
//!
//! ```text
//! media-capture-core (this crate)
//! ├── traits/       ← PipelineBackend, CaptureDelegate
//! ├── models/       ← CaptureError, CaptureState, CaptureMode, SessionConfiguration, AudioFormat, etc.
//! ├── audio/        ← AudioStateMachine, BufferedAudioSink
//! ├── processing/   ← FrameRingBuffer
//! ├── spatial/      ← AmbisonicDecoder, band-split filter, speaker layouts
//! ├── pipeline/     ← CaptureGraph, bus messages, codec registry, MemoryBackend
//! ├── session/      ← CaptureSession (actor orchestrator), output naming
//! ├── policy/       ← ResourcePolicy service
//! └── storage/      ← recording metadata sidecar
//! ```

pub mod audio;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod processing;
pub mod session;
pub mod spatial;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use audio::sink::BufferedAudioSink;
pub use audio::state_machine::{
    AudioError, AudioState, AudioStateListener, AudioStateMachine, RunningState,
    StateChangeNotifier,
};
pub use models::audio_format::{AudioFormat, ChannelConfig, ChannelPosition};
pub use models::config::SessionConfiguration;
pub use models::device::{DeviceDescriptor, DeviceKind};
pub use models::error::{CaptureError, ErrorCode};
pub use models::metadata::{MetaData, MetaValue};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::{CaptureMode, CaptureState, ElementState, PipelineMode};
pub use pipeline::graph::CaptureGraph;
pub use pipeline::memory::{MemoryBackend, MemoryBackendHandle};
pub use pipeline::message::{BusMessage, ErrorDomain};
pub use policy::resource_policy::{ResourceArbiter, ResourceClient, ResourceEvent, ResourcePolicy};
pub use processing::ring_buffer::FrameRingBuffer;
pub use session::capture::CaptureSession;
pub use session::events::SessionEvent;
pub use spatial::decoder::AmbisonicDecoder;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::pipeline_backend::{PipelineBackend, PropertyValue};
