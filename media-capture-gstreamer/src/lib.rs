//! # media-capture-gstreamer
//!
//! GStreamer backend for media-capture.
//!
//! Provides:
//! - `GstBackend`: `PipelineBackend` over a `gst::Pipeline`, forwarding
//!   bus messages from a sync handler into the session's channel
//! - `convert`: GStreamer state and error-domain mapping
//!
//! ## Build Requirements
//! - GStreamer 1.20+ development files
//! - Enable with the `gst` feature
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use media_capture_core::{CaptureSession, CaptureState, SessionConfiguration};
//! use media_capture_gstreamer::GstBackend;
//!
//! let backend = GstBackend::new("capture")?;
//! let session = CaptureSession::new(backend, SessionConfiguration::default(), delegate)?;
//! session.set_state(CaptureState::Recording)?;
//! ```

#[cfg(feature = "gst")]
pub mod backend;
#[cfg(feature = "gst")]
pub mod convert;

#[cfg(feature = "gst")]
pub use backend::GstBackend;
