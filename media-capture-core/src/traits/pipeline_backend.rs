use std::fmt;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::models::error::CaptureError;
use crate::models::metadata::MetaData;
use crate::models::state::ElementState;
use crate::pipeline::message::BusMessage;

/// Value written to an element property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{:?}", v),
        }
    }
}

/// Native media framework seam: element graph, pipeline state and bus.
///
/// Implementations own exactly one pipeline. Element and pad handles are
/// owning references; dropping the last clone after `remove` frees the
/// native object.
///
/// State changes are asynchronous: `set_state` starts a transition and
/// completion is reported as `BusMessage::StateChanged` from the pipeline.
pub trait PipelineBackend: Send + 'static {
    type Element: Clone + Send + fmt::Debug + 'static;
    type Pad: Send + fmt::Debug + 'static;

    /// Name the pipeline uses as message source.
    fn pipeline_name(&self) -> &str;

    /// Creates an element from `factory`. Fails when the plugin is missing.
    fn make_element(&mut self, factory: &str, name: &str) -> Result<Self::Element, CaptureError>;

    fn add(&mut self, element: &Self::Element) -> Result<(), CaptureError>;

    fn remove(&mut self, element: &Self::Element) -> Result<(), CaptureError>;

    fn link(&mut self, src: &Self::Element, sink: &Self::Element) -> Result<(), CaptureError>;

    /// Requests a new source pad from a tee.
    fn request_pad(&mut self, tee: &Self::Element) -> Result<Self::Pad, CaptureError>;

    fn link_pad(&mut self, pad: &Self::Pad, sink: &Self::Element) -> Result<(), CaptureError>;

    fn unlink_pad(&mut self, pad: &Self::Pad, sink: &Self::Element);

    fn release_pad(&mut self, tee: &Self::Element, pad: Self::Pad);

    fn set_property(
        &mut self,
        element: &Self::Element,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CaptureError>;

    /// Merges `tags` into a tag-setting element (the muxer).
    fn set_tags(&mut self, element: &Self::Element, tags: &MetaData) -> Result<(), CaptureError>;

    fn set_element_state(
        &mut self,
        element: &Self::Element,
        state: ElementState,
    ) -> Result<(), CaptureError>;

    /// Brings a newly added element to the pipeline's state.
    fn sync_state_with_pipeline(&mut self, element: &Self::Element) -> Result<(), CaptureError>;

    /// Starts a pipeline state transition.
    fn set_state(&mut self, state: ElementState) -> Result<(), CaptureError>;

    /// Waits up to `timeout` for a pending transition to settle.
    ///
    /// Returns the settled state, `CaptureError::Timeout` while still
    /// pending, or `StateChangeFailed`.
    fn wait_for_state(&mut self, timeout: Duration) -> Result<ElementState, CaptureError>;

    fn current_state(&self) -> ElementState;

    /// Injects end-of-stream into `element`.
    fn send_eos(&mut self, element: &Self::Element) -> Result<(), CaptureError>;

    /// Stream position of the pipeline, if known.
    fn query_position(&self) -> Option<Duration>;

    /// Saves the last frame seen by `sink` to `path`.
    ///
    /// Progress is reported on the bus as `ImageExposed`, `ImageCaptured`
    /// and `ImageSaved`.
    fn capture_still(
        &mut self,
        sink: &Self::Element,
        request_id: i32,
        path: &Path,
    ) -> Result<(), CaptureError>;

    /// Receiver for bus messages. Every call returns a handle to the same queue.
    fn bus(&self) -> Receiver<BusMessage>;

    /// Logs the current graph for diagnostics.
    fn dump_graph(&self, label: &str);
}
