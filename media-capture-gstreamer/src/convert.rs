//! Mapping between GStreamer types and the core's framework-neutral ones.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;

use media_capture_core::models::state::ElementState;
use media_capture_core::pipeline::message::{
    BusMessage, CoreErrorKind, ErrorDomain, ResourceErrorKind, StreamErrorKind,
};

pub fn element_state(state: gst::State) -> ElementState {
    match state {
        gst::State::VoidPending => ElementState::VoidPending,
        gst::State::Null => ElementState::Null,
        gst::State::Ready => ElementState::Ready,
        gst::State::Paused => ElementState::Paused,
        gst::State::Playing => ElementState::Playing,
        _ => ElementState::VoidPending,
    }
}

pub fn gst_state(state: ElementState) -> gst::State {
    match state {
        ElementState::VoidPending => gst::State::VoidPending,
        ElementState::Null => gst::State::Null,
        ElementState::Ready => gst::State::Ready,
        ElementState::Paused => gst::State::Paused,
        ElementState::Playing => gst::State::Playing,
    }
}

pub fn error_domain(error: &gst::glib::Error) -> ErrorDomain {
    if let Some(kind) = error.kind::<gst::StreamError>() {
        return ErrorDomain::Stream(match kind {
            gst::StreamError::Format => StreamErrorKind::Format,
            gst::StreamError::Demux => StreamErrorKind::Demux,
            gst::StreamError::Decode => StreamErrorKind::Decode,
            gst::StreamError::WrongType => StreamErrorKind::WrongType,
            gst::StreamError::TypeNotFound => StreamErrorKind::TypeNotFound,
            gst::StreamError::CodecNotFound => StreamErrorKind::CodecNotFound,
            gst::StreamError::Decrypt => StreamErrorKind::Decrypt,
            gst::StreamError::DecryptNokey => StreamErrorKind::DecryptNoKey,
            gst::StreamError::Failed => StreamErrorKind::Failed,
            _ => StreamErrorKind::Other,
        });
    }
    if let Some(kind) = error.kind::<gst::CoreError>() {
        return ErrorDomain::Core(match kind {
            gst::CoreError::MissingPlugin => CoreErrorKind::MissingPlugin,
            gst::CoreError::StateChange => CoreErrorKind::StateChange,
            gst::CoreError::Negotiation => CoreErrorKind::Negotiation,
            _ => CoreErrorKind::Other,
        });
    }
    if let Some(kind) = error.kind::<gst::ResourceError>() {
        return ErrorDomain::Resource(match kind {
            gst::ResourceError::NotFound => ResourceErrorKind::NotFound,
            gst::ResourceError::Busy => ResourceErrorKind::Busy,
            gst::ResourceError::OpenRead => ResourceErrorKind::OpenRead,
            gst::ResourceError::OpenWrite => ResourceErrorKind::OpenWrite,
            gst::ResourceError::NoSpaceLeft => ResourceErrorKind::NoSpaceLeft,
            gst::ResourceError::NotAuthorized => ResourceErrorKind::NotAuthorized,
            _ => ResourceErrorKind::Other,
        });
    }
    ErrorDomain::Library
}

fn source_name(message: &gst::Message) -> String {
    message
        .src()
        .map(|src| src.name().to_string())
        .unwrap_or_default()
}

/// Converts the messages the session cares about; everything else is `None`.
pub fn bus_message(message: &gst::Message) -> Option<BusMessage> {
    use gst::MessageView;

    let source = source_name(message);
    match message.view() {
        MessageView::StateChanged(change) => Some(BusMessage::StateChanged {
            source,
            old: element_state(change.old()),
            new: element_state(change.current()),
            pending: element_state(change.pending()),
        }),
        MessageView::Eos(..) => Some(BusMessage::Eos { source }),
        MessageView::Error(err) => Some(BusMessage::Error {
            source,
            domain: error_domain(&err.error()),
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        }),
        MessageView::Warning(warning) => Some(BusMessage::Warning {
            source,
            message: warning.error().to_string(),
        }),
        MessageView::Info(info) => Some(BusMessage::Info {
            source,
            message: info.error().to_string(),
        }),
        MessageView::DurationChanged(..) => Some(BusMessage::DurationChanged {
            source,
            duration: None,
        }),
        MessageView::Element(element) => forwarded_eos(element.structure()?),
        _ => None,
    }
}

/// Unwraps a child's EOS that the bin forwarded under `message-forward`.
fn forwarded_eos(structure: &gst::StructureRef) -> Option<BusMessage> {
    if !structure.has_name("GstBinForwarded") {
        return None;
    }
    let inner = structure.get::<gst::Message>("message").ok()?;
    match inner.view() {
        gst::MessageView::Eos(..) => Some(BusMessage::Eos {
            source: source_name(&inner),
        }),
        _ => None,
    }
}

pub fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos().min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_map_both_ways() {
        for state in [
            ElementState::Null,
            ElementState::Ready,
            ElementState::Paused,
            ElementState::Playing,
        ] {
            assert_eq!(element_state(gst_state(state)), state);
        }
    }

    #[test]
    fn codec_not_found_is_a_stream_error() {
        let error = gst::glib::Error::new(gst::StreamError::CodecNotFound, "no decoder");
        assert_eq!(
            error_domain(&error),
            ErrorDomain::Stream(StreamErrorKind::CodecNotFound)
        );
    }

    #[test]
    fn missing_plugin_is_a_core_error() {
        let error = gst::glib::Error::new(gst::CoreError::MissingPlugin, "no x264enc");
        assert_eq!(
            error_domain(&error),
            ErrorDomain::Core(CoreErrorKind::MissingPlugin)
        );
    }

    #[test]
    fn forwarded_sink_eos_is_unwrapped() {
        gst::init().unwrap();
        let sink = gst::Bin::with_name("file-sink");
        let pipeline = gst::Pipeline::with_name("capture");
        let eos = gst::message::Eos::builder().src(&sink).build();
        let forwarded = gst::message::Element::builder(
            gst::Structure::builder("GstBinForwarded")
                .field("message", eos)
                .build(),
        )
        .src(&pipeline)
        .build();

        assert_eq!(
            bus_message(&forwarded),
            Some(BusMessage::Eos {
                source: "file-sink".into()
            })
        );
    }

    #[test]
    fn other_element_messages_are_ignored() {
        gst::init().unwrap();
        let message = gst::message::Element::builder(gst::Structure::new_empty("level")).build();
        assert_eq!(bus_message(&message), None);
    }

    #[test]
    fn clock_time_keeps_nanoseconds() {
        assert_eq!(clock_time(Duration::from_millis(100)).mseconds(), 100);
    }
}
