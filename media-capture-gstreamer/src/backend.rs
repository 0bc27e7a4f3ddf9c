use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;

use media_capture_core::models::error::CaptureError;
use media_capture_core::models::metadata::{MetaData, MetaValue};
use media_capture_core::models::state::ElementState;
use media_capture_core::pipeline::message::BusMessage;
use media_capture_core::traits::pipeline_backend::{PipelineBackend, PropertyValue};

use crate::convert;

/// `PipelineBackend` over a single `gst::Pipeline`.
///
/// Bus messages are converted on the streaming thread by a sync handler
/// and queued for the session; the native bus never accumulates them.
pub struct GstBackend {
    pipeline: gst::Pipeline,
    name: String,
    tx: Sender<BusMessage>,
    rx: Receiver<BusMessage>,
}

impl GstBackend {
    pub fn new(name: &str) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::Resource(e.to_string()))?;

        let pipeline = gst::Pipeline::with_name(name);
        // A bin swallows a child sink's EOS until all sinks are EOS; the
        // file sink finishes while previews keep running.
        pipeline.set_property("message-forward", true);
        let bus = pipeline
            .bus()
            .ok_or_else(|| CaptureError::Resource("pipeline has no bus".into()))?;

        let (tx, rx) = unbounded();
        let sender = tx.clone();
        bus.set_sync_handler(move |_, message| {
            if let Some(converted) = convert::bus_message(message) {
                let _ = sender.send(converted);
            }
            gst::BusSyncReply::Drop
        });

        log::info!("GStreamer {} pipeline '{}' created", gst::version_string(), name);
        Ok(Self {
            pipeline,
            name: name.to_string(),
            tx,
            rx,
        })
    }

    fn post(&self, message: BusMessage) {
        let _ = self.tx.send(message);
    }

    fn sink_pad(element: &gst::Element) -> Result<gst::Pad, CaptureError> {
        element
            .static_pad("sink")
            .ok_or_else(|| CaptureError::LinkFailed("pad".into(), element.name().to_string()))
    }
}

fn out_of_range(name: &str, value: i64) -> CaptureError {
    CaptureError::ConfigurationFailed(format!("{} out of range for {}", value, name))
}

impl PipelineBackend for GstBackend {
    type Element = gst::Element;
    type Pad = gst::Pad;

    fn pipeline_name(&self) -> &str {
        &self.name
    }

    fn make_element(&mut self, factory: &str, name: &str) -> Result<gst::Element, CaptureError> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|_| CaptureError::MissingElement(factory.to_string()))
    }

    fn add(&mut self, element: &gst::Element) -> Result<(), CaptureError> {
        self.pipeline
            .add(element)
            .map_err(|e| CaptureError::Resource(format!("add {}: {}", element.name(), e)))
    }

    fn remove(&mut self, element: &gst::Element) -> Result<(), CaptureError> {
        self.pipeline
            .remove(element)
            .map_err(|e| CaptureError::Resource(format!("remove {}: {}", element.name(), e)))
    }

    fn link(&mut self, src: &gst::Element, sink: &gst::Element) -> Result<(), CaptureError> {
        src.link(sink).map_err(|_| {
            CaptureError::LinkFailed(src.name().to_string(), sink.name().to_string())
        })
    }

    fn request_pad(&mut self, tee: &gst::Element) -> Result<gst::Pad, CaptureError> {
        tee.request_pad_simple("src_%u")
            .ok_or_else(|| CaptureError::LinkFailed(tee.name().to_string(), "request pad".into()))
    }

    fn link_pad(&mut self, pad: &gst::Pad, sink: &gst::Element) -> Result<(), CaptureError> {
        let sink_pad = Self::sink_pad(sink)?;
        pad.link(&sink_pad).map(|_| ()).map_err(|e| {
            log::debug!("pad link {} -> {}: {:?}", pad.name(), sink.name(), e);
            CaptureError::LinkFailed(pad.name().to_string(), sink.name().to_string())
        })
    }

    fn unlink_pad(&mut self, pad: &gst::Pad, sink: &gst::Element) {
        if let Some(sink_pad) = sink.static_pad("sink") {
            if pad.unlink(&sink_pad).is_err() {
                log::debug!("{} was not linked to {}", pad.name(), sink.name());
            }
        }
    }

    fn release_pad(&mut self, tee: &gst::Element, pad: gst::Pad) {
        tee.release_request_pad(&pad);
    }

    fn set_property(
        &mut self,
        element: &gst::Element,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CaptureError> {
        let pspec = element.find_property(name).ok_or_else(|| {
            CaptureError::ConfigurationFailed(format!("{} has no property {}", element.name(), name))
        })?;
        let ty = pspec.value_type();

        match value {
            PropertyValue::Bool(v) if ty == glib::Type::BOOL => element.set_property(name, v),
            PropertyValue::Double(v) if ty == glib::Type::F64 => element.set_property(name, v),
            PropertyValue::Double(v) if ty == glib::Type::F32 => {
                element.set_property(name, v as f32)
            }
            PropertyValue::Int(v) if ty == glib::Type::I64 => element.set_property(name, v),
            PropertyValue::Int(v) if ty == glib::Type::I32 => {
                element.set_property(name, i32::try_from(v).map_err(|_| out_of_range(name, v))?)
            }
            PropertyValue::Int(v) if ty == glib::Type::U32 => {
                element.set_property(name, u32::try_from(v).map_err(|_| out_of_range(name, v))?)
            }
            PropertyValue::Int(v) if ty == glib::Type::U64 => {
                element.set_property(name, u64::try_from(v).map_err(|_| out_of_range(name, v))?)
            }
            PropertyValue::Str(v) if ty == glib::Type::STRING => element.set_property(name, v),
            // Enums, flags and boxed types go through the string deserializer.
            PropertyValue::Str(v) => element.set_property_from_str(name, &v),
            other => element.set_property_from_str(name, &other.to_string()),
        }
        Ok(())
    }

    fn set_tags(&mut self, element: &gst::Element, tags: &MetaData) -> Result<(), CaptureError> {
        let setter = element.dynamic_cast_ref::<gst::TagSetter>().ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!("{} does not accept tags", element.name()))
        })?;

        for (tag, value) in tags {
            let result = match value {
                MetaValue::Bool(v) => setter.add_generic(tag, *v, gst::TagMergeMode::Replace),
                MetaValue::Int(v) => match u32::try_from(*v) {
                    Ok(n) => setter.add_generic(tag, n, gst::TagMergeMode::Replace),
                    Err(_) => setter.add_generic(tag, *v, gst::TagMergeMode::Replace),
                },
                MetaValue::Double(v) => setter.add_generic(tag, *v, gst::TagMergeMode::Replace),
                MetaValue::Text(v) => setter.add_generic(tag, v.as_str(), gst::TagMergeMode::Replace),
            };
            if let Err(e) = result {
                log::warn!("skipping tag {}: {:?}", tag, e);
            }
        }
        Ok(())
    }

    fn set_element_state(
        &mut self,
        element: &gst::Element,
        state: ElementState,
    ) -> Result<(), CaptureError> {
        element
            .set_state(convert::gst_state(state))
            .map(|_| ())
            .map_err(|_| CaptureError::StateChangeFailed(format!("{} to {}", element.name(), state)))
    }

    fn sync_state_with_pipeline(&mut self, element: &gst::Element) -> Result<(), CaptureError> {
        element
            .sync_state_with_parent()
            .map_err(|e| CaptureError::StateChangeFailed(format!("{}: {}", element.name(), e)))
    }

    fn set_state(&mut self, state: ElementState) -> Result<(), CaptureError> {
        log::debug!("pipeline {} -> {}", self.name, state);
        self.pipeline
            .set_state(convert::gst_state(state))
            .map(|_| ())
            .map_err(|_| CaptureError::StateChangeFailed(format!("pipeline to {}", state)))
    }

    fn wait_for_state(&mut self, timeout: Duration) -> Result<ElementState, CaptureError> {
        let (result, current, _pending) = self.pipeline.state(convert::clock_time(timeout));
        match result {
            Ok(gst::StateChangeSuccess::Async) => Err(CaptureError::Timeout),
            Ok(_) => Ok(convert::element_state(current)),
            Err(_) => Err(CaptureError::StateChangeFailed(format!(
                "pipeline stuck in {}",
                convert::element_state(current)
            ))),
        }
    }

    fn current_state(&self) -> ElementState {
        convert::element_state(self.pipeline.current_state())
    }

    fn send_eos(&mut self, element: &gst::Element) -> Result<(), CaptureError> {
        let pad = Self::sink_pad(element)?;
        if !pad.send_event(gst::event::Eos::new()) {
            log::warn!("{} refused end-of-stream", element.name());
        }
        Ok(())
    }

    fn query_position(&self) -> Option<Duration> {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn capture_still(
        &mut self,
        sink: &gst::Element,
        request_id: i32,
        path: &Path,
    ) -> Result<(), CaptureError> {
        if sink.find_property("last-sample").is_none() {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} does not keep samples",
                sink.name()
            )));
        }
        self.post(BusMessage::ImageExposed { request_id });

        let sample = sink
            .property::<Option<gst::Sample>>("last-sample")
            .ok_or_else(|| CaptureError::NotReady("no frame captured yet".into()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::NotReady("sample has no buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| CaptureError::Resource(e.to_string()))?;
        self.post(BusMessage::ImageCaptured { request_id });

        std::fs::write(path, map.as_slice())
            .map_err(|e| CaptureError::StorageError(format!("{}: {}", path.display(), e)))?;
        self.post(BusMessage::ImageSaved {
            request_id,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.rx.clone()
    }

    fn dump_graph(&self, label: &str) {
        log::debug!("dumping pipeline graph '{}'", label);
        self.pipeline
            .debug_to_dot_file_with_ts(gst::DebugGraphDetails::all(), label);
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
    }
}
