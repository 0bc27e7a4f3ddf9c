//! In-process pipeline backend for running the session without a media
//! framework.
//!
//! Every graph operation is appended to an event log that tests can
//! inspect through a `MemoryBackendHandle`. The handle can also remove
//! element factories (a missing plugin), withhold end-of-stream, fail state
//! changes and post arbitrary bus messages.
//!
//! End-of-stream follows bin semantics: the pipeline posts its own EOS only
//! once every sink in it is EOS. A single sink's EOS reaches the bus only
//! while message forwarding is enabled (the default, as in `GstBackend`).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::metadata::MetaData;
use crate::models::state::ElementState;
use crate::traits::pipeline_backend::{PipelineBackend, PropertyValue};

use super::message::BusMessage;

/// One recorded graph operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    Added(String),
    Removed(String),
    Linked(String, String),
    Unlinked(String, String),
    PadRequested(String),
    PadReleased(String),
    Property(String, String, PropertyValue),
    Tags(String, MetaData),
    ElementState(String, ElementState),
    PipelineState(ElementState),
    Eos(String),
    StillCaptured(i32),
    Dump(String),
}

#[derive(Debug, Clone)]
struct ElementInfo {
    factory: String,
    in_bin: bool,
    state: ElementState,
    properties: BTreeMap<String, PropertyValue>,
    eos: bool,
}

#[derive(Default)]
struct Shared {
    events: Vec<GraphEvent>,
    elements: HashMap<String, ElementInfo>,
    /// src → sinks
    links: BTreeSet<(String, String)>,
    next_pad: u32,
    missing_factories: HashSet<String>,
    hold_eos: bool,
    held: Vec<BusMessage>,
    fail_state: Option<ElementState>,
    position: Option<Duration>,
    forward_messages: bool,
}

impl Shared {
    fn record(&mut self, event: GraphEvent) {
        self.events.push(event);
    }

    fn predecessors(&self, name: &str) -> Vec<String> {
        self.links
            .iter()
            .filter(|(_, sink)| sink == name)
            .map(|(src, _)| src.clone())
            .collect()
    }

    fn successors(&self, name: &str) -> Vec<String> {
        self.links
            .iter()
            .filter(|(src, _)| src == name)
            .map(|(_, sink)| sink.clone())
            .collect()
    }

    fn is_eos(&self, name: &str) -> bool {
        self.elements.get(name).map(|e| e.eos).unwrap_or(false)
    }

    fn mark_eos(&mut self, name: &str) {
        if let Some(info) = self.elements.get_mut(name) {
            info.eos = true;
        }
    }

    fn all_sinks_eos(&self) -> bool {
        let mut sinks = self
            .elements
            .values()
            .filter(|info| info.in_bin && info.factory.ends_with("sink"))
            .peekable();
        sinks.peek().is_some() && sinks.all(|info| info.eos)
    }
}

/// Element handle of the memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryElement {
    pub name: String,
}

/// Tee request pad of the memory backend.
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryPad {
    pub tee: String,
    pub name: String,
}

/// Simulated pipeline.
pub struct MemoryBackend {
    name: String,
    shared: Arc<Mutex<Shared>>,
    state: ElementState,
    playing_since: Option<Instant>,
    played: Duration,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (bus_tx, bus_rx) = unbounded();
        let shared = Shared {
            forward_messages: true,
            ..Shared::default()
        };
        Self {
            name: "pipeline".into(),
            shared: Arc::new(Mutex::new(shared)),
            state: ElementState::Null,
            playing_since: None,
            played: Duration::ZERO,
            bus_tx,
            bus_rx,
        }
    }

    pub fn handle(&self) -> MemoryBackendHandle {
        MemoryBackendHandle {
            shared: Arc::clone(&self.shared),
            bus: self.bus_tx.clone(),
            pipeline: self.name.clone(),
        }
    }

    fn post(&self, message: BusMessage) {
        let _ = self.bus_tx.send(message);
    }

    /// Whether child sinks' EOS messages are forwarded to the bus before
    /// the whole pipeline is EOS.
    pub fn set_message_forward(&mut self, forward: bool) {
        self.shared.lock().forward_messages = forward;
    }

    fn require_in_bin(shared: &Shared, name: &str) -> Result<(), CaptureError> {
        match shared.elements.get(name) {
            Some(info) if info.in_bin => Ok(()),
            _ => Err(CaptureError::Resource(format!("{} is not in the pipeline", name))),
        }
    }

    fn step_towards(from: ElementState, to: ElementState) -> ElementState {
        use ElementState::*;
        let order = [Null, Ready, Paused, Playing];
        let pos = |s| order.iter().position(|&o| o == s).unwrap_or(0);
        let (a, b) = (pos(from), pos(to));
        if b > a {
            order[a + 1]
        } else {
            order[a - 1]
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBackend for MemoryBackend {
    type Element = MemoryElement;
    type Pad = MemoryPad;

    fn pipeline_name(&self) -> &str {
        &self.name
    }

    fn make_element(&mut self, factory: &str, name: &str) -> Result<MemoryElement, CaptureError> {
        let mut shared = self.shared.lock();
        if shared.missing_factories.contains(factory) {
            return Err(CaptureError::MissingElement(factory.to_string()));
        }
        if shared.elements.get(name).map(|e| e.in_bin).unwrap_or(false) {
            return Err(CaptureError::Resource(format!("element {} already exists", name)));
        }
        shared.elements.insert(
            name.to_string(),
            ElementInfo {
                factory: factory.to_string(),
                in_bin: false,
                state: ElementState::Null,
                properties: BTreeMap::new(),
                eos: false,
            },
        );
        Ok(MemoryElement {
            name: name.to_string(),
        })
    }

    fn add(&mut self, element: &MemoryElement) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        let info = shared
            .elements
            .get_mut(&element.name)
            .ok_or_else(|| CaptureError::Resource(format!("unknown element {}", element.name)))?;
        if info.in_bin {
            return Err(CaptureError::Resource(format!("{} added twice", element.name)));
        }
        info.in_bin = true;
        info.eos = false;
        shared.record(GraphEvent::Added(element.name.clone()));
        Ok(())
    }

    fn remove(&mut self, element: &MemoryElement) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        Self::require_in_bin(&shared, &element.name)?;
        let dangling: Vec<(String, String)> = shared
            .links
            .iter()
            .filter(|(src, sink)| *src == element.name || *sink == element.name)
            .cloned()
            .collect();
        for link in dangling {
            shared.links.remove(&link);
        }
        if let Some(info) = shared.elements.get_mut(&element.name) {
            info.in_bin = false;
        }
        shared.record(GraphEvent::Removed(element.name.clone()));
        Ok(())
    }

    fn link(&mut self, src: &MemoryElement, sink: &MemoryElement) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        if Self::require_in_bin(&shared, &src.name).is_err()
            || Self::require_in_bin(&shared, &sink.name).is_err()
        {
            return Err(CaptureError::LinkFailed(src.name.clone(), sink.name.clone()));
        }
        shared.links.insert((src.name.clone(), sink.name.clone()));
        shared.record(GraphEvent::Linked(src.name.clone(), sink.name.clone()));
        Ok(())
    }

    fn request_pad(&mut self, tee: &MemoryElement) -> Result<MemoryPad, CaptureError> {
        let mut shared = self.shared.lock();
        Self::require_in_bin(&shared, &tee.name)?;
        let is_tee = shared
            .elements
            .get(&tee.name)
            .map(|e| e.factory == "tee")
            .unwrap_or(false);
        if !is_tee {
            return Err(CaptureError::Resource(format!("{} has no request pads", tee.name)));
        }
        let name = format!("src_{}", shared.next_pad);
        shared.next_pad += 1;
        shared.record(GraphEvent::PadRequested(tee.name.clone()));
        Ok(MemoryPad {
            tee: tee.name.clone(),
            name,
        })
    }

    fn link_pad(&mut self, pad: &MemoryPad, sink: &MemoryElement) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        if Self::require_in_bin(&shared, &sink.name).is_err() {
            return Err(CaptureError::LinkFailed(pad.tee.clone(), sink.name.clone()));
        }
        shared.links.insert((pad.tee.clone(), sink.name.clone()));
        shared.record(GraphEvent::Linked(pad.tee.clone(), sink.name.clone()));
        Ok(())
    }

    fn unlink_pad(&mut self, pad: &MemoryPad, sink: &MemoryElement) {
        let mut shared = self.shared.lock();
        if shared.links.remove(&(pad.tee.clone(), sink.name.clone())) {
            shared.record(GraphEvent::Unlinked(pad.tee.clone(), sink.name.clone()));
        }
    }

    fn release_pad(&mut self, tee: &MemoryElement, _pad: MemoryPad) {
        self.shared.lock().record(GraphEvent::PadReleased(tee.name.clone()));
    }

    fn set_property(
        &mut self,
        element: &MemoryElement,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        let info = shared
            .elements
            .get_mut(&element.name)
            .ok_or_else(|| CaptureError::Resource(format!("unknown element {}", element.name)))?;
        info.properties.insert(name.to_string(), value.clone());
        shared.record(GraphEvent::Property(element.name.clone(), name.to_string(), value));
        Ok(())
    }

    fn set_tags(&mut self, element: &MemoryElement, tags: &MetaData) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        Self::require_in_bin(&shared, &element.name)?;
        shared.record(GraphEvent::Tags(element.name.clone(), tags.clone()));
        Ok(())
    }

    fn set_element_state(
        &mut self,
        element: &MemoryElement,
        state: ElementState,
    ) -> Result<(), CaptureError> {
        let mut shared = self.shared.lock();
        let info = shared
            .elements
            .get_mut(&element.name)
            .ok_or_else(|| CaptureError::Resource(format!("unknown element {}", element.name)))?;
        info.state = state;
        shared.record(GraphEvent::ElementState(element.name.clone(), state));
        Ok(())
    }

    fn sync_state_with_pipeline(&mut self, element: &MemoryElement) -> Result<(), CaptureError> {
        let state = self.state;
        self.set_element_state(element, state)
    }

    fn set_state(&mut self, state: ElementState) -> Result<(), CaptureError> {
        {
            let mut shared = self.shared.lock();
            if shared.fail_state == Some(state) {
                return Err(CaptureError::StateChangeFailed(format!(
                    "{} refused to go to {}",
                    self.name, state
                )));
            }
            shared.record(GraphEvent::PipelineState(state));
            for info in shared.elements.values_mut().filter(|e| e.in_bin) {
                info.state = state;
            }
        }

        if state == ElementState::Playing {
            self.playing_since.get_or_insert_with(Instant::now);
        } else if let Some(since) = self.playing_since.take() {
            self.played += since.elapsed();
        }
        if state == ElementState::Null {
            self.played = Duration::ZERO;
        }

        let mut current = self.state;
        while current != state {
            let next = Self::step_towards(current, state);
            self.post(BusMessage::StateChanged {
                source: self.name.clone(),
                old: current,
                new: next,
                pending: if next == state {
                    ElementState::VoidPending
                } else {
                    state
                },
            });
            current = next;
        }
        self.state = state;
        Ok(())
    }

    fn wait_for_state(&mut self, _timeout: Duration) -> Result<ElementState, CaptureError> {
        Ok(self.state)
    }

    fn current_state(&self) -> ElementState {
        self.state
    }

    fn send_eos(&mut self, element: &MemoryElement) -> Result<(), CaptureError> {
        let mut reached_sinks = Vec::new();
        let pipeline_eos;
        {
            let mut shared = self.shared.lock();
            Self::require_in_bin(&shared, &element.name)?;
            let was_eos = shared.all_sinks_eos();
            shared.record(GraphEvent::Eos(element.name.clone()));
            shared.mark_eos(&element.name);

            let mut frontier = vec![element.name.clone()];
            while let Some(name) = frontier.pop() {
                let successors = shared.successors(&name);
                if successors.is_empty() {
                    reached_sinks.push(name);
                    continue;
                }
                for next in successors {
                    let ready = shared
                        .predecessors(&next)
                        .iter()
                        .all(|p| shared.is_eos(p));
                    if ready && !shared.is_eos(&next) {
                        shared.mark_eos(&next);
                        frontier.push(next);
                    }
                }
            }
            reached_sinks.retain(|name| {
                shared.forward_messages
                    && shared
                        .elements
                        .get(name)
                        .is_some_and(|info| info.factory.ends_with("sink"))
            });
            pipeline_eos = !was_eos && shared.all_sinks_eos();
        }

        if self.state != ElementState::Playing {
            log::debug!("EOS sent while {} is {}", self.name, self.state);
        }
        if pipeline_eos {
            reached_sinks.push(self.name.clone());
        }
        for source in reached_sinks {
            let message = BusMessage::Eos { source };
            let mut shared = self.shared.lock();
            if shared.hold_eos {
                shared.held.push(message);
            } else {
                drop(shared);
                self.post(message);
            }
        }
        Ok(())
    }

    fn query_position(&self) -> Option<Duration> {
        if let Some(position) = self.shared.lock().position {
            return Some(position);
        }
        match (self.state, self.playing_since) {
            (ElementState::Null | ElementState::Ready, _) => None,
            (_, Some(since)) => Some(self.played + since.elapsed()),
            (_, None) => Some(self.played),
        }
    }

    fn capture_still(
        &mut self,
        sink: &MemoryElement,
        request_id: i32,
        path: &Path,
    ) -> Result<(), CaptureError> {
        Self::require_in_bin(&self.shared.lock(), &sink.name)?;
        self.post(BusMessage::ImageExposed { request_id });
        self.post(BusMessage::ImageCaptured { request_id });
        fs::write(path, b"\xff\xd8\xff\xd9")
            .map_err(|e| CaptureError::StorageError(format!("failed to save image: {}", e)))?;
        self.shared.lock().record(GraphEvent::StillCaptured(request_id));
        self.post(BusMessage::ImageSaved {
            request_id,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.bus_rx.clone()
    }

    fn dump_graph(&self, label: &str) {
        let mut shared = self.shared.lock();
        let mut elements: Vec<String> = shared
            .elements
            .iter()
            .filter(|(_, info)| info.in_bin)
            .map(|(name, info)| format!("{}({}:{})", name, info.factory, info.state))
            .collect();
        elements.sort();
        log::debug!(
            "[{}] {} elements: {} links: {:?}",
            label,
            self.name,
            elements.join(", "),
            shared.links
        );
        shared.record(GraphEvent::Dump(label.to_string()));
    }
}

/// Test-side view of a `MemoryBackend` that has moved into a session.
#[derive(Clone)]
pub struct MemoryBackendHandle {
    shared: Arc<Mutex<Shared>>,
    bus: Sender<BusMessage>,
    pipeline: String,
}

impl MemoryBackendHandle {
    pub fn events(&self) -> Vec<GraphEvent> {
        self.shared.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.shared.lock().events.clear();
    }

    /// Names of the elements currently in the pipeline, sorted.
    pub fn elements_in_bin(&self) -> Vec<String> {
        let shared = self.shared.lock();
        let mut names: Vec<String> = shared
            .elements
            .iter()
            .filter(|(_, info)| info.in_bin)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn links(&self) -> Vec<(String, String)> {
        self.shared.lock().links.iter().cloned().collect()
    }

    pub fn property(&self, element: &str, name: &str) -> Option<PropertyValue> {
        self.shared
            .lock()
            .elements
            .get(element)
            .and_then(|info| info.properties.get(name).cloned())
    }

    pub fn element_state(&self, element: &str) -> Option<ElementState> {
        self.shared.lock().elements.get(element).map(|info| info.state)
    }

    /// Makes `make_element` fail for `factory`, as if the plugin were missing.
    pub fn remove_factory(&self, factory: &str) {
        self.shared.lock().missing_factories.insert(factory.to_string());
    }

    pub fn set_hold_eos(&self, hold: bool) {
        self.shared.lock().hold_eos = hold;
    }

    /// Posts end-of-stream messages withheld so far.
    pub fn release_eos(&self) {
        let held = std::mem::take(&mut self.shared.lock().held);
        for message in held {
            let _ = self.bus.send(message);
        }
    }

    pub fn held_eos_count(&self) -> usize {
        self.shared.lock().held.len()
    }

    /// Makes `set_state(state)` fail.
    pub fn fail_state_change(&self, state: Option<ElementState>) {
        self.shared.lock().fail_state = state;
    }

    pub fn set_position(&self, position: Option<Duration>) {
        self.shared.lock().position = position;
    }

    pub fn post(&self, message: BusMessage) {
        let _ = self.bus.send(message);
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }
}
