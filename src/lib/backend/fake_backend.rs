//! In-memory media backend.
//!
//! It keeps a model of elements, pads and links, emits the notifications a real pipeline would
//! post when it starts playing, and lets callers inject failures. Anything that would leak or
//! crash a real framework (destroying linked elements, releasing pads that are still linked,
//! releasing foreign pads) is recorded as a violation instead of being silently accepted.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc::UnboundedSender;
use tracing::*;

use crate::graph::types::StageSpec;

use super::{ElementState, MediaBackend, Notification, NotificationReceiver};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FakeElement(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FakePad(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Src,
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PadKind {
    Always,
    Sometimes,
    Request,
    Ghost,
}

#[derive(Debug)]
struct ElementEntry {
    name: String,
    factory: String,
    is_bin: bool,
    parent: Option<u64>,
    state: ElementState,
    properties: BTreeMap<String, String>,
}

#[derive(Debug)]
struct PadEntry {
    name: String,
    owner: u64,
    direction: Direction,
    kind: PadKind,
    peer: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    elements: BTreeMap<u64, ElementEntry>,
    pads: BTreeMap<u64, PadEntry>,
    name_counters: HashMap<String, usize>,

    failing_factories: HashSet<String>,
    failing_links: HashSet<(String, String)>,
    fail_activation: bool,
    fail_deactivation: bool,
    manual_play: bool,

    every_activation: Vec<Notification>,
    scripted_activations: HashMap<usize, Vec<Notification>>,
    activations: usize,
    deactivations: usize,
    subscribers: HashMap<u64, UnboundedSender<Notification>>,
    end_of_stream: HashMap<u64, u64>,

    requested_pad_names: Vec<String>,
    snapshots: Vec<String>,
    violations: Vec<String>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn element(&self, element: &FakeElement) -> Result<&ElementEntry> {
        self.elements
            .get(&element.0)
            .with_context(|| format!("Element {element:?} does not exist"))
    }

    fn pad(&self, pad: &FakePad) -> Result<&PadEntry> {
        self.pads
            .get(&pad.0)
            .with_context(|| format!("Pad {pad:?} does not exist"))
    }

    fn element_name(&self, id: u64) -> String {
        self.elements
            .get(&id)
            .map(|element| element.name.clone())
            .unwrap_or_else(|| format!("<destroyed {id}>"))
    }

    fn pad_label(&self, id: u64) -> String {
        match self.pads.get(&id) {
            Some(pad) => format!("{}:{}", self.element_name(pad.owner), pad.name),
            None => format!("<released {id}>"),
        }
    }

    fn find_pad(&self, owner: u64, name: &str) -> Option<u64> {
        self.pads
            .iter()
            .find(|(_, pad)| pad.owner == owner && pad.name == name)
            .map(|(id, _)| *id)
    }

    fn add_pad(&mut self, owner: u64, name: &str, direction: Direction, kind: PadKind) -> u64 {
        let id = self.next_id();
        self.pads.insert(
            id,
            PadEntry {
                name: name.to_string(),
                owner,
                direction,
                kind,
                peer: None,
            },
        );
        id
    }

    fn add_element(&mut self, name: String, factory: &str, is_bin: bool) -> u64 {
        let id = self.next_id();
        self.elements.insert(
            id,
            ElementEntry {
                name,
                factory: factory.to_string(),
                is_bin,
                parent: None,
                state: ElementState::Null,
                properties: BTreeMap::new(),
            },
        );
        id
    }

    fn generated_name(&mut self, factory: &str) -> String {
        let counter = self.name_counters.entry(factory.to_string()).or_default();
        let name = format!("{factory}{counter}");
        *counter += 1;
        name
    }

    fn descendants(&self, root: u64) -> Vec<u64> {
        let mut found = vec![root];
        let mut index = 0;
        while index < found.len() {
            let current = found[index];
            found.extend(
                self.elements
                    .iter()
                    .filter(|(_, element)| element.parent == Some(current))
                    .map(|(id, _)| *id),
            );
            index += 1;
        }
        found
    }

    fn same_parent(&self, a: u64, b: u64) -> bool {
        let parent_a = self.elements.get(&a).and_then(|element| element.parent);
        let parent_b = self.elements.get(&b).and_then(|element| element.parent);
        parent_a.is_some() && parent_a == parent_b
    }

    fn is_failing_link(&self, src_owner: u64, sink_owner: u64) -> bool {
        let labels = |id: u64| {
            let factory = self
                .elements
                .get(&id)
                .map(|element| element.factory.clone());
            [Some(self.element_name(id)), factory]
        };

        labels(src_owner).into_iter().flatten().any(|from| {
            labels(sink_owner)
                .into_iter()
                .flatten()
                .any(|to| self.failing_links.contains(&(from.clone(), to)))
        })
    }

    fn connect(&mut self, src: u64, sink: u64) -> Result<()> {
        let (Some(src_pad), Some(sink_pad)) = (self.pads.get(&src), self.pads.get(&sink)) else {
            return Err(anyhow!("Cannot link pads that do not exist"));
        };

        if src_pad.direction != Direction::Src || sink_pad.direction != Direction::Sink {
            return Err(anyhow!(
                "Wrong pad directions linking {} to {}",
                self.pad_label(src),
                self.pad_label(sink)
            ));
        }

        if src_pad.peer.is_some() || sink_pad.peer.is_some() {
            return Err(anyhow!(
                "Pads already linked: {} to {}",
                self.pad_label(src),
                self.pad_label(sink)
            ));
        }

        let (src_owner, sink_owner) = (src_pad.owner, sink_pad.owner);
        if !self.same_parent(src_owner, sink_owner) {
            return Err(anyhow!(
                "{} and {} do not share a parent",
                self.element_name(src_owner),
                self.element_name(sink_owner)
            ));
        }

        if self.is_failing_link(src_owner, sink_owner) {
            return Err(anyhow!(
                "Incompatible formats between {} and {}",
                self.element_name(src_owner),
                self.element_name(sink_owner)
            ));
        }

        if let Some(pad) = self.pads.get_mut(&src) {
            pad.peer = Some(sink);
        }
        if let Some(pad) = self.pads.get_mut(&sink) {
            pad.peer = Some(src);
        }

        Ok(())
    }

    fn disconnect(&mut self, pad: u64) {
        if let Some(peer) = self.pads.get_mut(&pad).and_then(|pad| pad.peer.take()) {
            if let Some(peer) = self.pads.get_mut(&peer) {
                peer.peer = None;
            }
        }
    }

    fn notify(&self, pipeline: u64, notification: Notification) {
        if let Some(sender) = self.subscribers.get(&pipeline) {
            let _ = sender.send(notification);
        }
    }
}

/// The in-memory backend. Configure failures before handing it to the code under test, then
/// inspect what is left behind.
#[derive(Debug, Default)]
pub struct FakeBackend {
    inner: Mutex<Inner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every element of this factory fails to be instantiated.
    pub fn fail_factory(&self, factory: &str) {
        self.lock().failing_factories.insert(factory.to_string());
    }

    /// Linking the element named `from` to the element named `to` fails. Either side may also
    /// be given as a factory name.
    pub fn fail_link(&self, from: &str, to: &str) {
        self.lock()
            .failing_links
            .insert((from.to_string(), to.to_string()));
    }

    pub fn fail_activation(&self) {
        self.lock().fail_activation = true;
    }

    pub fn fail_deactivation(&self) {
        self.lock().fail_deactivation = true;
    }

    /// Do not post the state changes to Playing on activation.
    pub fn manual_play(&self) {
        self.lock().manual_play = true;
    }

    /// Post these notifications, after the state changes, on every activation.
    pub fn script_every_activation(&self, notifications: Vec<Notification>) {
        self.lock().every_activation = notifications;
    }

    /// Post these notifications, after the state changes, on the `activation`-th activation
    /// (counting from zero).
    pub fn script_activation(&self, activation: usize, notifications: Vec<Notification>) {
        self.lock()
            .scripted_activations
            .insert(activation, notifications);
    }

    pub fn live_elements(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn live_element_names(&self) -> Vec<String> {
        self.lock()
            .elements
            .values()
            .map(|element| element.name.clone())
            .collect()
    }

    pub fn links(&self) -> usize {
        self.lock()
            .pads
            .values()
            .filter(|pad| pad.direction == Direction::Src && pad.peer.is_some())
            .count()
    }

    pub fn outstanding_request_pads(&self) -> usize {
        self.lock()
            .pads
            .values()
            .filter(|pad| pad.kind == PadKind::Request)
            .count()
    }

    pub fn requested_pad_names(&self) -> Vec<String> {
        self.lock().requested_pad_names.clone()
    }

    pub fn activations(&self) -> usize {
        self.lock().activations
    }

    pub fn deactivations(&self) -> usize {
        self.lock().deactivations
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.lock().snapshots.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn property(&self, element_name: &str, key: &str) -> Option<String> {
        self.lock()
            .elements
            .values()
            .find(|element| element.name == element_name)
            .and_then(|element| element.properties.get(key).cloned())
    }

    pub fn state_of(&self, element_name: &str) -> Option<ElementState> {
        self.lock()
            .elements
            .values()
            .find(|element| element.name == element_name)
            .map(|element| element.state)
    }

    fn set_tree_state(inner: &mut Inner, root: u64, state: ElementState) {
        for id in inner.descendants(root) {
            if let Some(element) = inner.elements.get_mut(&id) {
                element.state = state;
            }
        }
    }
}

impl MediaBackend for FakeBackend {
    type Element = FakeElement;
    type Pad = FakePad;

    fn new_pipeline(&self, name: &str) -> Result<FakeElement> {
        let mut inner = self.lock();
        Ok(FakeElement(inner.add_element(
            name.to_string(),
            "pipeline",
            true,
        )))
    }

    fn new_bin(&self, name: &str) -> Result<FakeElement> {
        let mut inner = self.lock();
        Ok(FakeElement(inner.add_element(name.to_string(), "bin", true)))
    }

    fn make_element(&self, spec: &StageSpec) -> Result<FakeElement> {
        let mut inner = self.lock();

        if inner.failing_factories.contains(&spec.factory) {
            return Err(anyhow!("No such element factory {:?}", spec.factory));
        }

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => inner.generated_name(&spec.factory),
        };
        let id = inner.add_element(name, &spec.factory, false);
        if let Some(element) = inner.elements.get_mut(&id) {
            element.properties = spec.properties.clone();
        }

        // Pads follow the factory naming convention: sources only produce, sinks only consume,
        // the session element only has request pads.
        let factory = spec.factory.as_str();
        if factory != "rtpbin" {
            if !factory.ends_with("src") {
                inner.add_pad(id, "sink", Direction::Sink, PadKind::Always);
            }
            if !factory.ends_with("sink") {
                inner.add_pad(id, "src", Direction::Src, PadKind::Always);
            }
        }

        Ok(FakeElement(id))
    }

    fn element_name(&self, element: &FakeElement) -> String {
        self.lock().element_name(element.0)
    }

    fn pad_name(&self, pad: &FakePad) -> String {
        self.lock().pad_label(pad.0)
    }

    fn add(&self, bin: &FakeElement, element: &FakeElement) -> Result<()> {
        let mut inner = self.lock();

        if !inner.element(bin)?.is_bin {
            return Err(anyhow!("{} is not a bin", inner.element_name(bin.0)));
        }
        if let Some(parent) = inner.element(element)?.parent {
            return Err(anyhow!(
                "{} already has a parent: {}",
                inner.element_name(element.0),
                inner.element_name(parent)
            ));
        }

        if let Some(entry) = inner.elements.get_mut(&element.0) {
            entry.parent = Some(bin.0);
        }

        Ok(())
    }

    fn remove(&self, bin: &FakeElement, element: &FakeElement) -> Result<()> {
        let mut inner = self.lock();

        if inner.element(element)?.parent != Some(bin.0) {
            return Err(anyhow!(
                "{} is not a child of {}",
                inner.element_name(element.0),
                inner.element_name(bin.0)
            ));
        }

        let linked = inner
            .pads
            .values()
            .filter(|pad| pad.owner == element.0 && pad.peer.is_some())
            .count();
        if linked > 0 {
            let violation = format!(
                "removed {} from {} with {linked} linked pads",
                inner.element_name(element.0),
                inner.element_name(bin.0)
            );
            inner.violations.push(violation);
        }

        if let Some(entry) = inner.elements.get_mut(&element.0) {
            entry.parent = None;
        }

        Ok(())
    }

    fn destroy(&self, element: FakeElement) {
        let mut inner = self.lock();

        let Some(entry) = inner.elements.get(&element.0) else {
            let violation = format!("destroyed {element:?} twice");
            inner.violations.push(violation);
            return;
        };

        if let Some(parent) = entry.parent {
            let violation = format!(
                "destroyed {} while still inside {}",
                entry.name,
                inner.element_name(parent)
            );
            inner.violations.push(violation);
        }

        let doomed = inner.descendants(element.0);
        let doomed_pads: Vec<u64> = inner
            .pads
            .iter()
            .filter(|(_, pad)| doomed.contains(&pad.owner))
            .map(|(id, _)| *id)
            .collect();

        for pad in &doomed_pads {
            let Some((kind, peer)) = inner.pads.get(pad).map(|entry| (entry.kind, entry.peer)) else {
                continue;
            };
            if kind == PadKind::Request {
                let violation = format!("destroyed unreleased request pad {}", inner.pad_label(*pad));
                inner.violations.push(violation);
            }
            if let Some(peer) = peer {
                if !doomed_pads.contains(&peer) {
                    let violation = format!(
                        "destroyed linked pad {} (peer {})",
                        inner.pad_label(*pad),
                        inner.pad_label(peer)
                    );
                    inner.violations.push(violation);
                }
            }
        }

        for pad in doomed_pads {
            inner.disconnect(pad);
            inner.pads.remove(&pad);
        }
        for id in doomed {
            inner.elements.remove(&id);
            inner.subscribers.remove(&id);
            inner.end_of_stream.remove(&id);
        }
    }

    fn link(&self, src: &FakeElement, sink: &FakeElement) -> Result<()> {
        let mut inner = self.lock();

        let src_pad = inner
            .find_pad(src.0, "src")
            .with_context(|| format!("{} has no src pad", inner.element_name(src.0)))?;
        let sink_pad = inner
            .find_pad(sink.0, "sink")
            .with_context(|| format!("{} has no sink pad", inner.element_name(sink.0)))?;

        inner.connect(src_pad, sink_pad)
    }

    fn unlink(&self, src: &FakeElement, sink: &FakeElement) {
        let mut inner = self.lock();

        let (Some(src_pad), Some(sink_pad)) =
            (inner.find_pad(src.0, "src"), inner.find_pad(sink.0, "sink"))
        else {
            return;
        };

        if inner.pads.get(&src_pad).and_then(|pad| pad.peer) == Some(sink_pad) {
            inner.disconnect(src_pad);
        }
    }

    fn static_pad(&self, element: &FakeElement, name: &str) -> Option<FakePad> {
        self.lock().find_pad(element.0, name).map(FakePad)
    }

    fn add_ghost_pad(&self, bin: &FakeElement, name: &str, target: &FakePad) -> Result<FakePad> {
        let mut inner = self.lock();

        if !inner.element(bin)?.is_bin {
            return Err(anyhow!("{} is not a bin", inner.element_name(bin.0)));
        }
        if inner.find_pad(bin.0, name).is_some() {
            return Err(anyhow!(
                "{} already has a pad named {name:?}",
                inner.element_name(bin.0)
            ));
        }
        let direction = inner.pad(target)?.direction;

        Ok(FakePad(inner.add_pad(bin.0, name, direction, PadKind::Ghost)))
    }

    fn remove_ghost_pad(&self, bin: &FakeElement, pad: &FakePad) -> Result<()> {
        let mut inner = self.lock();

        let entry = inner.pad(pad)?;
        if entry.owner != bin.0 || entry.kind != PadKind::Ghost {
            return Err(anyhow!(
                "{} is not a ghost pad of {}",
                inner.pad_label(pad.0),
                inner.element_name(bin.0)
            ));
        }
        if entry.peer.is_some() {
            let violation = format!("removed linked ghost pad {}", inner.pad_label(pad.0));
            inner.violations.push(violation);
            inner.disconnect(pad.0);
        }

        inner.pads.remove(&pad.0);

        Ok(())
    }

    fn link_pads(&self, src: &FakePad, sink: &FakePad) -> Result<()> {
        self.lock().connect(src.0, sink.0)
    }

    fn unlink_pads(&self, src: &FakePad, sink: &FakePad) -> Result<()> {
        let mut inner = self.lock();

        if inner.pad(src)?.peer != Some(sink.0) {
            return Err(anyhow!(
                "{} is not linked to {}",
                inner.pad_label(src.0),
                inner.pad_label(sink.0)
            ));
        }
        inner.disconnect(src.0);

        Ok(())
    }

    fn request_pad(&self, element: &FakeElement, name: &str) -> Result<FakePad> {
        let mut inner = self.lock();

        inner.element(element)?;
        if inner.find_pad(element.0, name).is_some() {
            return Err(anyhow!(
                "{} already has a pad named {name:?}",
                inner.element_name(element.0)
            ));
        }

        let direction = if name.contains("sink") {
            Direction::Sink
        } else {
            Direction::Src
        };
        let id = inner.add_pad(element.0, name, direction, PadKind::Request);

        // Like rtpbin, a send_rtp_sink request makes the matching send_rtp_src appear
        if let Some(session) = name.strip_prefix("send_rtp_sink_") {
            inner.add_pad(
                element.0,
                &format!("send_rtp_src_{session}"),
                Direction::Src,
                PadKind::Sometimes,
            );
        }

        inner.requested_pad_names.push(name.to_string());

        Ok(FakePad(id))
    }

    fn release_request_pad(&self, element: &FakeElement, pad: &FakePad) {
        let mut inner = self.lock();

        let Some(entry) = inner.pads.get(&pad.0) else {
            let violation = format!("released unknown pad {pad:?}");
            inner.violations.push(violation);
            return;
        };
        if entry.owner != element.0 || entry.kind != PadKind::Request {
            let violation = format!(
                "released {} which is not a request pad of {}",
                inner.pad_label(pad.0),
                inner.element_name(element.0)
            );
            inner.violations.push(violation);
            return;
        }
        let (name, linked) = (entry.name.clone(), entry.peer.is_some());
        if linked {
            let violation = format!("released linked request pad {}", inner.pad_label(pad.0));
            inner.violations.push(violation);
            inner.disconnect(pad.0);
        }

        inner.pads.remove(&pad.0);

        if let Some(session) = name.strip_prefix("send_rtp_sink_") {
            if let Some(companion) = inner.find_pad(element.0, &format!("send_rtp_src_{session}")) {
                if inner.pads.get(&companion).and_then(|pad| pad.peer).is_some() {
                    let violation = format!(
                        "released {name} while {} was still linked",
                        inner.pad_label(companion)
                    );
                    inner.violations.push(violation);
                    inner.disconnect(companion);
                }
                inner.pads.remove(&companion);
            }
        }
    }

    fn subscribe(&self, pipeline: &FakeElement) -> Result<NotificationReceiver> {
        let mut inner = self.lock();
        inner.element(pipeline)?;

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        inner.subscribers.insert(pipeline.0, sender);

        Ok(receiver)
    }

    fn unsubscribe(&self, pipeline: &FakeElement) {
        self.lock().subscribers.remove(&pipeline.0);
    }

    fn activate(&self, pipeline: &FakeElement) -> Result<()> {
        let mut inner = self.lock();

        let activation = inner.activations;
        inner.activations += 1;

        if inner.fail_activation {
            return Err(anyhow!("State change to Playing failed"));
        }

        Self::set_tree_state(&mut inner, pipeline.0, ElementState::Playing);

        let source = inner.element_name(pipeline.0);
        if !inner.manual_play {
            let steps = [
                (ElementState::Null, ElementState::Ready),
                (ElementState::Ready, ElementState::Paused),
                (ElementState::Paused, ElementState::Playing),
            ];
            for (old, new) in steps {
                inner.notify(
                    pipeline.0,
                    Notification::StateChanged {
                        source: source.clone(),
                        from_root: true,
                        old,
                        new,
                        pending: ElementState::VoidPending,
                    },
                );
            }
        }

        let mut scripted = inner.every_activation.clone();
        if let Some(notifications) = inner.scripted_activations.get(&activation) {
            scripted.extend(notifications.iter().cloned());
        }
        for notification in scripted {
            inner.notify(pipeline.0, notification);
        }

        if inner.end_of_stream.contains_key(&pipeline.0) {
            inner.notify(pipeline.0, Notification::EndOfStream { source });
        }

        Ok(())
    }

    fn deactivate(&self, pipeline: &FakeElement) -> Result<()> {
        let mut inner = self.lock();
        inner.deactivations += 1;

        if inner.fail_deactivation {
            return Err(anyhow!("State change to Null failed"));
        }

        Self::set_tree_state(&mut inner, pipeline.0, ElementState::Null);

        Ok(())
    }

    fn end_stream_after(&self, pipeline: &FakeElement, pad: &FakePad, buffers: u64) -> Result<()> {
        let mut inner = self.lock();
        inner.element(pipeline)?;
        inner.pad(pad)?;

        trace!("End of stream after {buffers} buffers on {}", inner.pad_label(pad.0));
        inner.end_of_stream.insert(pipeline.0, buffers);

        Ok(())
    }

    fn snapshot(&self, pipeline: &FakeElement, label: &str) {
        let mut inner = self.lock();
        let snapshot = format!("{}-{label}", inner.element_name(pipeline.0));
        inner.snapshots.push(snapshot);
    }

    fn session_stats(&self, session_element: &FakeElement, session: u32) -> Option<String> {
        let inner = self.lock();
        let element = inner.elements.get(&session_element.0)?;
        Some(format!(
            "{} session {session}: factory={}, state={:?}",
            element.name, element.factory, element.state
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_follow_factory_names() {
        let backend = FakeBackend::new();
        let source = backend.make_element(&StageSpec::new("v4l2src")).unwrap();
        let sink = backend.make_element(&StageSpec::new("udpsink")).unwrap();
        let filter = backend.make_element(&StageSpec::new("capsfilter")).unwrap();

        assert!(backend.static_pad(&source, "sink").is_none());
        assert!(backend.static_pad(&source, "src").is_some());
        assert!(backend.static_pad(&sink, "src").is_none());
        assert!(backend.static_pad(&filter, "sink").is_some());
        assert!(backend.static_pad(&filter, "src").is_some());
        assert_eq!(backend.element_name(&filter), "capsfilter0");
    }

    #[test]
    fn linking_needs_a_common_parent() {
        let backend = FakeBackend::new();
        let pipeline = backend.new_pipeline("pipeline").unwrap();
        let a = backend.make_element(&StageSpec::new("queue")).unwrap();
        let b = backend.make_element(&StageSpec::new("queue")).unwrap();

        assert!(backend.link(&a, &b).is_err());

        backend.add(&pipeline, &a).unwrap();
        backend.add(&pipeline, &b).unwrap();
        backend.link(&a, &b).unwrap();
        assert_eq!(backend.links(), 1);
        assert!(backend.link(&a, &b).is_err());
    }

    #[test]
    fn destroying_linked_elements_is_a_violation() {
        let backend = FakeBackend::new();
        let pipeline = backend.new_pipeline("pipeline").unwrap();
        let a = backend.make_element(&StageSpec::new("queue")).unwrap();
        let b = backend.make_element(&StageSpec::new("queue")).unwrap();
        backend.add(&pipeline, &a).unwrap();
        backend.add(&pipeline, &b).unwrap();
        backend.link(&a, &b).unwrap();

        backend.remove(&pipeline, &a).unwrap();
        backend.destroy(a);

        assert_eq!(backend.violations().len(), 2);
    }

    #[test]
    fn request_pads_must_be_released_unlinked() {
        let backend = FakeBackend::new();
        let pipeline = backend.new_pipeline("pipeline").unwrap();
        let session = backend.make_element(&StageSpec::new("rtpbin")).unwrap();
        backend.add(&pipeline, &session).unwrap();

        let pad = backend.request_pad(&session, "send_rtp_sink_0").unwrap();
        assert!(backend.static_pad(&session, "send_rtp_src_0").is_some());
        assert!(backend.request_pad(&session, "send_rtp_sink_0").is_err());

        backend.release_request_pad(&session, &pad);
        assert!(backend.static_pad(&session, "send_rtp_src_0").is_none());
        assert_eq!(backend.outstanding_request_pads(), 0);
        assert!(backend.violations().is_empty());

        backend.release_request_pad(&session, &pad);
        assert_eq!(backend.violations().len(), 1);
    }

    #[tokio::test]
    async fn activation_posts_state_changes_then_script() {
        let backend = FakeBackend::new();
        let pipeline = backend.new_pipeline("pipeline").unwrap();
        backend.script_activation(
            0,
            vec![Notification::EndOfStream {
                source: "pipeline".to_string(),
            }],
        );

        let mut notifications = backend.subscribe(&pipeline).unwrap();
        backend.activate(&pipeline).unwrap();

        for expected in [
            ElementState::Ready,
            ElementState::Paused,
            ElementState::Playing,
        ] {
            match notifications.recv().await {
                Some(Notification::StateChanged { new, from_root, .. }) => {
                    assert_eq!(new, expected);
                    assert!(from_root);
                }
                other => panic!("Unexpected notification: {other:?}"),
            }
        }
        assert!(matches!(
            notifications.recv().await,
            Some(Notification::EndOfStream { .. })
        ));
        assert_eq!(backend.state_of("pipeline"), Some(ElementState::Playing));
    }
}
