//! In-memory media engine.
//!
//! `SimEngine` implements [`MediaEngine`] without touching real media. Content
//! is registered per location with [`SimMedia`]; prerolling a pipeline whose
//! source points at a registered location emits the same signal sequence a
//! real engine would (type found, one output per stream, no more outputs) and
//! completes the phase change asynchronously. Buffers and events can be pushed
//! through linked ports to observe probes, selectors and sinks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use media_player_types::Phase;

use crate::engine::{
    BusHandler, Caps, ConnectionId, ErrorDomain, FactoryClass, FactoryInfo, MediaEngine, NodeId,
    Notification, PhaseChange, PortRef, ProbeCallback, ProbeId, ProbeItem, ProbeKind, ProbeReturn,
    PropValue, SeekRequest, Signal, SignalHandler, SignalKind, StreamError, StreamEvent,
};

/// Content behind one location.
#[derive(Clone, Debug, PartialEq)]
pub struct SimMedia {
    /// Caps reported by type detection.
    pub container: Caps,
    /// Demuxer outputs, in the order they appear.
    pub streams: Vec<Caps>,
    pub duration: Option<Duration>,
    /// Time preroll takes before type detection starts.
    pub preroll_delay: Option<Duration>,
}

impl SimMedia {
    pub fn container(media_type: &str, streams: &[&str]) -> Self {
        Self {
            container: Caps::new(media_type),
            streams: streams.iter().map(|s| Caps::new(*s)).collect(),
            duration: None,
            preroll_delay: None,
        }
    }

    /// Single elementary stream without a container.
    pub fn elementary(media_type: &str) -> Self {
        Self {
            container: Caps::new(media_type),
            streams: Vec::new(),
            duration: None,
            preroll_delay: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_preroll_delay(mut self, delay: Duration) -> Self {
        self.preroll_delay = Some(delay);
        self
    }
}

struct Probe {
    port: String,
    id: ProbeId,
    kind: ProbeKind,
    callback: ProbeCallback,
}

struct SimNode {
    factory: String,
    class: FactoryClass,
    phase: Phase,
    parent: Option<NodeId>,
    props: HashMap<String, PropValue>,
    requested_ports: usize,
    out_ports: Vec<String>,
    probes: Vec<Probe>,
    connections: Vec<(ConnectionId, SignalKind)>,
    phase_requests: Vec<Phase>,
    seeks: Vec<SeekRequest>,
    position: Option<Duration>,
    duration: Option<Duration>,
    clock: Option<NodeId>,
    prerolled: bool,
    delivered: Vec<Duration>,
    events: Vec<StreamEvent>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    nodes: BTreeMap<NodeId, SimNode>,
    links: Vec<(PortRef, PortRef)>,
    media: HashMap<String, SimMedia>,
    fail_links: HashSet<String>,
    bus: Option<BusHandler>,
    signals: Option<SignalHandler>,
    /// Pipeline with an asynchronous preroll in flight.
    busy: Option<NodeId>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, id: NodeId) -> Result<&SimNode> {
        self.nodes.get(&id).ok_or_else(|| anyhow!("unknown node {id}"))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SimNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown node {id}"))
    }

    fn peer_of(&self, out: &PortRef) -> Option<PortRef> {
        self.links
            .iter()
            .find(|(from, _)| from == out)
            .map(|(_, to)| to.clone())
    }

    fn upstream_of(&self, input: &PortRef) -> Option<PortRef> {
        self.links
            .iter()
            .find(|(_, to)| to == input)
            .map(|(from, _)| from.clone())
    }

    fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(parent))
            .map(|(id, _)| *id)
            .collect()
    }

    fn probes_on(&self, port: &PortRef, kinds: &[ProbeKind]) -> Vec<(ProbeId, ProbeKind, ProbeCallback)> {
        self.nodes
            .get(&port.node)
            .map(|n| {
                n.probes
                    .iter()
                    .filter(|p| p.port == port.name && kinds.contains(&p.kind))
                    .map(|p| (p.id, p.kind, p.callback.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct Shared {
    inner: Mutex<Inner>,
    idle: Condvar,
}

/// Simulated engine. Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SimEngine {
    shared: Arc<Shared>,
    factories: Arc<Vec<FactoryInfo>>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        Self::with_factories(default_factories())
    }

    pub fn with_factories(factories: Vec<FactoryInfo>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                idle: Condvar::new(),
            }),
            factories: Arc::new(factories),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap()
    }

    /// Register content for a source `location`.
    pub fn add_media(&self, location: &str, media: SimMedia) {
        self.lock().media.insert(location.to_string(), media);
    }

    /// Make every link touching nodes of `factory` fail.
    pub fn fail_links_for(&self, factory: &str) {
        self.lock().fail_links.insert(factory.to_string());
    }

    /// Expose a dynamic output port on `node`.
    pub fn add_output_port(&self, node: NodeId, name: &str) -> PortRef {
        if let Some(n) = self.lock().nodes.get_mut(&node) {
            n.out_ports.push(name.to_string());
        }
        PortRef::new(node, name)
    }

    pub fn has_node(&self, node: NodeId) -> bool {
        self.lock().nodes.contains_key(&node)
    }

    pub fn factory_of(&self, node: NodeId) -> Option<String> {
        self.lock().nodes.get(&node).map(|n| n.factory.clone())
    }

    pub fn nodes_by_factory(&self, factory: &str) -> Vec<NodeId> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, n)| n.factory == factory)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().nodes.values().map(|n| n.connections.len()).sum()
    }

    pub fn probe_count(&self, port: &PortRef) -> usize {
        self.lock()
            .nodes
            .get(&port.node)
            .map(|n| n.probes.iter().filter(|p| p.port == port.name).count())
            .unwrap_or(0)
    }

    pub fn phase_of(&self, node: NodeId) -> Option<Phase> {
        self.lock().nodes.get(&node).map(|n| n.phase)
    }

    pub fn phase_requests(&self, node: NodeId) -> Vec<Phase> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.phase_requests.clone())
            .unwrap_or_default()
    }

    pub fn seeks(&self, node: NodeId) -> Vec<SeekRequest> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.seeks.clone())
            .unwrap_or_default()
    }

    pub fn set_position(&self, node: NodeId, position: Duration) {
        if let Some(n) = self.lock().nodes.get_mut(&node) {
            n.position = Some(position);
        }
    }

    pub fn clock_of(&self, node: NodeId) -> Option<NodeId> {
        self.lock().nodes.get(&node).and_then(|n| n.clock)
    }

    /// Timestamps of the buffers a sink received.
    pub fn delivered(&self, node: NodeId) -> Vec<Duration> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.delivered.clone())
            .unwrap_or_default()
    }

    /// Events a sink received, after probe rewrites.
    pub fn events(&self, node: NodeId) -> Vec<StreamEvent> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.events.clone())
            .unwrap_or_default()
    }

    /// Input port `port` is linked to, if any.
    pub fn peer(&self, port: &PortRef) -> Option<PortRef> {
        self.lock().peer_of(port)
    }

    /// Dynamic outputs a node has exposed so far.
    pub fn output_ports(&self, node: NodeId) -> Vec<PortRef> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.out_ports.iter().map(|p| PortRef::new(node, p.as_str())).collect())
            .unwrap_or_default()
    }

    /// Block until no asynchronous preroll is running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let g = self.lock();
        let (g, res) = self
            .shared
            .idle
            .wait_timeout_while(g, timeout, |inner| inner.busy.is_some())
            .unwrap();
        drop(g);
        !res.timed_out()
    }

    /// Emit `drained` from every type detector that has a listener.
    pub fn emit_drained(&self) {
        let detectors: Vec<NodeId> = {
            let g = self.lock();
            g.nodes
                .iter()
                .filter(|(_, n)| n.class == FactoryClass::TypeDetector)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in detectors {
            emit(&self.shared, id, Signal::Drained);
        }
    }

    /// Push a buffer out of `port`. Returns whether a sink received it.
    pub fn push_buffer(&self, port: &PortRef, pts: Duration, duration: Duration) -> bool {
        let mut item = ProbeItem::Buffer {
            pts: Some(pts),
            duration: Some(duration),
        };
        match self.traverse(port, &mut item) {
            Some(sink) => {
                if let Some(n) = self.lock().nodes.get_mut(&sink) {
                    n.delivered.push(pts);
                }
                true
            }
            None => false,
        }
    }

    /// Push a downstream event out of `port`; returns it as the sink saw it.
    pub fn push_event(&self, port: &PortRef, event: StreamEvent) -> Option<StreamEvent> {
        let mut item = ProbeItem::Event(event);
        let sink = self.traverse(port, &mut item)?;
        let ProbeItem::Event(event) = item else {
            return None;
        };
        if let Some(n) = self.lock().nodes.get_mut(&sink) {
            n.events.push(event.clone());
        }
        Some(event)
    }

    /// Follow links from `start` to a sink, running probes on every port crossed.
    fn traverse(&self, start: &PortRef, item: &mut ProbeItem) -> Option<NodeId> {
        let kinds: &[ProbeKind] = match item {
            ProbeItem::Buffer { .. } => &[ProbeKind::Block, ProbeKind::Buffer],
            ProbeItem::Event(_) => &[ProbeKind::Block, ProbeKind::Event],
        };
        let mut out = start.clone();
        // Bounded walk; graphs here are short chains.
        for _ in 0..64 {
            if !self.run_probes(&out, kinds, item) {
                return None;
            }
            let input = self.lock().peer_of(&out)?;
            if !self.run_probes(&input, kinds, item) {
                return None;
            }
            let g = self.lock();
            let node = g.nodes.get(&input.node)?;
            let next = match node.class {
                FactoryClass::Sink => return Some(input.node),
                FactoryClass::Selector => match node.props.get("active-pad") {
                    Some(PropValue::Port(active)) if active.name == input.name => "src".to_string(),
                    _ => return None,
                },
                FactoryClass::Buffer if input.name.starts_with("sink_") => {
                    input.name.replacen("sink", "src", 1)
                }
                _ => "src".to_string(),
            };
            out = PortRef::new(input.node, next);
        }
        None
    }

    fn run_probes(&self, port: &PortRef, kinds: &[ProbeKind], item: &mut ProbeItem) -> bool {
        let probes = self.lock().probes_on(port, kinds);
        for (id, kind, callback) in probes {
            if kind == ProbeKind::Block {
                return false;
            }
            match callback(item) {
                ProbeReturn::Pass => {}
                ProbeReturn::Drop => return false,
                ProbeReturn::Remove => {
                    if let Some(n) = self.lock().nodes.get_mut(&port.node) {
                        n.probes.retain(|p| p.id != id);
                    }
                }
            }
        }
        true
    }

}

fn emit(shared: &Shared, node: NodeId, signal: Signal) {
    let handler = {
        let g = shared.inner.lock().unwrap();
        let listening = g
            .nodes
            .get(&node)
            .map(|n| n.connections.iter().any(|(_, k)| *k == signal.kind()))
            .unwrap_or(false);
        if !listening {
            return;
        }
        g.signals.clone()
    };
    if let Some(handler) = handler {
        handler(node, signal);
    }
}

fn post(shared: &Shared, notification: Notification) {
    let handler = shared.inner.lock().unwrap().bus.clone();
    if let Some(handler) = handler {
        handler(notification);
    }
}

/// Walk the pipeline one phase at a time toward `target`, posting each step.
fn post_steps(shared: &Shared, pipeline: NodeId, target: Phase) {
    loop {
        let step = {
            let mut g = shared.inner.lock().unwrap();
            let Some(node) = g.nodes.get(&pipeline) else {
                return;
            };
            let from = node.phase.max(Phase::Null);
            if from == target {
                None
            } else {
                let to = if target > from {
                    Phase::ALL[from.index() + 1]
                } else {
                    Phase::ALL[from.index() - 1]
                };
                for child in g.children(pipeline) {
                    if let Some(c) = g.nodes.get_mut(&child) {
                        c.phase = to;
                    }
                }
                if let Some(p) = g.nodes.get_mut(&pipeline) {
                    p.phase = to;
                }
                Some((from, to))
            }
        };
        let Some((previous, current)) = step else {
            return;
        };
        post(
            shared,
            Notification::PhaseChanged {
                node: pipeline,
                previous,
                current,
                pending: (current != target).then_some(target),
            },
        );
    }
}

/// Type detection and demuxer output announcement for a detector.
fn detect(shared: &Shared, detector: NodeId, media: &SimMedia) {
    emit(
        shared,
        detector,
        Signal::TypeFound {
            caps: media.container.clone(),
        },
    );
    let demuxer = {
        let g = shared.inner.lock().unwrap();
        g.peer_of(&PortRef::src(detector))
            .map(|p| p.node)
            .filter(|id| {
                g.nodes
                    .get(id)
                    .map(|n| n.class == FactoryClass::Demuxer)
                    .unwrap_or(false)
            })
    };
    let Some(demuxer) = demuxer else {
        return;
    };
    for (i, caps) in media.streams.iter().enumerate() {
        let name = format!("src_{i}");
        if let Some(n) = shared.inner.lock().unwrap().nodes.get_mut(&demuxer) {
            n.out_ports.push(name.clone());
        }
        emit(
            shared,
            demuxer,
            Signal::PadAdded {
                port: PortRef::new(demuxer, name),
                caps: caps.clone(),
            },
        );
    }
    emit(shared, demuxer, Signal::NoMorePads);
}

/// Source location feeding `detector`, with the source's id.
fn source_location(inner: &Inner, detector: NodeId) -> Option<(NodeId, String)> {
    let mut node = detector;
    for _ in 0..8 {
        let up = inner.upstream_of(&PortRef::sink(node))?;
        node = up.node;
        let n = inner.nodes.get(&node)?;
        if n.class == FactoryClass::Source {
            let location = n.props.get("location")?.as_str()?.to_string();
            return Some((node, location));
        }
    }
    None
}

fn lookup_media(inner: &Inner, detector: NodeId) -> (Option<NodeId>, Option<SimMedia>) {
    match source_location(inner, detector) {
        Some((source, location)) => (Some(source), inner.media.get(&location).cloned()),
        None => (None, None),
    }
}

/// Asynchronous preroll of `pipeline`, then onward to `target`.
fn preroll(shared: Arc<Shared>, pipeline: NodeId, target: Phase) {
    let (detector, source, media) = {
        let g = shared.inner.lock().unwrap();
        let detector = g
            .children(pipeline)
            .into_iter()
            .find(|id| g.nodes.get(id).map(|n| n.class == FactoryClass::TypeDetector).unwrap_or(false));
        match detector {
            Some(d) => {
                let (source, media) = lookup_media(&g, d);
                (Some(d), source, media)
            }
            None => (None, None, None),
        }
    };

    let mut ok = true;
    match (detector, media) {
        (Some(detector), Some(media)) => {
            if let Some(delay) = media.preroll_delay {
                thread::sleep(delay);
            }
            detect(&shared, detector, &media);
            if let Some(p) = shared.inner.lock().unwrap().nodes.get_mut(&pipeline) {
                p.duration = media.duration;
                p.position.get_or_insert(Duration::ZERO);
            }
            post(
                &shared,
                Notification::DurationChanged {
                    duration: media.duration,
                },
            );
        }
        (Some(_), None) => {
            ok = false;
            post(
                &shared,
                Notification::Error {
                    origin: source,
                    domain: ErrorDomain::Stream(StreamError::TypeNotFound),
                    detail: "could not determine type of stream".to_string(),
                },
            );
        }
        (None, _) => {}
    }

    if ok {
        if let Some(p) = shared.inner.lock().unwrap().nodes.get_mut(&pipeline) {
            p.prerolled = true;
        }
        post_steps(&shared, pipeline, target);
        post(&shared, Notification::AsyncDone { node: pipeline });
    }

    shared.inner.lock().unwrap().busy = None;
    shared.idle.notify_all();
}

impl MediaEngine for SimEngine {
    fn factories(&self) -> Vec<FactoryInfo> {
        self.factories.as_ref().clone()
    }

    fn create_node(&self, factory: &str, _name: &str) -> Result<NodeId> {
        let class = self
            .factories
            .iter()
            .find(|f| f.name == factory)
            .map(|f| f.class)
            .ok_or_else(|| anyhow!("no such factory {factory}"))?;
        let mut g = self.lock();
        let id = NodeId(g.next());
        g.nodes.insert(
            id,
            SimNode {
                factory: factory.to_string(),
                class,
                phase: Phase::Null,
                parent: None,
                props: HashMap::new(),
                requested_ports: 0,
                out_ports: Vec::new(),
                probes: Vec::new(),
                connections: Vec::new(),
                phase_requests: Vec::new(),
                seeks: Vec::new(),
                position: None,
                duration: None,
                clock: None,
                prerolled: false,
                delivered: Vec::new(),
                events: Vec::new(),
            },
        );
        Ok(id)
    }

    fn attach(&self, container: NodeId, node: NodeId) -> Result<()> {
        let mut g = self.lock();
        if g.node(container)?.class != FactoryClass::Container {
            bail!("{container} is not a container");
        }
        g.node_mut(node)?.parent = Some(container);
        Ok(())
    }

    fn remove_node(&self, node: NodeId) -> Result<()> {
        let mut g = self.lock();
        g.nodes
            .remove(&node)
            .ok_or_else(|| anyhow!("unknown node {node}"))?;
        g.links.retain(|(a, b)| a.node != node && b.node != node);
        for n in g.nodes.values_mut() {
            if n.parent == Some(node) {
                n.parent = None;
            }
        }
        Ok(())
    }

    fn link(&self, from: &PortRef, to: &PortRef) -> Result<()> {
        let mut g = self.lock();
        for port in [from, to] {
            let n = g.node(port.node)?;
            if g.fail_links.contains(&n.factory) {
                bail!("{} refused link on {port}", n.factory);
            }
        }
        if g.peer_of(from).is_some() {
            bail!("{from} already linked");
        }
        if g.upstream_of(to).is_some() {
            bail!("{to} already linked");
        }
        g.links.push((from.clone(), to.clone()));
        Ok(())
    }

    fn unlink(&self, from: &PortRef, to: &PortRef) -> Result<()> {
        let mut g = self.lock();
        let before = g.links.len();
        g.links.retain(|(a, b)| !(a == from && b == to));
        if g.links.len() == before {
            bail!("{from} is not linked to {to}");
        }
        Ok(())
    }

    fn request_port(&self, node: NodeId) -> Result<PortRef> {
        let mut g = self.lock();
        let n = g.node_mut(node)?;
        if !matches!(n.class, FactoryClass::Selector | FactoryClass::Buffer) {
            bail!("{} has no request ports", n.factory);
        }
        let name = format!("sink_{}", n.requested_ports);
        n.requested_ports += 1;
        Ok(PortRef::new(node, name))
    }

    fn release_port(&self, port: &PortRef) -> Result<()> {
        let mut g = self.lock();
        g.node(port.node)?;
        g.links.retain(|(a, b)| a != port && b != port);
        Ok(())
    }

    fn set_property(&self, node: NodeId, key: &str, value: PropValue) -> Result<()> {
        self.lock().node_mut(node)?.props.insert(key.to_string(), value);
        Ok(())
    }

    fn property(&self, node: NodeId, key: &str) -> Option<PropValue> {
        self.lock().nodes.get(&node)?.props.get(key).cloned()
    }

    fn set_phase(&self, node: NodeId, phase: Phase) -> Result<PhaseChange> {
        let phase = phase.max(Phase::Null);
        let class = self.lock().node(node)?.class;

        if class != FactoryClass::Container {
            let mut g = self.lock();
            let parent = {
                let n = g.node_mut(node)?;
                n.phase_requests.push(phase);
                n.phase = phase;
                n.parent
            };
            let prerolled = parent
                .and_then(|p| g.nodes.get(&p))
                .map(|p| p.prerolled)
                .unwrap_or(false);
            let unplugged = g.peer_of(&PortRef::src(node)).is_none();
            if class == FactoryClass::TypeDetector && phase >= Phase::Paused && prerolled && unplugged {
                let (_, media) = lookup_media(&g, node);
                drop(g);
                if let Some(media) = media {
                    let shared = self.shared.clone();
                    thread::spawn(move || detect(&shared, node, &media));
                }
            }
            return Ok(PhaseChange::Success);
        }

        let from = {
            let g = self.lock();
            let mut g = self
                .shared
                .idle
                .wait_while(g, |inner| inner.busy == Some(node))
                .unwrap();
            let n = g.node_mut(node)?;
            n.phase_requests.push(phase);
            n.phase.max(Phase::Null)
        };

        let needs_preroll = {
            let g = self.lock();
            !g.node(node)?.prerolled && from < Phase::Paused && phase >= Phase::Paused
        };
        if needs_preroll {
            post_steps(&self.shared, node, Phase::Ready);
            self.lock().busy = Some(node);
            let shared = self.shared.clone();
            thread::Builder::new()
                .name("sim-preroll".to_string())
                .spawn(move || preroll(shared, node, phase))?;
            return Ok(PhaseChange::Async);
        }

        post_steps(&self.shared, node, phase);
        Ok(PhaseChange::Success)
    }

    fn add_probe(&self, port: &PortRef, kind: ProbeKind, callback: ProbeCallback) -> Result<ProbeId> {
        let mut g = self.lock();
        let id = ProbeId(g.next());
        g.node_mut(port.node)?.probes.push(Probe {
            port: port.name.clone(),
            id,
            kind,
            callback,
        });
        Ok(id)
    }

    fn remove_probe(&self, port: &PortRef, probe: ProbeId) -> Result<()> {
        let mut g = self.lock();
        let n = g.node_mut(port.node)?;
        let before = n.probes.len();
        n.probes.retain(|p| p.id != probe);
        if n.probes.len() == before {
            bail!("no probe {probe:?} on {port}");
        }
        Ok(())
    }

    fn seek(&self, node: NodeId, request: SeekRequest) -> Result<()> {
        {
            let mut g = self.lock();
            let n = g.node_mut(node)?;
            if !n.phase.is_pausable() {
                bail!("cannot seek in {:?}", n.phase);
            }
            n.seeks.push(request);
            n.position = Some(request.position);
        }
        if request.flush {
            post(&self.shared, Notification::AsyncDone { node });
        }
        Ok(())
    }

    fn position(&self, node: NodeId) -> Option<Duration> {
        self.lock().nodes.get(&node)?.position
    }

    fn duration(&self, node: NodeId) -> Option<Duration> {
        self.lock().nodes.get(&node)?.duration
    }

    fn adopt_clock(&self, node: NodeId, authority: NodeId) -> Result<()> {
        let mut g = self.lock();
        g.node(authority)?;
        g.node_mut(node)?.clock = Some(authority);
        Ok(())
    }

    fn connect(&self, node: NodeId, kind: SignalKind) -> Result<ConnectionId> {
        let mut g = self.lock();
        let id = ConnectionId(g.next());
        g.node_mut(node)?.connections.push((id, kind));
        Ok(id)
    }

    fn disconnect(&self, node: NodeId, connection: ConnectionId) -> Result<()> {
        let mut g = self.lock();
        // Connections die with their node.
        if let Some(n) = g.nodes.get_mut(&node) {
            n.connections.retain(|(id, _)| *id != connection);
        }
        Ok(())
    }

    fn install_handlers(&self, bus: BusHandler, signals: SignalHandler) {
        let mut g = self.lock();
        g.bus = Some(bus);
        g.signals = Some(signals);
    }

    fn post(&self, notification: Notification) {
        post(&self.shared, notification);
    }
}

/// Factory table modelled on a typical desktop plugin set.
pub fn default_factories() -> Vec<FactoryInfo> {
    use FactoryClass::*;
    vec![
        FactoryInfo::new("pipeline", Container, 0),
        FactoryInfo::new("filesrc", Source, 256),
        FactoryInfo::new("souphttpsrc", Source, 256),
        FactoryInfo::new("rtspsrc", Source, 256),
        FactoryInfo::new("appsrc", Source, 256),
        FactoryInfo::new("queue2", Buffer, 0),
        FactoryInfo::new("multiqueue", Buffer, 0),
        FactoryInfo::new("typefind", TypeDetector, 0),
        FactoryInfo::new("qtdemux", Demuxer, 256)
            .accepts("video/quicktime")
            .produces("audio/mpeg")
            .produces("video/x-h264"),
        FactoryInfo::new("matroskademux", Demuxer, 256)
            .accepts("video/x-matroska")
            .accepts("video/webm"),
        FactoryInfo::new("oggdemux", Demuxer, 256).accepts("application/ogg"),
        FactoryInfo::new("tsdemux", Demuxer, 256).accepts("video/mpegts"),
        FactoryInfo::new("mpegaudioparse", Parser, 257)
            .accepts("audio/mpeg")
            .produces("audio/mpeg"),
        FactoryInfo::new("h264parse", Parser, 257)
            .accepts("video/x-h264")
            .produces("video/x-h264"),
        FactoryInfo::new("h265parse", Parser, 257)
            .accepts("video/x-h265")
            .produces("video/x-h265"),
        FactoryInfo::new("avdec_mp3", Decoder, 256)
            .accepts("audio/mpeg")
            .produces("audio/x-raw"),
        FactoryInfo::new("avdec_aac", Decoder, 256)
            .accepts("audio/x-aac")
            .produces("audio/x-raw"),
        FactoryInfo::new("faad", Decoder, 128)
            .accepts("audio/x-aac")
            .produces("audio/x-raw"),
        FactoryInfo::new("vorbisdec", Decoder, 256)
            .accepts("audio/x-vorbis")
            .produces("audio/x-raw"),
        FactoryInfo::new("flacdec", Decoder, 256)
            .accepts("audio/x-flac")
            .produces("audio/x-raw"),
        FactoryInfo::new("avdec_h264", Decoder, 256)
            .accepts("video/x-h264")
            .produces("video/x-raw"),
        FactoryInfo::new("omxh264dec", Decoder, 256)
            .accepts("video/x-h264")
            .produces("video/x-raw")
            .accelerated(),
        FactoryInfo::new("avdec_h265", Decoder, 256)
            .accepts("video/x-h265")
            .produces("video/x-raw"),
        FactoryInfo::new("ssaparse", Decoder, 256)
            .accepts("application/x-ssa")
            .accepts("application/x-ass")
            .produces("text/x-raw"),
        FactoryInfo::new("subparse", SubtitleParser, 0),
        FactoryInfo::new("input-selector", Selector, 0),
        FactoryInfo::new("audioconvert", Converter, 0),
        FactoryInfo::new("videoconvert", Converter, 0),
        FactoryInfo::new("autoaudiosink", Sink, 0),
        FactoryInfo::new("autovideosink", Sink, 0),
        FactoryInfo::new("glimagesink", Sink, 0),
        FactoryInfo::new("appsink", Sink, 0),
        FactoryInfo::new("fakesink", Sink, 0),
    ]
}
