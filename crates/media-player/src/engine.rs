//! Media engine primitives consumed by the control plane.
//!
//! The playback core never decodes or renders anything itself. It only creates,
//! links and supervises opaque processing nodes through [`MediaEngine`], and
//! listens to what the engine reports back:
//! - bus notifications (serialized, see `bus`)
//! - node signals (type found, new output port, no more ports, drained)
//! - probe callbacks on ports (flow gates, event rewrites, inspection)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use media_player_types::{MediaKind, Phase};

/// Opaque handle of a node owned by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A typed connection point on a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub node: NodeId,
    pub name: String,
}

impl PortRef {
    pub fn new(node: NodeId, name: impl Into<String>) -> Self {
        Self {
            node,
            name: name.into(),
        }
    }

    /// The static input port every non-source node exposes.
    pub fn sink(node: NodeId) -> Self {
        Self::new(node, "sink")
    }

    /// The static output port every non-sink node exposes.
    pub fn src(node: NodeId) -> Self {
        Self::new(node, "src")
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.name)
    }
}

/// Media capabilities carried by a port: a media type plus optional parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Caps {
    pub media_type: String,
    pub params: BTreeMap<String, String>,
}

impl Caps {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Leaf media kind this stream belongs to, if any.
    pub fn kind(&self) -> Option<MediaKind> {
        let mt = self.media_type.as_str();
        if mt.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else if mt.starts_with("video/") && !is_container_type(mt) {
            Some(MediaKind::Video)
        } else if mt.starts_with("text/")
            || mt.starts_with("subpicture/")
            || mt.starts_with("application/x-subtitle")
            || mt == "application/x-ssa"
            || mt == "application/x-ass"
        {
            Some(MediaKind::Text)
        } else {
            None
        }
    }

    /// Raw caps need no further processing before the output sub-graph.
    pub fn is_raw(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "audio/x-raw" | "video/x-raw" | "text/x-raw"
        )
    }
}

impl std::fmt::Display for Caps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.media_type)?;
        for (k, v) in &self.params {
            write!(f, ", {k}={v}")?;
        }
        Ok(())
    }
}

/// Container media types that share the `video/` prefix.
fn is_container_type(media_type: &str) -> bool {
    matches!(
        media_type,
        "video/quicktime" | "video/x-matroska" | "video/webm" | "video/mpegts" | "video/x-msvideo"
            | "video/x-flv"
    )
}

/// Property values understood by engine nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Port(PortRef),
    Time(Duration),
}

impl PropValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            PropValue::UInt(v) => Some(*v),
            PropValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Result of a phase request on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseChange {
    /// Reached synchronously.
    Success,
    /// Completion is reported later through a phase-changed notification.
    Async,
    /// Reached, but the node cannot preroll (live sources).
    NoPreroll,
}

/// Capability class of a processing-node factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FactoryClass {
    Source,
    Buffer,
    TypeDetector,
    Demuxer,
    Parser,
    Decoder,
    Selector,
    Converter,
    Sink,
    SubtitleParser,
    Container,
}

/// Registry entry describing one processing-node type the engine can create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryInfo {
    pub name: String,
    pub class: FactoryClass,
    pub rank: u32,
    /// Media types accepted on the input port.
    pub sink_caps: Vec<String>,
    /// Media types produced on the output port(s).
    pub src_caps: Vec<String>,
    /// DSP or hardware-backed implementation.
    pub accelerated: bool,
}

impl FactoryInfo {
    pub fn new(name: impl Into<String>, class: FactoryClass, rank: u32) -> Self {
        Self {
            name: name.into(),
            class,
            rank,
            sink_caps: Vec::new(),
            src_caps: Vec::new(),
            accelerated: false,
        }
    }

    pub fn accepts(mut self, media_type: &str) -> Self {
        self.sink_caps.push(media_type.to_string());
        self
    }

    pub fn produces(mut self, media_type: &str) -> Self {
        self.src_caps.push(media_type.to_string());
        self
    }

    pub fn accelerated(mut self) -> Self {
        self.accelerated = true;
        self
    }

    pub fn can_sink(&self, caps: &Caps) -> bool {
        self.sink_caps.iter().any(|c| c == &caps.media_type)
    }
}

/// Kind of probe installed on a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Flow gate: holds all data on the port while installed.
    Block,
    /// Sees every buffer crossing the port.
    Buffer,
    /// Sees every downstream event crossing the port.
    Event,
}

/// Handle of an installed probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeId(pub u64);

/// Timeline segment carried downstream ahead of data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    /// First timestamp of the segment in stream time.
    pub start: Duration,
    /// Running-time offset applied by sinks.
    pub base: Duration,
    pub rate: f64,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            start: Duration::ZERO,
            base: Duration::ZERO,
            rate: 1.0,
        }
    }
}

/// Downstream events visible to event probes.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    StreamStart { stream_id: String },
    Segment(Segment),
    FlushStart,
    FlushStop,
    Eos,
}

/// What crosses a probed port.
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeItem {
    Buffer {
        pts: Option<Duration>,
        duration: Option<Duration>,
    },
    Event(StreamEvent),
}

/// Verdict of a probe callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeReturn {
    Pass,
    Drop,
    /// Pass the item and uninstall the probe.
    Remove,
}

pub type ProbeCallback = Arc<dyn Fn(&mut ProbeItem) -> ProbeReturn + Send + Sync>;

/// A reposition request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeekRequest {
    pub position: Duration,
    /// Discard in-flight data before repositioning.
    pub flush: bool,
    /// Reposition exactly rather than to the nearest key unit.
    pub accurate: bool,
    pub rate: f64,
}

impl SeekRequest {
    pub fn flushing(position: Duration) -> Self {
        Self {
            position,
            flush: true,
            accurate: true,
            rate: 1.0,
        }
    }

    /// Timeline-preserving reposition that keeps in-flight data.
    pub fn non_flushing(position: Duration) -> Self {
        Self {
            position,
            flush: false,
            accurate: true,
            rate: 1.0,
        }
    }
}

/// Signals emitted by dynamic nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    TypeFound,
    PadAdded,
    NoMorePads,
    Drained,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    TypeFound { caps: Caps },
    PadAdded { port: PortRef, caps: Caps },
    NoMorePads,
    Drained,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::TypeFound { .. } => SignalKind::TypeFound,
            Signal::PadAdded { .. } => SignalKind::PadAdded,
            Signal::NoMorePads => SignalKind::NoMorePads,
            Signal::Drained => SignalKind::Drained,
        }
    }
}

/// Handle of a signal connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Which buffer stage a buffering report comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferStage {
    /// Byte-level buffer between source and demuxer.
    PreDemux,
    /// Per-stream buffer between demuxer and selectors.
    PostDemux,
}

/// Raw buffering level reported by a buffer node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferingReport {
    pub stage: BufferStage,
    /// Bytes currently held by the stage.
    pub buffered_bytes: Option<u64>,
    /// Level computed by the node itself, used when bytes are unknown.
    pub percent: Option<u8>,
    /// Upstream finished downloading; the stage can no longer starve.
    pub finished: bool,
}

/// Error domains reported by engine nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorDomain {
    Core,
    Library,
    Resource(ResourceError),
    Stream(StreamError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceError {
    NotFound,
    OpenRead,
    Busy,
    Write,
    NoSpaceLeft,
    Settings,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamError {
    Failed,
    TypeNotFound,
    WrongType,
    CodecNotFound,
    Decode,
    Demux,
    Format,
    Decrypt,
}

/// Tag value as reported by demuxers and decoders.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Str(String),
    UInt(u64),
    Time(Duration),
}

/// Ordered list of metadata tags.
pub type TagList = Vec<(String, TagValue)>;

/// Notifications posted on the engine bus.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    PhaseChanged {
        node: NodeId,
        previous: Phase,
        current: Phase,
        pending: Option<Phase>,
    },
    AsyncDone {
        node: NodeId,
    },
    Eos {
        node: NodeId,
    },
    Error {
        origin: Option<NodeId>,
        domain: ErrorDomain,
        detail: String,
    },
    Warning {
        origin: Option<NodeId>,
        detail: String,
    },
    StreamingError {
        code: u32,
        detail: String,
    },
    Buffering(BufferingReport),
    Tag {
        origin: Option<NodeId>,
        tags: TagList,
    },
    DurationChanged {
        duration: Option<Duration>,
    },
    ClockLost,
    /// Posted on behalf of the resource arbiter.
    ResourceRevoked,
}

pub type BusHandler = Arc<dyn Fn(Notification) + Send + Sync>;
pub type SignalHandler = Arc<dyn Fn(NodeId, Signal) + Send + Sync>;

/// Primitive vocabulary of the wrapped media engine.
///
/// Implementations must be callable from any thread. Signal and bus handlers may be
/// invoked from engine-owned threads; the core never holds its graph lock across
/// calls that can synchronously emit signals.
pub trait MediaEngine: Send + Sync {
    /// Ranked table of processing-node types known to the engine.
    fn factories(&self) -> Vec<FactoryInfo>;

    fn create_node(&self, factory: &str, name: &str) -> Result<NodeId>;
    /// Place `node` inside `container` so container phase changes reach it.
    fn attach(&self, container: NodeId, node: NodeId) -> Result<()>;
    fn remove_node(&self, node: NodeId) -> Result<()>;

    fn link(&self, from: &PortRef, to: &PortRef) -> Result<()>;
    fn unlink(&self, from: &PortRef, to: &PortRef) -> Result<()>;
    /// Request a new input port on a node with on-demand ports (selectors, buffers).
    fn request_port(&self, node: NodeId) -> Result<PortRef>;
    fn release_port(&self, port: &PortRef) -> Result<()>;

    fn set_property(&self, node: NodeId, key: &str, value: PropValue) -> Result<()>;
    fn property(&self, node: NodeId, key: &str) -> Option<PropValue>;

    fn set_phase(&self, node: NodeId, phase: Phase) -> Result<PhaseChange>;

    fn add_probe(&self, port: &PortRef, kind: ProbeKind, callback: ProbeCallback) -> Result<ProbeId>;
    fn remove_probe(&self, port: &PortRef, probe: ProbeId) -> Result<()>;

    fn seek(&self, node: NodeId, request: SeekRequest) -> Result<()>;
    fn position(&self, node: NodeId) -> Option<Duration>;
    fn duration(&self, node: NodeId) -> Option<Duration>;

    /// Slave `node` to the clock and base time of `authority`.
    fn adopt_clock(&self, node: NodeId, authority: NodeId) -> Result<()>;

    fn connect(&self, node: NodeId, kind: SignalKind) -> Result<ConnectionId>;
    fn disconnect(&self, node: NodeId, connection: ConnectionId) -> Result<()>;

    /// Install the single bus and signal receivers. Replaces previous handlers.
    fn install_handlers(&self, bus: BusHandler, signals: SignalHandler);
    /// Post a notification on the bus as if a node had emitted it.
    fn post(&self, notification: Notification);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_kind_classifies_leaf_types() {
        assert_eq!(Caps::new("audio/mpeg").kind(), Some(MediaKind::Audio));
        assert_eq!(Caps::new("video/x-h264").kind(), Some(MediaKind::Video));
        assert_eq!(Caps::new("text/x-raw").kind(), Some(MediaKind::Text));
        assert_eq!(Caps::new("application/x-ssa").kind(), Some(MediaKind::Text));
        assert_eq!(Caps::new("video/quicktime").kind(), None);
        assert_eq!(Caps::new("application/ogg").kind(), None);
    }

    #[test]
    fn caps_raw_detection() {
        assert!(Caps::new("audio/x-raw").is_raw());
        assert!(!Caps::new("audio/mpeg").is_raw());
    }

    #[test]
    fn caps_display_includes_params() {
        let caps = Caps::new("audio/mpeg").with_param("mpegversion", "4");
        assert_eq!(caps.to_string(), "audio/mpeg, mpegversion=4");
        assert_eq!(caps.param("mpegversion"), Some("4"));
    }
}
