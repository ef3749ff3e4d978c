//! Processing graph owned by a session.
//!
//! A graph is one pipeline container holding a main decode path (source,
//! buffers, type detection, demuxing, decoding, selectors), one output
//! sub-graph per media kind, and optionally an external subtitle path.
//! Output sub-graphs survive a gapless splice; decode-path nodes do not.

use media_player_types::{MediaKind, Phase};

use crate::engine::{BufferStage, NodeId, PortRef, ProbeId};
use crate::locator::Locator;
use crate::selector::TrackSelector;
use crate::signals::SignalRegistry;
use crate::typefind::ContainerProbe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    Pipeline,
    Source,
    Buffer(BufferStage),
    TypeDetector,
    Demuxer,
    Parser(MediaKind),
    Decoder(MediaKind),
    Selector(MediaKind),
    Converter(MediaKind),
    Sink(MediaKind),
    /// Temporary sink that lets the pipeline preroll before outputs exist.
    StateHolder,
    SubtitleSource,
    SubtitleParser,
}

impl NodeRole {
    /// Nodes torn down by a gapless splice.
    pub fn in_decode_path(self) -> bool {
        matches!(
            self,
            NodeRole::Source
                | NodeRole::Buffer(_)
                | NodeRole::TypeDetector
                | NodeRole::Demuxer
                | NodeRole::Parser(_)
                | NodeRole::Decoder(_)
                | NodeRole::Selector(_)
                | NodeRole::StateHolder
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphNode {
    pub id: NodeId,
    pub role: NodeRole,
    pub factory: String,
}

/// Per-kind output sub-graph: optional converter followed by the terminal sink.
#[derive(Clone, Debug)]
pub struct OutputChain {
    pub kind: MediaKind,
    pub converter: Option<NodeId>,
    pub sink: NodeId,
    /// First input port of the chain.
    pub input: PortRef,
    /// Selector output currently feeding the chain.
    pub upstream: Option<PortRef>,
    /// Timeline probes installed on `input`.
    pub probes: Vec<ProbeId>,
}

/// External subtitle file path.
#[derive(Clone, Debug)]
pub struct SubtitlePath {
    pub source: NodeId,
    pub parser: NodeId,
    pub sink: NodeId,
    pub current: usize,
}

/// Expected-vs-arrived count of dynamic demuxer outputs for one build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamTally {
    /// Stream count announced by the container pre-probe.
    pub expected: Option<usize>,
    pub arrived: usize,
    /// Outputs that arrived but are not routed yet.
    pub pending: usize,
    pub no_more_pads: bool,
}

impl StreamTally {
    pub fn arrive(&mut self) {
        self.arrived += 1;
        self.pending += 1;
    }

    pub fn settle(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    pub fn finish(&mut self) {
        self.no_more_pads = true;
    }

    pub fn is_complete(&self) -> bool {
        self.no_more_pads && self.pending == 0
    }

    /// Streams the pre-probe announced that never showed up.
    pub fn shortfall(&self) -> usize {
        self.expected
            .map(|e| e.saturating_sub(self.arrived))
            .unwrap_or(0)
    }
}

pub struct Graph {
    pub pipeline: NodeId,
    pub locator: Locator,
    nodes: Vec<GraphNode>,
    pub outputs: [Option<OutputChain>; 3],
    pub selectors: [Option<TrackSelector>; 3],
    /// Selection recorded before the kind's selector existed.
    pub preselect: [Option<usize>; 3],
    pub tally: StreamTally,
    /// Kinds with at least one decodable track.
    pub resolved: [bool; 3],
    /// Kinds with at least one track no decoder could handle.
    pub missing: [bool; 3],
    pub codecs: [Option<String>; 3],
    /// Encoded format the kind's decoder was plugged for; one decoder per kind.
    pub formats: [Option<String>; 3],
    pub demux_failed: bool,
    pub typefind: Option<NodeId>,
    pub demuxer: Option<NodeId>,
    pub post_demux: Option<NodeId>,
    pub state_holder: Option<NodeId>,
    pub subtitle: Option<SubtitlePath>,
    pub signals: SignalRegistry,
    /// Phase newly created dynamic nodes are synced to.
    pub sync_phase: Phase,
    pub probe: Option<ContainerProbe>,
    /// Set once the current decode path finished autoplugging.
    pub complete: bool,
}

impl Graph {
    pub fn new(pipeline: NodeId, locator: Locator) -> Self {
        Self {
            pipeline,
            locator,
            nodes: vec![GraphNode {
                id: pipeline,
                role: NodeRole::Pipeline,
                factory: "pipeline".to_string(),
            }],
            outputs: [None, None, None],
            selectors: [None, None, None],
            preselect: [None; 3],
            tally: StreamTally::default(),
            resolved: [false; 3],
            missing: [false; 3],
            codecs: [None, None, None],
            formats: [None, None, None],
            demux_failed: false,
            typefind: None,
            demuxer: None,
            post_demux: None,
            state_holder: None,
            subtitle: None,
            signals: SignalRegistry::default(),
            sync_phase: Phase::Paused,
            probe: None,
            complete: false,
        }
    }

    pub fn add(&mut self, id: NodeId, role: NodeRole, factory: &str) {
        self.nodes.push(GraphNode {
            id,
            role,
            factory: factory.to_string(),
        });
    }

    pub fn forget(&mut self, id: NodeId) {
        self.nodes.retain(|n| n.id != id);
    }

    pub fn role_of(&self, id: NodeId) -> Option<NodeRole> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.role)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn find(&self, role: NodeRole) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.role == role).map(|n| n.id)
    }

    /// Decode-path nodes in creation order.
    pub fn decode_path(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.role.in_decode_path())
            .map(|n| n.id)
            .collect()
    }

    pub fn output(&self, kind: MediaKind) -> Option<&OutputChain> {
        self.outputs[kind.index()].as_ref()
    }

    pub fn selector(&self, kind: MediaKind) -> Option<&TrackSelector> {
        self.selectors[kind.index()].as_ref()
    }

    pub fn selector_mut(&mut self, kind: MediaKind) -> Option<&mut TrackSelector> {
        self.selectors[kind.index()].as_mut()
    }

    pub fn track_count(&self, kind: MediaKind) -> usize {
        self.selector(kind).map(|s| s.total()).unwrap_or(0)
    }

    pub fn resolved_kinds(&self) -> Vec<MediaKind> {
        MediaKind::ALL
            .into_iter()
            .filter(|k| self.resolved[k.index()])
            .collect()
    }

    pub fn missing_kinds(&self) -> Vec<MediaKind> {
        MediaKind::ALL
            .into_iter()
            .filter(|k| self.missing[k.index()])
            .collect()
    }

    /// Reset the per-build bookkeeping ahead of a new decode path.
    pub fn reset_build(&mut self, locator: Locator) {
        self.locator = locator;
        self.selectors = [None, None, None];
        self.tally = StreamTally::default();
        self.resolved = [false; 3];
        self.missing = [false; 3];
        self.codecs = [None, None, None];
        self.formats = [None, None, None];
        self.demux_failed = false;
        self.typefind = None;
        self.demuxer = None;
        self.post_demux = None;
        self.state_holder = None;
        self.probe = None;
        self.complete = false;
    }
}
