//! Graph construction and autoplugging.
//!
//! The builder lays down a static skeleton at realize time (source, optional
//! pre-demux buffer, type detector, state holder) and grows the rest of the
//! graph from engine signals: a demuxer once the container type is known,
//! one selector per media kind fed by every stream of that kind, a single
//! decode chain behind each selector and one output sub-graph behind that.
//!
//! Link failures are local: the offending node is removed and the next ranked
//! candidate is tried. Only a build in which no media kind resolved fails.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use media_player_types::{CodecMissingKind, MediaKind};

use crate::autoplug::{AutoplugPolicy, PlugStage};
use crate::config::EngineConfig;
use crate::engine::{
    BufferStage, Caps, FactoryClass, FactoryInfo, MediaEngine, NodeId, PortRef, ProbeKind,
    PropValue, SignalKind,
};
use crate::gapless::GaplessContext;
use crate::graph::{Graph, NodeRole, OutputChain, SubtitlePath};
use crate::locator::{Locator, LocatorKind};
use crate::selector::TrackSelector;
use crate::signals::SignalScope;
use crate::typefind;

/// Outcome of feeding one signal to the builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    InProgress,
    Complete(BuildSummary),
    Failed(CodecMissingKind),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub tracks: [usize; 3],
    pub missing: Vec<MediaKind>,
}

pub struct GraphBuilder<'a> {
    engine: &'a dyn MediaEngine,
    factories: Vec<FactoryInfo>,
    policy: &'a AutoplugPolicy,
    config: &'a EngineConfig,
    gapless: Option<&'a Arc<GaplessContext>>,
    video_sink: Option<&'a str>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        engine: &'a dyn MediaEngine,
        policy: &'a AutoplugPolicy,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            engine,
            factories: engine.factories(),
            policy,
            config,
            gapless: None,
            video_sink: None,
        }
    }

    /// Install timeline probes on output sub-graphs created by this builder.
    pub fn with_gapless(mut self, ctx: &'a Arc<GaplessContext>) -> Self {
        self.gapless = Some(ctx);
        self
    }

    /// Video sink factory replacing the configured one.
    pub fn with_video_sink(mut self, factory: Option<&'a str>) -> Self {
        self.video_sink = factory;
        self
    }

    /// Create the pipeline and its static decode-path skeleton.
    pub fn realize(&self, locator: Locator) -> Result<Graph> {
        let pipeline = self
            .engine
            .create_node("pipeline", "playback")
            .context("create pipeline")?;
        let mut graph = Graph::new(pipeline, locator);
        if let Err(e) = self.add_decode_path(&mut graph, true) {
            self.destroy(&mut graph);
            return Err(e);
        }
        tracing::info!(
            locator = %graph.locator,
            nodes = graph.nodes().len(),
            "graph skeleton built"
        );
        Ok(graph)
    }

    /// Source, optional pre-demux buffer and type detector for `graph.locator`.
    ///
    /// Returns the new node ids so a running pipeline can sync them.
    pub fn add_decode_path(&self, graph: &mut Graph, state_holder: bool) -> Result<Vec<NodeId>> {
        let mut added = Vec::new();
        let locator = graph.locator.clone();

        if let Some(path) = locator.local_path() {
            match typefind::probe_file(&path) {
                Ok(probe) => {
                    let [audio, video, text] = probe.per_kind();
                    tracing::debug!(
                        streams = probe.expected_streams(),
                        audio,
                        video,
                        text,
                        container = ?probe.container,
                        "container pre-probe"
                    );
                    graph.tally.expected = Some(probe.expected_streams());
                    graph.probe = Some(probe);
                }
                Err(e) => tracing::debug!("container pre-probe skipped: {e:#}"),
            }
        }

        let source = self.make(graph, locator.source_factory(), "source", NodeRole::Source)?;
        added.push(source);
        self.engine
            .set_property(source, "location", PropValue::Str(locator.location()))?;
        if matches!(locator.kind(), LocatorKind::PushBuffer) {
            self.engine
                .set_property(source, "is-live", PropValue::Bool(true))?;
        }
        let mut upstream = PortRef::src(source);

        if locator.is_streaming() && locator.kind() != LocatorKind::Rtsp {
            let queue = self.make(
                graph,
                "queue2",
                "pre-demux",
                NodeRole::Buffer(BufferStage::PreDemux),
            )?;
            added.push(queue);
            self.engine
                .set_property(queue, "use-buffering", PropValue::Bool(true))?;
            self.engine.set_property(
                queue,
                "max-size-bytes",
                PropValue::UInt(self.config.buffering.ring_buffer_bytes),
            )?;
            self.engine
                .link(&upstream, &PortRef::sink(queue))
                .context("link source to pre-demux buffer")?;
            upstream = PortRef::src(queue);
        }

        let detector = self.make(graph, "typefind", "typefind", NodeRole::TypeDetector)?;
        added.push(detector);
        self.engine
            .link(&upstream, &PortRef::sink(detector))
            .context("link type detector")?;
        graph.typefind = Some(detector);
        graph
            .signals
            .connect(self.engine, SignalScope::Autoplug, detector, SignalKind::TypeFound)?;
        graph
            .signals
            .connect(self.engine, SignalScope::Autoplug, detector, SignalKind::Drained)?;

        if state_holder {
            let holder = self.make(graph, "fakesink", "state-holder", NodeRole::StateHolder)?;
            self.engine
                .set_property(holder, "async", PropValue::Bool(false))?;
            graph.state_holder = Some(holder);
            added.push(holder);
        }

        Ok(added)
    }

    /// Separate text path for an external subtitle file.
    pub fn add_subtitle_path(&self, graph: &mut Graph, uri: &str) -> Result<()> {
        let location = Locator::parse(uri)
            .map_err(|e| anyhow!("{e}"))?
            .location();
        let source = self.make(graph, "filesrc", "subtitle-source", NodeRole::SubtitleSource)?;
        let parser = self.make(graph, "subparse", "subtitle-parser", NodeRole::SubtitleParser)?;
        let sink = self.make(
            graph,
            &self.config.text_sink,
            "subtitle-sink",
            NodeRole::Sink(MediaKind::Text),
        )?;
        self.engine
            .set_property(source, "location", PropValue::Str(location))?;
        self.engine
            .link(&PortRef::src(source), &PortRef::sink(parser))
            .context("link subtitle parser")?;
        self.engine
            .link(&PortRef::src(parser), &PortRef::sink(sink))
            .context("link subtitle sink")?;
        graph.subtitle = Some(SubtitlePath {
            source,
            parser,
            sink,
            current: 0,
        });
        tracing::info!(uri, "external subtitle path built");
        Ok(())
    }

    /// Container or elementary type detected.
    pub fn on_type_found(&self, graph: &mut Graph, caps: &Caps) -> BuildStatus {
        let Some(detector) = graph.typefind else {
            return BuildStatus::InProgress;
        };
        tracing::info!(caps = %caps, "type found");

        if caps.kind().is_some() {
            // Elementary stream: no demuxer, the detector output is the only stream.
            graph.tally.arrive();
            self.route_stream(graph, &PortRef::src(detector), caps);
            graph.tally.settle();
            graph.tally.finish();
            return self.status(graph);
        }

        let candidates: Vec<FactoryInfo> = self
            .policy
            .candidates(&self.factories, caps, PlugStage::Demux)
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            tracing::warn!(caps = %caps, "no demuxer handles container");
            graph.complete = true;
            return BuildStatus::Failed(CodecMissingKind::UnsupportedFormat);
        }

        for factory in &candidates {
            match self.plug_demuxer(graph, factory, detector) {
                Ok(id) => {
                    graph.demuxer = Some(id);
                    return BuildStatus::InProgress;
                }
                Err(e) => tracing::warn!(factory = %factory.name, "demuxer rejected: {e:#}"),
            }
        }
        graph.demux_failed = true;
        graph.complete = true;
        BuildStatus::Failed(CodecMissingKind::Demuxer)
    }

    /// New demuxer output.
    pub fn on_pad_added(&self, graph: &mut Graph, port: &PortRef, caps: &Caps) -> BuildStatus {
        graph.tally.arrive();
        if caps.kind().is_none() {
            tracing::debug!(port = %port, caps = %caps, "ignoring non-media output");
        } else {
            let from = if graph.locator.is_streaming() {
                match self.post_demux_port(graph, port) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(port = %port, "post-demux buffer bypassed: {e:#}");
                        port.clone()
                    }
                }
            } else {
                port.clone()
            };
            self.route_stream(graph, &from, caps);
        }
        graph.tally.settle();
        self.status(graph)
    }

    /// The demuxer will not add further outputs.
    pub fn on_no_more_pads(&self, graph: &mut Graph) -> BuildStatus {
        graph.tally.finish();
        let shortfall = graph.tally.shortfall();
        if shortfall > 0 {
            tracing::warn!(
                shortfall,
                arrived = graph.tally.arrived,
                "fewer streams than the container announced"
            );
        }
        self.status(graph)
    }

    fn status(&self, graph: &mut Graph) -> BuildStatus {
        if graph.complete || !graph.tally.is_complete() {
            return BuildStatus::InProgress;
        }
        self.finish(graph)
    }

    /// Finalize track counts, drop the state holder and judge the build.
    fn finish(&self, graph: &mut Graph) -> BuildStatus {
        graph.complete = true;
        for sel in graph.selectors.iter_mut().flatten() {
            if let Err(e) = sel.finalize(self.engine) {
                tracing::warn!(kind = sel.kind.as_str(), "selector finalize failed: {e:#}");
            }
        }
        if let Some(holder) = graph.state_holder.take() {
            self.discard(graph, holder);
        }

        if graph.resolved_kinds().is_empty() {
            let kind = failure_kind(graph.demux_failed, &graph.missing_kinds());
            tracing::error!(?kind, "no media kind could be decoded");
            return BuildStatus::Failed(kind);
        }

        let tracks = [
            graph.track_count(MediaKind::Audio),
            graph.track_count(MediaKind::Video),
            graph.track_count(MediaKind::Text),
        ];
        let missing = graph.missing_kinds();
        tracing::info!(
            audio = tracks[0],
            video = tracks[1],
            text = tracks[2],
            missing = ?missing,
            "autoplug complete"
        );
        BuildStatus::Complete(BuildSummary { tracks, missing })
    }

    fn plug_demuxer(&self, graph: &mut Graph, factory: &FactoryInfo, detector: NodeId) -> Result<NodeId> {
        let id = self.make(graph, &factory.name, "demuxer", NodeRole::Demuxer)?;
        if let Err(e) = self.engine.link(&PortRef::src(detector), &PortRef::sink(id)) {
            self.discard(graph, id);
            return Err(e.context(format!("link {}", factory.name)));
        }
        for kind in [SignalKind::PadAdded, SignalKind::NoMorePads] {
            if let Err(e) = graph.signals.connect(self.engine, SignalScope::Autoplug, id, kind) {
                self.discard(graph, id);
                return Err(e);
            }
        }
        self.sync(graph, id);
        Ok(id)
    }

    fn post_demux_port(&self, graph: &mut Graph, port: &PortRef) -> Result<PortRef> {
        let mq = match graph.post_demux {
            Some(id) => id,
            None => {
                let id = self.make(
                    graph,
                    "multiqueue",
                    "post-demux",
                    NodeRole::Buffer(BufferStage::PostDemux),
                )?;
                self.engine
                    .set_property(id, "use-buffering", PropValue::Bool(true))?;
                self.sync(graph, id);
                graph.post_demux = Some(id);
                id
            }
        };
        let sink = self.engine.request_port(mq)?;
        self.engine.link(port, &sink)?;
        Ok(PortRef::new(mq, sink.name.replacen("sink", "src", 1)))
    }

    /// Hand the stream to its kind's selector.
    ///
    /// The first decodable stream of a kind plugs the kind's only decode chain
    /// behind the selector. Later streams of that kind join the selector
    /// undecoded and must share the format the decoder was plugged for.
    fn route_stream(&self, graph: &mut Graph, from: &PortRef, caps: &Caps) -> bool {
        let Some(kind) = caps.kind() else {
            return false;
        };
        let k = kind.index();
        if graph.codecs[k].is_none() {
            graph.codecs[k] = Some(self.codec_label(graph, kind, caps));
        }

        if let Some(format) = graph.formats[k].as_deref() {
            if format != caps.media_type {
                tracing::warn!(
                    kind = kind.as_str(),
                    decoding = format,
                    caps = %caps,
                    "kind already decoded from another format; stream skipped"
                );
                return false;
            }
            return match self.attach_to_selector(graph, kind, from) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(kind = kind.as_str(), "stream not routed: {e:#}");
                    false
                }
            };
        }

        if let Err(e) = self.ensure_selector(graph, kind, caps) {
            tracing::warn!(kind = kind.as_str(), caps = %caps, "no decode chain for stream: {e:#}");
            graph.missing[k] = true;
            return false;
        }
        match self.attach_to_selector(graph, kind, from) {
            Ok(()) => {
                graph.resolved[k] = true;
                true
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), "stream not routed: {e:#}");
                self.drop_selector(graph, kind);
                graph.missing[k] = true;
                false
            }
        }
    }

    /// Try ranked parser/decoder candidates until one links; parsers recurse once.
    fn plug_decoders(
        &self,
        graph: &mut Graph,
        from: &PortRef,
        caps: &Caps,
        kind: MediaKind,
        stage: PlugStage,
    ) -> Option<(PortRef, Vec<NodeId>)> {
        let candidates: Vec<FactoryInfo> = self
            .policy
            .candidates(&self.factories, caps, stage)
            .into_iter()
            .cloned()
            .collect();

        for factory in candidates {
            tracing::debug!(factory = %factory.name, caps = %caps, "trying candidate");
            let (role, label) = match factory.class {
                FactoryClass::Parser => (NodeRole::Parser(kind), "parser"),
                _ => (NodeRole::Decoder(kind), "decoder"),
            };
            let name = format!("{}-{label}", kind.as_str());
            let id = match self.make(graph, &factory.name, &name, role) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(factory = %factory.name, "create failed: {e:#}");
                    continue;
                }
            };
            if let Err(e) = self.engine.link(from, &PortRef::sink(id)) {
                tracing::warn!(factory = %factory.name, "link failed, trying next candidate: {e:#}");
                self.discard(graph, id);
                continue;
            }
            self.sync(graph, id);
            let out = PortRef::src(id);

            if factory.class != FactoryClass::Parser {
                return Some((out, vec![id]));
            }
            let mut parsed = caps.clone().with_param("parsed", "true");
            if let Some(produced) = factory.src_caps.first() {
                parsed.media_type = produced.clone();
            }
            match self.plug_decoders(graph, &out, &parsed, kind, PlugStage::DecodeParsed) {
                Some((end, mut chain)) => {
                    chain.insert(0, id);
                    return Some((end, chain));
                }
                None => self.discard(graph, id),
            }
        }
        None
    }

    fn attach_to_selector(&self, graph: &mut Graph, kind: MediaKind, out: &PortRef) -> Result<()> {
        let engine = self.engine;
        let sel = graph.selectors[kind.index()]
            .as_mut()
            .ok_or_else(|| anyhow!("{} selector missing", kind.as_str()))?;
        let port = sel.add_channel(engine)?;
        if let Err(e) = engine.link(out, &port) {
            sel.remove_last_channel(engine);
            return Err(e.context("link stream to selector"));
        }
        Ok(())
    }

    /// Selector for `kind` with the kind's decode chain and output sub-graph
    /// behind it, created once per build.
    fn ensure_selector(&self, graph: &mut Graph, kind: MediaKind, caps: &Caps) -> Result<()> {
        let k = kind.index();
        if graph.selectors[k].is_some() {
            return Ok(());
        }
        let name = format!("{}-selector", kind.as_str());
        let id = self.make(graph, "input-selector", &name, NodeRole::Selector(kind))?;
        let src = PortRef::src(id);

        let (out, chain) = if caps.is_raw() {
            (src, Vec::new())
        } else {
            match self.plug_decoders(graph, &src, caps, kind, PlugStage::Decode) {
                Some(found) => found,
                None => {
                    self.discard(graph, id);
                    return Err(anyhow!("no decoder accepts {caps}"));
                }
            }
        };

        let linked = self.ensure_output(graph, kind).and_then(|()| {
            let input = graph.outputs[k]
                .as_ref()
                .map(|o| o.input.clone())
                .ok_or_else(|| anyhow!("{} output missing", kind.as_str()))?;
            self.engine
                .link(&out, &input)
                .context("link decode chain to output")
        });
        if let Err(e) = linked {
            for node in chain {
                self.discard(graph, node);
            }
            self.discard(graph, id);
            return Err(e);
        }
        if let Some(output) = graph.outputs[k].as_mut() {
            output.upstream = Some(out);
        }
        self.sync(graph, id);

        let initial = graph.preselect[k].take();
        if let Some(i) = initial {
            tracing::debug!(kind = kind.as_str(), index = i, "applying preselection");
        }
        graph.selectors[k] = Some(TrackSelector::new(kind, id, initial));
        graph.formats[k] = Some(caps.media_type.clone());
        Ok(())
    }

    /// Undo `ensure_selector` for a kind whose first stream could not be attached.
    fn drop_selector(&self, graph: &mut Graph, kind: MediaKind) {
        let k = kind.index();
        let Some(mut sel) = graph.selectors[k].take() else {
            return;
        };
        graph.formats[k] = None;
        if let Some(output) = graph.outputs[k].as_mut() {
            if let Some(up) = output.upstream.take() {
                if let Err(e) = self.engine.unlink(&up, &output.input) {
                    tracing::warn!(port = %up, "unlink decode chain failed: {e:#}");
                }
            }
        }
        sel.release(self.engine);
        let chain: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| {
                n.id == sel.node
                    || matches!(n.role, NodeRole::Parser(c) | NodeRole::Decoder(c) if c == kind)
            })
            .map(|n| n.id)
            .collect();
        for id in chain {
            self.discard(graph, id);
        }
    }

    /// Converter and sink for `kind`; reused across splices.
    fn ensure_output(&self, graph: &mut Graph, kind: MediaKind) -> Result<()> {
        let k = kind.index();
        if graph.outputs[k].is_some() {
            return Ok(());
        }
        let (converter, sink_factory) = match kind {
            MediaKind::Audio => (Some("audioconvert"), self.config.audio_sink.as_str()),
            MediaKind::Video => (
                Some("videoconvert"),
                self.video_sink.unwrap_or(self.config.video_sink.as_str()),
            ),
            MediaKind::Text => (None, self.config.text_sink.as_str()),
        };

        let mut created = Vec::new();
        let result = (|| -> Result<OutputChain> {
            let conv = match converter {
                Some(factory) => {
                    let id = self.make(
                        graph,
                        factory,
                        &format!("{}-convert", kind.as_str()),
                        NodeRole::Converter(kind),
                    )?;
                    created.push(id);
                    Some(id)
                }
                None => None,
            };
            let sink = self.make(
                graph,
                sink_factory,
                &format!("{}-sink", kind.as_str()),
                NodeRole::Sink(kind),
            )?;
            created.push(sink);
            if let Some(conv) = conv {
                self.engine
                    .link(&PortRef::src(conv), &PortRef::sink(sink))
                    .context("link converter to sink")?;
            }
            let input = PortRef::sink(conv.unwrap_or(sink));
            let mut probes = Vec::new();
            if let Some(ctx) = self.gapless {
                probes.push(self.engine.add_probe(&input, ProbeKind::Buffer, ctx.buffer_probe(kind))?);
                probes.push(self.engine.add_probe(&input, ProbeKind::Event, ctx.event_probe(kind))?);
            }
            Ok(OutputChain {
                kind,
                converter: conv,
                sink,
                input,
                upstream: None,
                probes,
            })
        })();

        match result {
            Ok(chain) => {
                for id in &created {
                    self.sync(graph, *id);
                }
                tracing::debug!(kind = kind.as_str(), sink = sink_factory, "output sub-graph built");
                graph.outputs[k] = Some(chain);
                Ok(())
            }
            Err(e) => {
                for id in created {
                    self.discard(graph, id);
                }
                Err(e)
            }
        }
    }

    /// Remove the decode path of the outgoing item, leaving output sub-graphs in place.
    pub fn teardown_decode_path(&self, graph: &mut Graph) {
        graph.signals.disconnect_scope(self.engine, SignalScope::Autoplug);
        for out in graph.outputs.iter_mut().flatten() {
            if let Some(up) = out.upstream.take() {
                if let Err(e) = self.engine.unlink(&up, &out.input) {
                    tracing::debug!(port = %up, "unlink output failed: {e:#}");
                }
            }
        }
        for sel in graph.selectors.iter_mut().flatten() {
            sel.release(self.engine);
        }
        for id in graph.decode_path() {
            self.discard(graph, id);
        }
    }

    /// Remove every node, the pipeline last.
    pub fn destroy(&self, graph: &mut Graph) {
        graph.signals.disconnect_all(self.engine);
        for kind in MediaKind::ALL {
            if let Some(out) = graph.outputs[kind.index()].take() {
                for probe in out.probes {
                    if let Err(e) = self.engine.remove_probe(&out.input, probe) {
                        tracing::warn!(kind = kind.as_str(), "remove output probe failed: {e:#}");
                    }
                }
            }
        }
        for sel in graph.selectors.iter_mut().flatten() {
            sel.release(self.engine);
        }
        let ids: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| n.role != NodeRole::Pipeline)
            .map(|n| n.id)
            .collect();
        for id in ids {
            self.discard(graph, id);
        }
        if let Err(e) = self.engine.remove_node(graph.pipeline) {
            tracing::warn!("remove pipeline failed: {e:#}");
        }
        graph.subtitle = None;
        tracing::debug!("graph destroyed");
    }

    fn make(&self, graph: &mut Graph, factory: &str, name: &str, role: NodeRole) -> Result<NodeId> {
        let id = self
            .engine
            .create_node(factory, name)
            .with_context(|| format!("create {factory}"))?;
        if let Err(e) = self.engine.attach(graph.pipeline, id) {
            if let Err(e) = self.engine.remove_node(id) {
                tracing::warn!(node = %id, "remove unattached {factory} failed: {e:#}");
            }
            return Err(e.context(format!("attach {factory}")));
        }
        graph.add(id, role, factory);
        Ok(id)
    }

    fn discard(&self, graph: &mut Graph, id: NodeId) {
        graph.signals.disconnect_node(self.engine, id);
        if let Err(e) = self.engine.set_phase(id, media_player_types::Phase::Null) {
            tracing::warn!(node = %id, "stop before removal failed: {e:#}");
        }
        if let Err(e) = self.engine.remove_node(id) {
            tracing::warn!(node = %id, "remove node failed: {e:#}");
        }
        graph.forget(id);
    }

    fn sync(&self, graph: &Graph, id: NodeId) {
        if let Err(e) = self.engine.set_phase(id, graph.sync_phase) {
            tracing::warn!(node = %id, "phase sync failed: {e:#}");
        }
    }

    fn codec_label(&self, graph: &Graph, kind: MediaKind, caps: &Caps) -> String {
        if let Some(codec) = caps.param("codec") {
            return codec.to_string();
        }
        graph
            .probe
            .as_ref()
            .and_then(|p| p.streams.iter().find(|s| s.kind == kind))
            .and_then(|s| s.codec.clone())
            .unwrap_or_else(|| caps.media_type.clone())
    }
}

/// Sub-kind reported when nothing could be decoded.
pub fn failure_kind(demux_failed: bool, missing: &[MediaKind]) -> CodecMissingKind {
    if demux_failed {
        return CodecMissingKind::Demuxer;
    }
    match missing {
        [MediaKind::Audio] => CodecMissingKind::Audio,
        [MediaKind::Video] => CodecMissingKind::Video,
        _ => CodecMissingKind::UnsupportedFormat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimEngine, SimMedia};
    use media_player_types::Phase;

    struct Fixture {
        sim: SimEngine,
        policy: AutoplugPolicy,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig::default();
            Self {
                sim: SimEngine::new(),
                policy: AutoplugPolicy::from_config(&config.autoplug),
                config,
            }
        }

        fn builder(&self) -> GraphBuilder<'_> {
            GraphBuilder::new(&self.sim, &self.policy, &self.config)
        }
    }

    fn demux_pad(sim: &SimEngine, graph: &Graph, index: usize) -> PortRef {
        let demux = graph.demuxer.expect("demuxer plugged");
        sim.add_output_port(demux, &format!("src_{index}"))
    }

    #[test]
    fn skeleton_for_streaming_source_has_pre_demux_buffer() {
        let fx = Fixture::new();
        let graph = fx
            .builder()
            .realize(Locator::parse("http://host/a.mp3").unwrap())
            .unwrap();
        assert!(graph.find(NodeRole::Buffer(BufferStage::PreDemux)).is_some());
        assert!(graph.find(NodeRole::StateHolder).is_some());
        assert_eq!(fx.sim.factory_of(graph.find(NodeRole::Source).unwrap()).as_deref(), Some("souphttpsrc"));
        assert_eq!(graph.signals.scope_len(SignalScope::Autoplug), 2);
    }

    #[test]
    fn container_with_audio_and_video_builds_two_outputs() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/movie.mp4").unwrap()).unwrap();

        assert_eq!(
            b.on_type_found(&mut graph, &Caps::new("video/quicktime")),
            BuildStatus::InProgress
        );
        let a = demux_pad(&fx.sim, &graph, 0);
        let v = demux_pad(&fx.sim, &graph, 1);
        b.on_pad_added(&mut graph, &a, &Caps::new("audio/mpeg"));
        b.on_pad_added(&mut graph, &v, &Caps::new("video/x-h264"));
        let status = b.on_no_more_pads(&mut graph);

        assert_eq!(
            status,
            BuildStatus::Complete(BuildSummary {
                tracks: [1, 1, 0],
                missing: vec![]
            })
        );
        assert!(graph.output(MediaKind::Audio).is_some());
        assert!(graph.output(MediaKind::Video).is_some());
        assert!(graph.find(NodeRole::StateHolder).is_none());
        assert_eq!(graph.codecs[MediaKind::Audio.index()].as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn tracks_of_one_kind_share_a_single_decoder() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/dub.mkv").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("video/x-matroska"));
        for (i, caps) in ["audio/x-flac", "audio/x-flac", "audio/x-vorbis"].into_iter().enumerate() {
            let port = demux_pad(&fx.sim, &graph, i);
            b.on_pad_added(&mut graph, &port, &Caps::new(caps));
        }

        assert_eq!(
            b.on_no_more_pads(&mut graph),
            BuildStatus::Complete(BuildSummary {
                tracks: [2, 0, 0],
                missing: vec![]
            })
        );
        assert_eq!(fx.sim.nodes_by_factory("flacdec").len(), 1);
        assert!(fx.sim.nodes_by_factory("vorbisdec").is_empty());
        assert_eq!(graph.formats[MediaKind::Audio.index()].as_deref(), Some("audio/x-flac"));

        // Both tracks reach the output through the one decoder, gated by the selector.
        let selector = graph.selector(MediaKind::Audio).unwrap().node;
        let decoder = fx.sim.nodes_by_factory("flacdec")[0];
        assert_eq!(fx.sim.peer(&PortRef::src(selector)), Some(PortRef::sink(decoder)));
        assert_eq!(
            fx.sim.peer(&PortRef::src(decoder)),
            Some(graph.output(MediaKind::Audio).unwrap().input.clone())
        );
    }

    #[test]
    fn failed_link_falls_back_to_next_candidate() {
        let fx = Fixture::new();
        fx.sim.fail_links_for("avdec_aac");
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/a.m4a").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("video/quicktime"));
        let a = demux_pad(&fx.sim, &graph, 0);
        b.on_pad_added(&mut graph, &a, &Caps::new("audio/x-aac"));
        b.on_no_more_pads(&mut graph);

        assert!(graph.resolved[MediaKind::Audio.index()]);
        let decoders: Vec<String> = graph
            .nodes()
            .iter()
            .filter(|n| matches!(n.role, NodeRole::Decoder(_)))
            .map(|n| n.factory.clone())
            .collect();
        assert_eq!(decoders, vec!["faad".to_string()]);
        assert!(fx.sim.nodes_by_factory("avdec_aac").is_empty());
    }

    #[test]
    fn parser_is_followed_by_decoder() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/a.mkv").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("video/x-matroska"));
        let v = demux_pad(&fx.sim, &graph, 0);
        b.on_pad_added(&mut graph, &v, &Caps::new("video/x-h265"));
        b.on_no_more_pads(&mut graph);

        let chain: Vec<NodeRole> = graph
            .nodes()
            .iter()
            .filter(|n| matches!(n.role, NodeRole::Parser(_) | NodeRole::Decoder(_)))
            .map(|n| n.role)
            .collect();
        assert_eq!(
            chain,
            vec![NodeRole::Parser(MediaKind::Video), NodeRole::Decoder(MediaKind::Video)]
        );
    }

    #[test]
    fn partial_success_marks_missing_kind() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/odd.mp4").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("video/quicktime"));
        let a = demux_pad(&fx.sim, &graph, 0);
        let v = demux_pad(&fx.sim, &graph, 1);
        b.on_pad_added(&mut graph, &a, &Caps::new("audio/x-unknown"));
        b.on_pad_added(&mut graph, &v, &Caps::new("video/x-h264"));

        match b.on_no_more_pads(&mut graph) {
            BuildStatus::Complete(summary) => {
                assert_eq!(summary.missing, vec![MediaKind::Audio]);
                assert_eq!(summary.tracks, [0, 1, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nothing_decodable_fails_with_sub_kind() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/a.mp4").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("video/quicktime"));
        let a = demux_pad(&fx.sim, &graph, 0);
        b.on_pad_added(&mut graph, &a, &Caps::new("audio/x-unknown"));
        assert_eq!(
            b.on_no_more_pads(&mut graph),
            BuildStatus::Failed(CodecMissingKind::Audio)
        );

        let mut graph = b.realize(Locator::parse("/media/b.bin").unwrap()).unwrap();
        assert_eq!(
            b.on_type_found(&mut graph, &Caps::new("application/x-unknown")),
            BuildStatus::Failed(CodecMissingKind::UnsupportedFormat)
        );
    }

    #[test]
    fn failing_demuxers_yield_demuxer_kind() {
        let fx = Fixture::new();
        fx.sim.fail_links_for("qtdemux");
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/a.mp4").unwrap()).unwrap();
        assert_eq!(
            b.on_type_found(&mut graph, &Caps::new("video/quicktime")),
            BuildStatus::Failed(CodecMissingKind::Demuxer)
        );
    }

    #[test]
    fn elementary_stream_completes_without_demuxer() {
        let fx = Fixture::new();
        let b = fx.builder();
        let mut graph = b.realize(Locator::parse("/media/a.mp3").unwrap()).unwrap();
        let status = b.on_type_found(&mut graph, &Caps::new("audio/mpeg"));
        assert!(matches!(status, BuildStatus::Complete(_)));
        assert!(graph.demuxer.is_none());
    }

    #[test]
    fn splice_teardown_keeps_outputs() {
        let fx = Fixture::new();
        let gapless = Arc::new(GaplessContext::new());
        let b = fx.builder().with_gapless(&gapless);
        let mut graph = b.realize(Locator::parse("/media/a.mp3").unwrap()).unwrap();
        b.on_type_found(&mut graph, &Caps::new("audio/mpeg"));
        let sink = graph.output(MediaKind::Audio).unwrap().sink;
        let input = graph.output(MediaKind::Audio).unwrap().input.clone();
        assert_eq!(fx.sim.probe_count(&input), 2);

        b.teardown_decode_path(&mut graph);
        assert!(graph.decode_path().is_empty());
        assert!(fx.sim.has_node(sink));
        assert!(graph.output(MediaKind::Audio).unwrap().upstream.is_none());
        assert_eq!(graph.signals.len(), 0);

        graph.reset_build(Locator::parse("/media/b.mp3").unwrap());
        graph.sync_phase = Phase::Playing;
        b.add_decode_path(&mut graph, false).unwrap();
        b.on_type_found(&mut graph, &Caps::new("audio/mpeg"));
        assert_eq!(graph.output(MediaKind::Audio).unwrap().sink, sink);
        assert!(graph.output(MediaKind::Audio).unwrap().upstream.is_some());
    }

    #[test]
    fn failure_kind_rules() {
        assert_eq!(failure_kind(true, &[MediaKind::Audio]), CodecMissingKind::Demuxer);
        assert_eq!(failure_kind(false, &[MediaKind::Video]), CodecMissingKind::Video);
        assert_eq!(
            failure_kind(false, &[MediaKind::Audio, MediaKind::Video]),
            CodecMissingKind::UnsupportedFormat
        );
        assert_eq!(failure_kind(false, &[]), CodecMissingKind::UnsupportedFormat);
    }
}
