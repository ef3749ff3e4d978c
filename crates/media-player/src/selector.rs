//! Per-media-kind track selectors.

use std::sync::Arc;

use media_player_types::MediaKind;

use crate::engine::{
    MediaEngine, NodeId, PortRef, ProbeId, ProbeItem, ProbeKind, ProbeReturn, PropValue,
    StreamEvent,
};
use crate::error::{PlayerError, Result};

/// Property naming the input a selector forwards.
pub const ACTIVE_PAD: &str = "active-pad";

/// N-input, one-output switch for one media kind.
///
/// Channels are the selector's request ports in arrival order; exactly one of
/// them is forwarded to the output sub-graph at any time.
#[derive(Clone, Debug)]
pub struct TrackSelector {
    pub kind: MediaKind,
    pub node: NodeId,
    channels: Vec<PortRef>,
    active: usize,
    block_probe: Option<ProbeId>,
    event_probe: Option<ProbeId>,
}

impl TrackSelector {
    /// `initial` is a selection recorded before the selector existed.
    pub fn new(kind: MediaKind, node: NodeId, initial: Option<usize>) -> Self {
        Self {
            kind,
            node,
            channels: Vec::new(),
            active: initial.unwrap_or(0),
            block_probe: None,
            event_probe: None,
        }
    }

    pub fn total(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[PortRef] {
        &self.channels
    }

    pub fn output(&self) -> PortRef {
        PortRef::src(self.node)
    }

    pub fn current(&self) -> Result<usize> {
        if self.channels.is_empty() {
            return Err(PlayerError::NoTracks(self.kind));
        }
        Ok(self.active)
    }

    /// Request a new input and make it active if it is the selected one.
    pub fn add_channel(&mut self, engine: &dyn MediaEngine) -> Result<PortRef> {
        let port = engine.request_port(self.node)?;
        self.channels.push(port.clone());
        if self.channels.len() - 1 == self.active {
            engine.set_property(self.node, ACTIVE_PAD, PropValue::Port(port.clone()))?;
        }
        Ok(port)
    }

    /// Drop the most recent channel after its upstream failed to link.
    pub fn remove_last_channel(&mut self, engine: &dyn MediaEngine) {
        if let Some(port) = self.channels.pop() {
            if let Err(e) = engine.release_port(&port) {
                tracing::warn!(port = %port, "release selector port failed: {e:#}");
            }
        }
    }

    /// Clamp a selection that no channel ever satisfied.
    pub fn finalize(&mut self, engine: &dyn MediaEngine) -> Result<()> {
        if !self.channels.is_empty() && self.active >= self.channels.len() {
            tracing::warn!(
                kind = self.kind.as_str(),
                requested = self.active,
                total = self.channels.len(),
                "preselected track out of range; using first track"
            );
            self.active = 0;
            engine.set_property(
                self.node,
                ACTIVE_PAD,
                PropValue::Port(self.channels[0].clone()),
            )?;
        }
        Ok(())
    }

    /// Repoint the active input while the output is frozen.
    pub fn switch_to(&mut self, engine: &dyn MediaEngine, index: usize) -> Result<()> {
        let total = self.total();
        if total == 0 {
            return Err(PlayerError::NoTracks(self.kind));
        }
        if index >= total {
            return Err(PlayerError::InvalidIndex {
                kind: self.kind,
                index,
                total,
            });
        }
        let target = self.channels[index].clone();

        self.freeze(engine)?;
        let switched = engine.set_property(self.node, ACTIVE_PAD, PropValue::Port(target));
        self.thaw(engine);
        switched?;

        tracing::info!(
            kind = self.kind.as_str(),
            from = self.active,
            to = index,
            "track switched"
        );
        self.active = index;
        Ok(())
    }

    fn freeze(&mut self, engine: &dyn MediaEngine) -> Result<()> {
        let out = self.output();
        let gate = engine.add_probe(&out, ProbeKind::Block, Arc::new(|_: &mut ProbeItem| ProbeReturn::Pass))?;
        self.block_probe = Some(gate);
        // Switching must not flush the shared output sub-graph.
        let rewrite = engine.add_probe(
            &out,
            ProbeKind::Event,
            Arc::new(|item: &mut ProbeItem| match item {
                ProbeItem::Event(StreamEvent::FlushStart | StreamEvent::FlushStop) => ProbeReturn::Drop,
                _ => ProbeReturn::Pass,
            }),
        );
        match rewrite {
            Ok(id) => {
                self.event_probe = Some(id);
                Ok(())
            }
            Err(e) => {
                self.thaw(engine);
                Err(e.into())
            }
        }
    }

    fn thaw(&mut self, engine: &dyn MediaEngine) {
        let out = self.output();
        for id in [self.event_probe.take(), self.block_probe.take()].into_iter().flatten() {
            if let Err(e) = engine.remove_probe(&out, id) {
                tracing::warn!(port = %out, "remove selector probe failed: {e:#}");
            }
        }
    }

    /// Release every request port ahead of teardown.
    pub fn release(&mut self, engine: &dyn MediaEngine) {
        self.thaw(engine);
        for port in self.channels.drain(..) {
            if let Err(e) = engine.release_port(&port) {
                tracing::debug!(port = %port, "release selector port failed: {e:#}");
            }
        }
    }
}
