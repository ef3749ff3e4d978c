//! Scoped signal connections and role-keyed signal dispatch.

use anyhow::Result;

use crate::engine::{ConnectionId, MediaEngine, NodeId, SignalKind};
use crate::graph::NodeRole;

/// Lifecycle scope a connection is torn down with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalScope {
    Autoplug,
    AudioOut,
    VideoOut,
    TextOut,
    Other,
}

/// Handler a signal is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    TypeFound,
    PadAdded,
    NoMorePads,
    Drained,
    Ignore,
}

/// Dispatch table from emitting node role to handler.
pub fn route(role: NodeRole, kind: SignalKind) -> Route {
    match (role, kind) {
        (NodeRole::TypeDetector, SignalKind::TypeFound) => Route::TypeFound,
        (NodeRole::Demuxer, SignalKind::PadAdded) => Route::PadAdded,
        (NodeRole::Demuxer, SignalKind::NoMorePads) => Route::NoMorePads,
        (NodeRole::TypeDetector | NodeRole::Source, SignalKind::Drained) => Route::Drained,
        _ => Route::Ignore,
    }
}

#[derive(Debug, Default)]
pub struct SignalRegistry {
    entries: Vec<Connection>,
}

#[derive(Clone, Copy, Debug)]
struct Connection {
    scope: SignalScope,
    node: NodeId,
    id: ConnectionId,
}

impl SignalRegistry {
    pub fn connect(
        &mut self,
        engine: &dyn MediaEngine,
        scope: SignalScope,
        node: NodeId,
        kind: SignalKind,
    ) -> Result<ConnectionId> {
        let id = engine.connect(node, kind)?;
        self.entries.push(Connection { scope, node, id });
        Ok(id)
    }

    /// Disconnect every connection registered under `scope`.
    pub fn disconnect_scope(&mut self, engine: &dyn MediaEngine, scope: SignalScope) {
        self.disconnect_where(engine, |c| c.scope == scope);
    }

    pub fn disconnect_node(&mut self, engine: &dyn MediaEngine, node: NodeId) {
        self.disconnect_where(engine, |c| c.node == node);
    }

    pub fn disconnect_all(&mut self, engine: &dyn MediaEngine) {
        self.disconnect_where(engine, |_| true);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scope_len(&self, scope: SignalScope) -> usize {
        self.entries.iter().filter(|c| c.scope == scope).count()
    }

    fn disconnect_where(&mut self, engine: &dyn MediaEngine, pred: impl Fn(&Connection) -> bool) {
        let (gone, kept): (Vec<Connection>, Vec<Connection>) =
            self.entries.drain(..).partition(|c| pred(c));
        self.entries = kept;
        for c in gone {
            if let Err(e) = engine.disconnect(c.node, c.id) {
                tracing::warn!(node = %c.node, "signal disconnect failed: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;

    #[test]
    fn routes_by_role() {
        assert_eq!(
            route(NodeRole::TypeDetector, SignalKind::TypeFound),
            Route::TypeFound
        );
        assert_eq!(route(NodeRole::Demuxer, SignalKind::PadAdded), Route::PadAdded);
        assert_eq!(route(NodeRole::Source, SignalKind::Drained), Route::Drained);
        assert_eq!(route(NodeRole::Demuxer, SignalKind::TypeFound), Route::Ignore);
        assert_eq!(route(NodeRole::StateHolder, SignalKind::NoMorePads), Route::Ignore);
    }

    #[test]
    fn scope_teardown_leaves_other_scopes() {
        let sim = SimEngine::new();
        let a = sim.create_node("typefind", "tf").unwrap();
        let b = sim.create_node("qtdemux", "demux").unwrap();
        let mut reg = SignalRegistry::default();
        reg.connect(&sim, SignalScope::Autoplug, a, SignalKind::TypeFound).unwrap();
        reg.connect(&sim, SignalScope::Autoplug, b, SignalKind::PadAdded).unwrap();
        reg.connect(&sim, SignalScope::Other, a, SignalKind::Drained).unwrap();

        reg.disconnect_scope(&sim, SignalScope::Autoplug);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.scope_len(SignalScope::Other), 1);
        assert_eq!(sim.connection_count(), 1);

        reg.disconnect_all(&sim);
        assert!(reg.is_empty());
        assert_eq!(sim.connection_count(), 0);
    }
}
