#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use media_player::attrs::keys;
use media_player::engine::NodeId;
use media_player::sim::{SimEngine, SimMedia};
use media_player::{
    AttrValue, EngineConfig, MemoryAttributes, MessageLog, Phase, Player, PlayerMessage,
    ResourceArbiter,
};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(ms(5));
    }
    cond()
}

pub struct Harness {
    pub sim: SimEngine,
    pub attrs: Arc<MemoryAttributes>,
    pub log: Arc<MessageLog>,
    pub player: Player,
}

impl Harness {
    pub fn new(location: &str, media: SimMedia) -> Self {
        Self::build(location, media, EngineConfig::default(), None)
    }

    pub fn with_config(location: &str, media: SimMedia, config: EngineConfig) -> Self {
        Self::build(location, media, config, None)
    }

    pub fn with_arbiter(location: &str, media: SimMedia, arbiter: Arc<dyn ResourceArbiter>) -> Self {
        Self::build(location, media, EngineConfig::default(), Some(arbiter))
    }

    fn build(
        location: &str,
        media: SimMedia,
        config: EngineConfig,
        arbiter: Option<Arc<dyn ResourceArbiter>>,
    ) -> Self {
        init_tracing();
        let sim = SimEngine::new();
        sim.add_media(location, media);
        let attrs = Arc::new(
            MemoryAttributes::new().with(keys::PROFILE_URI, AttrValue::Str(location.to_string())),
        );
        let log = MessageLog::new();
        let engine = Arc::new(sim.clone());
        let player = match arbiter {
            Some(arbiter) => {
                Player::with_arbiter(engine, config, attrs.clone(), log.clone(), arbiter)
            }
            None => Player::new(engine, config, attrs.clone(), log.clone()),
        }
        .unwrap();
        Self {
            sim,
            attrs,
            log,
            player,
        }
    }

    pub fn ready(&self) {
        self.player.create().unwrap();
        self.player.realize().unwrap();
    }

    pub fn playing(&self) {
        self.ready();
        self.player.start().unwrap();
        assert!(self.sim.wait_idle(WAIT));
        assert!(self.announced_within(Phase::Playing));
    }

    pub fn pipeline(&self) -> NodeId {
        *self
            .sim
            .nodes_by_factory("pipeline")
            .last()
            .expect("no pipeline")
    }

    pub fn only(&self, factory: &str) -> NodeId {
        let nodes = self.sim.nodes_by_factory(factory);
        assert_eq!(nodes.len(), 1, "expected one {factory}, found {nodes:?}");
        nodes[0]
    }

    pub fn announced(&self, phase: Phase) -> usize {
        self.log
            .count(|m| matches!(m, PlayerMessage::PhaseChanged { current, .. } if *current == phase))
    }

    pub fn announced_within(&self, phase: Phase) -> bool {
        self.log.wait_for(1, WAIT, |m| {
            matches!(m, PlayerMessage::PhaseChanged { current, .. } if *current == phase)
        })
    }

    pub fn errors(&self) -> Vec<PlayerMessage> {
        self.log
            .messages()
            .into_iter()
            .filter(|m| matches!(m, PlayerMessage::Error { .. }))
            .collect()
    }
}
