//! Playback session.
//!
//! [`Player`] is the command surface the API layer drives. Every command is
//! checked against the transition table, then executed under the command lock;
//! commands touching the decode path also take the playback lock so they
//! serialize against a gapless splice. Phase-changing commands block until the
//! engine reports the phase on the bus, bounded by a source-dependent timeout.
//!
//! Lock order: command, playback, graph, session. Background threads (bus,
//! command worker, gapless worker) and engine handlers hold only a weak
//! reference to the session core.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use media_player_types::{
    CodecMissingKind, ErrorCode, MediaKind, Phase, PlayerMessage, SeekFormat, SessionStatus,
};

use crate::attrs::{AttrValue, AttributeStore, keys};
use crate::autoplug::AutoplugPolicy;
use crate::buffering::BufferingContext;
use crate::builder::{BuildStatus, GraphBuilder};
use crate::bus::{self, BusItem};
use crate::config::EngineConfig;
use crate::engine::{
    BusHandler, FactoryClass, MediaEngine, NodeId, Notification, PortRef, PropValue, SeekRequest,
    Signal, SignalHandler,
};
use crate::error::{PlayerError, Result};
use crate::focus::{NoArbiter, ResourceArbiter};
use crate::gapless::{self, GaplessContext};
use crate::graph::{Graph, NodeRole, SubtitlePath};
use crate::locator::Locator;
use crate::message::{MessageSink, Outbox};
use crate::signals::{self, Route};
use crate::state::{Announce, Command, PhaseTracker, Verdict, verdict};
use crate::worker::{self, Job, Task, WorkerHandle};

/// Seek recorded before the graph could service it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingSeek {
    pub format: SeekFormat,
    pub value: u64,
}

pub(crate) struct SessionState {
    pub(crate) tracker: PhaseTracker,
    pub(crate) buffering: BufferingContext,
    pub(crate) locator: Option<Locator>,
    pub(crate) seeking: bool,
    pub(crate) pending_seek: Option<PendingSeek>,
    /// Selections made while no graph existed.
    pub(crate) preselect: [Option<usize>; 3],
    /// Playback held by a buffering episode.
    pub(crate) hold: bool,
    pub(crate) gapless: bool,
    /// Bumped whenever a queued end-of-stream must be discarded.
    pub(crate) eos_generation: u64,
    /// Error detected mid-transition; reported instead of a timeout.
    pub(crate) detected: Option<PlayerError>,
}

pub(crate) struct Core {
    pub(crate) engine: Arc<dyn MediaEngine>,
    pub(crate) config: EngineConfig,
    policy: AutoplugPolicy,
    pub(crate) attrs: Arc<dyn AttributeStore>,
    arbiter: Arc<dyn ResourceArbiter>,
    pub(crate) outbox: Outbox,
    pub(crate) gapless: Arc<GaplessContext>,
    pub(crate) worker: WorkerHandle,
    pub(crate) bus_tx: Sender<BusItem>,
    command: Mutex<()>,
    playback: Mutex<()>,
    pub(crate) graph: Mutex<Option<Graph>>,
    /// Signalled when a build completes or fails.
    built: Condvar,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) phase_cv: Condvar,
    video_sink: Mutex<Option<String>>,
}

/// One playback session over a media engine.
pub struct Player {
    core: Arc<Core>,
    threads: Vec<JoinHandle<()>>,
}

impl Player {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: EngineConfig,
        attrs: Arc<dyn AttributeStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        Self::with_arbiter(engine, config, attrs, sink, Arc::new(NoArbiter))
    }

    pub fn with_arbiter(
        engine: Arc<dyn MediaEngine>,
        config: EngineConfig,
        attrs: Arc<dyn AttributeStore>,
        sink: Arc<dyn MessageSink>,
        arbiter: Arc<dyn ResourceArbiter>,
    ) -> Result<Self> {
        let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
        let (worker, jobs) = worker::command_channel();
        let core = Arc::new(Core {
            policy: AutoplugPolicy::from_config(&config.autoplug),
            session: Mutex::new(SessionState {
                tracker: PhaseTracker::default(),
                buffering: BufferingContext::new(&config.buffering),
                locator: None,
                seeking: false,
                pending_seek: None,
                preselect: [None; 3],
                hold: false,
                gapless: false,
                eos_generation: 0,
                detected: None,
            }),
            engine,
            config,
            attrs,
            arbiter,
            outbox: Outbox::new(sink),
            gapless: Arc::new(GaplessContext::new()),
            worker,
            bus_tx,
            command: Mutex::new(()),
            playback: Mutex::new(()),
            graph: Mutex::new(None),
            built: Condvar::new(),
            phase_cv: Condvar::new(),
            video_sink: Mutex::new(None),
        });

        let mut threads = Vec::new();
        let spawned = (|| -> std::io::Result<()> {
            threads.push(bus::spawn_bus(bus_rx, Arc::downgrade(&core))?);
            let weak = Arc::downgrade(&core);
            threads.push(worker::spawn_command_worker(jobs, move |task| {
                if let Some(core) = weak.upgrade() {
                    core.run_task(task);
                }
            })?);
            let weak = Arc::downgrade(&core);
            threads.push(gapless::spawn_worker(core.gapless.clone(), move || {
                if let Some(core) = weak.upgrade() {
                    core.splice_next();
                }
            })?);
            Ok(())
        })();
        let player = Player { core, threads };
        spawned.map_err(|e| PlayerError::Internal(format!("spawn session threads: {e}")))?;
        player.core.install_handlers();
        Ok(player)
    }

    pub fn create(&self) -> Result<()> {
        self.core.create()
    }

    /// Build the graph for the locator in the attribute store and bring it to ready.
    pub fn realize(&self) -> Result<()> {
        self.core.realize()
    }

    pub fn unrealize(&self) -> Result<()> {
        self.core.unrealize()
    }

    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    pub fn pause(&self) -> Result<()> {
        self.core.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.core.resume()
    }

    pub fn destroy(&self) -> Result<()> {
        self.core.destroy()
    }

    /// `value` is milliseconds for [`SeekFormat::Time`] and 0..=100 for percent.
    pub fn seek(&self, format: SeekFormat, value: u64) -> Result<()> {
        self.core.seek(format, value)
    }

    /// Presentation position in milliseconds.
    pub fn position(&self) -> Result<u64> {
        self.core.position()
    }

    pub fn select_track(&self, kind: MediaKind, index: usize) -> Result<()> {
        self.core.select_track(kind, index)
    }

    pub fn current_track(&self, kind: MediaKind) -> Result<usize> {
        self.core.current_track(kind)
    }

    pub fn track_count(&self, kind: MediaKind) -> usize {
        self.core.track_count(kind)
    }

    /// Replace the queue of gapless follow-up items with `locator`.
    pub fn set_next_locator(&self, locator: &str) -> Result<()> {
        self.core.gapless.set_next(Locator::parse(locator)?);
        Ok(())
    }

    pub fn add_next_locator(&self, locator: &str) -> Result<()> {
        self.core.gapless.push_next(Locator::parse(locator)?);
        Ok(())
    }

    /// Swap the video sink at runtime; later builds use the same factory.
    pub fn replace_video_sink(&self, factory: &str) -> Result<()> {
        self.core.replace_video_sink(factory)
    }

    /// Report that the resource arbiter took the output away.
    pub fn notify_resource_revoked(&self) {
        self.core.engine.post(Notification::ResourceRevoked);
    }

    pub fn phase(&self) -> Phase {
        self.core.lock_session().tracker.current
    }

    pub fn status(&self) -> SessionStatus {
        self.core.status()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.core.gapless.set_running(false);
        self.core.teardown_graph();
        self.core.gapless.shutdown();
        self.core.worker.submit(Job::Shutdown);
        let _ = self.core.bus_tx.send(BusItem::Shutdown);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("session thread panicked");
            }
        }
    }
}

fn ms_to_secs(ms: Option<i64>) -> Option<f64> {
    ms.filter(|v| *v > 0).map(|v| v as f64 / 1000.0)
}

impl Core {
    pub(crate) fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap()
    }

    pub(crate) fn pipeline(&self) -> Option<NodeId> {
        self.graph.lock().unwrap().as_ref().map(|g| g.pipeline)
    }

    fn builder<'a>(&'a self, video_sink: &'a Option<String>, gapless: bool) -> GraphBuilder<'a> {
        let builder = GraphBuilder::new(self.engine.as_ref(), &self.policy, &self.config)
            .with_video_sink(video_sink.as_deref());
        if gapless {
            builder.with_gapless(&self.gapless)
        } else {
            builder
        }
    }

    fn install_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let tx = self.bus_tx.clone();
        let on_bus: BusHandler = Arc::new(move |notification| match notification {
            // Metadata is merged on the producing thread; delivery is queued behind.
            Notification::Tag { origin, tags } => {
                if let Some(core) = weak.upgrade() {
                    core.on_tags(origin, &tags);
                }
            }
            Notification::DurationChanged { duration } => {
                if let Some(core) = weak.upgrade() {
                    core.on_duration(duration);
                }
            }
            other => {
                if let Err(e) = tx.send(BusItem::Engine(other)) {
                    tracing::warn!("engine notification dropped: {e:#}");
                }
            }
        });
        let weak = Arc::downgrade(self);
        let on_signal: SignalHandler = Arc::new(move |node, signal| {
            if let Some(core) = weak.upgrade() {
                core.on_signal(node, signal);
            }
        });
        self.engine.install_handlers(on_bus, on_signal);
    }

    /// Table verdict for `cmd`: `Ok(true)` to proceed, `Ok(false)` for a no-op.
    fn admit(&self, cmd: Command) -> Result<bool> {
        let s = self.lock_session();
        let current = s.tracker.current;
        let v = verdict(cmd, current, s.tracker.pending, s.seeking);
        tracing::debug!(?cmd, ?current, pending = ?s.tracker.pending, verdict = ?v, "command");
        match v {
            Verdict::Allow => Ok(true),
            Verdict::NoOp => Ok(false),
            Verdict::Busy => Err(PlayerError::SeekBusy),
            Verdict::Reject => Err(PlayerError::InvalidState { current }),
        }
    }

    pub(crate) fn announce(&self, announce: Option<Announce>) {
        if let Some(a) = announce {
            tracing::info!(previous = ?a.previous, current = ?a.current, "phase changed");
            self.outbox.send(PlayerMessage::PhaseChanged {
                previous: a.previous,
                current: a.current,
            });
        }
    }

    /// Record a fatal error, wake phase waiters and deliver it once.
    pub(crate) fn fail(&self, err: PlayerError) -> PlayerError {
        {
            let mut s = self.lock_session();
            if s.detected.is_none() {
                s.detected = Some(err.clone());
            }
        }
        self.phase_cv.notify_all();
        self.outbox.post_error(err.code(), err.to_string());
        err
    }

    fn retarget(&self, phase: Phase) {
        self.lock_session().tracker.request(phase);
    }

    fn network(&self) -> bool {
        self.lock_session()
            .locator
            .as_ref()
            .map(|l| l.is_streaming())
            .unwrap_or(false)
    }

    /// Ask the engine for `phase` and wait until the bus reports it.
    fn step(&self, pipeline: NodeId, phase: Phase, network: bool) -> Result<()> {
        let upward = phase > self.lock_session().tracker.current;
        match self.engine.set_phase(pipeline, phase) {
            Ok(change) => tracing::debug!(?phase, ?change, "phase requested"),
            Err(e) => return Err(self.fail(e.into())),
        }
        self.wait_phase(phase, upward, self.config.phase_timeout(network))
    }

    fn wait_phase(&self, target: Phase, upward: bool, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let mut s = self.lock_session();
        loop {
            if upward {
                if let Some(err) = s.detected.clone() {
                    return Err(err);
                }
            }
            let current = s.tracker.current;
            let reached = if upward {
                current >= target || s.hold
            } else {
                current <= target
            };
            if reached {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }
            s = self.phase_cv.wait_timeout(s, timeout - elapsed).unwrap().0;
        }
        drop(s);
        let err = PlayerError::Timeout {
            target,
            waited_ms: timeout.as_millis() as u64,
        };
        Err(self.fail(err))
    }

    fn build_graph(&self, locator: &Locator) -> Result<NodeId> {
        let video_sink = self.video_sink.lock().unwrap().clone();
        let (gapless, preselect) = {
            let mut s = self.lock_session();
            (s.gapless, std::mem::take(&mut s.preselect))
        };
        let builder = self.builder(&video_sink, gapless);
        let mut graph = builder.realize(locator.clone())?;
        graph.preselect = preselect;
        if let Some(uri) = self.attrs.get_str(keys::SUBTITLE_URI) {
            if let Err(e) = builder.add_subtitle_path(&mut graph, &uri) {
                tracing::warn!(uri = %uri, "external subtitle skipped: {e:#}");
            }
        }
        self.gapless.reset_timeline();
        let pipeline = graph.pipeline;
        let stale = self.graph.lock().unwrap().replace(graph);
        if let Some(mut stale) = stale {
            builder.destroy(&mut stale);
        }
        Ok(pipeline)
    }

    /// Existing pipeline, or a rebuilt one at ready after a stop.
    fn ensure_graph(&self) -> Result<(NodeId, Locator)> {
        let locator = self
            .lock_session()
            .locator
            .clone()
            .ok_or(PlayerError::NotInitialized)?;
        if let Some(pipeline) = self.pipeline() {
            return Ok((pipeline, locator));
        }
        tracing::info!(locator = %locator, "rebuilding graph");
        let pipeline = self.build_graph(&locator)?;
        self.step(pipeline, Phase::Ready, locator.is_streaming())?;
        Ok((pipeline, locator))
    }

    pub(crate) fn teardown_graph(&self) {
        let Some(mut graph) = self.graph.lock().unwrap().take() else {
            return;
        };
        if let Err(e) = self.engine.set_phase(graph.pipeline, Phase::Null) {
            tracing::warn!("pipeline shutdown failed: {e:#}");
        }
        let none = None;
        self.builder(&none, false).destroy(&mut graph);
        self.built.notify_all();
    }

    /// Stop session activity that must not outlive the current graph.
    fn halt(&self) {
        self.gapless.set_running(false);
        let mut s = self.lock_session();
        s.eos_generation += 1;
        s.hold = false;
        s.seeking = false;
    }

    fn create(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Create)? {
            return Ok(());
        }
        let a = self.lock_session().tracker.force(Phase::Null);
        self.announce(a);
        Ok(())
    }

    fn realize(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Realize)? {
            return Ok(());
        }
        let raw = self
            .attrs
            .get_str(keys::PROFILE_URI)
            .ok_or_else(|| PlayerError::InvalidArgument("no content locator".into()))?;
        let locator = Locator::parse(&raw)?;
        let gapless = self.config.gapless || self.attrs.get_bool(keys::GAPLESS).unwrap_or(false);
        {
            let mut s = self.lock_session();
            s.detected = None;
            s.buffering = BufferingContext::new(&self.config.buffering);
            s.buffering
                .configure(locator.is_streaming(), locator.is_weak_link());
            s.buffering.override_targets(
                ms_to_secs(self.attrs.get_int(keys::BUFFER_INITIAL_MS)),
                ms_to_secs(self.attrs.get_int(keys::BUFFER_RUNTIME_MS)),
            );
            s.tracker.reset_session_flags();
            s.eos_generation += 1;
            s.gapless = gapless;
            s.locator = Some(locator.clone());
        }
        tracing::info!(locator = %locator, kind = ?locator.kind(), gapless, "realizing");

        let pipeline = self.build_graph(&locator)?;
        self.retarget(Phase::Ready);
        if let Err(e) = self.step(pipeline, Phase::Ready, locator.is_streaming()) {
            self.teardown_graph();
            return Err(e);
        }
        Ok(())
    }

    fn unrealize(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Unrealize)? {
            return Ok(());
        }
        let _playback = self.playback.lock().unwrap();
        self.halt();
        if let Some(pipeline) = self.pipeline() {
            self.retarget(Phase::Null);
            if let Err(e) = self.step(pipeline, Phase::Null, self.network()) {
                tracing::warn!("unrealize did not settle: {e}");
            }
        }
        self.teardown_graph();
        let a = {
            let mut s = self.lock_session();
            s.buffering.reset();
            s.detected = None;
            s.pending_seek = None;
            s.tracker.force(Phase::Null)
        };
        self.announce(a);
        self.outbox.reset_error_gate();
        self.arbiter.release();
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Start)? {
            return Ok(());
        }
        let _playback = self.playback.lock().unwrap();
        let (pipeline, locator) = self.ensure_graph()?;
        self.arbiter
            .acquire()
            .map_err(|e| PlayerError::ResourceDenied(format!("{e:#}")))?;

        let gapless = {
            let mut s = self.lock_session();
            s.tracker.request(Phase::Playing);
            s.gapless
        };
        if gapless && locator.is_splice_eligible() {
            self.gapless.set_running(true);
        }

        let network = locator.is_streaming();
        self.step(pipeline, Phase::Paused, network)?;
        self.replay_pending_seek(pipeline)?;
        {
            let mut s = self.lock_session();
            if s.buffering.is_buffering() {
                s.hold = true;
                tracing::info!(percent = ?s.buffering.percent(), "start held until buffering completes");
                return Ok(());
            }
        }
        self.step(pipeline, Phase::Playing, network)
    }

    fn stop(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Stop)? {
            return Ok(());
        }
        let _playback = self.playback.lock().unwrap();
        self.halt();
        if let Some(pipeline) = self.pipeline() {
            self.retarget(Phase::Ready);
            self.step(pipeline, Phase::Ready, self.network())?;
        }
        self.teardown_graph();
        self.lock_session().buffering.reset();
        self.arbiter.release();
        tracing::info!("stopped");
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        {
            let mut s = self.lock_session();
            if s.hold && s.tracker.target == Phase::Playing {
                s.tracker.request(Phase::Paused);
                let current = s.tracker.current;
                let a = s.tracker.on_changed(current);
                drop(s);
                self.announce(a);
                tracing::info!("pause recorded during buffering hold");
                return Ok(());
            }
        }
        if !self.admit(Command::Pause)? {
            return Ok(());
        }
        let _playback = self.playback.lock().unwrap();
        let (pipeline, locator) = self.ensure_graph()?;
        self.retarget(Phase::Paused);
        self.step(pipeline, Phase::Paused, locator.is_streaming())?;
        self.replay_pending_seek(pipeline)
    }

    fn resume(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Resume)? {
            return Ok(());
        }
        {
            let mut s = self.lock_session();
            if s.hold || s.buffering.is_buffering() {
                s.hold = true;
                s.tracker.request(Phase::Playing);
                tracing::info!(percent = ?s.buffering.percent(), "resume deferred until buffering completes");
                return Ok(());
            }
        }
        let _playback = self.playback.lock().unwrap();
        let pipeline = self.pipeline().ok_or(PlayerError::NotInitialized)?;
        self.retarget(Phase::Playing);
        self.step(pipeline, Phase::Playing, self.network())
    }

    fn destroy(&self) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if !self.admit(Command::Destroy)? {
            return Ok(());
        }
        let _playback = self.playback.lock().unwrap();
        self.halt();
        self.gapless.clear_next();
        self.teardown_graph();
        let a = {
            let mut s = self.lock_session();
            s.pending_seek = None;
            s.preselect = [None; 3];
            s.locator = None;
            s.detected = None;
            s.tracker.force(Phase::None)
        };
        self.announce(a);
        self.outbox.reset_error_gate();
        self.arbiter.release();
        tracing::info!("session destroyed");
        Ok(())
    }

    fn seek(&self, format: SeekFormat, value: u64) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        self.admit(Command::Seek)?;
        if format == SeekFormat::Percent && value > 100 {
            return Err(PlayerError::InvalidArgument(format!("seek to {value}%")));
        }
        let _playback = self.playback.lock().unwrap();
        let pausable = self.lock_session().tracker.current.is_pausable();
        match self.pipeline() {
            Some(pipeline) if pausable => {
                let position = self.resolve_seek(pipeline, format, value)?;
                self.issue_seek(pipeline, position)
            }
            _ => {
                self.lock_session().pending_seek = Some(PendingSeek { format, value });
                tracing::info!(?format, value, "seek recorded until the graph can service it");
                Ok(())
            }
        }
    }

    fn resolve_seek(&self, pipeline: NodeId, format: SeekFormat, value: u64) -> Result<Duration> {
        match format {
            SeekFormat::Time => Ok(Duration::from_millis(value)),
            SeekFormat::Percent => {
                let duration = self
                    .engine
                    .duration(pipeline)
                    .or_else(|| {
                        self.attrs
                            .get_int(keys::DURATION_MS)
                            .filter(|ms| *ms > 0)
                            .map(|ms| Duration::from_millis(ms as u64))
                    })
                    .ok_or_else(|| {
                        PlayerError::InvalidArgument("percent seek without a known duration".into())
                    })?;
                Ok(duration.mul_f64(value.min(100) as f64 / 100.0))
            }
        }
    }

    fn issue_seek(&self, pipeline: NodeId, position: Duration) -> Result<()> {
        {
            let mut s = self.lock_session();
            s.seeking = true;
            s.eos_generation += 1;
        }
        if let Err(e) = self.engine.seek(pipeline, SeekRequest::flushing(position)) {
            self.lock_session().seeking = false;
            return Err(PlayerError::SeekFailed(format!("{e:#}")));
        }
        tracing::info!(position_ms = position.as_millis() as u64, "seek issued");
        Ok(())
    }

    fn replay_pending_seek(&self, pipeline: NodeId) -> Result<()> {
        let pending = self.lock_session().pending_seek.take();
        if let Some(p) = pending {
            tracing::info!(format = ?p.format, value = p.value, "replaying pending seek");
            let position = self.resolve_seek(pipeline, p.format, p.value)?;
            self.issue_seek(pipeline, position)?;
        }
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        let s = self.lock_session();
        if s.seeking {
            return Err(PlayerError::SeekBusy);
        }
        let current = s.tracker.current;
        if !current.is_pausable() {
            return match s.pending_seek {
                Some(PendingSeek {
                    format: SeekFormat::Time,
                    value,
                }) => Ok(value),
                _ => Err(PlayerError::InvalidState { current }),
            };
        }
        drop(s);
        let pipeline = self.pipeline().ok_or(PlayerError::NotInitialized)?;
        self.engine
            .position(pipeline)
            .map(|d| d.as_millis() as u64)
            .ok_or_else(|| PlayerError::Internal("position unavailable".into()))
    }

    fn select_track(&self, kind: MediaKind, index: usize) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        if self.gapless.is_reconfiguring() {
            return Err(PlayerError::Reconfiguring);
        }
        let _playback = self.playback.lock().unwrap();
        let mut g = self.graph.lock().unwrap();
        let Some(graph) = g.as_mut() else {
            drop(g);
            self.lock_session().preselect[kind.index()] = Some(index);
            tracing::info!(kind = kind.as_str(), index, "track preselected");
            return Ok(());
        };
        if kind == MediaKind::Text {
            if let Some(sub) = graph.subtitle.clone() {
                let pipeline = graph.pipeline;
                drop(g);
                return self.select_subtitle(pipeline, &sub, index);
            }
        }
        let Some(selector) = graph.selector_mut(kind) else {
            graph.preselect[kind.index()] = Some(index);
            tracing::info!(kind = kind.as_str(), index, "track preselected");
            return Ok(());
        };
        selector.switch_to(self.engine.as_ref(), index)?;
        let pipeline = graph.pipeline;
        drop(g);

        if self.lock_session().tracker.current == Phase::Playing {
            if let Some(position) = self.engine.position(pipeline) {
                if let Err(e) = self
                    .engine
                    .seek(pipeline, SeekRequest::non_flushing(position))
                {
                    tracing::warn!("reposition after track switch failed: {e:#}");
                }
            }
        }
        Ok(())
    }

    /// External subtitle files switch language on the parser and resync the text path only.
    fn select_subtitle(&self, pipeline: NodeId, sub: &SubtitlePath, index: usize) -> Result<()> {
        if let Some(total) = self
            .engine
            .property(sub.parser, "languages")
            .and_then(|v| v.as_uint())
        {
            if index as u64 >= total {
                return Err(PlayerError::InvalidIndex {
                    kind: MediaKind::Text,
                    index,
                    total: total as usize,
                });
            }
        }
        self.engine
            .set_property(sub.parser, "current-language", PropValue::UInt(index as u64))?;
        if let Some(position) = self.engine.position(pipeline) {
            if let Err(e) = self.engine.seek(sub.parser, SeekRequest::flushing(position)) {
                tracing::warn!("subtitle resync failed: {e:#}");
            }
        }
        if let Some(graph) = self.graph.lock().unwrap().as_mut() {
            if let Some(s) = graph.subtitle.as_mut() {
                s.current = index;
            }
        }
        tracing::info!(index, "subtitle language switched");
        Ok(())
    }

    fn current_track(&self, kind: MediaKind) -> Result<usize> {
        let g = self.graph.lock().unwrap();
        match g.as_ref() {
            Some(graph) => {
                if kind == MediaKind::Text {
                    if let Some(sub) = &graph.subtitle {
                        return Ok(sub.current);
                    }
                }
                match graph.selector(kind) {
                    Some(selector) => selector.current(),
                    None => graph.preselect[kind.index()].ok_or(PlayerError::NoTracks(kind)),
                }
            }
            None => {
                drop(g);
                self.lock_session().preselect[kind.index()].ok_or(PlayerError::NoTracks(kind))
            }
        }
    }

    fn track_count(&self, kind: MediaKind) -> usize {
        let g = self.graph.lock().unwrap();
        let Some(graph) = g.as_ref() else {
            return 0;
        };
        if kind == MediaKind::Text {
            if let Some(sub) = &graph.subtitle {
                return self
                    .engine
                    .property(sub.parser, "languages")
                    .and_then(|v| v.as_uint())
                    .map(|n| n as usize)
                    .unwrap_or(1);
            }
        }
        graph.track_count(kind)
    }

    fn replace_video_sink(&self, factory: &str) -> Result<()> {
        let _cmd = self.command.lock().unwrap();
        let known = self
            .engine
            .factories()
            .iter()
            .any(|f| f.name == factory && f.class == FactoryClass::Sink);
        if !known {
            return Err(PlayerError::InvalidArgument(format!(
                "{factory} is not a sink factory"
            )));
        }
        *self.video_sink.lock().unwrap() = Some(factory.to_string());

        let _playback = self.playback.lock().unwrap();
        let mut g = self.graph.lock().unwrap();
        let Some(graph) = g.as_mut() else {
            return Ok(());
        };
        let pipeline = graph.pipeline;
        let phase = graph.sync_phase;
        let Some((converter, old)) = graph
            .outputs[MediaKind::Video.index()]
            .as_ref()
            .map(|o| (o.converter, o.sink))
        else {
            return Ok(());
        };
        let Some(converter) = converter else {
            return Err(PlayerError::Internal("video output without converter".into()));
        };

        let engine = self.engine.as_ref();
        let new = engine.create_node(factory, "video-sink")?;
        engine.attach(pipeline, new)?;
        let from = PortRef::src(converter);
        engine.unlink(&from, &PortRef::sink(old))?;
        if let Err(e) = engine.link(&from, &PortRef::sink(new)) {
            if let Err(e) = engine.remove_node(new) {
                tracing::warn!(node = %new, "remove rejected video sink failed: {e:#}");
            }
            engine.link(&from, &PortRef::sink(old))?;
            return Err(e.into());
        }
        if let Err(e) = engine.set_phase(old, Phase::Null) {
            tracing::warn!(node = %old, "stop replaced video sink failed: {e:#}");
        }
        engine.remove_node(old)?;
        graph.forget(old);
        graph.add(new, NodeRole::Sink(MediaKind::Video), factory);
        engine.adopt_clock(new, pipeline)?;
        engine.set_phase(new, phase)?;
        if let Some(out) = graph.outputs[MediaKind::Video.index()].as_mut() {
            out.sink = new;
        }
        tracing::info!(factory, "video sink replaced");
        Ok(())
    }

    /// Engine signal on a streaming thread: route by emitting role into the builder.
    fn on_signal(&self, node: NodeId, signal: Signal) {
        let route = {
            let g = self.graph.lock().unwrap();
            g.as_ref()
                .and_then(|graph| graph.role_of(node))
                .map(|role| signals::route(role, signal.kind()))
        };
        match route {
            None | Some(Route::Ignore) => {
                tracing::debug!(node = %node, kind = ?signal.kind(), "signal ignored");
                return;
            }
            Some(Route::Drained) => {
                self.gapless.request_drain();
                return;
            }
            Some(_) => {}
        }

        let gapless = self.lock_session().gapless;
        let video_sink = self.video_sink.lock().unwrap().clone();
        let status = {
            let mut g = self.graph.lock().unwrap();
            let Some(graph) = g.as_mut() else {
                return;
            };
            let builder = self.builder(&video_sink, gapless);
            match signal {
                Signal::TypeFound { caps } => builder.on_type_found(graph, &caps),
                Signal::PadAdded { port, caps } => builder.on_pad_added(graph, &port, &caps),
                Signal::NoMorePads => builder.on_no_more_pads(graph),
                Signal::Drained => return,
            }
        };
        match status {
            BuildStatus::InProgress => {}
            BuildStatus::Complete(_) => self.built.notify_all(),
            BuildStatus::Failed(kind) => {
                self.built.notify_all();
                if let Err(e) = self.bus_tx.send(BusItem::BuildFailed(kind)) {
                    tracing::warn!("build failure not queued: {e:#}");
                }
            }
        }
    }

    /// Gapless worker body: swap the decode path for the next queued item, or
    /// hand a held end-of-stream back to normal delivery.
    fn splice_next(&self) {
        if self.try_splice() {
            return;
        }
        if self.gapless.settle() {
            tracing::debug!("releasing end-of-stream held for the drain");
            self.on_eos();
        }
    }

    /// Returns whether the next item was spliced in.
    fn try_splice(&self) -> bool {
        let current = self.lock_session().locator.clone();
        if let Some(current) = current {
            self.requeue_for_repeat(current);
        }
        let Some(next) = self.gapless.stage() else {
            tracing::debug!("drained with nothing queued");
            return false;
        };
        if !next.is_splice_eligible() {
            self.gapless
                .abort(&format!("{} cannot be spliced", next.as_str()));
            return false;
        }

        let _playback = self.playback.lock().unwrap();
        let phase = self.lock_session().tracker.current;
        if !phase.is_pausable() || !self.gapless.is_running() {
            return false;
        }

        let video_sink = self.video_sink.lock().unwrap().clone();
        let added = {
            let mut g = self.graph.lock().unwrap();
            let Some(graph) = g.as_mut() else {
                return false;
            };
            let builder = self.builder(&video_sink, true);
            self.gapless.begin_splice(&graph.resolved_kinds());
            builder.teardown_decode_path(graph);
            graph.reset_build(next.clone());
            graph.sync_phase = phase;
            match builder.add_decode_path(graph, false) {
                Ok(ids) => ids,
                Err(e) => {
                    self.gapless.abort("decode path for next item failed");
                    self.fail(PlayerError::from(e));
                    return false;
                }
            }
        };
        for id in added {
            if let Err(e) = self.engine.set_phase(id, phase) {
                tracing::warn!(node = %id, "phase sync failed: {e:#}");
            }
        }

        let timeout = self.config.phase_timeout(next.is_streaming());
        let g = self.graph.lock().unwrap();
        let (g, waited) = self
            .built
            .wait_timeout_while(g, timeout, |g| g.as_ref().is_some_and(|graph| !graph.complete))
            .unwrap();
        let resolved = g
            .as_ref()
            .map(|graph| !graph.resolved_kinds().is_empty())
            .unwrap_or(false);
        drop(g);
        if waited.timed_out() {
            self.gapless.abort("next item did not finish building");
            self.fail(PlayerError::Timeout {
                target: phase,
                waited_ms: timeout.as_millis() as u64,
            });
            return false;
        }
        if !resolved {
            self.gapless.abort("next item has no decodable stream");
            return false;
        }

        self.gapless.finish_splice();
        self.lock_session().locator = Some(next.clone());
        self.snapshot_metadata();
        tracing::info!(
            locator = %next,
            splices = self.gapless.splice_count(),
            "gapless splice complete"
        );
        true
    }

    /// With a repeat count, gapless plays the current item again instead of rewinding.
    fn requeue_for_repeat(&self, current: Locator) {
        let count = self.attrs.get_int(keys::PLAY_COUNT).unwrap_or(1);
        if count > 1 || count == -1 {
            if count > 1 {
                self.attrs.set(keys::PLAY_COUNT, AttrValue::Int(count - 1));
            }
            self.gapless.requeue(current);
        }
    }

    pub(crate) fn run_task(&self, task: Task) {
        match task {
            Task::Rewind => {
                let Some(pipeline) = self.pipeline() else {
                    return;
                };
                match self.engine.seek(pipeline, SeekRequest::flushing(Duration::ZERO)) {
                    Ok(()) => tracing::info!("rewound for repeat"),
                    Err(e) => tracing::warn!("rewind failed: {e:#}"),
                }
            }
            Task::DeliverEos { generation } => {
                let current = self.lock_session().eos_generation;
                if current == generation {
                    self.outbox.send(PlayerMessage::EndOfStream);
                } else {
                    tracing::debug!(generation, current, "stale end-of-stream dropped");
                }
            }
            Task::PauseForRevoke => {
                tracing::warn!("output resource revoked; pausing");
                if let Err(e) = self.pause() {
                    tracing::warn!("pause after revoke failed: {e}");
                }
            }
        }
    }

    /// One-time content snapshot on first entry to paused.
    pub(crate) fn snapshot_metadata(&self) {
        let (pipeline, counts, codecs, probe_ms, sinks) = {
            let g = self.graph.lock().unwrap();
            let Some(graph) = g.as_ref() else {
                return;
            };
            let counts = MediaKind::ALL.map(|k| graph.track_count(k));
            let sinks = (
                graph.output(MediaKind::Audio).map(|o| o.sink),
                graph.output(MediaKind::Video).is_some(),
            );
            (
                graph.pipeline,
                counts,
                graph.codecs.clone(),
                graph.probe.as_ref().and_then(|p| p.duration_ms()),
                sinks,
            )
        };

        let duration_ms = self
            .engine
            .duration(pipeline)
            .map(|d| d.as_millis() as u64)
            .or(probe_ms);
        if let Some(ms) = duration_ms {
            self.attrs
                .set(keys::DURATION_MS, AttrValue::Int(ms as i64));
        }
        for (key, n) in [keys::AUDIO_TRACKS, keys::VIDEO_TRACKS, keys::TEXT_TRACKS]
            .into_iter()
            .zip(counts)
        {
            self.attrs.set(key, AttrValue::Int(n as i64));
        }
        for (key, codec) in [
            (keys::AUDIO_CODEC, &codecs[MediaKind::Audio.index()]),
            (keys::VIDEO_CODEC, &codecs[MediaKind::Video.index()]),
        ] {
            if let Some(codec) = codec {
                self.attrs.set(key, AttrValue::Str(codec.clone()));
            }
        }
        if let (Some(audio_sink), true) = sinks {
            if let Err(e) = self
                .engine
                .set_property(audio_sink, "sound-priority", PropValue::Bool(true))
            {
                tracing::warn!("sound priority not applied: {e:#}");
            }
        }
        tracing::info!(
            audio = counts[0],
            video = counts[1],
            text = counts[2],
            duration_ms = ?duration_ms,
            "content metadata captured"
        );
    }

    /// One warning per media kind no decoder could handle, on first entry to playing.
    pub(crate) fn report_missing_codecs(&self) {
        let missing = match self.graph.lock().unwrap().as_ref() {
            Some(graph) => graph.missing_kinds(),
            None => return,
        };
        for kind in missing {
            let sub = match kind {
                MediaKind::Audio => CodecMissingKind::Audio,
                MediaKind::Video => CodecMissingKind::Video,
                MediaKind::Text => CodecMissingKind::UnsupportedFormat,
            };
            self.outbox.warn(
                Some(ErrorCode::CodecMissing(sub)),
                format!("no decoder for {} stream", kind.as_str()),
            );
        }
    }
}
