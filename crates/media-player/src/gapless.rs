//! Gapless splice coordination.
//!
//! When the current item drains, a dedicated worker swaps the decode path for
//! the next item while the output sub-graphs keep running. The first segment
//! crossing each output after a splice is shifted so the new item's timeline
//! continues where the previous one ended.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use media_player_types::MediaKind;

use crate::engine::{ProbeCallback, ProbeItem, ProbeReturn, StreamEvent};
use crate::locator::Locator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplicePhase {
    Idle,
    /// Drain observed; next item being validated.
    Staging,
    /// Decode path being swapped.
    Splicing,
}

#[derive(Debug)]
struct State {
    running: bool,
    phase: SplicePhase,
    /// Decode path is being reconfigured; only set under the playback lock.
    reconfigure: bool,
    drain_requests: usize,
    /// End-of-stream held back while a drain was being handled.
    eos_deferred: bool,
    shutdown: bool,
    next: VecDeque<Locator>,
    splices: u64,
}

/// Virtual timeline bookkeeping per output kind.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timeline {
    pub start_time: [Duration; 3],
    /// End timestamp of the last buffer seen on each output.
    pub next_pts: [Option<Duration>; 3],
    pub rewrite_pending: [bool; 3],
}

pub struct GaplessContext {
    state: Mutex<State>,
    wake: Condvar,
    timeline: Mutex<Timeline>,
}

impl Default for GaplessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GaplessContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                phase: SplicePhase::Idle,
                reconfigure: false,
                drain_requests: 0,
                eos_deferred: false,
                shutdown: false,
                next: VecDeque::new(),
                splices: 0,
            }),
            wake: Condvar::new(),
            timeline: Mutex::new(Timeline::default()),
        }
    }

    pub fn set_running(&self, running: bool) {
        let mut g = self.state.lock().unwrap();
        if g.running != running {
            tracing::info!(running, "gapless session");
        }
        g.running = running;
        if !running {
            g.drain_requests = 0;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn phase(&self) -> SplicePhase {
        self.state.lock().unwrap().phase
    }

    pub fn is_reconfiguring(&self) -> bool {
        self.state.lock().unwrap().reconfigure
    }

    pub fn splice_count(&self) -> u64 {
        self.state.lock().unwrap().splices
    }

    /// Replace the queue of upcoming items.
    pub fn set_next(&self, locator: Locator) {
        let mut g = self.state.lock().unwrap();
        g.next.clear();
        g.next.push_back(locator);
    }

    pub fn push_next(&self, locator: Locator) {
        self.state.lock().unwrap().next.push_back(locator);
    }

    /// Queue `locator` ahead of everything else (repeat of the current item).
    pub fn requeue(&self, locator: Locator) {
        self.state.lock().unwrap().next.push_front(locator);
    }

    pub fn clear_next(&self) {
        self.state.lock().unwrap().next.clear();
    }

    /// Drain signal from the decode path. Wakes the worker once per call.
    pub fn request_drain(&self) {
        let mut g = self.state.lock().unwrap();
        if !g.running || g.shutdown {
            return;
        }
        g.drain_requests += 1;
        drop(g);
        self.wake.notify_all();
    }

    /// Take the next queued item. The worker is already staging once it picked up a drain.
    pub fn stage(&self) -> Option<Locator> {
        let mut g = self.state.lock().unwrap();
        if !g.running {
            return None;
        }
        let next = g.next.pop_front();
        if next.is_some() {
            g.phase = SplicePhase::Staging;
        }
        next
    }

    /// Hold back an end-of-stream that raced a drain. Returns whether it was held.
    pub fn defer_eos(&self) -> bool {
        let mut g = self.state.lock().unwrap();
        if g.phase == SplicePhase::Idle && g.drain_requests == 0 {
            return false;
        }
        g.eos_deferred = true;
        true
    }

    /// Back to idle after a drain that did not splice; returns a held end-of-stream.
    pub fn settle(&self) -> bool {
        let mut g = self.state.lock().unwrap();
        if g.phase == SplicePhase::Staging {
            g.phase = SplicePhase::Idle;
        }
        std::mem::take(&mut g.eos_deferred)
    }

    /// Enter splicing. Caller holds the playback lock.
    pub fn begin_splice(&self, kinds: &[MediaKind]) {
        {
            let mut g = self.state.lock().unwrap();
            g.phase = SplicePhase::Splicing;
            g.reconfigure = true;
        }
        let mut t = self.timeline.lock().unwrap();
        for kind in kinds {
            t.rewrite_pending[kind.index()] = true;
        }
    }

    pub fn finish_splice(&self) {
        let mut g = self.state.lock().unwrap();
        g.phase = SplicePhase::Idle;
        g.reconfigure = false;
        g.eos_deferred = false;
        g.splices += 1;
    }

    /// End the gapless session after an unsupported item or a failed splice.
    pub fn abort(&self, reason: &str) {
        tracing::warn!(reason, "gapless session ended");
        {
            let mut g = self.state.lock().unwrap();
            g.phase = SplicePhase::Idle;
            g.reconfigure = false;
            g.running = false;
            g.drain_requests = 0;
        }
        let mut t = self.timeline.lock().unwrap();
        t.rewrite_pending = [false; 3];
    }

    /// Forget timeline history for a fresh graph.
    pub fn reset_timeline(&self) {
        *self.timeline.lock().unwrap() = Timeline::default();
    }

    pub fn timeline(&self) -> Timeline {
        *self.timeline.lock().unwrap()
    }

    /// Inspection probe recording the upcoming timestamp on an output input.
    pub fn buffer_probe(self: &Arc<Self>, kind: MediaKind) -> ProbeCallback {
        let ctx = Arc::clone(self);
        Arc::new(move |item: &mut ProbeItem| {
            if let ProbeItem::Buffer {
                pts: Some(pts),
                duration,
            } = item
            {
                let end = *pts + duration.unwrap_or_default();
                ctx.timeline.lock().unwrap().next_pts[kind.index()] = Some(end);
            }
            ProbeReturn::Pass
        })
    }

    /// Event probe shifting the first segment after a splice.
    pub fn event_probe(self: &Arc<Self>, kind: MediaKind) -> ProbeCallback {
        let ctx = Arc::clone(self);
        Arc::new(move |item: &mut ProbeItem| {
            if let ProbeItem::Event(StreamEvent::Segment(segment)) = item {
                let mut t = ctx.timeline.lock().unwrap();
                let i = kind.index();
                if t.rewrite_pending[i] {
                    let base = t.start_time[i] + t.next_pts[i].unwrap_or_default();
                    tracing::debug!(kind = kind.as_str(), base_ms = base.as_millis() as u64, "segment rebased");
                    segment.base = base;
                    t.start_time[i] = base;
                    t.next_pts[i] = None;
                    t.rewrite_pending[i] = false;
                }
            }
            ProbeReturn::Pass
        })
    }

    /// Stop the worker.
    pub fn shutdown(&self) {
        let mut g = self.state.lock().unwrap();
        g.shutdown = true;
        drop(g);
        self.wake.notify_all();
    }

    fn wait_for_drain(&self) -> bool {
        let mut g = self.state.lock().unwrap();
        while g.drain_requests == 0 && !g.shutdown {
            g = self.wake.wait(g).unwrap();
        }
        if g.shutdown {
            return false;
        }
        g.drain_requests -= 1;
        g.phase = SplicePhase::Staging;
        true
    }
}

/// Spawn the long-lived splice worker. `on_drain` runs once per drain signal.
pub fn spawn_worker(
    ctx: Arc<GaplessContext>,
    mut on_drain: impl FnMut() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("gapless-worker".to_string())
        .spawn(move || {
            while ctx.wait_for_drain() {
                on_drain();
            }
            tracing::debug!("gapless worker exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Segment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn first_segment_after_splice_is_rebased_once() {
        let ctx = Arc::new(GaplessContext::new());
        let on_buffer = ctx.buffer_probe(MediaKind::Audio);
        let on_event = ctx.event_probe(MediaKind::Audio);

        let mut buf = ProbeItem::Buffer {
            pts: Some(ms(9_000)),
            duration: Some(ms(1_000)),
        };
        on_buffer(&mut buf);
        ctx.begin_splice(&[MediaKind::Audio]);

        let mut seg = ProbeItem::Event(StreamEvent::Segment(Segment::default()));
        on_event(&mut seg);
        assert_eq!(
            seg,
            ProbeItem::Event(StreamEvent::Segment(Segment {
                base: ms(10_000),
                ..Segment::default()
            }))
        );

        let mut again = ProbeItem::Event(StreamEvent::Segment(Segment::default()));
        on_event(&mut again);
        assert_eq!(again, ProbeItem::Event(StreamEvent::Segment(Segment::default())));
        assert_eq!(ctx.timeline().start_time[MediaKind::Audio.index()], ms(10_000));
    }

    #[test]
    fn start_time_accumulates_across_splices() {
        let ctx = Arc::new(GaplessContext::new());
        let on_buffer = ctx.buffer_probe(MediaKind::Video);
        let on_event = ctx.event_probe(MediaKind::Video);

        for (len, expected) in [(4_000, 4_000), (2_500, 6_500), (3_000, 9_500)] {
            let mut buf = ProbeItem::Buffer {
                pts: Some(ms(len - 500)),
                duration: Some(ms(500)),
            };
            on_buffer(&mut buf);
            ctx.begin_splice(&[MediaKind::Video]);
            let mut seg = ProbeItem::Event(StreamEvent::Segment(Segment::default()));
            on_event(&mut seg);
            ctx.finish_splice();
            match seg {
                ProbeItem::Event(StreamEvent::Segment(s)) => assert_eq!(s.base, ms(expected)),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ctx.splice_count(), 3);
    }

    #[test]
    fn worker_wakes_once_per_drain_and_exits_on_shutdown() {
        let ctx = Arc::new(GaplessContext::new());
        ctx.set_running(true);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = hits.clone();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_worker(ctx.clone(), move || {
            hits_in.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .unwrap();

        ctx.request_drain();
        ctx.request_drain();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        ctx.shutdown();
        handle.join().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drains_ignored_when_not_running() {
        let ctx = GaplessContext::new();
        ctx.request_drain();
        assert_eq!(ctx.state.lock().unwrap().drain_requests, 0);
        ctx.set_running(true);
        ctx.push_next(Locator::parse("/b.flac").unwrap());
        assert!(ctx.stage().is_some());
        assert_eq!(ctx.phase(), SplicePhase::Staging);
        ctx.abort("test");
        assert!(!ctx.is_running());
        assert_eq!(ctx.phase(), SplicePhase::Idle);
    }

    #[test]
    fn end_of_stream_racing_a_drain_is_held_until_settled() {
        let ctx = GaplessContext::new();
        assert!(!ctx.defer_eos());

        ctx.set_running(true);
        ctx.request_drain();
        // Drain requested but not yet picked up by the worker.
        assert!(ctx.defer_eos());
        assert!(ctx.wait_for_drain());
        assert_eq!(ctx.phase(), SplicePhase::Staging);
        assert!(ctx.stage().is_none());
        assert!(ctx.settle());
        assert_eq!(ctx.phase(), SplicePhase::Idle);
        assert!(!ctx.settle());

        ctx.push_next(Locator::parse("/b.flac").unwrap());
        ctx.request_drain();
        assert!(ctx.wait_for_drain());
        assert!(ctx.stage().is_some());
        assert!(ctx.defer_eos());
        ctx.begin_splice(&[MediaKind::Audio]);
        ctx.finish_splice();
        // The outgoing item's end-of-stream is dropped once the splice lands.
        assert!(!ctx.settle());
    }
}
