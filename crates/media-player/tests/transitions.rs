mod common;

use std::time::Duration;

use common::{Harness, WAIT, ms, wait_until};
use media_player::attrs::keys;
use media_player::engine::{
    BufferStage, BufferingReport, MediaEngine, Notification, PortRef, Segment, StreamEvent,
};
use media_player::sim::SimMedia;
use media_player::{
    AttrValue, AttributeStore, EngineConfig, MediaKind, Phase, PlayerError, PlayerMessage,
};

fn track() -> SimMedia {
    SimMedia::container("application/ogg", &["audio/x-vorbis"])
        .with_duration(Duration::from_secs(10))
}

fn gapless_harness() -> Harness {
    let h = Harness::new("/music/one.ogg", track());
    h.sim.add_media("/music/two.ogg", track());
    h.sim.add_media("/music/three.ogg", track());
    h.attrs.set(keys::GAPLESS, AttrValue::Bool(true));
    h
}

fn segment_base(h: &Harness) -> Option<Duration> {
    let demux = h.only("oggdemux");
    match h
        .sim
        .push_event(&PortRef::new(demux, "src_0"), StreamEvent::Segment(Segment::default()))
    {
        Some(StreamEvent::Segment(s)) => Some(s.base),
        _ => None,
    }
}

/// Drain the current item and wait for the next decode path to come up.
fn splice_to(h: &Harness, locator: &str) {
    let old = h.only("oggdemux");
    h.sim.emit_drained();
    assert!(wait_until(|| {
        let demuxers = h.sim.nodes_by_factory("oggdemux");
        demuxers.len() == 1 && demuxers[0] != old && !h.sim.output_ports(demuxers[0]).is_empty()
    }));
    assert!(wait_until(|| h.player.status().locator.as_deref() == Some(locator)));
    assert_eq!(h.sim.nodes_by_factory("autoaudiosink").len(), 1);
}

#[test]
fn gapless_splice_continues_the_output_timeline() {
    let h = gapless_harness();
    h.player.set_next_locator("/music/two.ogg").unwrap();
    h.player.add_next_locator("/music/three.ogg").unwrap();
    h.playing();
    assert!(h.player.status().gapless);
    let sink = h.only("autoaudiosink");

    let demux = h.only("oggdemux");
    assert!(h.sim.push_buffer(&PortRef::new(demux, "src_0"), ms(9_000), ms(1_000)));

    splice_to(&h, "/music/two.ogg");
    assert_eq!(h.only("autoaudiosink"), sink);
    assert_eq!(segment_base(&h), Some(ms(10_000)));
    // Only the first segment after a splice is rebased.
    assert_eq!(segment_base(&h), Some(Duration::ZERO));

    let demux = h.only("oggdemux");
    assert!(h.sim.push_buffer(&PortRef::new(demux, "src_0"), ms(4_000), ms(1_000)));
    splice_to(&h, "/music/three.ogg");
    assert_eq!(segment_base(&h), Some(ms(15_000)));

    assert_eq!(h.player.phase(), Phase::Playing);
    assert_eq!(h.announced(Phase::Playing), 1);
    assert_eq!(h.log.count(|m| matches!(m, PlayerMessage::EndOfStream)), 0);
    assert!(h.errors().is_empty());
}

#[test]
fn end_of_stream_is_delivered_once_the_queue_is_empty() {
    let h = gapless_harness();
    h.player.set_next_locator("/music/two.ogg").unwrap();
    h.playing();

    splice_to(&h, "/music/two.ogg");
    // Queue is empty now: the next drain ends the gapless run normally.
    h.sim.emit_drained();
    h.sim.post(Notification::Eos { node: h.pipeline() });
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::EndOfStream)));
}

#[test]
fn gapless_repeat_replays_the_current_item() {
    let h = gapless_harness();
    h.attrs.set(keys::PLAY_COUNT, AttrValue::Int(2));
    h.playing();

    splice_to(&h, "/music/one.ogg");
    assert_eq!(h.attrs.get_int(keys::PLAY_COUNT), Some(1));
    assert_eq!(h.sim.seeks(h.pipeline()).len(), 0);
}

#[test]
fn stop_ends_the_gapless_run() {
    let h = gapless_harness();
    h.player.set_next_locator("/music/two.ogg").unwrap();
    h.playing();
    h.player.stop().unwrap();
    assert!(!h.player.status().gapless);

    h.sim.emit_drained();
    std::thread::sleep(ms(100));
    assert_eq!(h.player.status().locator.as_deref(), Some("/music/one.ogg"));
}

#[test]
fn unsupported_next_item_ends_the_gapless_run() {
    let h = gapless_harness();
    h.player
        .set_next_locator("http://media.example.com/live/index.m3u8")
        .unwrap();
    h.playing();
    let demux = h.only("oggdemux");

    h.sim.emit_drained();
    assert!(wait_until(|| !h.player.status().gapless));
    h.sim.post(Notification::Eos { node: h.pipeline() });
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::EndOfStream)));
    std::thread::sleep(ms(50));

    assert_eq!(h.log.count(|m| matches!(m, PlayerMessage::EndOfStream)), 1);
    assert_eq!(h.only("oggdemux"), demux);
    assert_eq!(h.player.status().locator.as_deref(), Some("/music/one.ogg"));
    assert!(h.errors().is_empty());
}

#[test]
fn end_of_stream_racing_the_drain_waits_for_the_worker() {
    let h = gapless_harness();
    h.playing();

    // Nothing queued: the held end-of-stream is released once the drain is handled.
    h.sim.emit_drained();
    h.sim.post(Notification::Eos { node: h.pipeline() });
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::EndOfStream)));
    std::thread::sleep(ms(50));
    assert_eq!(h.log.count(|m| matches!(m, PlayerMessage::EndOfStream)), 1);
}

#[test]
fn stalled_splice_times_out_and_blocks_track_changes_meanwhile() {
    let mut config = EngineConfig::default();
    config.phase_timeout_local_ms = 300;
    let h = Harness::with_config("/music/one.ogg", track(), config);
    h.attrs.set(keys::GAPLESS, AttrValue::Bool(true));
    // Never registered with the engine, so its type is never found.
    h.player.set_next_locator("/music/lost.ogg").unwrap();
    h.playing();

    h.sim.emit_drained();
    assert!(wait_until(|| matches!(
        h.player.select_track(MediaKind::Audio, 0),
        Err(PlayerError::Reconfiguring)
    )));

    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::Error { .. })));
    assert!(wait_until(|| !h.player.status().gapless));
    assert_eq!(h.errors().len(), 1);
    assert_eq!(h.player.status().locator.as_deref(), Some("/music/one.ogg"));
    assert!(h.player.select_track(MediaKind::Audio, 0).is_ok());
}

fn report(percent: u8) -> Notification {
    Notification::Buffering(BufferingReport {
        stage: BufferStage::PreDemux,
        buffered_bytes: None,
        percent: Some(percent),
        finished: false,
    })
}

const STREAM: &str = "http://media.example.com/live/stream.mp4";

fn stream() -> SimMedia {
    SimMedia::container("video/quicktime", &["audio/mpeg", "video/x-h264"])
        .with_duration(Duration::from_secs(120))
}

#[test]
fn buffering_episode_pauses_once_and_resumes_once() {
    let h = Harness::new(STREAM, stream());
    h.playing();
    let pipeline = h.pipeline();
    h.only("queue2");

    for percent in [20, 60, 100] {
        h.sim.post(report(percent));
    }
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::Buffering { percent: 100 })));
    assert!(wait_until(|| h.sim.phase_of(pipeline) == Some(Phase::Playing)));

    let requests = h.sim.phase_requests(pipeline);
    let first_play = requests.iter().position(|p| *p == Phase::Playing).unwrap();
    assert_eq!(&requests[first_play + 1..], &[Phase::Paused, Phase::Playing]);

    assert_eq!(h.log.count(|m| matches!(m, PlayerMessage::Buffering { .. })), 3);
    // The dip is not announced.
    assert_eq!(h.announced(Phase::Paused), 0);
    assert_eq!(h.announced(Phase::Playing), 1);
    assert!(!h.player.status().buffering);
}

#[test]
fn start_waits_for_buffering_to_complete() {
    let h = Harness::new(STREAM, stream());
    h.ready();
    h.player.pause().unwrap();
    assert!(h.announced_within(Phase::Paused));

    h.sim.post(report(10));
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::Buffering { .. })));
    assert!(h.player.status().buffering);

    h.player.resume().unwrap();
    let status = h.player.status();
    assert_eq!(status.current, Phase::Paused);
    assert_eq!(status.target, Phase::Playing);
    // Repeating the request while held is a no-op.
    h.player.resume().unwrap();

    h.sim.post(report(100));
    assert!(h.announced_within(Phase::Playing));
    assert_eq!(h.player.phase(), Phase::Playing);
}

#[test]
fn pause_during_a_hold_keeps_playback_paused() {
    let h = Harness::new(STREAM, stream());
    h.playing();
    let pipeline = h.pipeline();

    h.sim.post(report(30));
    assert!(wait_until(|| h.player.phase() == Phase::Paused));
    h.player.pause().unwrap();
    assert!(h.announced_within(Phase::Paused));

    h.sim.post(report(100));
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::Buffering { percent: 100 })));
    std::thread::sleep(ms(50));
    assert_eq!(h.sim.phase_of(pipeline), Some(Phase::Paused));
    assert_eq!(h.player.phase(), Phase::Paused);
}

#[test]
fn local_content_ignores_buffering_reports() {
    let h = Harness::new("/music/one.ogg", track());
    h.playing();
    h.sim.post(report(5));
    h.sim.post(Notification::Warning {
        origin: None,
        detail: "marker".into(),
    });
    assert!(h.log.wait_for(1, WAIT, |m| matches!(m, PlayerMessage::Warning { .. })));
    assert_eq!(h.log.count(|m| matches!(m, PlayerMessage::Buffering { .. })), 0);
    assert_eq!(h.player.phase(), Phase::Playing);
}
