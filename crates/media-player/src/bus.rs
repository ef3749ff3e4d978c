//! Bus dispatcher.
//!
//! Engine notifications are queued onto a dedicated thread and handled in
//! order: phase bookkeeping, end-of-stream and repeat, error classification,
//! buffering episodes, clock loss and resource revocation. Tags and duration
//! updates are folded into the attribute store on the producing thread before
//! the dispatcher sees anything queued after them.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use media_player_types::{
    CodecMissingKind, ErrorCode, MediaKind, Phase, PlayerMessage, StreamingErrorKind,
};

use crate::attrs::{AttrValue, AttributeStore, keys};
use crate::buffering::BufferingAction;
use crate::engine::{
    BufferingReport, ErrorDomain, NodeId, Notification, ResourceError, SeekRequest, StreamError,
    TagList, TagValue,
};
use crate::error::PlayerError;
use crate::graph::NodeRole;
use crate::session::Core;
use crate::worker::Job;

/// Items processed by the dispatcher thread.
#[derive(Debug)]
pub(crate) enum BusItem {
    Engine(Notification),
    /// Autoplugging finished without a usable stream.
    BuildFailed(CodecMissingKind),
    Deliver(PlayerMessage),
    Shutdown,
}

pub(crate) fn spawn_bus(rx: Receiver<BusItem>, core: Weak<Core>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("player-bus".to_string())
        .spawn(move || {
            while let Ok(item) = rx.recv() {
                if matches!(item, BusItem::Shutdown) {
                    break;
                }
                let Some(core) = core.upgrade() else {
                    break;
                };
                core.dispatch(item);
            }
            tracing::debug!("bus dispatcher exiting");
        })
}

/// Map an engine error to the public taxonomy. `origin` is the media kind of
/// the reporting node when it belongs to one.
pub fn classify(domain: ErrorDomain, origin: Option<MediaKind>) -> ErrorCode {
    match domain {
        ErrorDomain::Core | ErrorDomain::Library => ErrorCode::Internal,
        ErrorDomain::Resource(r) => match r {
            ResourceError::NotFound | ResourceError::OpenRead => ErrorCode::InvalidArgument,
            ResourceError::Busy | ResourceError::Write | ResourceError::NoSpaceLeft => {
                ErrorCode::ResourceDenied
            }
            ResourceError::Settings | ResourceError::Failed => ErrorCode::Internal,
        },
        ErrorDomain::Stream(s) => match s {
            StreamError::CodecNotFound | StreamError::Decode => {
                ErrorCode::CodecMissing(match origin {
                    Some(MediaKind::Audio) => CodecMissingKind::Audio,
                    Some(MediaKind::Video) => CodecMissingKind::Video,
                    _ => CodecMissingKind::UnsupportedFormat,
                })
            }
            StreamError::TypeNotFound | StreamError::WrongType | StreamError::Format => {
                ErrorCode::CodecMissing(CodecMissingKind::UnsupportedFormat)
            }
            StreamError::Demux => ErrorCode::CodecMissing(CodecMissingKind::Demuxer),
            StreamError::Decrypt => ErrorCode::ResourceDenied,
            StreamError::Failed => ErrorCode::Internal,
        },
    }
}

/// Streaming-protocol code to public error; unknown codes are internal.
pub fn streaming_code(code: u32) -> ErrorCode {
    StreamingErrorKind::from_code(code)
        .map(ErrorCode::Streaming)
        .unwrap_or(ErrorCode::Internal)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagMerge {
    pub merged: usize,
    pub bitrate: Option<u64>,
}

/// Fold recognised tags into the store. Unknown tags are skipped.
pub fn merge_tags(attrs: &dyn AttributeStore, tags: &TagList) -> TagMerge {
    let mut out = TagMerge::default();
    for (name, value) in tags {
        let key = match name.as_str() {
            "title" => keys::TITLE,
            "artist" => keys::ARTIST,
            "album" => keys::ALBUM,
            "audio-codec" => keys::AUDIO_CODEC,
            "video-codec" => keys::VIDEO_CODEC,
            "duration" => keys::DURATION_MS,
            "bitrate" => {
                if let TagValue::UInt(bps) = value {
                    out.bitrate = Some(*bps);
                    out.merged += 1;
                }
                continue;
            }
            _ => continue,
        };
        let stored = match value {
            TagValue::Str(s) => AttrValue::Str(s.clone()),
            TagValue::UInt(v) => AttrValue::Int(i64::try_from(*v).unwrap_or(i64::MAX)),
            TagValue::Time(d) => AttrValue::Int(d.as_millis() as i64),
        };
        attrs.set(key, stored);
        out.merged += 1;
    }
    out
}

fn role_kind(role: NodeRole) -> Option<MediaKind> {
    match role {
        NodeRole::Parser(k)
        | NodeRole::Decoder(k)
        | NodeRole::Selector(k)
        | NodeRole::Converter(k)
        | NodeRole::Sink(k) => Some(k),
        _ => None,
    }
}

impl Core {
    pub(crate) fn dispatch(&self, item: BusItem) {
        match item {
            BusItem::Engine(n) => self.on_notification(n),
            BusItem::BuildFailed(kind) => {
                let detail = match kind {
                    CodecMissingKind::Demuxer => "no demuxer could handle the container",
                    CodecMissingKind::UnsupportedFormat => "unsupported content format",
                    CodecMissingKind::Audio => "no audio decoder",
                    CodecMissingKind::Video => "no video decoder",
                };
                tracing::error!(?kind, detail, "build failed");
                self.fail(PlayerError::CodecMissing(kind));
            }
            BusItem::Deliver(message) => self.outbox.send(message),
            BusItem::Shutdown => {}
        }
    }

    fn on_notification(&self, n: Notification) {
        match n {
            Notification::PhaseChanged { node, current, .. } => self.on_phase_changed(node, current),
            Notification::AsyncDone { node } => {
                if self.pipeline() != Some(node) {
                    return;
                }
                let was_seeking = std::mem::replace(&mut self.lock_session().seeking, false);
                if was_seeking {
                    self.phase_cv.notify_all();
                    self.outbox.send(PlayerMessage::SeekCompleted);
                }
            }
            Notification::Eos { .. } => self.on_eos(),
            Notification::Error {
                origin,
                domain,
                detail,
            } => {
                let kind = origin
                    .and_then(|o| self.graph.lock().unwrap().as_ref().and_then(|g| g.role_of(o)))
                    .and_then(role_kind);
                let code = classify(domain, kind);
                tracing::error!(?domain, ?code, origin = ?origin, detail = %detail, "engine error");
                self.fail(PlayerError::from_code(code, &detail));
            }
            Notification::Warning { origin, detail } => {
                tracing::debug!(origin = ?origin, "engine warning");
                self.outbox.warn(None, detail);
            }
            Notification::StreamingError { code, detail } => {
                let code = streaming_code(code);
                self.fail(PlayerError::from_code(code, &detail));
            }
            Notification::Buffering(report) => self.on_buffering(&report),
            Notification::ClockLost => self.on_clock_lost(),
            Notification::ResourceRevoked => self.worker.submit(Job::PauseForRevoke),
            Notification::Tag { origin, tags } => self.on_tags(origin, &tags),
            Notification::DurationChanged { duration } => self.on_duration(duration),
        }
    }

    fn on_phase_changed(&self, node: NodeId, current: Phase) {
        {
            let mut g = self.graph.lock().unwrap();
            match g.as_mut() {
                Some(graph) if graph.pipeline == node => {
                    graph.sync_phase = current.max(Phase::Paused);
                }
                _ => return,
            }
        }

        let (first_paused, first_playing, bos) = {
            let mut s = self.lock_session();
            let first_paused = current == Phase::Paused && !s.tracker.paused_once;
            if first_paused {
                s.tracker.paused_once = true;
            }
            let first_playing = current == Phase::Playing && !s.tracker.playing_once;
            if first_playing {
                s.tracker.playing_once = true;
                s.buffering.mark_playing();
            }
            let bos = first_playing && !s.tracker.sent_bos;
            if bos {
                s.tracker.sent_bos = true;
            }
            (first_paused, first_playing, bos)
        };
        if first_paused {
            self.snapshot_metadata();
        }
        if first_playing {
            self.report_missing_codecs();
        }

        let announce = {
            let mut s = self.lock_session();
            let announce = s.tracker.on_changed(current);
            // A buffering hold parks the engine in paused while the caller still wants playing.
            if s.hold && current == Phase::Paused && s.tracker.target == Phase::Playing {
                s.tracker.pending = Some(Phase::Playing);
            }
            announce
        };
        self.phase_cv.notify_all();
        tracing::debug!(?current, "pipeline phase");
        self.announce(announce);
        if bos {
            self.outbox.send(PlayerMessage::BeginOfStream);
        }
    }

    pub(crate) fn on_eos(&self) {
        if self.gapless.defer_eos() {
            tracing::debug!("end-of-stream held while the next item is staged");
            return;
        }
        let count = self.attrs.get_int(keys::PLAY_COUNT).unwrap_or(1);
        if count > 1 || count == -1 {
            if count > 1 {
                self.attrs.set(keys::PLAY_COUNT, AttrValue::Int(count - 1));
            }
            tracing::info!(play_count = count, "repeating current item");
            self.worker.submit(Job::Rewind);
            return;
        }
        self.attrs.set(keys::PLAY_COUNT, AttrValue::Int(0));
        let generation = self.lock_session().eos_generation;
        self.worker.submit(Job::DelayedEos {
            generation,
            delay: self.config.eos_delay(),
        });
    }

    fn on_buffering(&self, report: &BufferingReport) {
        let Some(pipeline) = self.pipeline() else {
            return;
        };
        let update = {
            let mut s = self.lock_session();
            let (current, target) = (s.tracker.current, s.tracker.target);
            let update = s.buffering.on_report(report, current, target);
            match update.action {
                BufferingAction::Pause => s.hold = true,
                BufferingAction::Resume { .. } | BufferingAction::NotifyOnly => s.hold = false,
                BufferingAction::None => {}
            }
            update
        };
        if update.notify {
            self.outbox.send(PlayerMessage::Buffering {
                percent: update.percent,
            });
        }
        match update.action {
            BufferingAction::Pause => {
                tracing::info!(percent = update.percent, "holding playback for buffering");
                if let Err(e) = self.engine.set_phase(pipeline, Phase::Paused) {
                    tracing::warn!("buffering pause failed: {e:#}");
                }
            }
            BufferingAction::Resume { reposition } => {
                if reposition {
                    if let Some(position) = self.engine.position(pipeline) {
                        if let Err(e) = self.engine.seek(pipeline, SeekRequest::flushing(position)) {
                            tracing::warn!("reposition after buffering failed: {e:#}");
                        }
                    }
                }
                tracing::info!("buffering done; resuming");
                if let Err(e) = self.engine.set_phase(pipeline, Phase::Playing) {
                    tracing::warn!("buffering resume failed: {e:#}");
                }
            }
            BufferingAction::NotifyOnly | BufferingAction::None => {}
        }
        self.phase_cv.notify_all();
    }

    /// Cycle through paused so the pipeline picks a new clock.
    fn on_clock_lost(&self) {
        let Some(pipeline) = self.pipeline() else {
            return;
        };
        if self.lock_session().tracker.current != Phase::Playing {
            return;
        }
        tracing::info!("clock lost; reselecting");
        for phase in [Phase::Paused, Phase::Playing] {
            if let Err(e) = self.engine.set_phase(pipeline, phase) {
                tracing::warn!(?phase, "clock reselection failed: {e:#}");
                return;
            }
        }
    }

    pub(crate) fn on_tags(&self, origin: Option<NodeId>, tags: &TagList) {
        let merge = merge_tags(self.attrs.as_ref(), tags);
        if let Some(bps) = merge.bitrate {
            let total = {
                let mut s = self.lock_session();
                s.buffering.bitrates.record(origin, bps);
                s.buffering.bitrates.total()
            };
            self.attrs
                .set(keys::BITRATE, AttrValue::Int(i64::try_from(total).unwrap_or(i64::MAX)));
        }
        if merge.merged > 0 {
            if let Err(e) = self.bus_tx.send(BusItem::Deliver(PlayerMessage::TagUpdated)) {
                tracing::warn!("tag update not queued: {e:#}");
            }
        }
    }

    pub(crate) fn on_duration(&self, duration: Option<Duration>) {
        if let Some(d) = duration {
            self.attrs
                .set(keys::DURATION_MS, AttrValue::Int(d.as_millis() as i64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::MemoryAttributes;

    #[test]
    fn classification_table() {
        use ErrorDomain::{Resource, Stream};
        assert_eq!(classify(Resource(ResourceError::NotFound), None), ErrorCode::InvalidArgument);
        assert_eq!(classify(Resource(ResourceError::Busy), None), ErrorCode::ResourceDenied);
        assert_eq!(classify(Resource(ResourceError::Settings), None), ErrorCode::Internal);
        assert_eq!(
            classify(Stream(StreamError::Decode), Some(MediaKind::Video)),
            ErrorCode::CodecMissing(CodecMissingKind::Video)
        );
        assert_eq!(
            classify(Stream(StreamError::CodecNotFound), None),
            ErrorCode::CodecMissing(CodecMissingKind::UnsupportedFormat)
        );
        assert_eq!(
            classify(Stream(StreamError::Demux), None),
            ErrorCode::CodecMissing(CodecMissingKind::Demuxer)
        );
        assert_eq!(classify(Stream(StreamError::Decrypt), None), ErrorCode::ResourceDenied);
        assert_eq!(classify(ErrorDomain::Core, Some(MediaKind::Audio)), ErrorCode::Internal);
    }

    #[test]
    fn streaming_codes_map_to_kinds() {
        assert_eq!(
            streaming_code(404),
            ErrorCode::Streaming(StreamingErrorKind::ContentNotFound)
        );
        assert_eq!(streaming_code(9), ErrorCode::Streaming(StreamingErrorKind::Timeout));
        assert_eq!(streaming_code(1234), ErrorCode::Internal);
    }

    #[test]
    fn tags_merge_into_store() {
        let attrs = MemoryAttributes::new();
        let tags: TagList = vec![
            ("title".into(), TagValue::Str("Intro".into())),
            ("bitrate".into(), TagValue::UInt(128_000)),
            ("duration".into(), TagValue::Time(Duration::from_secs(3))),
            ("comment".into(), TagValue::Str("skipped".into())),
        ];
        let merge = merge_tags(&attrs, &tags);
        assert_eq!(merge, TagMerge { merged: 3, bitrate: Some(128_000) });
        assert_eq!(attrs.get_str(keys::TITLE).as_deref(), Some("Intro"));
        assert_eq!(attrs.get_int(keys::DURATION_MS), Some(3_000));
        assert_eq!(attrs.get(keys::BITRATE), None);
    }
}
